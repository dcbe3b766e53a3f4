//! Hexagonal boundary of the control core.
//!
//! All interaction with hardware happens through the **port traits**
//! defined in [`ports`], keeping the jobs fully testable without real
//! peripherals.

pub mod ports;
