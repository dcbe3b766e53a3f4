//! Closed-loop control helpers.

pub mod pid;
