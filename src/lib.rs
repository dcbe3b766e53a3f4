//! Charger firmware library.
//!
//! Exposes the control core (store, measurement, dispatcher, cooling,
//! connectivity, command processing, scheduler) and its adapters for
//! integration testing and the simulation binary.  All ESP-IDF-specific
//! code is guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod connectivity;
pub mod cooling;
pub mod diagnostics;
pub mod error;
pub mod fsm;
pub mod runtime;
pub mod safety;
pub mod scheduler;
pub mod telemetry;

pub mod adapters;
pub mod control;
pub mod drivers;
pub mod pins;
pub mod sensors;

#[cfg(target_os = "espidf")]
mod esp_link_shims;
