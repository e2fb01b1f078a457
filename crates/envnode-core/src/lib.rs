//! Hardware-independent core of the envnode sensor firmware.
//!
//! Everything that decides *when* things happen lives here: the report
//! interval, the display callup window, broker reconnection and the single
//! cooperative [`ControlLoop`](control_loop::ControlLoop) that ties them
//! together. Hardware is reached only through the traits in [`peripherals`],
//! so the crate builds for the ESP32-S3 and for the host test runner alike.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod callup;
pub mod config;
pub mod control_loop;
pub mod identity;
pub mod interval;
pub mod peripherals;
pub mod reconnect;
pub mod reset_detector;
pub mod settings;
pub mod status_view;
pub mod telemetry;

#[cfg(test)]
mod testing;
