//! Bluetooth presence sensor.
//!
//! Polls a catalog of known Bluetooth devices one at a time, reports whether
//! each is in range over MQTT, and reacts to commands asking it to refresh its
//! catalog or scan for new devices.

pub mod bus;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod instance_lock;
pub mod probe;
pub mod scheduler;
pub mod sensor;
pub mod topics;

#[cfg(test)]
pub(crate) mod test_support;
