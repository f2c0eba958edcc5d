//! Bluetooth plumbing for the LED controller.
//!
//! - [`protocol`] - the GATT contract: UUIDs and payload encode/decode
//! - [`transport`] - the trait and event types the session consumes
//! - [`btleplug_backend`] - the real transport, on the platform BLE stack
//! - `mock` (tests only) - a scripted transport for session tests

pub mod btleplug_backend;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub mod mock;
