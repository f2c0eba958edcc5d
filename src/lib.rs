//! Control session for a BLE LED-strip controller.
//!
//! The peripheral exposes one service with four writable characteristics:
//! brightness, animation mode, inter-frame delay, and HSV color. This crate
//! provides a [`Session`] actor that scans for the peripheral, connects,
//! reads the initial values, and then mediates local changes to it:
//! validating ranges, coalescing slider bursts through per-attribute
//! debounce timers, and reporting everything back on an event channel.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{
    AnimationMode, Attribute, AttributeRequest, AttributeValue, Hsv, OutOfRange, SessionEvent,
    SessionState,
};
pub use domain::session::{Session, SessionConfig, SessionHandle, WritePolicies, WritePolicy};
pub use infrastructure::bluetooth::transport::{Transport, TransportError, TransportEvent};
