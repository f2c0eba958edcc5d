//! The boundary between the session and whatever talks to a radio.
//!
//! Every operation is initiate-and-return: the call either fails to start
//! or comes back later as a [`TransportEvent`] on the channel handed to the
//! transport at construction. The session performs no retries and enforces
//! no timeouts; an implementation that never completes an operation stalls
//! the session, and the driver layer decides whether to start over.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::models::Attribute;

/// Backend-neutral identifier for a discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Asynchronous completion notifications from the transport, consumed by
/// the session in the order received.
#[derive(Debug)]
pub enum TransportEvent {
    PeripheralDiscovered(PeripheralId),
    Connected,
    Disconnected,
    AttributesDiscovered,
    ReadCompleted { attribute: Attribute, bytes: Vec<u8> },
    WriteCompleted { attribute: Attribute },
    Failed(TransportError),
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,
    #[error("LED controller service not found on peripheral")]
    ServiceNotFound,
    #[error("characteristic for {0} not found")]
    CharacteristicNotFound(Attribute),
    #[error("reading {0} failed")]
    ReadFailed(Attribute),
    #[error("writing {0} failed")]
    WriteFailed(Attribute),
    #[error("no active connection")]
    NotConnected,
    #[error("bluetooth backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// What the session requires from its environment.
#[async_trait]
pub trait Transport: Send {
    /// Begin scanning for peripherals advertising the controller service.
    /// Matches arrive as [`TransportEvent::PeripheralDiscovered`].
    async fn start_scan(&mut self) -> Result<(), TransportError>;

    async fn stop_scan(&mut self) -> Result<(), TransportError>;

    /// Initiate a connection; completion arrives as `Connected` or, on
    /// link failure, `Failed` / `Disconnected`.
    async fn connect(&mut self, peripheral: &PeripheralId) -> Result<(), TransportError>;

    /// Resolve the controller service and its four characteristics.
    /// Completion arrives as `AttributesDiscovered`.
    async fn discover_attributes(&mut self) -> Result<(), TransportError>;

    /// Request the current value of one attribute; the payload arrives as
    /// `ReadCompleted`.
    async fn read_attribute(&mut self, attribute: Attribute) -> Result<(), TransportError>;

    /// Send a new value for one attribute; confirmation arrives as
    /// `WriteCompleted`.
    async fn write_attribute(
        &mut self,
        attribute: Attribute,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Drop the active connection, if any. In-flight operations are
    /// abandoned, not awaited.
    async fn disconnect(&mut self);
}
