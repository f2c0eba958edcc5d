//! Scripted transport for exercising the session without a radio.
//!
//! Scan, connect, and discovery complete instantly; reads answer with
//! canned payloads (or are withheld to simulate a stalled peripheral);
//! writes are recorded with a timestamp so tests can assert on debounce
//! timing. Link loss is injected by sending events through a clone of the
//! transport's event sender.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::models::Attribute;
use crate::infrastructure::bluetooth::transport::{
    PeripheralId, Transport, TransportError, TransportEvent, TransportEventSender,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub attribute: Attribute,
    pub payload: Vec<u8>,
    pub at: Instant,
}

pub struct MockTransport {
    events: TransportEventSender,
    writes: Arc<Mutex<Vec<RecordedWrite>>>,
    /// When false, read requests are accepted but never completed,
    /// simulating a peripheral that stops answering mid-sequence.
    auto_reads: bool,
    canned: HashMap<Attribute, Vec<u8>>,
    connected: bool,
}

impl MockTransport {
    pub fn new(events: TransportEventSender) -> Self {
        let canned = HashMap::from([
            (Attribute::Brightness, vec![128]),
            (Attribute::Animation, vec![1]),
            (Attribute::DelayTime, vec![50]),
            (Attribute::Color, vec![0, 255, 255]),
        ]);
        Self {
            events,
            writes: Arc::new(Mutex::new(Vec::new())),
            auto_reads: true,
            canned,
            connected: false,
        }
    }

    /// Share the write log with the test.
    pub fn recording_to(mut self, writes: Arc<Mutex<Vec<RecordedWrite>>>) -> Self {
        self.writes = writes;
        self
    }

    pub fn auto_reads(mut self, auto_reads: bool) -> Self {
        self.auto_reads = auto_reads;
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start_scan(&mut self) -> Result<(), TransportError> {
        let _ = self
            .events
            .send(TransportEvent::PeripheralDiscovered(PeripheralId(
                "mock-peripheral".to_string(),
            )));
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn connect(&mut self, _peripheral: &PeripheralId) -> Result<(), TransportError> {
        self.connected = true;
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn discover_attributes(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let _ = self.events.send(TransportEvent::AttributesDiscovered);
        Ok(())
    }

    async fn read_attribute(&mut self, attribute: Attribute) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.auto_reads {
            let bytes = self.canned.get(&attribute).cloned().unwrap_or_default();
            let _ = self
                .events
                .send(TransportEvent::ReadCompleted { attribute, bytes });
        }
        Ok(())
    }

    async fn write_attribute(
        &mut self,
        attribute: Attribute,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.writes.lock().unwrap().push(RecordedWrite {
            attribute,
            payload: payload.to_vec(),
            at: Instant::now(),
        });
        let _ = self.events.send(TransportEvent::WriteCompleted { attribute });
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}
