//! `btleplug`-backed transport.
//!
//! Wraps the platform BLE stack behind the [`Transport`] trait: a scan
//! filtered on the controller service UUID, a central event pump that
//! forwards discoveries and link loss, and per-characteristic reads and
//! writes. Long-running radio operations (connect, read, write) run in
//! spawned tasks so no trait method blocks the session; their outcomes
//! arrive as [`TransportEvent`]s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::Attribute;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    PeripheralId, Transport, TransportError, TransportEvent, TransportEventSender,
};

/// The GATT identifiers the transport looks for. Defaults to the
/// controller contract in [`protocol`]; overridable through settings for
/// reflashed peripherals.
#[derive(Debug, Clone, Copy)]
pub struct AttributeUuids {
    pub service: Uuid,
    pub brightness: Uuid,
    pub animation: Uuid,
    pub delay_time: Uuid,
    pub color: Uuid,
}

impl AttributeUuids {
    pub fn for_attribute(&self, attribute: Attribute) -> Uuid {
        match attribute {
            Attribute::Brightness => self.brightness,
            Attribute::Animation => self.animation,
            Attribute::DelayTime => self.delay_time,
            Attribute::Color => self.color,
        }
    }
}

impl Default for AttributeUuids {
    fn default() -> Self {
        Self {
            service: protocol::SERVICE_UUID,
            brightness: protocol::BRIGHTNESS_CHAR_UUID,
            animation: protocol::ANIMATION_CHAR_UUID,
            delay_time: protocol::DELAY_TIME_CHAR_UUID,
            color: protocol::COLOR_CHAR_UUID,
        }
    }
}

fn backend(error: btleplug::Error) -> TransportError {
    TransportError::Backend(error.into())
}

pub struct BtleplugTransport {
    events: TransportEventSender,
    uuids: AttributeUuids,
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    characteristics: HashMap<Attribute, Characteristic>,
    /// Peripheral id the pump should report link loss for.
    current: Arc<Mutex<Option<String>>>,
    event_pump: Option<JoinHandle<()>>,
}

impl BtleplugTransport {
    pub fn new(events: TransportEventSender, uuids: AttributeUuids) -> Self {
        Self {
            events,
            uuids,
            adapter: None,
            peripheral: None,
            characteristics: HashMap::new(),
            current: Arc::new(Mutex::new(None)),
            event_pump: None,
        }
    }

    /// Lazily acquire the first available adapter.
    async fn adapter(&mut self) -> Result<&Adapter, TransportError> {
        if self.adapter.is_none() {
            let manager = Manager::new().await.map_err(backend)?;
            let adapter = manager
                .adapters()
                .await
                .map_err(backend)?
                .into_iter()
                .next()
                .ok_or(TransportError::NoAdapter)?;
            let name = adapter.adapter_info().await.map_err(backend)?;
            info!(%name, "using adapter");
            self.adapter = Some(adapter);
        }
        self.adapter.as_ref().ok_or(TransportError::NoAdapter)
    }

    /// Forward central events onto the transport event channel. Started
    /// once, on the first scan.
    async fn start_event_pump(&mut self) -> Result<(), TransportError> {
        if self.event_pump.is_some() {
            return Ok(());
        }
        let adapter = self.adapter().await?;
        let mut stream = adapter.events().await.map_err(backend)?;

        let events = self.events.clone();
        let current = self.current.clone();
        self.event_pump = Some(tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) => {
                        let _ = events.send(TransportEvent::PeripheralDiscovered(PeripheralId(
                            id.to_string(),
                        )));
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let ours = current
                            .lock()
                            .map(|c| c.as_deref() == Some(id.to_string().as_str()))
                            .unwrap_or(false);
                        if ours {
                            let _ = events.send(TransportEvent::Disconnected);
                        } else {
                            debug!(%id, "ignoring disconnect of unrelated peripheral");
                        }
                    }
                    _ => {}
                }
            }
        }));
        Ok(())
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn start_scan(&mut self) -> Result<(), TransportError> {
        self.start_event_pump().await?;
        let service = self.uuids.service;
        let adapter = self.adapter().await?;
        adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(backend)?;
        info!(%service, "scanning for LED controller");
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<(), TransportError> {
        if let Some(adapter) = &self.adapter {
            adapter.stop_scan().await.map_err(backend)?;
        }
        Ok(())
    }

    async fn connect(&mut self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        let adapter = self.adapter().await?;
        let found = adapter
            .peripherals()
            .await
            .map_err(backend)?
            .into_iter()
            .find(|p| p.id().to_string() == peripheral.0);
        let Some(found) = found else {
            return Err(TransportError::Backend(anyhow::anyhow!(
                "peripheral {peripheral} no longer known to the adapter"
            )));
        };

        if let Ok(mut current) = self.current.lock() {
            *current = Some(peripheral.0.clone());
        }
        self.peripheral = Some(found.clone());

        let events = self.events.clone();
        tokio::spawn(async move {
            match found.connect().await {
                Ok(()) => {
                    info!("peripheral connected");
                    let _ = events.send(TransportEvent::Connected);
                }
                Err(error) => {
                    warn!(%error, "connect failed");
                    let _ = events.send(TransportEvent::Failed(backend(error)));
                }
            }
        });
        Ok(())
    }

    async fn discover_attributes(&mut self) -> Result<(), TransportError> {
        let peripheral = self.peripheral.as_ref().ok_or(TransportError::NotConnected)?;
        peripheral.discover_services().await.map_err(backend)?;

        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == self.uuids.service)
            .ok_or(TransportError::ServiceNotFound)?;
        debug!(uuid = %service.uuid, "controller service found");

        self.characteristics.clear();
        for attribute in Attribute::ALL {
            let uuid = self.uuids.for_attribute(attribute);
            let characteristic = service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or(TransportError::CharacteristicNotFound(attribute))?;
            self.characteristics.insert(attribute, characteristic);
        }

        let _ = self.events.send(TransportEvent::AttributesDiscovered);
        Ok(())
    }

    async fn read_attribute(&mut self, attribute: Attribute) -> Result<(), TransportError> {
        let peripheral = self
            .peripheral
            .as_ref()
            .ok_or(TransportError::NotConnected)?
            .clone();
        let characteristic = self
            .characteristics
            .get(&attribute)
            .ok_or(TransportError::CharacteristicNotFound(attribute))?
            .clone();

        let events = self.events.clone();
        tokio::spawn(async move {
            match peripheral.read(&characteristic).await {
                Ok(bytes) => {
                    let _ = events.send(TransportEvent::ReadCompleted { attribute, bytes });
                }
                Err(error) => {
                    warn!(%attribute, %error, "characteristic read failed");
                    let _ = events.send(TransportEvent::Failed(TransportError::ReadFailed(
                        attribute,
                    )));
                }
            }
        });
        Ok(())
    }

    async fn write_attribute(
        &mut self,
        attribute: Attribute,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let peripheral = self
            .peripheral
            .as_ref()
            .ok_or(TransportError::NotConnected)?
            .clone();
        let characteristic = self
            .characteristics
            .get(&attribute)
            .ok_or(TransportError::CharacteristicNotFound(attribute))?
            .clone();
        let payload = payload.to_vec();

        let events = self.events.clone();
        tokio::spawn(async move {
            match peripheral
                .write(&characteristic, &payload, WriteType::WithResponse)
                .await
            {
                Ok(()) => {
                    let _ = events.send(TransportEvent::WriteCompleted { attribute });
                }
                Err(error) => {
                    warn!(%attribute, %error, "characteristic write failed");
                    let _ = events.send(TransportEvent::Failed(TransportError::WriteFailed(
                        attribute,
                    )));
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
        self.characteristics.clear();
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(error) = peripheral.disconnect().await {
                warn!(%error, "disconnect reported an error");
            }
        }
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.event_pump.take() {
            pump.abort();
        }
    }
}
