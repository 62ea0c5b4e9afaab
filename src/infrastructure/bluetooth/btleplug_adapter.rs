//! btleplug backend
//!
//! Talks to the first Bluetooth adapter reported by the OS. Device ids are
//! the platform `PeripheralId` rendered as a string.

use crate::domain::models::{AdvertisementData, DiscoveredDevice};
use crate::infrastructure::bluetooth::adapter::{BleAdapter, ServiceFilter};
use crate::infrastructure::bluetooth::error::TransportError;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An open link and the task watching it for peripheral-initiated loss
struct Link {
    peripheral: Peripheral,
    watcher: JoinHandle<()>,
}

pub struct BtleplugAdapter {
    adapter: OnceCell<Adapter>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    links: Arc<Mutex<HashMap<String, Link>>>,
}

impl BtleplugAdapter {
    pub fn new() -> Self {
        Self {
            adapter: OnceCell::new(),
            scan_task: Mutex::new(None),
            links: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn adapter(&self) -> Result<&Adapter, TransportError> {
        self.adapter
            .get_or_try_init(|| async {
                let manager = Manager::new().await?;
                let adapter = manager
                    .adapters()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(TransportError::AdapterNotAvailable)?;
                info!("BLE adapter initialized");
                Ok::<_, TransportError>(adapter)
            })
            .await
    }

    async fn find_peripheral(
        adapter: &Adapter,
        device_id: &str,
    ) -> Result<Peripheral, TransportError> {
        adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == device_id)
            .ok_or_else(|| TransportError::DeviceNotFound(device_id.to_string()))
    }

    fn linked_peripheral(&self, device_id: &str) -> Result<Peripheral, TransportError> {
        let links = self
            .links
            .lock()
            .map_err(|_| TransportError::Other("Lock error".to_string()))?;
        links
            .get(device_id)
            .map(|link| link.peripheral.clone())
            .ok_or(TransportError::LinkLost)
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, TransportError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or(TransportError::CharacteristicNotFound(characteristic))
    }
}

impl Default for BtleplugAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn initialize(&self) -> Result<(), TransportError> {
        self.adapter().await.map(|_| ())
    }

    async fn start_scan(
        &self,
        filter: &ServiceFilter,
        results: mpsc::UnboundedSender<DiscoveredDevice>,
    ) -> Result<(), TransportError> {
        let adapter = self.adapter().await?.clone();
        let mut events = adapter.events().await?;

        adapter
            .start_scan(ScanFilter {
                services: filter.services.clone(),
            })
            .await?;

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };

                let device = DiscoveredDevice {
                    device_id: id.to_string(),
                    display_name: props.local_name,
                    raw_advertisement: AdvertisementData {
                        service_uuids: props.services,
                        rssi: props.rssi,
                        manufacturer_data: props.manufacturer_data,
                        service_data: props.service_data,
                    },
                };
                if results.send(device).is_err() {
                    break;
                }
            }
            debug!("Advertisement stream ended");
        });

        if let Ok(mut slot) = self.scan_task.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        if let Ok(mut slot) = self.scan_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        if let Some(adapter) = self.adapter.get() {
            adapter.stop_scan().await?;
        }
        Ok(())
    }

    async fn connect(
        &self,
        device_id: &str,
        on_disconnect: mpsc::UnboundedSender<String>,
    ) -> Result<(), TransportError> {
        let adapter = self.adapter().await?;
        let peripheral = Self::find_peripheral(adapter, device_id).await?;

        // Subscribe before connecting so an immediate drop is not missed
        let events = adapter.events().await?;

        peripheral.connect().await?;
        if let Err(e) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(e.into());
        }

        // Held until the link is recorded so the watcher cannot forget it first
        let mut links = self
            .links
            .lock()
            .map_err(|_| TransportError::Other("Lock error".to_string()))?;

        let peripheral_id = peripheral.id();
        let device = device_id.to_string();
        let table = Arc::clone(&self.links);
        let watcher = tokio::spawn(async move {
            let dropped = forget_on_drop(
                events,
                |event| matches!(event, CentralEvent::DeviceDisconnected(id) if *id == peripheral_id),
                &table,
                &device,
            )
            .await;
            if dropped {
                let _ = on_disconnect.send(device);
            }
        });

        if let Some(stale) = links.insert(
            device_id.to_string(),
            Link {
                peripheral,
                watcher,
            },
        ) {
            warn!("Replacing stale link to {}", device_id);
            stale.watcher.abort();
        }
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), TransportError> {
        let link = self
            .links
            .lock()
            .map_err(|_| TransportError::Other("Lock error".to_string()))?
            .remove(device_id)
            .ok_or(TransportError::LinkLost)?;

        link.watcher.abort();
        link.peripheral.disconnect().await?;
        Ok(())
    }

    async fn write(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let peripheral = self.linked_peripheral(device_id)?;
        let target = Self::find_characteristic(&peripheral, service, characteristic)?;
        peripheral
            .write(&target, value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn read(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        let peripheral = self.linked_peripheral(device_id)?;
        let target = Self::find_characteristic(&peripheral, service, characteristic)?;
        Ok(peripheral.read(&target).await?)
    }
}

/// Wait for the event marking the peripheral's loss, then drop its entry
///
/// Returns false if the event stream ends first.
async fn forget_on_drop<S, T>(
    mut events: S,
    is_drop: impl Fn(&S::Item) -> bool,
    links: &Mutex<HashMap<String, T>>,
    device_id: &str,
) -> bool
where
    S: Stream + Unpin,
{
    while let Some(event) = events.next().await {
        if is_drop(&event) {
            if let Ok(mut links) = links.lock() {
                links.remove(device_id);
            }
            debug!("Peripheral {} dropped the link", device_id);
            return true;
        }
    }
    false
}

impl Drop for BtleplugAdapter {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.scan_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        if let Ok(mut links) = self.links.lock() {
            for (_, link) in links.drain() {
                link.watcher.abort();
            }
        }
    }
}
