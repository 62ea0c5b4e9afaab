//! Platform adapter seam
//!
//! Everything the session needs from the radio. The production backend is
//! [`BtleplugAdapter`](super::btleplug_adapter::BtleplugAdapter); tests run
//! against a recording mock.

use crate::domain::models::DiscoveredDevice;
use crate::infrastructure::bluetooth::error::TransportError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Advertised-service filter for a scan
///
/// An empty filter matches every nearby peripheral.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFilter {
    pub services: Vec<Uuid>,
}

impl ServiceFilter {
    pub fn service(uuid: Uuid) -> Self {
        Self {
            services: vec![uuid],
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        self.services.is_empty() || self.services.iter().any(|s| device.advertises(s))
    }
}

#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    /// Bring up the adapter. Must succeed before scanning.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Start a scan; every advertisement observed is sent on `results`
    /// until [`stop_scan`](Self::stop_scan) is called.
    async fn start_scan(
        &self,
        filter: &ServiceFilter,
        results: mpsc::UnboundedSender<DiscoveredDevice>,
    ) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Open a link to `device_id`. If the peripheral later drops the link,
    /// its id is sent once on `on_disconnect`.
    async fn connect(
        &self,
        device_id: &str,
        on_disconnect: mpsc::UnboundedSender<String>,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self, device_id: &str) -> Result<(), TransportError>;

    async fn write(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    async fn read(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError>;
}
