use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Advertisement payload as reported by the platform adapter.
///
/// The controller never interprets it beyond the advertised service list,
/// which is what scan filtering is matched against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementData {
    pub service_uuids: Vec<Uuid>,
    pub rssi: Option<i16>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
}

/// One observed advertisement.
///
/// Repeated advertisements from the same peripheral produce repeated
/// entries; consumers must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Stable per physical device
    pub device_id: String,
    pub display_name: Option<String>,
    pub raw_advertisement: AdvertisementData,
}

impl DiscoveredDevice {
    pub fn new(device_id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            device_id: device_id.into(),
            display_name,
            raw_advertisement: AdvertisementData::default(),
        }
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.raw_advertisement.service_uuids = services.into_iter().collect();
        self
    }

    /// Name shown to the user, falling back to the device id
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.device_id)
    }

    pub fn advertises(&self, service: &Uuid) -> bool {
        self.raw_advertisement.service_uuids.contains(service)
    }
}

/// Credentials of the camera's Wi-Fi access point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Fired once per advertisement observed while scanning
    DeviceFound(DiscoveredDevice),
    ScanFinished {
        found: usize,
    },
    ConnectionStatus(ConnectionStatus),
    /// Peripheral-initiated loss of link
    Disconnected {
        device_id: String,
    },
    PairingFailed {
        device_id: String,
        reason: String,
    },
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
