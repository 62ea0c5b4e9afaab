//! Bluetooth Service Module
//!
//! Main service that coordinates scanning, connection and command dispatch
//! for one GoPro camera.

use crate::domain::models::{AppEvent, ConnectionStatus, DiscoveredDevice, WifiCredentials};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::{
    adapter::BleAdapter,
    connection::{ConnectionConfig, ConnectionHandle, ConnectionManager},
    dispatcher::CommandDispatcher,
    error::{BleError, BleResult},
    pairing::{PairingTrigger, WriteCommandPairing},
    protocol::{
        self, CameraCommand, WIFI_ACCESS_POINT_SERVICE_UUID, WIFI_PASSWORD_CHAR_UUID,
        WIFI_SSID_CHAR_UUID,
    },
    scanner::{BleScanner, ScanConfig},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService<A: BleAdapter> {
    scanner: BleScanner<A>,
    connections: ConnectionManager<A>,
    dispatcher: CommandDispatcher<A>,
    scan_config: ScanConfig,
}

impl<A: BleAdapter> BluetoothService<A> {
    /// Create a service using the write-command pairing shortcut
    pub fn new(
        adapter: Arc<A>,
        settings: &Settings,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let pairing = Arc::new(WriteCommandPairing::new(CommandDispatcher::new(
            Arc::clone(&adapter),
            settings.command_timeout(),
        )));
        Self::with_pairing(adapter, settings, pairing, event_sender)
    }

    /// Create a service with a custom pairing trigger
    pub fn with_pairing(
        adapter: Arc<A>,
        settings: &Settings,
        pairing: Arc<dyn PairingTrigger>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            scanner: BleScanner::new(Arc::clone(&adapter), event_sender.clone()),
            connections: ConnectionManager::new(
                Arc::clone(&adapter),
                pairing,
                ConnectionConfig::from_settings(settings),
                event_sender,
            ),
            dispatcher: CommandDispatcher::new(adapter, settings.command_timeout()),
            scan_config: ScanConfig::from_settings(settings),
        }
    }

    /// Start scanning with the configured filter and timeout
    pub async fn start_scan(&self) -> BleResult<()> {
        self.scanner.start(&self.scan_config).await
    }

    pub async fn start_scan_with(&self, config: &ScanConfig) -> BleResult<()> {
        self.scanner.start(config).await
    }

    /// Stop scanning
    pub async fn stop_scan(&self) {
        self.scanner.stop().await
    }

    /// Run a full scan and return everything observed
    pub async fn scan(&self, config: &ScanConfig) -> BleResult<Vec<DiscoveredDevice>> {
        self.scanner.start(config).await?;
        self.scanner.finished().await;
        Ok(self.scanner.results())
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub fn scan_results(&self) -> Vec<DiscoveredDevice> {
        self.scanner.results()
    }

    /// Connect to a camera; pairing is triggered before this returns
    pub async fn connect(&self, device_id: &str) -> BleResult<ConnectionHandle> {
        self.connections.connect(device_id).await
    }

    pub async fn disconnect(&self, handle: &ConnectionHandle) -> BleResult<()> {
        self.connections.disconnect(handle).await
    }

    /// Disconnect whatever session is currently connected
    pub async fn disconnect_active(&self) -> BleResult<()> {
        let handle = self.connections.active().ok_or(BleError::NotConnected)?;
        self.connections.disconnect(&handle).await
    }

    /// Send a command to the connected camera
    pub async fn send_command(&self, command: CameraCommand) -> BleResult<()> {
        let active = self.connections.active();
        self.dispatcher.send(active.as_ref(), command).await
    }

    pub async fn read_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> BleResult<Vec<u8>> {
        let active = self.connections.active();
        self.dispatcher
            .read(active.as_ref(), service, characteristic)
            .await
    }

    /// Read the camera's Wi-Fi access point SSID and password
    pub async fn read_wifi_credentials(&self) -> BleResult<WifiCredentials> {
        let ssid = self
            .read_characteristic(WIFI_ACCESS_POINT_SERVICE_UUID, WIFI_SSID_CHAR_UUID)
            .await?;
        let password = self
            .read_characteristic(WIFI_ACCESS_POINT_SERVICE_UUID, WIFI_PASSWORD_CHAR_UUID)
            .await?;
        Ok(WifiCredentials {
            ssid: protocol::decode_text(&ssid),
            password: protocol::decode_text(&password),
        })
    }

    pub fn active_connection(&self) -> Option<ConnectionHandle> {
        self.connections.active()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connections.status()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.connections.active().is_some()
    }
}
