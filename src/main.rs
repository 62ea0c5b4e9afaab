use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gopro_ble_controller::domain::models::{AppEvent, DiscoveredDevice, MessageSeverity};
use gopro_ble_controller::domain::settings::SettingsService;
use gopro_ble_controller::infrastructure::bluetooth::adapter::{BleAdapter, ServiceFilter};
use gopro_ble_controller::infrastructure::bluetooth::protocol::CameraCommand;
use gopro_ble_controller::infrastructure::bluetooth::scanner::ScanConfig;
use gopro_ble_controller::infrastructure::bluetooth::{BluetoothService, BtleplugAdapter};
use gopro_ble_controller::infrastructure::logging;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "gopro-ble", version, about = "Control a GoPro camera over Bluetooth LE")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List nearby cameras
    Scan {
        /// Scan duration in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Show every BLE peripheral, not only cameras
        #[arg(long)]
        all: bool,
    },
    /// Start a capture
    Shutter(Target),
    /// Power the camera down
    Shutdown(Target),
    /// Turn on the camera's Wi-Fi access point
    WifiOn(Target),
    /// Print the camera's Wi-Fi access point credentials
    WifiInfo(Target),
}

#[derive(Args)]
struct Target {
    /// Device id; defaults to the last connected camera, then the first one found
    #[arg(long)]
    device: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = SettingsService::new()?;
    let _logging = logging::init_logger(&settings.get().log_settings)?;
    info!("Starting GoPro BLE controller");

    let (event_sender, event_receiver) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(report_events(event_receiver));

    let adapter = Arc::new(BtleplugAdapter::new());
    let service = BluetoothService::new(adapter, settings.get(), event_sender);

    let result = run(cli.command, &service, &mut settings).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }

    // Closing every sender lets the reporter drain what is still queued
    drop(service);
    if tokio::time::timeout(Duration::from_secs(2), reporter)
        .await
        .is_err()
    {
        debug!("event reporter did not finish");
    }
    result
}

async fn run<A: BleAdapter>(
    command: Command,
    service: &BluetoothService<A>,
    settings: &mut SettingsService,
) -> anyhow::Result<()> {
    let (target, action) = match command {
        Command::Scan { timeout_ms, all } => {
            let mut config = ScanConfig::from_settings(settings.get());
            if let Some(ms) = timeout_ms {
                config.timeout = Duration::from_millis(ms);
            }
            if all {
                config.filter = ServiceFilter::all();
            }
            let devices = service.scan(&config).await?;
            print_devices(&devices);
            return Ok(());
        }
        Command::Shutter(target) => (target, Some(CameraCommand::Shutter)),
        Command::Shutdown(target) => (target, Some(CameraCommand::Shutdown)),
        Command::WifiOn(target) => (target, Some(CameraCommand::EnableWifi)),
        Command::WifiInfo(target) => (target, None),
    };

    let device_id = pick_device(service, settings, target).await?;
    let handle = service.connect(&device_id).await?;
    if let Err(e) = settings.remember_device(&device_id) {
        warn!("Could not save settings: {}", e);
    }

    let outcome = match action {
        Some(command) => service.send_command(command).await.map_err(Into::into),
        None => service
            .read_wifi_credentials()
            .await
            .map(|credentials| {
                println!("ssid: {}", credentials.ssid);
                println!("password: {}", credentials.password);
            })
            .map_err(Into::into),
    };

    // A camera that was told to shut down may already be gone
    if let Err(e) = service.disconnect(&handle).await {
        debug!("disconnect after command: {}", e);
    }
    outcome
}

/// Scan so the platform knows the peripheral, then choose the target
async fn pick_device<A: BleAdapter>(
    service: &BluetoothService<A>,
    settings: &SettingsService,
    target: Target,
) -> anyhow::Result<String> {
    let devices = service
        .scan(&ScanConfig::from_settings(settings.get()))
        .await?;

    if let Some(device) = target.device {
        return Ok(device);
    }
    if let Some(last) = &settings.get().last_connected_device {
        if devices.iter().any(|d| &d.device_id == last) {
            return Ok(last.clone());
        }
    }
    devices
        .first()
        .map(|d| d.device_id.clone())
        .context("No camera found nearby")
}

fn print_devices(devices: &[DiscoveredDevice]) {
    if devices.is_empty() {
        println!("No devices found");
        return;
    }
    for device in devices {
        let rssi = device
            .raw_advertisement
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "-".to_string());
        println!("{}\t{}\t{}", device.device_id, device.label(), rssi);
    }
}

async fn report_events(mut events: mpsc::UnboundedReceiver<AppEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            AppEvent::DeviceFound(device) => {
                debug!("received new scan result: {}", device.label())
            }
            AppEvent::ScanFinished { found } => debug!("scan finished with {} results", found),
            AppEvent::ConnectionStatus(status) => debug!("connection status: {}", status),
            AppEvent::Disconnected { device_id } => warn!("Disconnected {}", device_id),
            AppEvent::PairingFailed { device_id, reason } => {
                warn!("Pairing with {} failed: {}", device_id, reason)
            }
            AppEvent::LogMessage(message) => match message.severity {
                MessageSeverity::Info | MessageSeverity::Success => info!("{}", message.message),
                MessageSeverity::Warning => warn!("{}", message.message),
                MessageSeverity::Error => error!("{}", message.message),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gopro_ble_controller::domain::models::StatusMessage;

    #[tokio::test]
    async fn test_reporter_drains_queued_events_then_ends() {
        let (tx, rx) = mpsc::unbounded_channel();
        for message in ["Connected to device AA:BB", "disconnected from device AA:BB"] {
            tx.send(AppEvent::LogMessage(StatusMessage {
                message: message.to_string(),
                severity: MessageSeverity::Info,
            }))
            .unwrap();
        }
        let reporter = tokio::spawn(report_events(rx));
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), reporter)
            .await
            .expect("reporter should end once senders are gone")
            .unwrap();
    }
}
