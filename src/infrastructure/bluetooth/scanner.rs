//! BLE Scanner Module
//!
//! Time-bounded advertisement discovery. A scan ends either on an explicit
//! [`BleScanner::stop`] or when its timeout expires; both paths go through the
//! same teardown and leave the scanner idle.

use crate::domain::models::{AppEvent, DiscoveredDevice, MessageSeverity, StatusMessage};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::adapter::{BleAdapter, ServiceFilter};
use crate::infrastructure::bluetooth::error::{BleError, BleResult};
use crate::infrastructure::bluetooth::protocol;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default scan duration
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(3500);

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub filter: ServiceFilter,
    pub timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            filter: ServiceFilter::service(protocol::CONTROL_AND_QUERY_SERVICE_UUID),
            timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

impl ScanConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let filter = if settings.show_all_devices {
            ServiceFilter::all()
        } else {
            ServiceFilter::service(protocol::CONTROL_AND_QUERY_SERVICE_UUID)
        };
        Self {
            filter,
            timeout: settings.scan_timeout(),
        }
    }
}

/// Buffer and background tasks of the current scan session
#[derive(Default)]
struct ScanSession {
    id: u64,
    results: Vec<DiscoveredDevice>,
    forwarder: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

struct Shared<A> {
    adapter: Arc<A>,
    session: Mutex<ScanSession>,
    scanning: watch::Sender<bool>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

/// BLE Scanner for discovering GoPro cameras
pub struct BleScanner<A: BleAdapter> {
    shared: Arc<Shared<A>>,
}

impl<A: BleAdapter> BleScanner<A> {
    /// Create a new scanner
    pub fn new(adapter: Arc<A>, event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        let (scanning, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                adapter,
                session: Mutex::new(ScanSession::default()),
                scanning,
                event_sender,
            }),
        }
    }

    /// Start scanning for BLE devices
    ///
    /// Any scan already running is stopped first and the result buffer is
    /// cleared. On failure the scanner is left idle.
    pub async fn start(&self, config: &ScanConfig) -> BleResult<()> {
        self.stop().await;

        let shared = &self.shared;
        let id = {
            let mut session = shared.lock();
            session.id += 1;
            session.results.clear();
            shared.scanning.send_replace(true);
            session.id
        };

        info!(
            "Starting BLE scan for services {:?} ({} ms)",
            config.filter.services,
            config.timeout.as_millis()
        );
        shared.send_log("Scanning for GoPro cameras...", MessageSeverity::Info);

        if let Err(e) = shared.adapter.initialize().await {
            error!("scan: adapter initialization failed: {}", e);
            shared.abandon(id);
            return Err(BleError::AdapterInit(e));
        }
        if !shared.is_current(id) {
            debug!("Scan stopped before the adapter was ready");
            return Ok(());
        }

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        if let Err(e) = shared.adapter.start_scan(&config.filter, results_tx).await {
            error!("scan: failed to start: {}", e);
            shared.abandon(id);
            return Err(BleError::ScanStart(e));
        }

        let forwarder = tokio::spawn(Shared::forward(
            Arc::clone(shared),
            id,
            config.filter.clone(),
            results_rx,
        ));

        let timeout = config.timeout;
        let timer_shared = Arc::clone(shared);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timer_shared.finish(id, true).await;
        });

        let stopped = {
            let mut session = shared.lock();
            if session.id == id && *shared.scanning.borrow() {
                session.forwarder = Some(forwarder);
                session.timer = Some(timer);
                None
            } else {
                Some((forwarder, timer))
            }
        };
        // Stopped while the adapter was starting up; the radio is scanning again
        if let Some((forwarder, timer)) = stopped {
            forwarder.abort();
            timer.abort();
            if let Err(e) = shared.adapter.stop_scan().await {
                warn!("Failed to stop BLE scan: {}", e);
            }
        }
        Ok(())
    }

    /// Stop scanning
    pub async fn stop(&self) {
        let id = self.shared.lock().id;
        self.shared.finish(id, false).await;
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        *self.shared.scanning.borrow()
    }

    /// Results of the current or most recent scan, in discovery order
    pub fn results(&self) -> Vec<DiscoveredDevice> {
        self.shared.lock().results.clone()
    }

    /// Wait until the running scan ends, by timeout or by `stop`
    pub async fn finished(&self) {
        let mut scanning = self.shared.scanning.subscribe();
        let _ = scanning.wait_for(|active| !*active).await;
    }
}

impl<A: BleAdapter> Drop for BleScanner<A> {
    fn drop(&mut self) {
        let mut session = self.shared.lock();
        if let Some(task) = session.forwarder.take() {
            task.abort();
        }
        if let Some(task) = session.timer.take() {
            task.abort();
        }
        self.shared.scanning.send_replace(false);
    }
}

impl<A: BleAdapter> Shared<A> {
    fn lock(&self) -> MutexGuard<'_, ScanSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether session `id` is still the one running
    fn is_current(&self, id: u64) -> bool {
        self.lock().id == id && *self.scanning.borrow()
    }

    /// Reset after a failed start
    fn abandon(&self, id: u64) {
        let session = self.lock();
        if session.id == id {
            self.scanning.send_replace(false);
        }
    }

    /// Append matching advertisements to the session buffer
    async fn forward(
        shared: Arc<Self>,
        id: u64,
        filter: ServiceFilter,
        mut results: mpsc::UnboundedReceiver<DiscoveredDevice>,
    ) {
        while let Some(device) = results.recv().await {
            if !filter.matches(&device) {
                debug!(
                    "Ignoring {}: target service not advertised",
                    device.device_id
                );
                continue;
            }
            {
                let mut session = shared.lock();
                if session.id != id || !*shared.scanning.borrow() {
                    break;
                }
                session.results.push(device.clone());
            }
            debug!("received new scan result: {}", device.label());
            let _ = shared.event_sender.send(AppEvent::DeviceFound(device));
        }
    }

    /// Common teardown for explicit stop and timeout expiry
    async fn finish(&self, id: u64, timed_out: bool) {
        let (forwarder, timer, found) = {
            let mut session = self.lock();
            if session.id != id || !*self.scanning.borrow() {
                return;
            }
            self.scanning.send_replace(false);
            (
                session.forwarder.take(),
                session.timer.take(),
                session.results.len(),
            )
        };

        if let Some(task) = forwarder {
            task.abort();
        }
        // The timer task is the caller on expiry and must not cancel itself
        if !timed_out {
            if let Some(task) = timer {
                task.abort();
            }
        }

        info!(
            "Stopping BLE scan ({}), {} results",
            if timed_out { "timeout" } else { "stopped" },
            found
        );
        let _ = self.event_sender.send(AppEvent::ScanFinished { found });
        self.send_log("Scan stopped.", MessageSeverity::Info);

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}
