//! BLE Connection Module
//!
//! Owns the single camera session.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──(pairing trigger)──▶ Connected
//!  ▲                    │                                 │
//!  │◀── failure/timeout ┘                                 │
//!  │◀──────────── peripheral drops link ──────────────────┤
//!  │                                                      │ disconnect
//!  └──────────────────── Disconnecting ◀──────────────────┘
//! ```
//!
//! The pairing trigger runs while the session is still `Connecting`. The
//! handle is only published as `Connected` once it has completed, so the
//! pairing write always precedes any caller-issued write.

use crate::domain::models::{AppEvent, ConnectionStatus, MessageSeverity, StatusMessage};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::adapter::BleAdapter;
use crate::infrastructure::bluetooth::error::{BleError, BleResult, TransportError};
use crate::infrastructure::bluetooth::pairing::PairingTrigger;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
        }
    }
}

#[derive(Debug)]
struct Session {
    device_id: String,
    generation: u64,
    lost: watch::Sender<bool>,
}

/// Binds a device id to one open link
///
/// Clones refer to the same session. Once the link is gone, by explicit
/// disconnect or by the peripheral, the handle stays dead.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    session: Arc<Session>,
}

impl ConnectionHandle {
    pub(crate) fn new(device_id: impl Into<String>, generation: u64) -> Self {
        let (lost, _) = watch::channel(false);
        Self {
            session: Arc::new(Session {
                device_id: device_id.into(),
                generation,
                lost,
            }),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.session.device_id
    }

    pub fn is_live(&self) -> bool {
        !*self.session.lost.borrow()
    }

    /// Resolves once the link is gone
    pub async fn lost(&self) {
        let mut lost = self.session.lost.subscribe();
        let _ = lost.wait_for(|gone| *gone).await;
    }

    pub(crate) fn mark_lost(&self) {
        self.session.lost.send_replace(true);
    }

    fn is_same(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }
}

enum ConnectionState {
    Idle,
    Connecting(ConnectionHandle),
    Connected(ConnectionHandle),
    Disconnecting(ConnectionHandle),
}

impl ConnectionState {
    fn status(&self) -> ConnectionStatus {
        match self {
            Self::Idle => ConnectionStatus::Idle,
            Self::Connecting(_) => ConnectionStatus::Connecting,
            Self::Connected(_) => ConnectionStatus::Connected,
            Self::Disconnecting(_) => ConnectionStatus::Disconnecting,
        }
    }

    fn handle(&self) -> Option<&ConnectionHandle> {
        match self {
            Self::Idle => None,
            Self::Connecting(h) | Self::Connected(h) | Self::Disconnecting(h) => Some(h),
        }
    }
}

/// State shared with the link-loss watcher task
struct Shared {
    state: Mutex<ConnectionState>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set(&self, state: &mut ConnectionState, next: ConnectionState) {
        let status = next.status();
        *state = next;
        let _ = self.event_sender.send(AppEvent::ConnectionStatus(status));
    }

    /// Return to idle if `handle` is still the session being tracked
    fn release(&self, handle: &ConnectionHandle) {
        let mut state = self.lock();
        if state.handle().is_some_and(|h| h.is_same(handle)) {
            self.set(&mut state, ConnectionState::Idle);
        }
    }

    async fn watch_link(
        shared: Arc<Self>,
        handle: ConnectionHandle,
        mut disconnects: mpsc::UnboundedReceiver<String>,
    ) {
        let Some(device_id) = disconnects.recv().await else {
            return;
        };
        handle.mark_lost();

        let mut state = shared.lock();
        let tracked = matches!(
            &*state,
            ConnectionState::Connecting(h) | ConnectionState::Connected(h) if h.is_same(&handle)
        );
        if !tracked {
            return;
        }

        warn!("Disconnected {}", device_id);
        shared.set(&mut state, ConnectionState::Idle);
        let _ = shared.event_sender.send(AppEvent::Disconnected {
            device_id: device_id.clone(),
        });
        send_log(
            &shared.event_sender,
            &format!("Disconnected {}", device_id),
            MessageSeverity::Warning,
        );
    }
}

/// A session that has not reached `Connected` yet
///
/// Dropping it while armed, on a failure branch or because the `connect`
/// future itself was dropped, returns the manager to `Idle`. A link that was
/// already opened is closed in the background.
struct PendingSession<'a, A: BleAdapter> {
    shared: &'a Shared,
    adapter: &'a Arc<A>,
    handle: ConnectionHandle,
    linked: bool,
    armed: bool,
}

impl<A: BleAdapter> Drop for PendingSession<'_, A> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.handle.mark_lost();
        self.shared.release(&self.handle);

        if !self.linked {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let adapter = Arc::clone(self.adapter);
        let device_id = self.handle.device_id().to_string();
        runtime.spawn(async move {
            if let Err(e) = adapter.disconnect(&device_id).await {
                debug!("closing abandoned link to {}: {}", device_id, e);
            }
        });
    }
}

/// Connection manager for the single camera session
pub struct ConnectionManager<A: BleAdapter> {
    adapter: Arc<A>,
    pairing: Arc<dyn PairingTrigger>,
    config: ConnectionConfig,
    shared: Arc<Shared>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl<A: BleAdapter> ConnectionManager<A> {
    pub fn new(
        adapter: Arc<A>,
        pairing: Arc<dyn PairingTrigger>,
        config: ConnectionConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            adapter,
            pairing,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Idle),
                event_sender,
            }),
            watcher: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Connect to a device, then fire the pairing trigger once
    ///
    /// Fails with [`BleError::SessionBusy`] while another session is open or
    /// opening; this controller never holds two live handles.
    pub async fn connect(&self, device_id: &str) -> BleResult<ConnectionHandle> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = ConnectionHandle::new(device_id, generation);

        {
            let mut state = self.shared.lock();
            if let Some(active) = state.handle() {
                return Err(BleError::SessionBusy {
                    requested: device_id.to_string(),
                    device_id: active.device_id().to_string(),
                    status: state.status(),
                });
            }
            self.shared
                .set(&mut state, ConnectionState::Connecting(handle.clone()));
        }
        let mut pending = PendingSession {
            shared: &self.shared,
            adapter: &self.adapter,
            handle: handle.clone(),
            linked: false,
            armed: true,
        };

        info!("Connecting to Bluetooth device: {}", device_id);
        self.send_log("Connecting to device...", MessageSeverity::Info);

        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            self.adapter.connect(device_id, disconnect_tx),
        )
        .await;
        let failure = match connect {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(TransportError::Timeout),
        };
        if let Some(source) = failure {
            error!("Failed to connect to {}: {}", device_id, source);
            drop(pending);
            if matches!(source, TransportError::Timeout) {
                // The platform connect may still complete after we gave up on it
                if let Err(e) = self.adapter.disconnect(device_id).await {
                    debug!("disconnect after connect timeout: {}", e);
                }
            }
            self.send_log(
                &format!("Failed to connect to {}", device_id),
                MessageSeverity::Error,
            );
            return Err(BleError::Connection {
                device_id: device_id.to_string(),
                source,
            });
        }
        pending.linked = true;

        let watcher = tokio::spawn(Shared::watch_link(
            Arc::clone(&self.shared),
            handle.clone(),
            disconnect_rx,
        ));
        if let Ok(mut slot) = self.watcher.lock() {
            if let Some(previous) = slot.replace(watcher) {
                previous.abort();
            }
        }
        info!(
            "Device connected: {} (session {})",
            device_id, handle.session.generation
        );

        // Non-fatal: a failed pairing write leaves the session up
        if let Err(e) = self.pairing.trigger(&handle).await {
            warn!("{}", e);
            let _ = self.shared.event_sender.send(AppEvent::PairingFailed {
                device_id: device_id.to_string(),
                reason: e.to_string(),
            });
        }

        let published = {
            let mut state = self.shared.lock();
            match &*state {
                ConnectionState::Connecting(h) if h.is_same(&handle) => {
                    self.shared
                        .set(&mut state, ConnectionState::Connected(handle.clone()));
                    true
                }
                _ => false,
            }
        };
        if !published {
            return Err(BleError::Connection {
                device_id: device_id.to_string(),
                source: TransportError::LinkLost,
            });
        }
        pending.armed = false;

        self.send_log(
            &format!("Connected to device {}", device_id),
            MessageSeverity::Success,
        );
        Ok(handle)
    }

    /// Close the session behind `handle`
    ///
    /// The session is torn down locally even if the transport reports an
    /// error, so no dangling handle survives.
    pub async fn disconnect(&self, handle: &ConnectionHandle) -> BleResult<()> {
        let device_id = handle.device_id().to_string();
        {
            let mut state = self.shared.lock();
            match &*state {
                ConnectionState::Connected(h) if h.is_same(handle) => {
                    self.shared
                        .set(&mut state, ConnectionState::Disconnecting(handle.clone()));
                }
                _ => return Err(BleError::NoSuchConnection { device_id }),
            }
        }

        self.stop_watcher();
        handle.mark_lost();
        let result = self.adapter.disconnect(&device_id).await;
        self.shared.release(handle);

        match result {
            Ok(()) => {
                info!("Disconnected from device {}", device_id);
                self.send_log(
                    &format!("disconnected from device {}", device_id),
                    MessageSeverity::Info,
                );
                Ok(())
            }
            Err(source) => {
                error!("Failed to disconnect from {}: {}", device_id, source);
                Err(BleError::Disconnection { device_id, source })
            }
        }
    }

    /// Handle of the connected session, if any
    pub fn active(&self) -> Option<ConnectionHandle> {
        match &*self.shared.lock() {
            ConnectionState::Connected(h) => Some(h.clone()),
            _ => None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().status()
    }

    fn stop_watcher(&self) {
        if let Ok(mut slot) = self.watcher.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        send_log(&self.shared.event_sender, message, severity);
    }
}

impl<A: BleAdapter> Drop for ConnectionManager<A> {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

fn send_log(sender: &mpsc::UnboundedSender<AppEvent>, message: &str, severity: MessageSeverity) {
    let _ = sender.send(AppEvent::LogMessage(StatusMessage {
        message: message.to_string(),
        severity,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::dispatcher::{CommandDispatcher, DEFAULT_COMMAND_TIMEOUT};
    use crate::infrastructure::bluetooth::mock::{AdapterCall, MockAdapter, Outcome};
    use crate::infrastructure::bluetooth::pairing::WriteCommandPairing;
    use crate::infrastructure::bluetooth::protocol::{
        COMMAND_REQUEST_CHAR_UUID, CONTROL_AND_QUERY_SERVICE_UUID,
    };
    use tokio::time::sleep;

    fn manager() -> (
        Arc<MockAdapter>,
        ConnectionManager<MockAdapter>,
        mpsc::UnboundedReceiver<AppEvent>,
    ) {
        let adapter = Arc::new(MockAdapter::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let pairing = Arc::new(WriteCommandPairing::new(CommandDispatcher::new(
            Arc::clone(&adapter),
            DEFAULT_COMMAND_TIMEOUT,
        )));
        let manager = ConnectionManager::new(
            Arc::clone(&adapter),
            pairing,
            ConnectionConfig::default(),
            tx,
        );
        (adapter, manager, rx)
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_connect_fires_pairing_write_once() {
        let (adapter, manager, _events) = manager();

        let handle = manager.connect("AA:BB").await.unwrap();

        assert_eq!(handle.device_id(), "AA:BB");
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(
            adapter.calls(),
            vec![
                AdapterCall::Connect("AA:BB".to_string()),
                AdapterCall::Write {
                    device_id: "AA:BB".to_string(),
                    service: CONTROL_AND_QUERY_SERVICE_UUID,
                    characteristic: COMMAND_REQUEST_CHAR_UUID,
                    value: vec![0x03, 0x17, 0x01, 0x01],
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_no_session() {
        let (adapter, manager, _events) = manager();
        adapter.set_connect(Outcome::Fail);

        let err = manager.connect("AA:BB").await.unwrap_err();

        assert!(matches!(err, BleError::Connection { .. }));
        assert!(manager.active().is_none());
        assert_eq!(manager.status(), ConnectionStatus::Idle);
        assert!(adapter.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (adapter, manager, _events) = manager();
        adapter.set_connect(Outcome::Hang);

        let err = manager.connect("AA:BB").await.unwrap_err();

        assert!(matches!(
            err,
            BleError::Connection {
                source: TransportError::Timeout,
                ..
            }
        ));
        assert!(manager.active().is_none());
        assert_eq!(manager.status(), ConnectionStatus::Idle);
        // A connect that completes late must not leave the link open
        assert_eq!(adapter.count(&AdapterCall::Disconnect("AA:BB".to_string())), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_connect_returns_to_idle() {
        let (adapter, manager, _events) = manager();
        adapter.set_connect(Outcome::Hang);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), manager.connect("AA:BB")).await;
        assert!(cancelled.is_err());
        assert_eq!(manager.status(), ConnectionStatus::Idle);
        assert!(manager.active().is_none());

        adapter.set_connect(Outcome::Succeed);
        let handle = manager.connect("AA:BB").await.unwrap();
        assert!(handle.is_live());
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_pairing_closes_link() {
        let (adapter, manager, _events) = manager();
        adapter.set_write(Outcome::Hang);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), manager.connect("AA:BB")).await;
        assert!(cancelled.is_err());
        assert_eq!(manager.status(), ConnectionStatus::Idle);

        sleep(Duration::from_millis(1)).await;
        assert_eq!(adapter.count(&AdapterCall::Disconnect("AA:BB".to_string())), 1);

        adapter.set_write(Outcome::Succeed);
        assert!(manager.connect("AA:BB").await.is_ok());
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected() {
        let (adapter, manager, _events) = manager();
        let first = manager.connect("AA:BB").await.unwrap();

        let err = manager.connect("CC:DD").await.unwrap_err();

        assert!(matches!(
            err,
            BleError::SessionBusy {
                status: ConnectionStatus::Connected,
                ..
            }
        ));
        assert!(manager.active().unwrap().is_same(&first));
        assert_eq!(adapter.count(&AdapterCall::Connect("CC:DD".to_string())), 0);
    }

    #[tokio::test]
    async fn test_peripheral_disconnect_clears_session() {
        let (adapter, manager, mut events) = manager();
        let handle = manager.connect("AA:BB").await.unwrap();
        drain(&mut events);

        adapter.drop_link("AA:BB");
        sleep(Duration::from_millis(10)).await;

        assert!(manager.active().is_none());
        assert!(!handle.is_live());
        assert_eq!(manager.status(), ConnectionStatus::Idle);
        assert!(drain(&mut events).iter().any(
            |e| matches!(e, AppEvent::Disconnected { device_id } if device_id == "AA:BB")
        ));
    }

    #[tokio::test]
    async fn test_explicit_disconnect() {
        let (adapter, manager, _events) = manager();
        let handle = manager.connect("AA:BB").await.unwrap();

        manager.disconnect(&handle).await.unwrap();

        assert!(manager.active().is_none());
        assert!(!handle.is_live());
        assert_eq!(adapter.count(&AdapterCall::Disconnect("AA:BB".to_string())), 1);

        let err = manager.disconnect(&handle).await.unwrap_err();
        assert!(matches!(err, BleError::NoSuchConnection { .. }));
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let (_adapter, manager, _events) = manager();
        let first = manager.connect("AA:BB").await.unwrap();
        manager.disconnect(&first).await.unwrap();

        let second = manager.connect("AA:BB").await.unwrap();

        assert!(second.is_live());
        assert!(!first.is_same(&second));
        // A stale handle cannot close the new session
        assert!(manager.disconnect(&first).await.is_err());
        assert!(manager.active().is_some());
    }

    #[tokio::test]
    async fn test_pairing_failure_is_not_fatal() {
        let (adapter, manager, mut events) = manager();
        adapter.set_write(Outcome::Fail);

        let handle = manager.connect("AA:BB").await.unwrap();

        assert!(handle.is_live());
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, AppEvent::PairingFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_lost_during_pairing() {
        let (adapter, manager, _events) = manager();
        adapter.set_write(Outcome::Hang);

        let (result, _) = tokio::join!(manager.connect("AA:BB"), async {
            sleep(Duration::from_millis(10)).await;
            adapter.drop_link("AA:BB");
        });

        assert!(matches!(
            result,
            Err(BleError::Connection {
                source: TransportError::LinkLost,
                ..
            })
        ));
        assert_eq!(manager.status(), ConnectionStatus::Idle);
    }
}
