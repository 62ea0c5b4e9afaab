//! Command Dispatcher
//!
//! GATT reads and writes addressed at the live session. Every operation is
//! raced against the session's link-loss signal so a peripheral-initiated
//! disconnect fails it with [`BleError::ConnectionLost`] instead of leaving it
//! pending.

use crate::infrastructure::bluetooth::adapter::BleAdapter;
use crate::infrastructure::bluetooth::connection::ConnectionHandle;
use crate::infrastructure::bluetooth::error::{BleError, BleResult, TransportError};
use crate::infrastructure::bluetooth::protocol::{
    self, CameraCommand, COMMAND_REQUEST_CHAR_UUID, CONTROL_AND_QUERY_SERVICE_UUID,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CommandDispatcher<A: BleAdapter> {
    adapter: Arc<A>,
    timeout: Duration,
}

impl<A: BleAdapter> Clone for CommandDispatcher<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
            timeout: self.timeout,
        }
    }
}

impl<A: BleAdapter> CommandDispatcher<A> {
    pub fn new(adapter: Arc<A>, timeout: Duration) -> Self {
        Self { adapter, timeout }
    }

    /// Encode `command` and write it to the command request characteristic
    ///
    /// Without a live session this is a no-op reporting
    /// [`BleError::NotConnected`]; nothing reaches the transport.
    pub async fn send(
        &self,
        session: Option<&ConnectionHandle>,
        command: CameraCommand,
    ) -> BleResult<()> {
        let handle = Self::live(session)?;
        info!("Sending {} to {}", command, handle.device_id());

        let payload = protocol::encode(command);
        self.write(
            handle,
            CONTROL_AND_QUERY_SERVICE_UUID,
            COMMAND_REQUEST_CHAR_UUID,
            &payload,
        )
        .await
    }

    /// Write raw bytes to any characteristic of the connected camera
    pub async fn write(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> BleResult<()> {
        let device_id = handle.device_id();
        if !handle.is_live() {
            return Err(BleError::NotConnected);
        }
        debug!("Writing {:02X?} to {} on {}", value, characteristic, device_id);

        let write = tokio::time::timeout(
            self.timeout,
            self.adapter.write(device_id, service, characteristic, value),
        );
        let result = tokio::select! {
            biased;
            _ = handle.lost() => Err(BleError::ConnectionLost {
                device_id: device_id.to_string(),
                operation: "write",
            }),
            result = write => result
                .unwrap_or(Err(TransportError::Timeout))
                .map_err(|source| BleError::Write {
                    device_id: device_id.to_string(),
                    characteristic,
                    source,
                }),
        };

        if let Err(e) = &result {
            error!("{}", e);
        }
        result
    }

    /// Read the current value of a characteristic
    ///
    /// Same preconditions as [`send`](Self::send).
    pub async fn read(
        &self,
        session: Option<&ConnectionHandle>,
        service: Uuid,
        characteristic: Uuid,
    ) -> BleResult<Vec<u8>> {
        let handle = Self::live(session)?;
        let device_id = handle.device_id();
        debug!("Reading {} on {}", characteristic, device_id);

        let read = tokio::time::timeout(
            self.timeout,
            self.adapter.read(device_id, service, characteristic),
        );
        tokio::select! {
            biased;
            _ = handle.lost() => Err(BleError::ConnectionLost {
                device_id: device_id.to_string(),
                operation: "read",
            }),
            result = read => result
                .unwrap_or(Err(TransportError::Timeout))
                .map_err(|source| BleError::Read {
                    device_id: device_id.to_string(),
                    characteristic,
                    source,
                }),
        }
    }

    fn live(session: Option<&ConnectionHandle>) -> BleResult<&ConnectionHandle> {
        match session {
            Some(handle) if handle.is_live() => Ok(handle),
            _ => {
                info!("Bluetooth device not connected");
                Err(BleError::NotConnected)
            }
        }
    }
}
