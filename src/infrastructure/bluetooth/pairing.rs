//! Pairing trigger
//!
//! GoPro cameras require bonding on first connection, and any authenticated
//! write to the command characteristic starts it. [`WriteCommandPairing`]
//! relies on that quirk and sends Enable Wi-Fi as the stimulus instead of
//! running a bonding handshake. It only works for peripherals that accept
//! this particular write as a bonding trigger; a real handshake can replace
//! it by implementing [`PairingTrigger`].

use crate::infrastructure::bluetooth::adapter::BleAdapter;
use crate::infrastructure::bluetooth::connection::ConnectionHandle;
use crate::infrastructure::bluetooth::dispatcher::CommandDispatcher;
use crate::infrastructure::bluetooth::error::{BleError, BleResult};
use crate::infrastructure::bluetooth::protocol::CameraCommand;
use async_trait::async_trait;
use tracing::info;

/// Runs once on every freshly opened session, before it accepts commands
#[async_trait]
pub trait PairingTrigger: Send + Sync {
    async fn trigger(&self, handle: &ConnectionHandle) -> BleResult<()>;
}

pub struct WriteCommandPairing<A: BleAdapter> {
    dispatcher: CommandDispatcher<A>,
    command: CameraCommand,
}

impl<A: BleAdapter> WriteCommandPairing<A> {
    pub fn new(dispatcher: CommandDispatcher<A>) -> Self {
        Self {
            dispatcher,
            command: CameraCommand::EnableWifi,
        }
    }
}

#[async_trait]
impl<A: BleAdapter> PairingTrigger for WriteCommandPairing<A> {
    async fn trigger(&self, handle: &ConnectionHandle) -> BleResult<()> {
        info!(
            "Triggering pairing with {} via {}",
            handle.device_id(),
            self.command
        );
        self.dispatcher
            .send(Some(handle), self.command)
            .await
            .map_err(|e| BleError::Pairing {
                device_id: handle.device_id().to_string(),
                source: Box::new(e),
            })
    }
}
