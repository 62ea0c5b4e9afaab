//! Recording adapter for unit tests

use crate::domain::models::DiscoveredDevice;
use crate::infrastructure::bluetooth::adapter::{BleAdapter, ServiceFilter};
use crate::infrastructure::bluetooth::error::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Initialize,
    StartScan(Vec<Uuid>),
    StopScan,
    Connect(String),
    Disconnect(String),
    Write {
        device_id: String,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    Read {
        device_id: String,
        service: Uuid,
        characteristic: Uuid,
    },
}

/// How a mocked transport operation resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Fail,
    Hang,
    Delay(Duration),
}

impl Outcome {
    async fn resolve(self) -> Result<(), TransportError> {
        match self {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => Err(TransportError::Other("mock failure".to_string())),
            Outcome::Hang => std::future::pending().await,
            Outcome::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

pub struct MockAdapter {
    calls: Mutex<Vec<AdapterCall>>,
    initialize: Mutex<Outcome>,
    start_scan: Mutex<Outcome>,
    connect: Mutex<Outcome>,
    write: Mutex<Outcome>,
    scan_results: Mutex<Option<mpsc::UnboundedSender<DiscoveredDevice>>>,
    disconnect_senders: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            initialize: Mutex::new(Outcome::Succeed),
            start_scan: Mutex::new(Outcome::Succeed),
            connect: Mutex::new(Outcome::Succeed),
            write: Mutex::new(Outcome::Succeed),
            scan_results: Mutex::new(None),
            disconnect_senders: Mutex::new(HashMap::new()),
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_initialize(&self, outcome: Outcome) {
        *self.initialize.lock().unwrap() = outcome;
    }

    pub fn set_start_scan(&self, outcome: Outcome) {
        *self.start_scan.lock().unwrap() = outcome;
    }

    pub fn set_connect(&self, outcome: Outcome) {
        *self.connect.lock().unwrap() = outcome;
    }

    pub fn set_write(&self, outcome: Outcome) {
        *self.write.lock().unwrap() = outcome;
    }

    pub fn set_value(&self, characteristic: Uuid, value: &[u8]) {
        self.values
            .lock()
            .unwrap()
            .insert(characteristic, value.to_vec());
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<AdapterCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, AdapterCall::Write { .. }))
            .collect()
    }

    pub fn count(&self, call: &AdapterCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Deliver an advertisement to the running scan, if any
    pub fn advertise(&self, device: DiscoveredDevice) {
        if let Some(results) = self.scan_results.lock().unwrap().as_ref() {
            let _ = results.send(device);
        }
    }

    /// Simulate the peripheral dropping the link
    pub fn drop_link(&self, device_id: &str) {
        if let Some(sender) = self.disconnect_senders.lock().unwrap().remove(device_id) {
            let _ = sender.send(device_id.to_string());
        }
    }

    fn record(&self, call: AdapterCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn initialize(&self) -> Result<(), TransportError> {
        self.record(AdapterCall::Initialize);
        let outcome = *self.initialize.lock().unwrap();
        outcome.resolve().await
    }

    async fn start_scan(
        &self,
        filter: &ServiceFilter,
        results: mpsc::UnboundedSender<DiscoveredDevice>,
    ) -> Result<(), TransportError> {
        self.record(AdapterCall::StartScan(filter.services.clone()));
        let outcome = *self.start_scan.lock().unwrap();
        outcome.resolve().await?;
        *self.scan_results.lock().unwrap() = Some(results);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.record(AdapterCall::StopScan);
        self.scan_results.lock().unwrap().take();
        Ok(())
    }

    async fn connect(
        &self,
        device_id: &str,
        on_disconnect: mpsc::UnboundedSender<String>,
    ) -> Result<(), TransportError> {
        self.record(AdapterCall::Connect(device_id.to_string()));
        let outcome = *self.connect.lock().unwrap();
        outcome.resolve().await?;
        self.disconnect_senders
            .lock()
            .unwrap()
            .insert(device_id.to_string(), on_disconnect);
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), TransportError> {
        self.record(AdapterCall::Disconnect(device_id.to_string()));
        self.disconnect_senders
            .lock()
            .unwrap()
            .remove(device_id)
            .map(|_| ())
            .ok_or(TransportError::LinkLost)
    }

    async fn write(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.record(AdapterCall::Write {
            device_id: device_id.to_string(),
            service,
            characteristic,
            value: value.to_vec(),
        });
        let outcome = *self.write.lock().unwrap();
        outcome.resolve().await
    }

    async fn read(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        self.record(AdapterCall::Read {
            device_id: device_id.to_string(),
            service,
            characteristic,
        });
        self.values
            .lock()
            .unwrap()
            .get(&characteristic)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(characteristic))
    }
}
