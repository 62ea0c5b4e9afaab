//! Error types for the BLE session

use crate::domain::models::ConnectionStatus;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by the platform adapter
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Operation timed out")]
    Timeout,

    #[error("Link to peripheral lost")]
    LinkLost,

    #[error(transparent)]
    Btleplug(#[from] btleplug::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced to the caller by scanner, connection manager and dispatcher
#[derive(Error, Debug)]
pub enum BleError {
    #[error("Failed to initialize BLE adapter: {0}")]
    AdapterInit(#[source] TransportError),

    #[error("Failed to start scan: {0}")]
    ScanStart(#[source] TransportError),

    #[error("Failed to connect to {device_id}: {source}")]
    Connection {
        device_id: String,
        source: TransportError,
    },

    #[error("Cannot connect to {requested}: session with {device_id} is {status}")]
    SessionBusy {
        requested: String,
        device_id: String,
        status: ConnectionStatus,
    },

    #[error("Failed to disconnect from {device_id}: {source}")]
    Disconnection {
        device_id: String,
        source: TransportError,
    },

    #[error("No live connection to {device_id}")]
    NoSuchConnection { device_id: String },

    #[error("Pairing with {device_id} failed: {source}")]
    Pairing {
        device_id: String,
        source: Box<BleError>,
    },

    #[error("Bluetooth device not connected")]
    NotConnected,

    #[error("Write to {characteristic} on {device_id} failed: {source}")]
    Write {
        device_id: String,
        characteristic: Uuid,
        source: TransportError,
    },

    #[error("Read of {characteristic} on {device_id} failed: {source}")]
    Read {
        device_id: String,
        characteristic: Uuid,
        source: TransportError,
    },

    #[error("Connection to {device_id} lost during {operation}")]
    ConnectionLost {
        device_id: String,
        operation: &'static str,
    },
}

impl BleError {
    /// Name of the failed operation, for user-facing display
    pub fn operation(&self) -> &'static str {
        match self {
            Self::AdapterInit(_) => "initialize",
            Self::ScanStart(_) => "scan",
            Self::Connection { .. } | Self::SessionBusy { .. } => "connect",
            Self::Disconnection { .. } | Self::NoSuchConnection { .. } => "disconnect",
            Self::Pairing { .. } => "pair",
            Self::NotConnected | Self::Write { .. } => "write",
            Self::Read { .. } => "read",
            Self::ConnectionLost { operation, .. } => *operation,
        }
    }

    /// Identifier of the device involved, if known
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Connection { device_id, .. }
            | Self::SessionBusy {
                requested: device_id,
                ..
            }
            | Self::Disconnection { device_id, .. }
            | Self::NoSuchConnection { device_id }
            | Self::Pairing { device_id, .. }
            | Self::Write { device_id, .. }
            | Self::Read { device_id, .. }
            | Self::ConnectionLost { device_id, .. } => Some(device_id.as_str()),
            Self::AdapterInit(_) | Self::ScanStart(_) | Self::NotConnected => None,
        }
    }
}

pub type BleResult<T> = Result<T, BleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = BleError::Write {
            device_id: "AA:BB".to_string(),
            characteristic: Uuid::nil(),
            source: TransportError::Timeout,
        };
        assert_eq!(err.operation(), "write");
        assert_eq!(err.device_id(), Some("AA:BB"));
        assert!(err.to_string().contains("Operation timed out"));

        assert_eq!(BleError::NotConnected.device_id(), None);
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let err = BleError::AdapterInit(TransportError::AdapterNotAvailable);
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("BLE adapter not available".to_string())
        );
    }
}
