//! Bluetooth Module
//!
//! Provides the BLE session with a GoPro camera.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Main coordinator - public API for the application)     │
//! └──────┬──────────────────┬────────────────────┬──────────┘
//!        │                  │                    │
//!        ▼                  ▼                    ▼
//! ┌────────────┐   ┌──────────────────┐   ┌────────────┐
//! │  Scanner   │   │ ConnectionManager│──▶│  Pairing   │
//! │            │   │                  │   │  Trigger   │
//! │ - timeout  │   │ - one session    │   └─────┬──────┘
//! │ - filter   │   │ - link loss      │         ▼
//! └─────┬──────┘   └────────┬─────────┘   ┌────────────┐
//!       │                   │             │ Dispatcher │
//!       └─────────┬─────────┘             └─────┬──────┘
//!                 ▼                             │
//!          ┌─────────────┐◀─────────────────────┘
//!          │ BleAdapter  │  (btleplug in production)
//!          └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT UUIDs and command payloads
//! - [`adapter`] - Platform adapter trait and scan filter
//! - [`btleplug_adapter`] - btleplug implementation of the adapter
//! - [`scanner`] - Time-bounded device discovery
//! - [`connection`] - Session state machine
//! - [`pairing`] - Pairing trigger run on every new session
//! - [`dispatcher`] - Command writes and characteristic reads
//! - [`service`] - Main service coordinator

pub mod adapter;
pub mod btleplug_adapter;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod pairing;
pub mod protocol;
pub mod scanner;
pub mod service;

#[cfg(test)]
pub(crate) mod mock;

// Re-export main service for convenience
pub use btleplug_adapter::BtleplugAdapter;
pub use error::{BleError, BleResult, TransportError};
pub use service::BluetoothService;
