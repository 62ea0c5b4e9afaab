//! Bluetooth LE controller for GoPro cameras.
//!
//! Discovers cameras by their control & query service, holds a single
//! session, triggers pairing on connect and writes camera commands.

pub mod domain;
pub mod infrastructure;
