//! GoPro BLE Protocol
//!
//! GATT addressing and command payloads for the camera's control & query
//! service. Only the full 128-bit UUID forms are used: known camera firmware
//! ignores a scan filter given as the 16-bit `FEA6` alias.

use uuid::{uuid, Uuid};

/// Control & query service (16-bit alias `FEA6`)
pub const CONTROL_AND_QUERY_SERVICE_UUID: Uuid = uuid!("0000fea6-0000-1000-8000-00805f9b34fb");

/// Wi-Fi access point service
pub const WIFI_ACCESS_POINT_SERVICE_UUID: Uuid = uuid!("b5f90001-aa8d-11e3-9046-0002a5d5c51b");

/// Command request characteristic - where commands are written
pub const COMMAND_REQUEST_CHAR_UUID: Uuid = uuid!("b5f90072-aa8d-11e3-9046-0002a5d5c51b");

/// Wi-Fi access point SSID characteristic
pub const WIFI_SSID_CHAR_UUID: Uuid = uuid!("b5f90002-aa8d-11e3-9046-0002a5d5c51b");

/// Wi-Fi access point password characteristic
pub const WIFI_PASSWORD_CHAR_UUID: Uuid = uuid!("b5f90003-aa8d-11e3-9046-0002a5d5c51b");

/// Camera commands written to the command request characteristic
///
/// Each payload is `[length, command id, params...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
    /// Power the camera down
    Shutdown,
    /// Start a capture
    Shutter,
    /// Turn on the camera's Wi-Fi access point
    EnableWifi,
}

impl CameraCommand {
    pub const ALL: [CameraCommand; 3] = [Self::Shutdown, Self::Shutter, Self::EnableWifi];

    /// Get the raw bytes for this command
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Shutdown => &[0x01, 0x05],
            Self::Shutter => &[0x03, 0x01, 0x01, 0x01],
            Self::EnableWifi => &[0x03, 0x17, 0x01, 0x01],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Shutter => "shutter",
            Self::EnableWifi => "enable-wifi",
        }
    }
}

impl std::fmt::Display for CameraCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode a command into its wire payload
pub fn encode(command: CameraCommand) -> Vec<u8> {
    command.as_bytes().to_vec()
}

/// Decode a text characteristic value, dropping trailing NUL padding
pub fn decode_text(value: &[u8]) -> String {
    let end = value.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&value[..end]).into_owned()
}
