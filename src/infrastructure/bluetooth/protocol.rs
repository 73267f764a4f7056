//! IMU Peripheral Protocol
//!
//! GATT identifiers shared by every backend, the advertisement name filter
//! and the textual sample encoding written to storage.

use std::time::Duration;
use uuid::Uuid;

/// Advertised name fragment that identifies the board
pub const TARGET_NAME: &str = "Arduino";

/// How long a scan runs before giving up
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Data service exposed by the Arduino sketch
pub const IMU_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001234_0000_1000_8000_00805f9b34fb);

/// Notify characteristic carrying IMU samples
pub const IMU_DATA_CHAR_UUID: Uuid = Uuid::from_u128(0x00005678_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration Descriptor (Bluetooth SIG assigned)
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD value that turns notifications on
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value that turns notifications off
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Returns true when the advertised `name` contains `target`, ignoring case.
///
/// Devices that advertise no name (or an empty one) never match.
pub fn matches_target(name: Option<&str>, target: &str) -> bool {
    match name {
        Some(name) if !name.is_empty() => name.to_lowercase().contains(&target.to_lowercase()),
        _ => false,
    }
}

/// Render a notification payload as one CSV record.
///
/// Each byte is written as its unsigned decimal value:
///
/// ```text
/// [0x01, 0x02, 0xFF]  ->  "1,2,255"
/// ```
pub fn format_sample(payload: &[u8]) -> String {
    payload
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Conversions between `uuid::Uuid` and WinRT GUIDs
#[cfg(windows)]
pub mod guid {
    use uuid::Uuid;
    use windows::core::GUID;

    pub fn to_guid(uuid: Uuid) -> GUID {
        GUID::from_u128(uuid.as_u128())
    }

    pub fn from_guid(guid: GUID) -> Uuid {
        Uuid::from_u128(guid.to_u128())
    }
}
