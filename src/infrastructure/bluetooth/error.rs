//! Error types for the BLE session

use crate::domain::models::GattStatus;
use thiserror::Error;

/// Failures raised synchronously by a BLE backend
#[derive(Error, Debug)]
pub enum BleError {
    #[error("BLE adapter not available: {0}")]
    AdapterUnavailable(String),

    #[error("Failed to start scan: {0}")]
    ScanFailed(String),

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Unknown connection handle {0}")]
    UnknownConnection(u64),

    #[error("GATT operation failed: {0}")]
    Gatt(String),
}

#[cfg(windows)]
impl From<windows::core::Error> for BleError {
    fn from(err: windows::core::Error) -> Self {
        BleError::Gatt(err.to_string())
    }
}

/// Reasons a session ends early. All of them are terminal for the session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Bluetooth permissions are required to scan")]
    PermissionDenied,

    #[error("Scan stopped: no device matching \"{target}\" found")]
    DeviceNotFound { target: String },

    #[error("Failed to connect to {device}")]
    ConnectFailure { device: String },

    #[error("Disconnected")]
    LinkLost,

    #[error("IMU service not found")]
    ServiceMissing,

    #[error("IMU characteristic not found")]
    CharacteristicMissing,

    #[error("Notification descriptor not found")]
    DescriptorMissing,

    #[error("Service discovery failed ({0})")]
    DiscoveryFailed(GattStatus),

    #[error("Peripheral rejected notification subscription ({0})")]
    SubscriptionRejected(GattStatus),

    #[error("Failed to save IMU data: {0}")]
    Persistence(#[from] std::io::Error),

    #[error(transparent)]
    Ble(#[from] BleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(
            SessionError::DeviceNotFound {
                target: "Arduino".into()
            }
            .to_string(),
            "Scan stopped: no device matching \"Arduino\" found"
        );
        assert_eq!(
            SessionError::DiscoveryFailed(GattStatus(133)).to_string(),
            "Service discovery failed (GATT status 133)"
        );
        let ble: SessionError = BleError::AdapterUnavailable("no radio".into()).into();
        assert_eq!(ble.to_string(), "BLE adapter not available: no radio");
    }
}
