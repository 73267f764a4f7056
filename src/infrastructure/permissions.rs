//! Runtime access to the Bluetooth radio
//!
//! Scanning is refused unless this reports [`PermissionStatus::Granted`].

use crate::domain::models::PermissionStatus;
use crate::infrastructure::bluetooth::error::BleError;
use std::future::Future;
use std::pin::Pin;

pub type PermissionFuture = Pin<Box<dyn Future<Output = Result<PermissionStatus, BleError>> + Send>>;

/// Source of the scan grant, asked once per scan request
pub type PermissionQuery = fn() -> PermissionFuture;

/// [`PermissionQuery`] backed by the platform radio
pub fn platform_permission() -> PermissionFuture {
    Box::pin(query_scan_permission())
}

/// [`PermissionQuery`] for the simulated peripheral, which needs no radio
pub fn always_granted() -> PermissionFuture {
    Box::pin(async { Ok(PermissionStatus::Granted) })
}

/// Query whether the app may scan and connect.
///
/// Fails with [`BleError::AdapterUnavailable`] when the machine has no
/// Bluetooth LE capable adapter.
#[cfg(windows)]
pub async fn query_scan_permission() -> Result<PermissionStatus, BleError> {
    use tracing::{info, warn};
    use windows::Devices::Bluetooth::BluetoothAdapter;
    use windows::Devices::Radios::{Radio, RadioAccessStatus};

    let adapter = BluetoothAdapter::GetDefaultAsync()
        .map_err(|e| BleError::AdapterUnavailable(e.to_string()))?
        .await
        .map_err(|e| BleError::AdapterUnavailable(e.to_string()))?;
    if !adapter.IsLowEnergySupported()? {
        return Err(BleError::AdapterUnavailable(
            "BLE not supported on this device".to_string(),
        ));
    }

    let status = Radio::RequestAccessAsync()?.await?;
    info!("Bluetooth radio access status: {:?}", status);
    if status == RadioAccessStatus::Allowed {
        Ok(PermissionStatus::Granted)
    } else {
        warn!("Bluetooth radio access not allowed: {:?}", status);
        Ok(PermissionStatus::Denied)
    }
}

/// Query whether the app may scan and connect.
///
/// Platforms without a runtime grant model always report granted.
#[cfg(not(windows))]
pub async fn query_scan_permission() -> Result<PermissionStatus, BleError> {
    Ok(PermissionStatus::Granted)
}
