//! BLE Scanner Module
//!
//! Bluetooth LE advertisement watcher for the WinRT backend. Every received
//! advertisement is forwarded as a scan result; filtering by name happens in
//! the session.

use crate::domain::models::{BleEvent, DiscoveredDevice};
use crate::infrastructure::bluetooth::central::EventSender;
use crate::infrastructure::bluetooth::error::BleError;
use tracing::info;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

pub struct BleScanner {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    events: EventSender,
}

impl BleScanner {
    pub fn new(events: EventSender) -> Self {
        Self {
            watcher: None,
            events,
        }
    }

    /// Start an active scan, replacing any running one
    pub fn start(&mut self) -> Result<(), BleError> {
        self.stop()?;
        info!("Starting BLE advertisement watcher");

        let watcher =
            BluetoothLEAdvertisementWatcher::new().map_err(|e| BleError::ScanFailed(e.to_string()))?;
        // Active mode asks for scan responses, which is where many boards put their name
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sender = self.events.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    let device = DiscoveredDevice {
                        name: (!name.is_empty()).then_some(name),
                        address: args.BluetoothAddress()?,
                    };
                    sender.send(BleEvent::ScanResult(device));
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher
            .Start()
            .map_err(|e| BleError::ScanFailed(e.to_string()))?;
        self.watcher = Some(watcher);

        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), BleError> {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE advertisement watcher");
            watcher.Stop()?;
        }
        Ok(())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
