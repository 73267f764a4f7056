//! WinRT Central
//!
//! [`BleCentral`] backed by `Windows.Devices.Bluetooth`. WinRT operations are
//! awaited on spawned tokio tasks and their outcome is posted to the session
//! channel, so every trait method returns immediately.

use crate::domain::models::{BleEvent, DiscoveredDevice, GattStatus, LinkState};
use crate::infrastructure::bluetooth::central::{BleCentral, ConnectionHandle, EventSender};
use crate::infrastructure::bluetooth::connection::{self, GattLink};
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::protocol::{
    CCCD_UUID, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use crate::infrastructure::bluetooth::scanner::BleScanner;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
};

/// Link slot shared with in-flight tasks
#[derive(Default)]
struct LinkSlot {
    /// Handle id the session currently owns
    current: Option<u64>,
    link: Option<GattLink>,
}

pub struct WinRtCentral {
    events: EventSender,
    scanner: BleScanner,
    slot: Arc<Mutex<LinkSlot>>,
    tasks: Vec<JoinHandle<()>>,
    next_handle: u64,
}

impl WinRtCentral {
    pub fn new(events: EventSender) -> Self {
        Self {
            scanner: BleScanner::new(events.clone()),
            events,
            slot: Arc::new(Mutex::new(LinkSlot::default())),
            tasks: Vec::new(),
            next_handle: 1,
        }
    }

    fn lock(slot: &Mutex<LinkSlot>) -> Result<MutexGuard<'_, LinkSlot>, BleError> {
        slot.lock()
            .map_err(|_| BleError::Gatt("connection state lock poisoned".to_string()))
    }

    fn spawn(&mut self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(tokio::spawn(task));
    }

    /// Run `f` against the open link owned by `connection`
    fn with_link<T>(
        &self,
        connection: &ConnectionHandle,
        f: impl FnOnce(&mut GattLink) -> Result<T, BleError>,
    ) -> Result<T, BleError> {
        let mut slot = Self::lock(&self.slot)?;
        if slot.current != Some(connection.id()) {
            return Err(BleError::UnknownConnection(connection.id()));
        }
        let link = slot
            .link
            .as_mut()
            .ok_or(BleError::UnknownConnection(connection.id()))?;
        f(link)
    }
}

impl BleCentral for WinRtCentral {
    fn start_scan(&mut self) -> Result<(), BleError> {
        self.scanner.start()
    }

    fn stop_scan(&mut self) -> Result<(), BleError> {
        self.scanner.stop()
    }

    fn connect(&mut self, device: &DiscoveredDevice) -> Result<ConnectionHandle, BleError> {
        let id = self.next_handle;
        self.next_handle += 1;
        Self::lock(&self.slot)?.current = Some(id);

        let slot = self.slot.clone();
        let events = self.events.clone();
        let address = device.address;
        self.spawn(async move {
            match GattLink::open(address, &events).await {
                Ok(link) => {
                    let Ok(mut guard) = slot.lock() else {
                        link.close();
                        return;
                    };
                    if guard.current != Some(id) {
                        // Released while we were connecting
                        drop(guard);
                        link.close();
                        return;
                    }
                    guard.link = Some(link);
                    drop(guard);
                    events.send(BleEvent::ConnectionStateChanged(LinkState::Connected));
                }
                Err(e) => {
                    warn!("Connection to {:#X} failed: {}", address, e);
                    events.send(BleEvent::ConnectionStateChanged(LinkState::Disconnected));
                }
            }
        });
        Ok(ConnectionHandle::new(id))
    }

    fn discover_services(&mut self, connection: &ConnectionHandle) -> Result<(), BleError> {
        let device = self.with_link(connection, |link| Ok(link.device.clone()))?;
        let slot = self.slot.clone();
        let events = self.events.clone();
        let id = connection.id();

        self.spawn(async move {
            let result = connection::enumerate(&device).await;
            let services = result.map(|(services, handles)| {
                if let Ok(mut guard) = slot.lock() {
                    if guard.current == Some(id) {
                        if let Some(link) = guard.link.as_mut() {
                            link.store_characteristics(handles);
                        }
                    }
                }
                services
            });
            events.send(BleEvent::ServicesDiscovered(services));
        });
        Ok(())
    }

    fn set_notify(
        &mut self,
        connection: &ConnectionHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), BleError> {
        let events = self.events.clone();
        self.with_link(connection, |link| {
            if enabled {
                link.route_notifications(characteristic, &events)
            } else {
                link.unroute_notifications(characteristic);
                Ok(())
            }
        })
    }

    fn write_descriptor(
        &mut self,
        connection: &ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), BleError> {
        if descriptor != CCCD_UUID {
            return Err(BleError::Gatt(format!(
                "writing descriptor {} is not supported",
                descriptor
            )));
        }
        let cccd_value = if value == ENABLE_NOTIFICATION_VALUE {
            GattClientCharacteristicConfigurationDescriptorValue::Notify
        } else if value == DISABLE_NOTIFICATION_VALUE {
            GattClientCharacteristicConfigurationDescriptorValue::None
        } else {
            return Err(BleError::Gatt(format!("invalid CCCD value {:?}", value)));
        };

        let handle = self.with_link(connection, |link| {
            link.characteristic(characteristic).ok_or_else(|| {
                BleError::Gatt(format!("characteristic {} not discovered", characteristic))
            })
        })?;
        let operation = handle.WriteClientCharacteristicConfigurationDescriptorAsync(cccd_value)?;

        let events = self.events.clone();
        self.spawn(async move {
            let result = match operation.await {
                Ok(GattCommunicationStatus::Success) => {
                    info!("Notifications enabled successfully");
                    Ok(())
                }
                Ok(status) => {
                    warn!("Notification subscription returned status: {:?}", status);
                    Err(GattStatus(status.0 as u32))
                }
                Err(e) => {
                    warn!("Notification subscription failed: {}", e);
                    Err(GattStatus(e.code().0 as u32))
                }
            };
            events.send(BleEvent::DescriptorWritten(result));
        });
        Ok(())
    }

    fn close(&mut self, connection: ConnectionHandle) {
        let link = match Self::lock(&self.slot) {
            Ok(mut slot) if slot.current == Some(connection.id()) => {
                slot.current = None;
                slot.link.take()
            }
            Ok(_) => return,
            Err(e) => {
                warn!("Failed to release connection {}: {}", connection.id(), e);
                return;
            }
        };
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(link) = link {
            link.close();
        }
    }
}

impl Drop for WinRtCentral {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
