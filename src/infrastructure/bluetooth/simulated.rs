//! Simulated Peripheral
//!
//! An in-process stand-in for the Arduino board. It advertises alongside a
//! couple of unrelated devices, accepts one connection, exposes the IMU GATT
//! layout and streams synthetic samples once notifications are enabled.
//! Only used when `use_simulated_peripheral` is set.

use crate::domain::models::{
    BleEvent, DiscoveredDevice, GattCharacteristic, GattService, LinkState,
};
use crate::infrastructure::bluetooth::central::{BleCentral, ConnectionHandle, EventSender};
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::protocol::{
    CCCD_UUID, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE, IMU_DATA_CHAR_UUID,
    IMU_SERVICE_UUID,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Generic Access service, present on every real peripheral
const GENERIC_ACCESS_UUID: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);

/// Device Name characteristic inside Generic Access
const DEVICE_NAME_UUID: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);

/// Timing and identity of the simulated board
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    pub name: String,
    pub address: u64,
    pub service_uuid: Uuid,
    pub data_char_uuid: Uuid,
    /// Delay before the board's first advertisement
    pub advertise_after: Duration,
    pub advertise_interval: Duration,
    pub connect_latency: Duration,
    pub discovery_latency: Duration,
    pub sample_interval: Duration,
}

impl Default for SimulatedPeripheral {
    fn default() -> Self {
        Self {
            name: "ArduinoIMU".to_string(),
            address: 0x0000_C0FF_EE00_1234,
            service_uuid: IMU_SERVICE_UUID,
            data_char_uuid: IMU_DATA_CHAR_UUID,
            advertise_after: Duration::from_millis(1500),
            advertise_interval: Duration::from_secs(1),
            connect_latency: Duration::from_millis(200),
            discovery_latency: Duration::from_millis(300),
            sample_interval: Duration::from_millis(100),
        }
    }
}

impl SimulatedPeripheral {
    fn gatt_layout(&self) -> Vec<GattService> {
        vec![
            GattService {
                uuid: GENERIC_ACCESS_UUID,
                characteristics: vec![GattCharacteristic {
                    uuid: DEVICE_NAME_UUID,
                    descriptors: vec![],
                }],
            },
            GattService {
                uuid: self.service_uuid,
                characteristics: vec![GattCharacteristic {
                    uuid: self.data_char_uuid,
                    descriptors: vec![CCCD_UUID],
                }],
            },
        ]
    }
}

/// Six unsigned bytes (accel xyz, gyro xyz) tracing slow sine waves
fn synthetic_sample(tick: u64) -> Vec<u8> {
    let t = tick as f32 * 0.1;
    (0..6)
        .map(|axis| {
            let phase = axis as f32 * std::f32::consts::FRAC_PI_3;
            (127.5 + 100.0 * (t + phase).sin()).round() as u8
        })
        .collect()
}

pub struct SimulatedCentral {
    peripheral: SimulatedPeripheral,
    events: EventSender,
    scan_task: Option<JoinHandle<()>>,
    link_task: Option<JoinHandle<()>>,
    stream_task: Option<JoinHandle<()>>,
    connection: Option<u64>,
    notify_enabled: bool,
    next_handle: u64,
}

impl SimulatedCentral {
    pub fn new(events: EventSender, peripheral: SimulatedPeripheral) -> Self {
        Self {
            peripheral,
            events,
            scan_task: None,
            link_task: None,
            stream_task: None,
            connection: None,
            notify_enabled: false,
            next_handle: 1,
        }
    }

    fn check(&self, connection: &ConnectionHandle) -> Result<(), BleError> {
        if self.connection == Some(connection.id()) {
            Ok(())
        } else {
            Err(BleError::UnknownConnection(connection.id()))
        }
    }

    fn stop_stream(&mut self) {
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
    }
}

impl BleCentral for SimulatedCentral {
    fn start_scan(&mut self) -> Result<(), BleError> {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        info!("Simulated scan started");

        let events = self.events.clone();
        let board = DiscoveredDevice {
            name: Some(self.peripheral.name.clone()),
            address: self.peripheral.address,
        };
        let advertise_after = self.peripheral.advertise_after;
        let interval = self.peripheral.advertise_interval;

        self.scan_task = Some(tokio::spawn(async move {
            let neighbours = [
                DiscoveredDevice {
                    name: None,
                    address: 0x0000_1122_3344_5566,
                },
                DiscoveredDevice {
                    name: Some("Heart Rate".to_string()),
                    address: 0x0000_A0B1_C2D3_E4F5,
                },
            ];
            for device in neighbours {
                events.send(BleEvent::ScanResult(device));
            }

            tokio::time::sleep(advertise_after).await;
            loop {
                if !events.send(BleEvent::ScanResult(board.clone())) {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        }));
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), BleError> {
        if let Some(task) = self.scan_task.take() {
            task.abort();
            info!("Simulated scan stopped");
        }
        Ok(())
    }

    fn connect(&mut self, device: &DiscoveredDevice) -> Result<ConnectionHandle, BleError> {
        if device.address != self.peripheral.address {
            return Err(BleError::ConnectFailed(format!(
                "{} does not accept connections",
                device
            )));
        }

        let id = self.next_handle;
        self.next_handle += 1;
        self.connection = Some(id);

        let events = self.events.clone();
        let latency = self.peripheral.connect_latency;
        self.link_task = Some(tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            events.send(BleEvent::ConnectionStateChanged(LinkState::Connected));
        }));
        Ok(ConnectionHandle::new(id))
    }

    fn discover_services(&mut self, connection: &ConnectionHandle) -> Result<(), BleError> {
        self.check(connection)?;

        let events = self.events.clone();
        let latency = self.peripheral.discovery_latency;
        let layout = self.peripheral.gatt_layout();
        self.link_task = Some(tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            events.send(BleEvent::ServicesDiscovered(Ok(layout)));
        }));
        Ok(())
    }

    fn set_notify(
        &mut self,
        connection: &ConnectionHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), BleError> {
        self.check(connection)?;
        if characteristic == self.peripheral.data_char_uuid {
            self.notify_enabled = enabled;
        }
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        connection: &ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), BleError> {
        self.check(connection)?;
        if descriptor != CCCD_UUID || characteristic != self.peripheral.data_char_uuid {
            return Err(BleError::Gatt(format!(
                "descriptor {} of {} is not writable",
                descriptor, characteristic
            )));
        }

        self.stop_stream();
        if value == DISABLE_NOTIFICATION_VALUE {
            self.events.send(BleEvent::DescriptorWritten(Ok(())));
            return Ok(());
        }
        if value != ENABLE_NOTIFICATION_VALUE {
            return Err(BleError::Gatt(format!("invalid CCCD value {:?}", value)));
        }

        let events = self.events.clone();
        let notify = self.notify_enabled;
        let interval = self.peripheral.sample_interval;
        self.stream_task = Some(tokio::spawn(async move {
            events.send(BleEvent::DescriptorWritten(Ok(())));
            // Without local routing the central never sees the pushes
            if !notify {
                return;
            }
            let mut tick = 0u64;
            loop {
                tokio::time::sleep(interval).await;
                let delivered = events.send(BleEvent::CharacteristicChanged {
                    characteristic,
                    value: synthetic_sample(tick),
                });
                if !delivered {
                    break;
                }
                tick += 1;
            }
        }));
        debug!("Simulated notifications enabled");
        Ok(())
    }

    fn close(&mut self, connection: ConnectionHandle) {
        if self.connection != Some(connection.id()) {
            return;
        }
        self.connection = None;
        self.notify_enabled = false;
        self.stop_stream();
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        info!("Simulated connection {} closed", connection.id());
    }
}

impl Drop for SimulatedCentral {
    fn drop(&mut self) {
        for task in [
            self.scan_task.take(),
            self.link_task.take(),
            self.stream_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}
