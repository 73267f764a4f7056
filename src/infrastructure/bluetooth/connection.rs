//! BLE Connection Module
//!
//! WinRT device connection and GATT enumeration.

use crate::domain::models::{BleEvent, GattCharacteristic, GattService, GattStatus, LinkState};
use crate::infrastructure::bluetooth::central::EventSender;
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::protocol::guid;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::Devices::Bluetooth::GenericAttributeProfile as gatt;
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, IBuffer};

/// An open link to the peripheral
pub struct GattLink {
    pub device: BluetoothLEDevice,
    session: Option<gatt::GattSession>,
    characteristics: HashMap<Uuid, gatt::GattCharacteristic>,
    /// `ValueChanged` registrations, removed when notifications are disabled
    value_tokens: HashMap<Uuid, i64>,
}

impl GattLink {
    /// Connect to a device by Bluetooth address and watch its link status
    pub async fn open(address: u64, events: &EventSender) -> windows::core::Result<Self> {
        info!("Connecting to Bluetooth device: {:#X}", address);
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
        info!("Device object acquired: {:?}", device.Name()?);

        let sender = events.clone();
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    let link = match dev.ConnectionStatus()? {
                        BluetoothConnectionStatus::Connected => LinkState::Connected,
                        _ => LinkState::Disconnected,
                    };
                    sender.send(BleEvent::ConnectionStateChanged(link));
                }
                Ok(())
            });
        device.ConnectionStatusChanged(&status_handler)?;

        // Keeps Windows from dropping the link between GATT calls
        let session = match Self::create_gatt_session(&device).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Failed to create GattSession, continuing anyway: {}", e);
                None
            }
        };

        Ok(Self {
            device,
            session,
            characteristics: HashMap::new(),
            value_tokens: HashMap::new(),
        })
    }

    async fn create_gatt_session(
        device: &BluetoothLEDevice,
    ) -> windows::core::Result<gatt::GattSession> {
        let device_id = device.BluetoothDeviceId()?;
        let session = gatt::GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        Ok(session)
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<gatt::GattCharacteristic> {
        self.characteristics.get(&uuid).cloned()
    }

    pub fn store_characteristics(&mut self, characteristics: HashMap<Uuid, gatt::GattCharacteristic>) {
        self.characteristics = characteristics;
    }

    /// Forward `ValueChanged` notifications of `uuid` into the session channel
    pub fn route_notifications(
        &mut self,
        uuid: Uuid,
        events: &EventSender,
    ) -> Result<(), BleError> {
        let characteristic = self
            .characteristic(uuid)
            .ok_or_else(|| BleError::Gatt(format!("characteristic {} not discovered", uuid)))?;
        if self.value_tokens.contains_key(&uuid) {
            return Ok(());
        }

        let sender = events.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<gatt::GattCharacteristic>,
                  args: windows::core::Ref<gatt::GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = read_buffer(&args.CharacteristicValue()?)?;
                    sender.send(BleEvent::CharacteristicChanged {
                        characteristic: uuid,
                        value,
                    });
                }
                Ok(())
            },
        );
        let token = characteristic.ValueChanged(&handler)?;
        self.value_tokens.insert(uuid, token);
        Ok(())
    }

    pub fn unroute_notifications(&mut self, uuid: Uuid) {
        if let (Some(token), Some(characteristic)) =
            (self.value_tokens.remove(&uuid), self.characteristic(uuid))
        {
            let _ = characteristic.RemoveValueChanged(token);
        }
    }

    pub fn close(mut self) {
        for uuid in self.value_tokens.keys().copied().collect::<Vec<_>>() {
            self.unroute_notifications(uuid);
        }
        if let Some(session) = self.session.take() {
            let _ = session.Close();
        }
        let _ = self.device.Close();
        info!("Closed connection to device");
    }
}

type Discovery = (Vec<GattService>, HashMap<Uuid, gatt::GattCharacteristic>);

fn gatt_status(err: windows::core::Error) -> GattStatus {
    warn!("GATT enumeration failed: {}", err);
    GattStatus(err.code().0 as u32)
}

/// Enumerate every service, characteristic and descriptor of `device`
pub async fn enumerate(device: &BluetoothLEDevice) -> Result<Discovery, GattStatus> {
    let services_result = device
        .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)
        .map_err(gatt_status)?
        .await
        .map_err(gatt_status)?;
    let status = services_result.Status().map_err(gatt_status)?;
    if status != gatt::GattCommunicationStatus::Success {
        return Err(GattStatus(status.0 as u32));
    }

    let mut services = Vec::new();
    let mut handles = HashMap::new();

    let winrt_services = services_result.Services().map_err(gatt_status)?;
    for service in winrt_services {
        let service_uuid = guid::from_guid(service.Uuid().map_err(gatt_status)?);
        let characteristics = match enumerate_characteristics(&service).await {
            Ok(found) => found,
            Err(e) => {
                // Services that deny access (HID and friends) are reported empty
                debug!("Characteristics of {} unavailable: {}", service_uuid, e);
                Vec::new()
            }
        };

        let mut described = Vec::with_capacity(characteristics.len());
        for (info, handle) in characteristics {
            handles.insert(info.uuid, handle);
            described.push(info);
        }
        services.push(GattService {
            uuid: service_uuid,
            characteristics: described,
        });
    }

    Ok((services, handles))
}

async fn enumerate_characteristics(
    service: &gatt::GattDeviceService,
) -> windows::core::Result<Vec<(GattCharacteristic, gatt::GattCharacteristic)>> {
    let chars_result = service
        .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
        .await?;
    if chars_result.Status()? != gatt::GattCommunicationStatus::Success {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for characteristic in chars_result.Characteristics()? {
        let uuid = guid::from_guid(characteristic.Uuid()?);

        let mut descriptors = Vec::new();
        let desc_result = characteristic.GetDescriptorsAsync()?.await?;
        if desc_result.Status()? == gatt::GattCommunicationStatus::Success {
            for descriptor in desc_result.Descriptors()? {
                descriptors.push(guid::from_guid(descriptor.Uuid()?));
            }
        }

        found.push((GattCharacteristic { uuid, descriptors }, characteristic));
    }
    Ok(found)
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}
