// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! btleplug-backed implementation of the Link Band hardware traits.
//!
//! Discovery runs a bounded scan on the first system adapter and filters
//! advertisements by the Link Band name prefix. A connected peripheral's
//! notification stream is demuxed by characteristic UUID into
//! [linkband_server::device::HardwareEvent]s on a broadcast channel; the
//! notification loop does no I/O beyond that send.

#[macro_use]
extern crate log;

use async_trait::async_trait;
use btleplug::{
  api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter},
  platform::{Adapter, Manager, Peripheral},
};
use futures::StreamExt;
use linkband_core::{
  errors::TransportError,
  sample::{DeviceDescriptor, DeviceInfo, SensorKind},
  util::{async_manager, time},
};
use linkband_server::device::{
  HARDWARE_EVENT_CAPACITY, HardwareEvent, HardwareManager, SensorHardware,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Primary Link Band GATT service.
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x1ced0001_5c1e_4c2e_8a2e_1ced00000001);
/// Notify characteristics, one per stream.
pub const EEG_NOTIFY_UUID: Uuid = Uuid::from_u128(0x1ced0002_5c1e_4c2e_8a2e_1ced00000001);
pub const PPG_NOTIFY_UUID: Uuid = Uuid::from_u128(0x1ced0003_5c1e_4c2e_8a2e_1ced00000001);
pub const ACC_NOTIFY_UUID: Uuid = Uuid::from_u128(0x1ced0004_5c1e_4c2e_8a2e_1ced00000001);
pub const BATTERY_NOTIFY_UUID: Uuid = Uuid::from_u128(0x1ced0005_5c1e_4c2e_8a2e_1ced00000001);
/// One-shot device information read.
pub const DEVICE_INFO_UUID: Uuid = Uuid::from_u128(0x1ced0006_5c1e_4c2e_8a2e_1ced00000001);

fn sensor_for_uuid(uuid: &Uuid) -> Option<SensorKind> {
  match *uuid {
    EEG_NOTIFY_UUID => Some(SensorKind::Eeg),
    PPG_NOTIFY_UUID => Some(SensorKind::Ppg),
    ACC_NOTIFY_UUID => Some(SensorKind::Acc),
    BATTERY_NOTIFY_UUID => Some(SensorKind::Battery),
    _ => None,
  }
}

/// Scan/connect front-end over the first system Bluetooth adapter.
pub struct BtleplugHardwareManager {
  name_prefix: String,
}

impl BtleplugHardwareManager {
  pub fn new(name_prefix: &str) -> Self {
    Self {
      name_prefix: name_prefix.to_owned(),
    }
  }

  /// Startup probe: succeeds iff a Bluetooth LE adapter is present.
  pub async fn probe(&self) -> Result<(), TransportError> {
    self.adapter().await.map(|_| ())
  }

  async fn adapter(&self) -> Result<Adapter, TransportError> {
    let manager = Manager::new().await.map_err(|err| {
      error!("Cannot create btleplug manager: {:?}", err);
      TransportError::BluetoothUnavailable
    })?;
    let adapters = manager.adapters().await.map_err(|err| {
      error!("Cannot enumerate Bluetooth adapters: {:?}", err);
      TransportError::BluetoothUnavailable
    })?;
    adapters.into_iter().next().ok_or_else(|| {
      error!("No Bluetooth LE adapter found");
      TransportError::BluetoothUnavailable
    })
  }
}

#[async_trait]
impl HardwareManager for BtleplugHardwareManager {
  async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError> {
    let adapter = self.adapter().await?;
    adapter
      .start_scan(ScanFilter::default())
      .await
      .map_err(|err| {
        error!("Start scanning request failed: {}", err);
        TransportError::BluetoothUnavailable
      })?;
    tokio::time::sleep(timeout).await;

    let mut devices = Vec::new();
    let peripherals = adapter.peripherals().await.unwrap_or_default();
    for peripheral in peripherals {
      let Ok(Some(properties)) = peripheral.properties().await else {
        continue;
      };
      let Some(name) = properties.local_name else {
        continue;
      };
      if !name.starts_with(&self.name_prefix) {
        trace!("Ignoring non Link Band advertisement {:?}", name);
        continue;
      }
      devices.push(DeviceDescriptor {
        address: format!("{:?}", peripheral.id()),
        name,
        last_seen: time::unix_now(),
      });
    }
    if let Err(err) = adapter.stop_scan().await {
      warn!("Stop scanning request failed: {}", err);
    }
    debug!("Scan found {} Link Band advertisements", devices.len());
    Ok(devices)
  }

  async fn connect(
    &self,
    address: &str,
    timeout: Duration,
  ) -> Result<Arc<dyn SensorHardware>, TransportError> {
    let adapter = self.adapter().await?;
    let peripherals = adapter
      .peripherals()
      .await
      .map_err(|_| TransportError::BluetoothUnavailable)?;
    let peripheral = peripherals
      .into_iter()
      .find(|p| format!("{:?}", p.id()) == address)
      .ok_or_else(|| TransportError::NotFound(address.to_owned()))?;

    tokio::time::timeout(timeout, peripheral.connect())
      .await
      .map_err(|_| TransportError::Timeout(format!("connecting to {address}")))?
      .map_err(|err| {
        error!("BTLE connect error: {:?}", err);
        TransportError::NotFound(address.to_owned())
      })?;
    peripheral.discover_services().await.map_err(|err| {
      error!("BTLE service discovery error: {:?}", err);
      TransportError::NotifyFailed(format!("service discovery: {err:?}"))
    })?;

    let mut characteristics = HashMap::new();
    let mut info_characteristic = None;
    for service in peripheral.services() {
      if service.uuid != SENSOR_SERVICE_UUID {
        continue;
      }
      for characteristic in &service.characteristics {
        if let Some(sensor) = sensor_for_uuid(&characteristic.uuid) {
          debug!("Found {} characteristic {}", sensor, characteristic.uuid);
          characteristics.insert(sensor, characteristic.clone());
        } else if characteristic.uuid == DEVICE_INFO_UUID {
          info_characteristic = Some(characteristic.clone());
        }
      }
    }
    if characteristics.len() != 4 {
      let _ = peripheral.disconnect().await;
      return Err(TransportError::NotifyFailed(format!(
        "expected 4 sensor characteristics, found {}",
        characteristics.len()
      )));
    }

    let name = peripheral
      .properties()
      .await
      .ok()
      .flatten()
      .and_then(|p| p.local_name)
      .unwrap_or_else(|| "Link Band".to_owned());

    let hardware = BtleplugSensorHardware::new(
      peripheral,
      adapter,
      name,
      address.to_owned(),
      characteristics,
      info_characteristic,
    )
    .await?;
    Ok(Arc::new(hardware))
  }
}

pub struct BtleplugSensorHardware {
  peripheral: Peripheral,
  name: String,
  address: String,
  characteristics: HashMap<SensorKind, Characteristic>,
  info_characteristic: Option<Characteristic>,
  events: broadcast::Sender<HardwareEvent>,
}

impl BtleplugSensorHardware {
  async fn new(
    peripheral: Peripheral,
    adapter: Adapter,
    name: String,
    address: String,
    characteristics: HashMap<SensorKind, Characteristic>,
    info_characteristic: Option<Characteristic>,
  ) -> Result<Self, TransportError> {
    let (events, _) = broadcast::channel(HARDWARE_EVENT_CAPACITY);

    let mut notifications = peripheral
      .notifications()
      .await
      .map_err(|err| TransportError::NotifyFailed(format!("notification stream: {err:?}")))?;
    let mut adapter_events = adapter
      .events()
      .await
      .map_err(|err| TransportError::NotifyFailed(format!("adapter events: {err:?}")))?;

    let event_sender = events.clone();
    let peripheral_id = peripheral.id();
    let event_address = address.clone();
    async_manager::spawn(async move {
      loop {
        tokio::select! {
          notification = notifications.next() => {
            let Some(notification) = notification else {
              debug!("Notification stream for {} closed", event_address);
              break;
            };
            let Some(sensor) = sensor_for_uuid(&notification.uuid) else {
              continue;
            };
            if event_sender.receiver_count() == 0 {
              continue;
            }
            let _ = event_sender.send(HardwareEvent::Notification {
              sensor,
              t_host: time::host_now(),
              data: notification.value,
            });
          }
          adapter_event = adapter_events.next() => {
            if let Some(CentralEvent::DeviceDisconnected(id)) = adapter_event
              && id == peripheral_id
            {
              info!("Device {} disconnected", event_address);
              let _ = event_sender.send(HardwareEvent::Disconnected {
                address: event_address.clone(),
              });
              break;
            }
          }
        }
      }
      debug!("Exiting notification loop for {}", event_address);
    });

    Ok(Self {
      peripheral,
      name,
      address,
      characteristics,
      info_characteristic,
      events,
    })
  }
}

#[async_trait]
impl SensorHardware for BtleplugSensorHardware {
  fn name(&self) -> &str {
    &self.name
  }

  fn address(&self) -> &str {
    &self.address
  }

  fn event_stream(&self) -> broadcast::Receiver<HardwareEvent> {
    self.events.subscribe()
  }

  async fn device_info(&self) -> Result<DeviceInfo, TransportError> {
    let Some(characteristic) = &self.info_characteristic else {
      return Ok(DeviceInfo {
        name: self.name.clone(),
        address: self.address.clone(),
        firmware_version: "unknown".to_owned(),
      });
    };
    let raw = self.peripheral.read(characteristic).await.map_err(|err| {
      TransportError::NotifyFailed(format!("device info read: {err:?}"))
    })?;
    Ok(DeviceInfo {
      name: self.name.clone(),
      address: self.address.clone(),
      firmware_version: String::from_utf8_lossy(&raw).trim().to_owned(),
    })
  }

  async fn start_notifications(&self) -> Result<(), TransportError> {
    for (sensor, characteristic) in &self.characteristics {
      self.peripheral.subscribe(characteristic).await.map_err(|err| {
        error!("Cannot subscribe {} notifications: {:?}", sensor, err);
        TransportError::NotifyFailed(format!("{sensor}: {err:?}"))
      })?;
    }
    Ok(())
  }

  async fn stop_notifications(&self) -> Result<(), TransportError> {
    for (sensor, characteristic) in &self.characteristics {
      if let Err(err) = self.peripheral.unsubscribe(characteristic).await {
        debug!("Unsubscribe {} failed (device gone?): {:?}", sensor, err);
      }
    }
    Ok(())
  }

  async fn disconnect(&self) -> Result<(), TransportError> {
    let _ = self.peripheral.disconnect().await;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn characteristic_uuid_mapping_is_total_for_sensors() {
    assert_eq!(sensor_for_uuid(&EEG_NOTIFY_UUID), Some(SensorKind::Eeg));
    assert_eq!(sensor_for_uuid(&PPG_NOTIFY_UUID), Some(SensorKind::Ppg));
    assert_eq!(sensor_for_uuid(&ACC_NOTIFY_UUID), Some(SensorKind::Acc));
    assert_eq!(sensor_for_uuid(&BATTERY_NOTIFY_UUID), Some(SensorKind::Battery));
    assert_eq!(sensor_for_uuid(&DEVICE_INFO_UUID), None);
  }

  #[test]
  fn uuids_share_the_sensor_service_namespace() {
    for uuid in [
      EEG_NOTIFY_UUID,
      PPG_NOTIFY_UUID,
      ACC_NOTIFY_UUID,
      BATTERY_NOTIFY_UUID,
      DEVICE_INFO_UUID,
    ] {
      assert_eq!(&uuid.as_bytes()[4..], &SENSOR_SERVICE_UUID.as_bytes()[4..]);
    }
  }
}
