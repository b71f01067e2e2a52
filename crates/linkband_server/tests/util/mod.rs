// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Test utilities: a channel-backed hardware implementation standing in for
//! a real Link Band, plus packet fixture builders matching the firmware
//! framing and a WebSocket test client.

// Each integration test binary compiles its own copy of this module and
// uses a different slice of it.
#![allow(dead_code)]

use async_trait::async_trait;
use linkband_core::{
  errors::TransportError,
  sample::{DeviceDescriptor, DeviceInfo, SensorKind},
  util::time,
};
use linkband_server::device::{
  HARDWARE_EVENT_CAPACITY, HardwareEvent, HardwareManager, SensorHardware,
};
use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};
use tokio::sync::broadcast;

pub struct MockHardware {
  name: String,
  address: String,
  events: broadcast::Sender<HardwareEvent>,
  notifying: AtomicBool,
}

impl MockHardware {
  fn new(address: &str, name: &str) -> Self {
    let (events, _) = broadcast::channel(HARDWARE_EVENT_CAPACITY);
    Self {
      name: name.to_owned(),
      address: address.to_owned(),
      events,
      notifying: AtomicBool::new(false),
    }
  }

  /// Inject one characteristic notification as the firmware would send it.
  pub fn send_packet(&self, sensor: SensorKind, data: Vec<u8>) {
    let _ = self.events.send(HardwareEvent::Notification {
      sensor,
      t_host: time::host_now(),
      data,
    });
  }

  /// Simulate an unsolicited link loss. Notifications stop with the link.
  pub fn send_disconnect(&self) {
    self.notifying.store(false, Ordering::Relaxed);
    let _ = self.events.send(HardwareEvent::Disconnected {
      address: self.address.clone(),
    });
  }

  pub fn is_notifying(&self) -> bool {
    self.notifying.load(Ordering::Relaxed)
  }
}

#[async_trait]
impl SensorHardware for MockHardware {
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
    Ok(DeviceInfo {
      name: self.name.clone(),
      address: self.address.clone(),
      firmware_version: "2.4.1-mock".to_owned(),
    })
  }

  async fn start_notifications(&self) -> Result<(), TransportError> {
    self.notifying.store(true, Ordering::Relaxed);
    Ok(())
  }

  async fn stop_notifications(&self) -> Result<(), TransportError> {
    self.notifying.store(false, Ordering::Relaxed);
    Ok(())
  }

  async fn disconnect(&self) -> Result<(), TransportError> {
    self.notifying.store(false, Ordering::Relaxed);
    Ok(())
  }
}

#[derive(Default)]
pub struct MockHardwareManager {
  devices: Mutex<HashMap<String, Arc<MockHardware>>>,
  connect_delay: Mutex<Option<Duration>>,
}

impl MockHardwareManager {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_device(&self, address: &str, name: &str) -> Arc<MockHardware> {
    let hardware = Arc::new(MockHardware::new(address, name));
    self
      .devices
      .lock()
      .unwrap()
      .insert(address.to_owned(), hardware.clone());
    hardware
  }

  /// Make connects take a while, to exercise command serialization.
  pub fn set_connect_delay(&self, delay: Duration) {
    *self.connect_delay.lock().unwrap() = Some(delay);
  }
}

#[async_trait]
impl HardwareManager for MockHardwareManager {
  async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError> {
    tokio::time::sleep(timeout.min(Duration::from_millis(50))).await;
    let mut devices: Vec<DeviceDescriptor> = self
      .devices
      .lock()
      .unwrap()
      .values()
      .map(|hardware| DeviceDescriptor {
        address: hardware.address.clone(),
        name: hardware.name.clone(),
        last_seen: time::unix_now(),
      })
      .collect();
    devices.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(devices)
  }

  async fn connect(
    &self,
    address: &str,
    _timeout: Duration,
  ) -> Result<Arc<dyn SensorHardware>, TransportError> {
    let delay = *self.connect_delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    let hardware = self
      .devices
      .lock()
      .unwrap()
      .get(address)
      .cloned()
      .ok_or_else(|| TransportError::NotFound(address.to_owned()))?;
    Ok(hardware)
  }
}

// --- Packet fixtures ------------------------------------------------------

fn push_i24_be(buf: &mut Vec<u8>, value: i32) {
  buf.push(((value >> 16) & 0xff) as u8);
  buf.push(((value >> 8) & 0xff) as u8);
  buf.push((value & 0xff) as u8);
}

fn push_anchor(buf: &mut Vec<u8>, anchor_ms: u32) {
  buf.extend_from_slice(&anchor_ms.to_le_bytes());
}

/// EEG packet: `count` triplets of (status, ch1, ch2) counts.
pub fn eeg_packet(anchor_ms: u32, count: usize) -> Vec<u8> {
  let mut packet = Vec::with_capacity(4 + count * 7);
  push_anchor(&mut packet, anchor_ms);
  for i in 0..count {
    packet.push(0u8);
    push_i24_be(&mut packet, 1000 * i as i32);
    push_i24_be(&mut packet, 2000 * i as i32);
  }
  packet
}

/// PPG packet: `count` (red, ir) pairs.
pub fn ppg_packet(anchor_ms: u32, count: usize) -> Vec<u8> {
  let mut packet = Vec::with_capacity(4 + count * 6);
  push_anchor(&mut packet, anchor_ms);
  for i in 0..count {
    push_i24_be(&mut packet, 100_000 + i as i32);
    push_i24_be(&mut packet, 120_000 + i as i32);
  }
  packet
}

/// ACC packet: `count` (x, y, z) triplets near 1 g on z.
pub fn acc_packet(anchor_ms: u32, count: usize) -> Vec<u8> {
  let mut packet = Vec::with_capacity(4 + count * 6);
  push_anchor(&mut packet, anchor_ms);
  for _ in 0..count {
    packet.extend_from_slice(&0i16.to_le_bytes());
    packet.extend_from_slice(&0i16.to_le_bytes());
    packet.extend_from_slice(&8192i16.to_le_bytes());
  }
  packet
}

pub fn battery_packet(level: u8) -> Vec<u8> {
  vec![level]
}

// --- Supervisor rig and WebSocket client ----------------------------------

use futures::{SinkExt, StreamExt};
use linkband_core::config::ServerConfigBuilder;
use linkband_server::{Supervisor, SupervisorBuilder};
use std::{net::SocketAddr, path::Path};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

pub const DEVICE_ADDR: &str = "AA:BB:CC:DD:EE:01";

pub struct TestRig {
  pub supervisor: Supervisor,
  pub manager: Arc<MockHardwareManager>,
  pub device: Arc<MockHardware>,
  pub addr: SocketAddr,
}

/// Bring up a supervisor on an ephemeral port with one mock device.
pub async fn start_rig(root: &Path, queue_depth: usize) -> TestRig {
  let manager = Arc::new(MockHardwareManager::new());
  let device = manager.add_device(DEVICE_ADDR, "LXB-2F3A");
  let config = ServerConfigBuilder::default()
    .ws_host("127.0.0.1")
    .ws_port(0)
    .scan_timeout_s(0.05)
    .subscriber_queue_depth(queue_depth)
    .data_root(root.join("data"))
    .registry_file(root.join("registered_devices.json"))
    .finish();
  let supervisor = SupervisorBuilder::new(config)
    .hardware_manager(manager.clone())
    .start()
    .await
    .expect("supervisor starts");
  let addr = supervisor.bus_addr();
  TestRig {
    supervisor,
    manager,
    device,
    addr,
  }
}

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub async fn ws_connect(addr: SocketAddr) -> WsClient {
  let (client, _) = connect_async(format!("ws://{addr}"))
    .await
    .expect("websocket connect");
  client
}

pub async fn ws_send(client: &mut WsClient, value: serde_json::Value) {
  client
    .send(Message::text(value.to_string()))
    .await
    .expect("websocket send");
}

/// Next JSON text frame, panicking after `timeout`.
pub async fn ws_recv_json(client: &mut WsClient, timeout: Duration) -> serde_json::Value {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    let frame = tokio::time::timeout_at(deadline, client.next())
      .await
      .expect("timed out waiting for a frame")
      .expect("stream ended")
      .expect("socket error");
    if let Message::Text(text) = frame {
      return serde_json::from_str(text.as_str()).expect("valid JSON frame");
    }
  }
}

/// Skip frames until one satisfies `pred`.
pub async fn ws_recv_until(
  client: &mut WsClient,
  timeout: Duration,
  pred: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    let remaining = deadline
      .checked_duration_since(tokio::time::Instant::now())
      .expect("timed out waiting for matching frame");
    let value = ws_recv_json(client, remaining).await;
    if pred(&value) {
      return value;
    }
  }
}

/// Subscribe to channels and wait for the acknowledgement.
pub async fn ws_subscribe(client: &mut WsClient, channels: serde_json::Value) {
  ws_send(
    client,
    serde_json::json!({ "command": "subscribe", "channels": channels }),
  )
  .await;
  let reply = ws_recv_until(client, Duration::from_secs(5), |v| v["type"] == "subscribed").await;
  assert!(reply["channels"].is_array());
}
