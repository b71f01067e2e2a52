// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Hardware abstraction for a connected Link Band.
//!
//! A [HardwareManager] performs discovery and connection; the
//! [SensorHardware] it hands back forwards every characteristic notification
//! verbatim (stamped with the monotonic host clock) into a broadcast event
//! stream. Notification forwarding must never block: implementations push
//! into the broadcast channel and drop on lag, they do not perform I/O in the
//! notification path.
//!
//! State machine per target device, driven by the supervisor:
//! `Idle → Scanning → Connecting → Connected → Streaming → Disconnecting →
//! Idle`. Unsolicited disconnects surface as
//! [HardwareEvent::Disconnected] and move the slot back to `Idle`.

use async_trait::async_trait;
use linkband_core::{
  errors::TransportError,
  sample::{DeviceDescriptor, DeviceInfo, SensorKind},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;

/// Capacity of the hardware event broadcast channel. At the full EEG packet
/// rate (~10 packets/s/sensor) this is tens of seconds of headroom.
pub const HARDWARE_EVENT_CAPACITY: usize = 1024;

/// Events emitted by a connected device.
#[derive(Debug, Clone)]
pub enum HardwareEvent {
  /// One characteristic notification, forwarded verbatim.
  Notification {
    sensor: SensorKind,
    /// Monotonic host receive timestamp, seconds.
    t_host: f64,
    data: Vec<u8>,
  },
  /// The link dropped without a disconnect request.
  Disconnected { address: String },
}

/// A connected Link Band device.
#[async_trait]
pub trait SensorHardware: Send + Sync {
  fn name(&self) -> &str;

  /// Opaque, stable peripheral address.
  fn address(&self) -> &str;

  /// Subscribe to the notification/disconnect event stream.
  fn event_stream(&self) -> broadcast::Receiver<HardwareEvent>;

  /// One-shot device information read.
  async fn device_info(&self) -> Result<DeviceInfo, TransportError>;

  /// Subscribe to the four sensor characteristics.
  async fn start_notifications(&self) -> Result<(), TransportError>;

  async fn stop_notifications(&self) -> Result<(), TransportError>;

  async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Discovery and connection front-end implemented per transport backend.
#[async_trait]
pub trait HardwareManager: Send + Sync {
  /// Scan for advertisements matching the Link Band name prefix.
  async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, TransportError>;

  /// Connect to a previously scanned address.
  async fn connect(
    &self,
    address: &str,
    timeout: Duration,
  ) -> Result<Arc<dyn SensorHardware>, TransportError>;
}
