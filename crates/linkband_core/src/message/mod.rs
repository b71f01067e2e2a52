// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Stream bus wire protocol.
//!
//! Client-to-server messages carry a `command` discriminator; server-to-client
//! messages carry a `type` discriminator. Both sides are plain JSON text
//! frames. Every command is answered with a typed server message (usually an
//! [ServerMessage::Event]) within the command timeout, or an
//! [ServerMessage::Error] with [ErrorCode::Timeout].

use crate::sample::{ProcessedFrame, Sample, SensorKind};
use serde::{Deserialize, Serialize};

/// Which side of the pipeline a subscription follows.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelKind {
  Raw,
  Processed,
}

/// One subscribable channel: a sensor crossed with raw/processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSpec {
  pub sensor: SensorKind,
  pub kind: ChannelKind,
}

impl ChannelSpec {
  pub fn new(sensor: SensorKind, kind: ChannelKind) -> Self {
    Self { sensor, kind }
  }
}

/// Event vocabulary for `type: "event"` server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
  DeviceConnected,
  DeviceDisconnected,
  DeviceConnectionFailed,
  DeviceInfo,
  ScanResult,
  BluetoothStatus,
  StreamStarted,
  StreamStopped,
  RegisteredDevices,
  HealthCheck,
  DeviceStatus,
  RecordingStarted,
  RecordingStopped,
  Pong,
  Error,
}

/// Error codes carried by `type: "error"` server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
  UnknownChannel,
  UnknownCommand,
  BadPayload,
  SlowConsumer,
  Timeout,
  CommandFailed,
}

/// Commands accepted from subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
  Subscribe {
    channels: Vec<ChannelSpec>,
  },
  Unsubscribe {
    channels: Vec<ChannelSpec>,
  },
  HealthCheck,
  CheckDeviceConnection,
  ScanDevices {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_s: Option<f64>,
  },
  ConnectDevice {
    address: String,
  },
  DisconnectDevice,
  StartStreaming,
  StopStreaming,
  StartRecording {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_name: Option<String>,
  },
  StopRecording,
  Ping,
}

/// Per-second throughput summary broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamStats {
  pub eeg_sps: f64,
  pub ppg_sps: f64,
  pub acc_sps: f64,
  pub bat_level: Option<u8>,
  pub clients_connected: usize,
  pub dropped_messages: u64,
}

/// Messages sent from the server to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
  Subscribed {
    channels: Vec<ChannelSpec>,
  },
  RawData {
    sensor_type: SensorKind,
    timestamp: f64,
    count: usize,
    data: Vec<Sample>,
  },
  ProcessedData {
    sensor_type: SensorKind,
    timestamp: f64,
    data: ProcessedFrame,
  },
  Event {
    event_type: EventType,
    data: serde_json::Value,
  },
  Stats {
    timestamp: f64,
    #[serde(flatten)]
    stats: StreamStats,
  },
  Error {
    code: ErrorCode,
    message: String,
  },
}

impl ServerMessage {
  /// Raw and processed data messages are subject to per-subscriber channel
  /// filters; everything else is delivered to every subscriber.
  pub fn channel(&self) -> Option<ChannelSpec> {
    match self {
      ServerMessage::RawData { sensor_type, .. } => {
        Some(ChannelSpec::new(*sensor_type, ChannelKind::Raw))
      }
      ServerMessage::ProcessedData { sensor_type, .. } => {
        Some(ChannelSpec::new(*sensor_type, ChannelKind::Processed))
      }
      _ => None,
    }
  }

  /// Raw data is the first to be evicted from a saturated subscriber queue.
  pub fn droppable(&self) -> bool {
    matches!(self, ServerMessage::RawData { .. } | ServerMessage::Stats { .. })
  }

  pub fn event(event_type: EventType, data: serde_json::Value) -> Self {
    ServerMessage::Event { event_type, data }
  }

  pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
    ServerMessage::Error {
      code,
      message: message.into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sample::{EegSample, Sample};

  #[test]
  fn client_command_round_trip() {
    let json = r#"{ "command": "subscribe",
                    "channels": [ {"sensor": "eeg", "kind": "processed"} ] }"#;
    let cmd: ClientCommand = serde_json::from_str(json).unwrap();
    assert_eq!(
      cmd,
      ClientCommand::Subscribe {
        channels: vec![ChannelSpec::new(SensorKind::Eeg, ChannelKind::Processed)],
      }
    );
  }

  #[test]
  fn unknown_command_fails_typed() {
    let json = r#"{ "command": "reticulate_splines" }"#;
    assert!(serde_json::from_str::<ClientCommand>(json).is_err());
  }

  #[test]
  fn raw_data_discriminator() {
    let msg = ServerMessage::RawData {
      sensor_type: SensorKind::Eeg,
      timestamp: 12.5,
      count: 1,
      data: vec![Sample::Eeg(EegSample {
        t_device: 100.0,
        ch1_uv: 1.0,
        ch2_uv: 2.0,
        leadoff_ch1: false,
        leadoff_ch2: false,
      })],
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "raw_data");
    assert_eq!(json["sensor_type"], "eeg");
    assert_eq!(json["count"], 1);
  }

  #[test]
  fn stats_flattens_counters() {
    let msg = ServerMessage::Stats {
      timestamp: 1.0,
      stats: StreamStats {
        eeg_sps: 250.0,
        ..Default::default()
      },
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "stats");
    assert_eq!(json["eeg_sps"], 250.0);
  }
}
