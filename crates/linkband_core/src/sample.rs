// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Sensor sample and processed-frame types.
//!
//! Everything here is serialized verbatim onto the stream bus and into
//! session files, so field names are part of the wire format. `t_device` is
//! the reconstructed device-clock timestamp in seconds; `t_host` (where it
//! appears) is the monotonic host receive timestamp from
//! [crate::util::time::host_now].

use serde::{Deserialize, Serialize};

/// The four characteristic streams exposed by a Link Band device.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
  #[strum(serialize = "eeg")]
  Eeg,
  #[strum(serialize = "ppg")]
  Ppg,
  #[strum(serialize = "acc")]
  Acc,
  #[serde(rename = "bat")]
  #[strum(serialize = "bat")]
  Battery,
}

impl SensorKind {
  /// Nominal sample rate in Hz. The accelerometer rate is approximate; the
  /// firmware batches at ~30 Hz but drifts with temperature.
  pub fn nominal_rate(&self) -> f64 {
    match self {
      SensorKind::Eeg => 250.0,
      SensorKind::Ppg => 50.0,
      SensorKind::Acc => 30.0,
      SensorKind::Battery => 1.0,
    }
  }

  /// Default ring buffer window in seconds.
  pub fn default_window_secs(&self) -> f64 {
    match self {
      SensorKind::Battery => 60.0,
      _ => 10.0,
    }
  }
}

/// Two-channel EEG sample in microvolts, with per-channel lead-off flags
/// derived from the packet status byte.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EegSample {
  pub t_device: f64,
  #[serde(rename = "ch1_uV")]
  pub ch1_uv: f64,
  #[serde(rename = "ch2_uV")]
  pub ch2_uv: f64,
  pub leadoff_ch1: bool,
  pub leadoff_ch2: bool,
}

/// Raw PPG sample, red and infrared photodiode counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PpgSample {
  pub t_device: f64,
  pub red: u32,
  pub ir: u32,
}

/// 3-axis accelerometer sample in g units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccSample {
  pub t_device: f64,
  pub x: f64,
  pub y: f64,
  pub z: f64,
}

/// Battery level indication, clamped to [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatterySample {
  pub t_device: f64,
  pub level_percent: u8,
}

/// A decoded sample from any of the four streams. Serialized untagged; the
/// surrounding message's `sensor_type` field disambiguates on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sample {
  Eeg(EegSample),
  Ppg(PpgSample),
  Acc(AccSample),
  Battery(BatterySample),
}

impl Sample {
  pub fn kind(&self) -> SensorKind {
    match self {
      Sample::Eeg(_) => SensorKind::Eeg,
      Sample::Ppg(_) => SensorKind::Ppg,
      Sample::Acc(_) => SensorKind::Acc,
      Sample::Battery(_) => SensorKind::Battery,
    }
  }

  pub fn t_device(&self) -> f64 {
    match self {
      Sample::Eeg(s) => s.t_device,
      Sample::Ppg(s) => s.t_device,
      Sample::Acc(s) => s.t_device,
      Sample::Battery(s) => s.t_device,
    }
  }
}

/// One decoder output: the samples decoded from a single notification
/// packet, stamped with the host receive time of that packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
  pub sensor: SensorKind,
  pub t_host: f64,
  pub samples: Vec<Sample>,
}

/// Integrated PSD over the five canonical EEG bands, in µV²/Hz·Hz.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BandPowers {
  pub delta: f64,
  pub theta: f64,
  pub alpha: f64,
  pub beta: f64,
  pub gamma: f64,
}

/// EEG processed frame: filtered window, per-channel band powers and SQI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EegFrame {
  pub ch1_filtered: Vec<f64>,
  pub ch2_filtered: Vec<f64>,
  pub ch1_power_band: BandPowers,
  pub ch2_power_band: BandPowers,
  pub frequencies: Vec<f64>,
  pub sqi_ch1: f64,
  pub sqi_ch2: f64,
  pub leadoff_ch1: bool,
  pub leadoff_ch2: bool,
}

/// PPG processed frame: filtered window plus heart rate and HRV metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpgFrame {
  pub filtered: Vec<f64>,
  pub heart_rate_bpm: f64,
  pub hrv_sdnn_ms: f64,
  pub hrv_rmssd_ms: f64,
  pub sqi: f64,
}

/// Coarse activity classification from accelerometer magnitude RMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActivityLabel {
  Still,
  Low,
  Medium,
  High,
}

/// ACC processed frame: low-passed axes, gravity-removed magnitude, label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccFrame {
  pub filtered_x: Vec<f64>,
  pub filtered_y: Vec<f64>,
  pub filtered_z: Vec<f64>,
  pub activity_label: ActivityLabel,
  pub magnitude: Vec<f64>,
}

/// A processed frame from any sensor, emitted at the DSP cadence. Battery
/// frames are pass-through samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessedFrame {
  Eeg(EegFrame),
  Ppg(PpgFrame),
  Acc(AccFrame),
  Battery(BatterySample),
}

impl ProcessedFrame {
  pub fn kind(&self) -> SensorKind {
    match self {
      ProcessedFrame::Eeg(_) => SensorKind::Eeg,
      ProcessedFrame::Ppg(_) => SensorKind::Ppg,
      ProcessedFrame::Acc(_) => SensorKind::Acc,
      ProcessedFrame::Battery(_) => SensorKind::Battery,
    }
  }
}

/// A previously seen device, as persisted by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
  /// Platform peripheral id. Opaque but stable per device.
  pub address: String,
  pub name: String,
  /// Unix seconds of the most recent advertisement or connection.
  pub last_seen: f64,
}

/// One-shot device information record read after connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
  pub name: String,
  pub address: String,
  pub firmware_version: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sensor_kind_wire_names() {
    assert_eq!(serde_json::to_string(&SensorKind::Eeg).unwrap(), "\"eeg\"");
    assert_eq!(serde_json::to_string(&SensorKind::Battery).unwrap(), "\"bat\"");
    assert_eq!(SensorKind::Battery.to_string(), "bat");
  }

  #[test]
  fn sample_serializes_untagged() {
    let s = Sample::Ppg(PpgSample {
      t_device: 1.5,
      red: 100,
      ir: 200,
    });
    let json = serde_json::to_value(&s).unwrap();
    assert_eq!(json["t_device"], 1.5);
    assert_eq!(json["red"], 100);
    assert!(json.get("type").is_none());
  }

  #[test]
  fn eeg_sample_uses_microvolt_field_names() {
    let s = EegSample {
      t_device: 0.0,
      ch1_uv: 1.0,
      ch2_uv: -1.0,
      leadoff_ch1: false,
      leadoff_ch2: true,
    };
    let json = serde_json::to_value(&s).unwrap();
    assert!(json.get("ch1_uV").is_some());
    assert!(json.get("ch1_uv").is_none());
  }
}
