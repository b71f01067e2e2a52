// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Runtime configuration for the server core.
//!
//! A [ServerConfig] is immutable once the supervisor is constructed. The
//! engine binary builds one from environment variables (prefix `LINKBAND_`)
//! through [ServerConfigBuilder]; embedders call the builder directly.

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr};

/// On-disk record encoding for session files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
  JsonLines,
  Csv,
}

impl DataFormat {
  pub fn extension(&self) -> &'static str {
    match self {
      DataFormat::JsonLines => "jsonl",
      DataFormat::Csv => "csv",
    }
  }
}

impl FromStr for DataFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "json_lines" | "jsonl" => Ok(DataFormat::JsonLines),
      "csv" => Ok(DataFormat::Csv),
      other => Err(format!("unknown data format {other:?}")),
    }
  }
}

#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct ServerConfig {
  /// Interface the stream bus listens on.
  #[getset(get = "pub")]
  ws_host: String,
  #[getset(get_copy = "pub")]
  ws_port: u16,
  #[getset(get_copy = "pub")]
  scan_timeout_s: f64,
  #[getset(get_copy = "pub")]
  connect_timeout_s: f64,
  /// Deadline for a command verb to produce its typed reply.
  #[getset(get_copy = "pub")]
  command_timeout_s: f64,
  #[getset(get_copy = "pub")]
  eeg_window_s: f64,
  #[getset(get_copy = "pub")]
  ppg_window_s: f64,
  #[getset(get_copy = "pub")]
  acc_window_s: f64,
  #[getset(get_copy = "pub")]
  battery_window_s: f64,
  #[getset(get_copy = "pub")]
  subscriber_queue_depth: usize,
  #[getset(get_copy = "pub")]
  max_subscribers: usize,
  /// Root directory for recorded sessions.
  #[getset(get = "pub")]
  data_root: PathBuf,
  #[getset(get_copy = "pub")]
  data_format: DataFormat,
  /// Path of the persisted device registry.
  #[getset(get = "pub")]
  registry_file: PathBuf,
  /// Advertised name prefix used to filter scan results.
  #[getset(get = "pub")]
  device_name_prefix: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      ws_host: "127.0.0.1".to_owned(),
      ws_port: 18765,
      scan_timeout_s: 10.0,
      connect_timeout_s: 30.0,
      command_timeout_s: 30.0,
      eeg_window_s: 10.0,
      ppg_window_s: 10.0,
      acc_window_s: 10.0,
      battery_window_s: 60.0,
      subscriber_queue_depth: 256,
      max_subscribers: 32,
      data_root: PathBuf::from("data"),
      data_format: DataFormat::JsonLines,
      registry_file: PathBuf::from("registered_devices.json"),
      device_name_prefix: "LXB".to_owned(),
    }
  }
}

impl ServerConfig {
  /// Ring buffer window for a sensor, honoring the per-sensor overrides.
  pub fn window_secs(&self, sensor: crate::sample::SensorKind) -> f64 {
    use crate::sample::SensorKind;
    match sensor {
      SensorKind::Eeg => self.eeg_window_s,
      SensorKind::Ppg => self.ppg_window_s,
      SensorKind::Acc => self.acc_window_s,
      SensorKind::Battery => self.battery_window_s,
    }
  }
}

#[derive(Default)]
pub struct ServerConfigBuilder {
  config: ServerConfig,
}

impl ServerConfigBuilder {
  pub fn ws_host(&mut self, value: &str) -> &mut Self {
    self.config.ws_host = value.to_owned();
    self
  }

  pub fn ws_port(&mut self, value: u16) -> &mut Self {
    self.config.ws_port = value;
    self
  }

  pub fn scan_timeout_s(&mut self, value: f64) -> &mut Self {
    self.config.scan_timeout_s = value;
    self
  }

  pub fn connect_timeout_s(&mut self, value: f64) -> &mut Self {
    self.config.connect_timeout_s = value;
    self
  }

  pub fn command_timeout_s(&mut self, value: f64) -> &mut Self {
    self.config.command_timeout_s = value;
    self
  }

  pub fn eeg_window_s(&mut self, value: f64) -> &mut Self {
    self.config.eeg_window_s = value;
    self
  }

  pub fn ppg_window_s(&mut self, value: f64) -> &mut Self {
    self.config.ppg_window_s = value;
    self
  }

  pub fn acc_window_s(&mut self, value: f64) -> &mut Self {
    self.config.acc_window_s = value;
    self
  }

  pub fn battery_window_s(&mut self, value: f64) -> &mut Self {
    self.config.battery_window_s = value;
    self
  }

  pub fn subscriber_queue_depth(&mut self, value: usize) -> &mut Self {
    self.config.subscriber_queue_depth = value;
    self
  }

  pub fn max_subscribers(&mut self, value: usize) -> &mut Self {
    self.config.max_subscribers = value;
    self
  }

  pub fn data_root(&mut self, value: impl Into<PathBuf>) -> &mut Self {
    self.config.data_root = value.into();
    self
  }

  pub fn data_format(&mut self, value: DataFormat) -> &mut Self {
    self.config.data_format = value;
    self
  }

  pub fn registry_file(&mut self, value: impl Into<PathBuf>) -> &mut Self {
    self.config.registry_file = value.into();
    self
  }

  pub fn device_name_prefix(&mut self, value: &str) -> &mut Self {
    self.config.device_name_prefix = value.to_owned();
    self
  }

  pub fn finish(&mut self) -> ServerConfig {
    self.config.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sample::SensorKind;

  #[test]
  fn builder_overrides_defaults() {
    let config = ServerConfigBuilder::default()
      .ws_port(9000)
      .eeg_window_s(4.0)
      .data_format(DataFormat::Csv)
      .finish();
    assert_eq!(config.ws_port(), 9000);
    assert_eq!(config.window_secs(SensorKind::Eeg), 4.0);
    assert_eq!(config.data_format().extension(), "csv");
    assert_eq!(config.ws_host(), "127.0.0.1");
  }

  #[test]
  fn data_format_parses_aliases() {
    assert_eq!("jsonl".parse::<DataFormat>().unwrap(), DataFormat::JsonLines);
    assert_eq!("json_lines".parse::<DataFormat>().unwrap(), DataFormat::JsonLines);
    assert!("xml".parse::<DataFormat>().is_err());
  }
}
