// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Engine options: environment variables plus CLI overrides.
//!
//! Every recognized key uses the `LINKBAND_` prefix (`LINKBAND_WS_PORT`,
//! `LINKBAND_DATA_ROOT`, …). Unknown `LINKBAND_*` keys are ignored with a
//! warning; malformed values are configuration errors and abort startup.

use crate::LinkBandEngineError;
use getset::{CopyGetters, Getters};
use linkband_core::config::{DataFormat, ServerConfig, ServerConfigBuilder};
use std::str::FromStr;

const ENV_PREFIX: &str = "LINKBAND_";

#[derive(Debug, Clone, Default, Getters, CopyGetters)]
pub struct EngineOptions {
  #[getset(get = "pub")]
  ws_host: Option<String>,
  #[getset(get_copy = "pub")]
  ws_port: Option<u16>,
  #[getset(get_copy = "pub")]
  scan_timeout_s: Option<f64>,
  #[getset(get_copy = "pub")]
  connect_timeout_s: Option<f64>,
  #[getset(get_copy = "pub")]
  eeg_window_s: Option<f64>,
  #[getset(get_copy = "pub")]
  ppg_window_s: Option<f64>,
  #[getset(get_copy = "pub")]
  acc_window_s: Option<f64>,
  #[getset(get_copy = "pub")]
  subscriber_queue_depth: Option<usize>,
  #[getset(get = "pub")]
  data_root: Option<String>,
  #[getset(get_copy = "pub")]
  data_format: Option<DataFormat>,
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, LinkBandEngineError>
where
  T::Err: std::fmt::Display,
{
  value
    .parse::<T>()
    .map_err(|err| LinkBandEngineError::InvalidConfig(format!("{ENV_PREFIX}{key}={value:?}: {err}")))
}

impl EngineOptions {
  /// Read options from the process environment.
  pub fn from_env() -> Result<Self, LinkBandEngineError> {
    Self::from_vars(std::env::vars())
  }

  fn from_vars(
    vars: impl Iterator<Item = (String, String)>,
  ) -> Result<Self, LinkBandEngineError> {
    let mut options = Self::default();
    for (key, value) in vars {
      let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
        continue;
      };
      match stripped {
        "WS_HOST" => options.ws_host = Some(value),
        "WS_PORT" => options.ws_port = Some(parse(stripped, &value)?),
        "SCAN_TIMEOUT_S" => options.scan_timeout_s = Some(parse(stripped, &value)?),
        "CONNECT_TIMEOUT_S" => options.connect_timeout_s = Some(parse(stripped, &value)?),
        "EEG_WINDOW_S" => options.eeg_window_s = Some(parse(stripped, &value)?),
        "PPG_WINDOW_S" => options.ppg_window_s = Some(parse(stripped, &value)?),
        "ACC_WINDOW_S" => options.acc_window_s = Some(parse(stripped, &value)?),
        "SUBSCRIBER_QUEUE_DEPTH" => {
          options.subscriber_queue_depth = Some(parse(stripped, &value)?)
        }
        "DATA_ROOT" => options.data_root = Some(value),
        "DATA_FORMAT" => {
          options.data_format =
            Some(DataFormat::from_str(&value).map_err(LinkBandEngineError::InvalidConfig)?)
        }
        unknown => {
          warn!("Ignoring unknown configuration key {ENV_PREFIX}{unknown}");
        }
      }
    }
    Ok(options)
  }

  /// Materialize the server configuration, applying defaults for anything
  /// not set.
  pub fn server_config(&self) -> ServerConfig {
    let mut builder = ServerConfigBuilder::default();
    if let Some(host) = &self.ws_host {
      builder.ws_host(host);
    }
    if let Some(port) = self.ws_port {
      builder.ws_port(port);
    }
    if let Some(value) = self.scan_timeout_s {
      builder.scan_timeout_s(value);
    }
    if let Some(value) = self.connect_timeout_s {
      builder.connect_timeout_s(value);
    }
    if let Some(value) = self.eeg_window_s {
      builder.eeg_window_s(value);
    }
    if let Some(value) = self.ppg_window_s {
      builder.ppg_window_s(value);
    }
    if let Some(value) = self.acc_window_s {
      builder.acc_window_s(value);
    }
    if let Some(value) = self.subscriber_queue_depth {
      builder.subscriber_queue_depth(value);
    }
    if let Some(root) = &self.data_root {
      builder.data_root(root);
    }
    if let Some(format) = self.data_format {
      builder.data_format(format);
    }
    builder.finish()
  }

  pub fn set_ws_host(&mut self, value: String) {
    self.ws_host = Some(value);
  }

  pub fn set_ws_port(&mut self, value: u16) {
    self.ws_port = Some(value);
  }

  pub fn set_data_root(&mut self, value: String) {
    self.data_root = Some(value);
  }

  pub fn set_data_format(&mut self, value: DataFormat) {
    self.data_format = Some(value);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars(pairs: &[(&str, &str)]) -> impl Iterator<Item = (String, String)> + use<> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect::<Vec<_>>()
      .into_iter()
  }

  #[test]
  fn env_overrides_map_onto_config() {
    let options = EngineOptions::from_vars(vars(&[
      ("LINKBAND_WS_PORT", "9999"),
      ("LINKBAND_EEG_WINDOW_S", "4.0"),
      ("LINKBAND_DATA_FORMAT", "csv"),
      ("PATH", "/usr/bin"),
    ]))
    .unwrap();
    let config = options.server_config();
    assert_eq!(config.ws_port(), 9999);
    assert_eq!(config.eeg_window_s(), 4.0);
    assert_eq!(config.data_format(), DataFormat::Csv);
    // Untouched keys keep their defaults.
    assert_eq!(config.ws_host(), "127.0.0.1");
  }

  #[test]
  fn malformed_value_is_a_config_error() {
    let err = EngineOptions::from_vars(vars(&[("LINKBAND_WS_PORT", "not-a-port")])).unwrap_err();
    assert!(matches!(err, LinkBandEngineError::InvalidConfig(_)));
  }

  #[test]
  fn unknown_prefixed_keys_are_ignored() {
    let options =
      EngineOptions::from_vars(vars(&[("LINKBAND_FROBNICATE", "yes")])).unwrap();
    assert!(options.ws_port().is_none());
  }
}
