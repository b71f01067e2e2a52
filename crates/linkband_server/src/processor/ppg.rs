// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! PPG window pipeline: 0.5–5 Hz band-pass → pulse peaks → inter-beat
//! intervals → HR / SDNN / RMSSD, with an SQI from the regularity of the
//! peak prominences.
//!
//! A window with no detectable pulse yields HR = 0 and SQI = 0, never NaN.

use linkband_core::errors::ProcessError;
use linkband_core::sample::{PpgFrame, PpgSample};
use linkband_dsp::{filter, hrv, peaks, stats};

#[derive(Debug, Clone, Copy)]
pub struct PpgConfig {
  pub fs: f64,
  pub band_low_hz: f64,
  pub band_high_hz: f64,
  pub band_order: usize,
  pub refractory_s: f64,
  pub threshold_ratio: f64,
}

impl Default for PpgConfig {
  fn default() -> Self {
    Self {
      fs: 50.0,
      band_low_hz: 0.5,
      band_high_hz: 5.0,
      band_order: 2,
      refractory_s: 0.3,
      threshold_ratio: 0.6,
    }
  }
}

pub fn process_window(config: &PpgConfig, window: &[PpgSample]) -> Result<PpgFrame, ProcessError> {
  // The infrared channel carries the stronger pulse component.
  let raw: Vec<f64> = window.iter().map(|s| s.ir as f64).collect();
  let detrended = filter::detrend(&raw);
  let mut band = filter::SosCascade::butter_bandpass(
    config.fs,
    config.band_low_hz,
    config.band_high_hz,
    config.band_order,
  );
  let filtered = band.filter(&detrended);
  if filtered.iter().any(|x| !x.is_finite()) {
    return Err(ProcessError::NumericFailure("non-finite PPG sample".to_owned()));
  }

  let found = peaks::detect_peaks(&filtered, config.fs, config.refractory_s, config.threshold_ratio);
  let intervals = peaks::beat_intervals_ms(&found, config.fs);

  let (heart_rate_bpm, hrv_sdnn_ms, hrv_rmssd_ms, sqi) = if intervals.is_empty() {
    (0.0, 0.0, 0.0, 0.0)
  } else {
    let prominences: Vec<f64> = found.iter().map(|p| p.prominence).collect();
    (
      hrv::heart_rate_bpm(&intervals),
      hrv::sdnn_ms(&intervals),
      hrv::rmssd_ms(&intervals),
      stats::regularity_score(&prominences),
    )
  };

  Ok(PpgFrame {
    filtered,
    heart_rate_bpm,
    hrv_sdnn_ms,
    hrv_rmssd_ms,
    sqi,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::f64::consts::PI;

  fn pulse_window(bpm: f64, seconds: f64) -> Vec<PpgSample> {
    let fs = 50.0;
    (0..(fs * seconds) as usize)
      .map(|i| {
        let t = i as f64 / fs;
        let pulse = (2.0 * PI * bpm / 60.0 * t).sin();
        PpgSample {
          t_device: t,
          red: 80_000,
          ir: (100_000.0 + 5_000.0 * pulse) as u32,
        }
      })
      .collect()
  }

  #[test]
  fn clean_pulse_yields_heart_rate() {
    let config = PpgConfig::default();
    let frame = process_window(&config, &pulse_window(72.0, 10.0)).unwrap();
    assert!(
      (frame.heart_rate_bpm - 72.0).abs() < 8.0,
      "hr {}",
      frame.heart_rate_bpm
    );
    assert!(frame.sqi > 0.5, "sqi {}", frame.sqi);
    assert_eq!(frame.filtered.len(), 500);
  }

  #[test]
  fn flat_window_yields_zero_not_nan() {
    let config = PpgConfig::default();
    let window: Vec<PpgSample> = (0..500)
      .map(|i| PpgSample {
        t_device: i as f64 / 50.0,
        red: 80_000,
        ir: 100_000,
      })
      .collect();
    let frame = process_window(&config, &window).unwrap();
    assert_eq!(frame.heart_rate_bpm, 0.0);
    assert_eq!(frame.sqi, 0.0);
    assert!(frame.hrv_sdnn_ms == 0.0 && frame.hrv_rmssd_ms == 0.0);
  }
}
