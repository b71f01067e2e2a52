// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! EEG window pipeline: detrend → 50 Hz notch → 1–45 Hz band-pass → Welch
//! PSD → band powers → SQI.
//!
//! Filtering is forward-only; a fresh filter cascade is built per window so
//! a transient in one window cannot poison the next. The SQI is the ratio
//! of in-band (1–45 Hz) power to total power, clipped to [0, 1].

use linkband_core::sample::{BandPowers, EegFrame, EegSample};
use linkband_core::errors::ProcessError;
use linkband_dsp::{filter, spectral};

#[derive(Debug, Clone, Copy)]
pub struct EegConfig {
  pub fs: f64,
  pub notch_hz: f64,
  pub notch_q: f64,
  pub band_low_hz: f64,
  pub band_high_hz: f64,
  pub band_order: usize,
  /// Welch segment length: 1 s at the nominal rate.
  pub welch_segment: usize,
}

impl Default for EegConfig {
  fn default() -> Self {
    Self {
      fs: 250.0,
      notch_hz: 50.0,
      notch_q: 30.0,
      band_low_hz: 1.0,
      band_high_hz: 45.0,
      band_order: 4,
      welch_segment: 250,
    }
  }
}

/// The five canonical band edges in Hz.
const BANDS: [(f64, f64); 5] = [
  (0.5, 4.0),  // delta
  (4.0, 8.0),  // theta
  (8.0, 13.0), // alpha
  (13.0, 30.0), // beta
  (30.0, 45.0), // gamma
];

fn filter_channel(config: &EegConfig, raw: &[f64]) -> Vec<f64> {
  let detrended = filter::detrend(raw);
  let mut notch = filter::SosCascade::mains_notch(config.fs, config.notch_hz, config.notch_q);
  let notched = notch.filter(&detrended);
  let mut band = filter::SosCascade::butter_bandpass(
    config.fs,
    config.band_low_hz,
    config.band_high_hz,
    config.band_order,
  );
  band.filter(&notched)
}

fn analyze_channel(
  config: &EegConfig,
  filtered: &[f64],
) -> Result<(BandPowers, Vec<f64>, f64), ProcessError> {
  let (freqs, psd) = spectral::welch_psd(filtered, config.fs, config.welch_segment);
  if psd.iter().any(|p| !p.is_finite()) {
    return Err(ProcessError::NumericFailure("non-finite PSD bin".to_owned()));
  }
  let powers = BandPowers {
    delta: spectral::band_power(&freqs, &psd, BANDS[0].0, BANDS[0].1),
    theta: spectral::band_power(&freqs, &psd, BANDS[1].0, BANDS[1].1),
    alpha: spectral::band_power(&freqs, &psd, BANDS[2].0, BANDS[2].1),
    beta: spectral::band_power(&freqs, &psd, BANDS[3].0, BANDS[3].1),
    gamma: spectral::band_power(&freqs, &psd, BANDS[4].0, BANDS[4].1),
  };
  let total = spectral::band_power(&freqs, &psd, 0.0, config.fs / 2.0);
  let in_band = spectral::band_power(&freqs, &psd, config.band_low_hz, config.band_high_hz);
  let sqi = if total > 0.0 {
    (in_band / total).clamp(0.0, 1.0)
  } else {
    0.0
  };
  Ok((powers, freqs, sqi))
}

pub fn process_window(config: &EegConfig, window: &[EegSample]) -> Result<EegFrame, ProcessError> {
  let ch1: Vec<f64> = window.iter().map(|s| s.ch1_uv).collect();
  let ch2: Vec<f64> = window.iter().map(|s| s.ch2_uv).collect();

  let ch1_filtered = filter_channel(config, &ch1);
  let ch2_filtered = filter_channel(config, &ch2);

  let (ch1_power_band, frequencies, sqi_ch1) = analyze_channel(config, &ch1_filtered)?;
  let (ch2_power_band, _, sqi_ch2) = analyze_channel(config, &ch2_filtered)?;

  Ok(EegFrame {
    ch1_filtered,
    ch2_filtered,
    ch1_power_band,
    ch2_power_band,
    frequencies,
    sqi_ch1,
    sqi_ch2,
    leadoff_ch1: window.iter().any(|s| s.leadoff_ch1),
    leadoff_ch2: window.iter().any(|s| s.leadoff_ch2),
  })
}
