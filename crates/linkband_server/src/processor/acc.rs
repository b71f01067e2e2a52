// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Accelerometer window pipeline: 10 Hz low-pass per axis → gravity removal
//! via a slow EMA of the magnitude → RMS activity classification.

use linkband_core::errors::ProcessError;
use linkband_core::sample::{AccFrame, AccSample, ActivityLabel};
use linkband_dsp::{filter, stats};

#[derive(Debug, Clone, Copy)]
pub struct AccConfig {
  pub fs: f64,
  pub lowpass_hz: f64,
  pub lowpass_order: usize,
  /// Gravity estimator time constant, seconds.
  pub gravity_tau_s: f64,
  pub still_rms: f64,
  pub low_rms: f64,
  pub medium_rms: f64,
}

impl Default for AccConfig {
  fn default() -> Self {
    Self {
      fs: 30.0,
      lowpass_hz: 10.0,
      lowpass_order: 4,
      gravity_tau_s: 2.0,
      still_rms: 0.02,
      low_rms: 0.1,
      medium_rms: 0.3,
    }
  }
}

fn classify(config: &AccConfig, rms: f64) -> ActivityLabel {
  if rms < config.still_rms {
    ActivityLabel::Still
  } else if rms < config.low_rms {
    ActivityLabel::Low
  } else if rms < config.medium_rms {
    ActivityLabel::Medium
  } else {
    ActivityLabel::High
  }
}

pub fn process_window(config: &AccConfig, window: &[AccSample]) -> Result<AccFrame, ProcessError> {
  if window.is_empty() {
    return Err(ProcessError::WindowUnderfilled);
  }

  let mut filter_axis = |extract: fn(&AccSample) -> f64| -> Vec<f64> {
    let mut lp =
      filter::SosCascade::butter_lowpass(config.fs, config.lowpass_hz, config.lowpass_order);
    // The axes carry gravity as DC, so settle the cascade on the first
    // sample before the real pass.
    lp.warm_up(extract(&window[0]), config.fs as usize);
    lp.filter(&window.iter().map(extract).collect::<Vec<_>>())
  };

  let filtered_x = filter_axis(|s| s.x);
  let filtered_y = filter_axis(|s| s.y);
  let filtered_z = filter_axis(|s| s.z);

  // Gravity tracks the slow EMA of the total magnitude; what remains is
  // dynamic acceleration in g units.
  let alpha = (1.0 / config.fs) / config.gravity_tau_s;
  let mut gravity = None;
  let mut magnitude = Vec::with_capacity(window.len());
  for i in 0..window.len() {
    let m = (filtered_x[i].powi(2) + filtered_y[i].powi(2) + filtered_z[i].powi(2)).sqrt();
    let g = match gravity {
      None => m,
      Some(prev) => prev + alpha * (m - prev),
    };
    gravity = Some(g);
    magnitude.push(m - g);
  }

  if magnitude.iter().any(|x| !x.is_finite()) {
    return Err(ProcessError::NumericFailure("non-finite ACC magnitude".to_owned()));
  }

  let activity_label = classify(config, stats::rms(&magnitude));
  Ok(AccFrame {
    filtered_x,
    filtered_y,
    filtered_z,
    activity_label,
    magnitude,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn constant_gravity_window(n: usize) -> Vec<AccSample> {
    (0..n)
      .map(|i| AccSample {
        t_device: i as f64 / 30.0,
        x: 0.0,
        y: 0.0,
        z: 1.0,
      })
      .collect()
  }

  #[test]
  fn constant_gravity_is_still() {
    let config = AccConfig::default();
    let frame = process_window(&config, &constant_gravity_window(90)).unwrap();
    assert_eq!(frame.activity_label, ActivityLabel::Still);
    let residual = linkband_dsp::stats::rms(&frame.magnitude);
    assert!(residual < 0.02, "residual {residual}");
  }

  #[test]
  fn shaking_classifies_as_active() {
    let config = AccConfig::default();
    let window: Vec<AccSample> = (0..90)
      .map(|i| {
        let t = i as f64 / 30.0;
        AccSample {
          t_device: t,
          // 4 Hz shake at ±1.5 g on top of gravity.
          x: 1.5 * (2.0 * std::f64::consts::PI * 4.0 * t).sin(),
          y: 0.0,
          z: 1.0,
        }
      })
      .collect();
    let frame = process_window(&config, &window).unwrap();
    assert!(matches!(
      frame.activity_label,
      ActivityLabel::Medium | ActivityLabel::High
    ));
  }
}
