// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Heart-rate variability metrics over inter-beat interval series.
//!
//! Inputs are IBI sequences in milliseconds as produced by
//! [crate::peaks::beat_intervals_ms]. Series with fewer than two intervals
//! return 0.0 rather than NaN so downstream frames stay finite.

use nalgebra::DVector;

/// Mean heart rate in beats per minute.
pub fn heart_rate_bpm(intervals_ms: &[f64]) -> f64 {
  if intervals_ms.is_empty() {
    return 0.0;
  }
  let mean_ms = intervals_ms.iter().sum::<f64>() / intervals_ms.len() as f64;
  if mean_ms <= 0.0 { 0.0 } else { 60_000.0 / mean_ms }
}

/// SDNN: standard deviation of the intervals, in milliseconds.
pub fn sdnn_ms(intervals_ms: &[f64]) -> f64 {
  if intervals_ms.len() < 2 {
    return 0.0;
  }
  DVector::from_row_slice(intervals_ms).variance().sqrt()
}

/// RMSSD: root mean square of successive interval differences, in
/// milliseconds.
pub fn rmssd_ms(intervals_ms: &[f64]) -> f64 {
  if intervals_ms.len() < 2 {
    return 0.0;
  }
  let a = DVector::from_row_slice(&intervals_ms[..intervals_ms.len() - 1]);
  let b = DVector::from_row_slice(&intervals_ms[1..]);
  let diffs = b - a;
  (diffs.dot(&diffs) / diffs.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn heart_rate_of_metronomic_beats() {
    let intervals = [1000.0, 1000.0, 1000.0, 1000.0];
    assert!((heart_rate_bpm(&intervals) - 60.0).abs() < 1e-9);
  }

  #[test]
  fn rmssd_positive_for_varying_series() {
    let intervals = [1000.0, 1010.0, 1020.0, 1030.0, 1040.0];
    let rmssd = rmssd_ms(&intervals);
    assert!((rmssd - 10.0).abs() < 1e-9, "rmssd {rmssd}");
  }

  #[test]
  fn sdnn_positive_for_varying_series() {
    let intervals = [1000.0, 1010.0, 1020.0, 1030.0, 1040.0];
    assert!(sdnn_ms(&intervals) > 0.0);
  }

  #[test]
  fn degenerate_series_stay_finite() {
    assert_eq!(heart_rate_bpm(&[]), 0.0);
    assert_eq!(sdnn_ms(&[800.0]), 0.0);
    assert_eq!(rmssd_ms(&[800.0]), 0.0);
  }
}
