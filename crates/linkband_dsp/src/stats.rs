// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Small descriptive statistics shared by the processors.

pub fn mean(signal: &[f64]) -> f64 {
  if signal.is_empty() {
    return 0.0;
  }
  signal.iter().sum::<f64>() / signal.len() as f64
}

pub fn rms(signal: &[f64]) -> f64 {
  if signal.is_empty() {
    return 0.0;
  }
  (signal.iter().map(|x| x * x).sum::<f64>() / signal.len() as f64).sqrt()
}

pub fn variance(signal: &[f64]) -> f64 {
  if signal.len() < 2 {
    return 0.0;
  }
  let m = mean(signal);
  signal.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (signal.len() - 1) as f64
}

/// Coefficient-of-variation based quality score: 1.0 for a perfectly regular
/// series, decaying toward 0.0 as the relative spread grows.
pub fn regularity_score(values: &[f64]) -> f64 {
  if values.len() < 2 {
    return 0.0;
  }
  let m = mean(values);
  if m.abs() < f64::EPSILON {
    return 0.0;
  }
  let cv = variance(values).sqrt() / m.abs();
  (1.0 - cv).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rms_of_constant() {
    assert!((rms(&[2.0; 8]) - 2.0).abs() < 1e-12);
  }

  #[test]
  fn regular_series_scores_high() {
    assert!(regularity_score(&[1.0, 1.0, 1.0, 1.0]) > 0.99);
    assert!(regularity_score(&[1.0, 5.0, 0.1, 9.0]) < 0.5);
    assert_eq!(regularity_score(&[]), 0.0);
  }
}
