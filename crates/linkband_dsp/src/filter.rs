// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! IIR filtering as cascaded biquad (second-order) sections.
//!
//! Sections are designed with the RBJ audio-cookbook bilinear formulas, which
//! prewarp the cutoff. Butterworth responses of order 2N come out as N
//! cascaded sections with the canonical Butterworth Q values, so a
//! `butter_lowpass(fs, fc, 4)` here matches the usual analog-prototype
//! design. The band-pass used for EEG/PPG is realized as a high-pass/low-pass
//! cascade, which keeps each section well conditioned at the narrow
//! normalized frequencies a 250 Hz stream produces.

use std::f64::consts::PI;

/// One direct-form-I transposed biquad section with unit a0.
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
  b0: f64,
  b1: f64,
  b2: f64,
  a1: f64,
  a2: f64,
  z1: f64,
  z2: f64,
}

impl Biquad {
  pub fn new(b0: f64, b1: f64, b2: f64, a1: f64, a2: f64) -> Self {
    Self {
      b0,
      b1,
      b2,
      a1,
      a2,
      z1: 0.0,
      z2: 0.0,
    }
  }

  /// RBJ low-pass section.
  pub fn lowpass(fs: f64, fc: f64, q: f64) -> Self {
    let w0 = 2.0 * PI * fc / fs;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let a0 = 1.0 + alpha;
    Self::new(
      ((1.0 - cos_w0) / 2.0) / a0,
      (1.0 - cos_w0) / a0,
      ((1.0 - cos_w0) / 2.0) / a0,
      (-2.0 * cos_w0) / a0,
      (1.0 - alpha) / a0,
    )
  }

  /// RBJ high-pass section.
  pub fn highpass(fs: f64, fc: f64, q: f64) -> Self {
    let w0 = 2.0 * PI * fc / fs;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let a0 = 1.0 + alpha;
    Self::new(
      ((1.0 + cos_w0) / 2.0) / a0,
      (-(1.0 + cos_w0)) / a0,
      ((1.0 + cos_w0) / 2.0) / a0,
      (-2.0 * cos_w0) / a0,
      (1.0 - alpha) / a0,
    )
  }

  /// RBJ notch section. `q` sets the rejection bandwidth (f0/q).
  pub fn notch(fs: f64, f0: f64, q: f64) -> Self {
    let w0 = 2.0 * PI * f0 / fs;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let a0 = 1.0 + alpha;
    Self::new(
      1.0 / a0,
      (-2.0 * cos_w0) / a0,
      1.0 / a0,
      (-2.0 * cos_w0) / a0,
      (1.0 - alpha) / a0,
    )
  }

  #[inline]
  pub fn process(&mut self, x: f64) -> f64 {
    let y = self.b0 * x + self.z1;
    self.z1 = self.b1 * x - self.a1 * y + self.z2;
    self.z2 = self.b2 * x - self.a2 * y;
    y
  }

  pub fn reset(&mut self) {
    self.z1 = 0.0;
    self.z2 = 0.0;
  }
}

/// A cascade of biquad sections applied in series.
#[derive(Debug, Clone)]
pub struct SosCascade {
  sections: Vec<Biquad>,
}

impl SosCascade {
  pub fn new(sections: Vec<Biquad>) -> Self {
    Self { sections }
  }

  /// Butterworth low-pass of the given (even) order as Q-staggered sections.
  pub fn butter_lowpass(fs: f64, fc: f64, order: usize) -> Self {
    Self::new(
      butterworth_qs(order)
        .into_iter()
        .map(|q| Biquad::lowpass(fs, fc, q))
        .collect(),
    )
  }

  /// Butterworth high-pass of the given (even) order.
  pub fn butter_highpass(fs: f64, fc: f64, order: usize) -> Self {
    Self::new(
      butterworth_qs(order)
        .into_iter()
        .map(|q| Biquad::highpass(fs, fc, q))
        .collect(),
    )
  }

  /// Band-pass as a high-pass at `low` cascaded with a low-pass at `high`,
  /// each of the given order.
  pub fn butter_bandpass(fs: f64, low: f64, high: f64, order: usize) -> Self {
    let mut sections = butterworth_qs(order)
      .into_iter()
      .map(|q| Biquad::highpass(fs, low, q))
      .collect::<Vec<_>>();
    sections.extend(
      butterworth_qs(order)
        .into_iter()
        .map(|q| Biquad::lowpass(fs, high, q)),
    );
    Self::new(sections)
  }

  /// 50/60 Hz mains rejection.
  pub fn mains_notch(fs: f64, f0: f64, q: f64) -> Self {
    Self::new(vec![Biquad::notch(fs, f0, q)])
  }

  #[inline]
  pub fn process(&mut self, x: f64) -> f64 {
    self.sections.iter_mut().fold(x, |acc, s| s.process(acc))
  }

  /// Causal single-pass filtering of a whole window.
  pub fn filter(&mut self, signal: &[f64]) -> Vec<f64> {
    signal.iter().map(|&x| self.process(x)).collect()
  }

  /// Drive the cascade with a constant until the step transient settles.
  /// Needed when the passband includes DC (e.g. a gravity-carrying
  /// accelerometer axis); without it every fresh cascade answers the DC
  /// level with a step response.
  pub fn warm_up(&mut self, value: f64, samples: usize) {
    for _ in 0..samples {
      self.process(value);
    }
  }

  pub fn reset(&mut self) {
    for s in &mut self.sections {
      s.reset();
    }
  }
}

/// Q values of the second-order sections of an order-`order` Butterworth
/// response. Odd orders are rounded up to the next even order.
fn butterworth_qs(order: usize) -> Vec<f64> {
  let pairs = order.div_ceil(2).max(1);
  let n = (pairs * 2) as f64;
  (0..pairs)
    .map(|k| {
      let angle = PI * (2.0 * k as f64 + 1.0) / (2.0 * n);
      1.0 / (2.0 * angle.cos())
    })
    .collect()
}

/// Remove the window mean.
pub fn detrend(signal: &[f64]) -> Vec<f64> {
  if signal.is_empty() {
    return Vec::new();
  }
  let mean = signal.iter().sum::<f64>() / signal.len() as f64;
  signal.iter().map(|x| x - mean).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::f64::consts::PI;

  fn sine(fs: f64, f: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| (2.0 * PI * f * i as f64 / fs).sin()).collect()
  }

  fn rms_tail(signal: &[f64]) -> f64 {
    // Skip the transient at the start of a causal pass.
    let tail = &signal[signal.len() / 2..];
    (tail.iter().map(|x| x * x).sum::<f64>() / tail.len() as f64).sqrt()
  }

  #[test]
  fn butterworth_q_values_fourth_order() {
    let qs = butterworth_qs(4);
    assert_eq!(qs.len(), 2);
    assert!((qs[0] - 0.5412).abs() < 1e-3);
    assert!((qs[1] - 1.3066).abs() < 1e-3);
  }

  #[test]
  fn lowpass_attenuates_stopband() {
    let fs = 250.0;
    let mut lp = SosCascade::butter_lowpass(fs, 10.0, 4);
    let passed = rms_tail(&lp.filter(&sine(fs, 2.0, 2048)));
    lp.reset();
    let stopped = rms_tail(&lp.filter(&sine(fs, 60.0, 2048)));
    assert!(passed > 0.5, "passband rms {passed}");
    assert!(stopped < 0.02, "stopband rms {stopped}");
  }

  #[test]
  fn bandpass_rejects_both_sides() {
    let fs = 250.0;
    let mut bp = SosCascade::butter_bandpass(fs, 1.0, 45.0, 4);
    let inband = rms_tail(&bp.filter(&sine(fs, 10.0, 4096)));
    bp.reset();
    let low = rms_tail(&bp.filter(&sine(fs, 0.1, 4096)));
    bp.reset();
    let high = rms_tail(&bp.filter(&sine(fs, 100.0, 4096)));
    assert!(inband > 0.5, "inband rms {inband}");
    assert!(low < 0.05, "sub-band rms {low}");
    assert!(high < 0.05, "supra-band rms {high}");
  }

  #[test]
  fn notch_kills_mains() {
    let fs = 250.0;
    let mut notch = SosCascade::mains_notch(fs, 50.0, 30.0);
    let mains = rms_tail(&notch.filter(&sine(fs, 50.0, 8192)));
    notch.reset();
    let neighbor = rms_tail(&notch.filter(&sine(fs, 10.0, 8192)));
    assert!(mains < 0.1, "mains rms {mains}");
    assert!(neighbor > 0.6, "neighbor rms {neighbor}");
  }

  #[test]
  fn detrend_removes_offset() {
    let out = detrend(&[11.0, 9.0, 10.0, 10.0]);
    assert!((out.iter().sum::<f64>()).abs() < 1e-12);
  }
}
