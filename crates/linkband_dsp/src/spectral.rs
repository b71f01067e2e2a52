// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Welch power spectral density estimation.

use rustfft::{FftPlanner, num_complex::Complex};

/// Periodic Hann window of length `n`.
pub fn hann(n: usize) -> Vec<f64> {
  (0..n)
    .map(|i| {
      let x = std::f64::consts::PI * i as f64 / n as f64;
      x.sin().powi(2)
    })
    .collect()
}

/// One-sided Welch PSD with 50 % segment overlap and a Hann window.
///
/// Returns `(frequencies, psd)`, both of length `segment_len / 2 + 1`, with
/// the PSD in input-units²/Hz. Segments that don't fit are discarded; an
/// input shorter than one segment yields a single zero-padded segment so the
/// caller always gets a spectrum of the expected shape.
pub fn welch_psd(signal: &[f64], fs: f64, segment_len: usize) -> (Vec<f64>, Vec<f64>) {
  assert!(segment_len >= 2, "segment length must be at least 2");
  let nfft = segment_len;
  let half = nfft / 2;
  let hop = nfft / 2;
  let window = hann(nfft);
  let scale = fs * window.iter().map(|w| w * w).sum::<f64>();

  let mut planner = FftPlanner::<f64>::new();
  let fft = planner.plan_fft_forward(nfft);

  let mut psd = vec![0.0f64; half + 1];
  let mut segments = 0usize;
  let mut buf = vec![Complex::new(0.0, 0.0); nfft];

  let mut start = 0usize;
  loop {
    let seg_end = start + nfft;
    let seg: Vec<f64> = if seg_end <= signal.len() {
      signal[start..seg_end].to_vec()
    } else if segments == 0 {
      // Short input: zero-pad the lone segment.
      let mut padded = signal.to_vec();
      padded.resize(nfft, 0.0);
      padded
    } else {
      break;
    };

    let mean = seg.iter().sum::<f64>() / nfft as f64;
    for (i, slot) in buf.iter_mut().enumerate() {
      *slot = Complex::new((seg[i] - mean) * window[i], 0.0);
    }
    fft.process(&mut buf);

    for (k, slot) in psd.iter_mut().enumerate() {
      let mag_sq = buf[k].norm_sqr();
      // One-sided spectrum doubles everything except DC and Nyquist.
      let fold = if k == 0 || (nfft % 2 == 0 && k == half) {
        1.0
      } else {
        2.0
      };
      *slot += fold * mag_sq / scale;
    }

    segments += 1;
    start += hop;
    if start + nfft > signal.len() {
      break;
    }
  }

  if segments > 1 {
    for slot in &mut psd {
      *slot /= segments as f64;
    }
  }

  let freqs = (0..=half).map(|k| k as f64 * fs / nfft as f64).collect();
  (freqs, psd)
}

/// Integrate a PSD over `[lo, hi]` Hz with the trapezoid rule.
pub fn band_power(freqs: &[f64], psd: &[f64], lo: f64, hi: f64) -> f64 {
  let mut power = 0.0;
  for i in 1..freqs.len() {
    let (f0, f1) = (freqs[i - 1], freqs[i]);
    if f1 < lo || f0 > hi {
      continue;
    }
    let a = f0.max(lo);
    let b = f1.min(hi);
    if b <= a {
      continue;
    }
    // Linear interpolation of the PSD at the clipped edges.
    let t0 = (a - f0) / (f1 - f0);
    let t1 = (b - f0) / (f1 - f0);
    let p0 = psd[i - 1] + t0 * (psd[i] - psd[i - 1]);
    let p1 = psd[i - 1] + t1 * (psd[i] - psd[i - 1]);
    power += 0.5 * (p0 + p1) * (b - a);
  }
  power
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::f64::consts::PI;

  #[test]
  fn hann_endpoints_and_peak() {
    let w = hann(250);
    assert!(w[0].abs() < 1e-12);
    assert!((w[125] - 1.0).abs() < 1e-3);
  }

  #[test]
  fn welch_peaks_at_tone_frequency() {
    let fs = 250.0;
    let tone = 10.0;
    let signal: Vec<f64> = (0..1000)
      .map(|i| (2.0 * PI * tone * i as f64 / fs).sin())
      .collect();
    let (freqs, psd) = welch_psd(&signal, fs, 250);
    let peak = psd
      .iter()
      .enumerate()
      .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
      .map(|(i, _)| freqs[i])
      .unwrap();
    assert!((peak - tone).abs() <= 1.0, "peak at {peak} Hz");
  }

  #[test]
  fn band_power_concentrates_around_tone() {
    let fs = 250.0;
    let signal: Vec<f64> = (0..1000)
      .map(|i| (2.0 * PI * 10.0 * i as f64 / fs).sin())
      .collect();
    let (freqs, psd) = welch_psd(&signal, fs, 250);
    let alpha = band_power(&freqs, &psd, 8.0, 13.0);
    let gamma = band_power(&freqs, &psd, 30.0, 45.0);
    assert!(alpha > 100.0 * gamma.max(1e-12));
  }

  #[test]
  fn short_input_still_produces_spectrum() {
    let (freqs, psd) = welch_psd(&[1.0, 2.0, 3.0], 250.0, 250);
    assert_eq!(freqs.len(), 126);
    assert_eq!(psd.len(), 126);
  }
}
