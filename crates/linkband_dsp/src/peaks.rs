// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Pulse peak detection for the PPG pipeline.
//!
//! Detection is a local-maximum search gated by an adaptive amplitude
//! threshold (a fraction of a decaying running maximum) and a refractory
//! period. This is deliberately simple; the band-passed PPG waveform is
//! close to sinusoidal and the HRV stages only need beat locations.

/// One detected peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
  pub index: usize,
  pub value: f64,
  /// Height above the preceding trough, used by the SQI stage.
  pub prominence: f64,
}

/// Find peaks in `signal` sampled at `fs` Hz.
///
/// `refractory_s` suppresses re-triggering after a beat; `threshold_ratio`
/// scales the decaying running maximum into the detection threshold. The
/// running maximum decays with a 2 s time constant so the detector recovers
/// from motion spikes within a few beats.
pub fn detect_peaks(signal: &[f64], fs: f64, refractory_s: f64, threshold_ratio: f64) -> Vec<Peak> {
  if signal.len() < 3 || fs <= 0.0 {
    return Vec::new();
  }
  let refractory = (refractory_s * fs).round() as usize;
  let decay = (-1.0 / (2.0 * fs)).exp();

  let mut peaks: Vec<Peak> = Vec::new();
  let mut running_max = 0.0f64;
  let mut trough = signal[0];
  let mut last_peak: Option<usize> = None;

  for i in 1..signal.len() - 1 {
    let x = signal[i];
    running_max = x.abs().max(running_max * decay);
    if x < trough {
      trough = x;
    }

    let is_local_max = x > signal[i - 1] && x >= signal[i + 1];
    if !is_local_max {
      continue;
    }
    if x < threshold_ratio * running_max {
      continue;
    }
    if let Some(last) = last_peak
      && i - last < refractory
    {
      continue;
    }

    peaks.push(Peak {
      index: i,
      value: x,
      prominence: x - trough,
    });
    last_peak = Some(i);
    trough = x;
  }
  peaks
}

/// Inter-beat intervals in milliseconds from peak indices.
pub fn beat_intervals_ms(peaks: &[Peak], fs: f64) -> Vec<f64> {
  peaks
    .windows(2)
    .map(|w| (w[1].index - w[0].index) as f64 / fs * 1000.0)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::f64::consts::PI;

  fn pulse_train(fs: f64, bpm: f64, seconds: f64) -> Vec<f64> {
    let beat_hz = bpm / 60.0;
    (0..(fs * seconds) as usize)
      .map(|i| (2.0 * PI * beat_hz * i as f64 / fs).sin())
      .collect()
  }

  #[test]
  fn counts_beats_of_a_clean_pulse() {
    let fs = 50.0;
    let signal = pulse_train(fs, 60.0, 10.0);
    let peaks = detect_peaks(&signal, fs, 0.3, 0.6);
    // 10 s at 60 bpm: first cycle peaks at 0.25 s, then one per second.
    assert!((9..=10).contains(&peaks.len()), "found {} peaks", peaks.len());
  }

  #[test]
  fn beat_intervals_match_rate() {
    let fs = 50.0;
    let signal = pulse_train(fs, 75.0, 20.0);
    let peaks = detect_peaks(&signal, fs, 0.3, 0.6);
    let ibis = beat_intervals_ms(&peaks, fs);
    assert!(!ibis.is_empty());
    let mean = ibis.iter().sum::<f64>() / ibis.len() as f64;
    assert!((mean - 800.0).abs() < 40.0, "mean IBI {mean} ms");
  }

  #[test]
  fn refractory_suppresses_double_triggers() {
    let fs = 50.0;
    // Two ripples 100 ms apart, then silence.
    let mut signal = vec![0.0; 200];
    signal[50] = 1.0;
    signal[55] = 0.9;
    let peaks = detect_peaks(&signal, fs, 0.3, 0.6);
    assert_eq!(peaks.len(), 1);
  }

  #[test]
  fn flat_signal_yields_no_peaks() {
    assert!(detect_peaks(&[0.0; 500], 50.0, 0.3, 0.6).is_empty());
  }
}
