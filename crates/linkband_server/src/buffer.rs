// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Bounded per-sensor sample windows.
//!
//! Writers (decoders) push whole packets; readers (processors) copy the most
//! recent W samples. The mutex guards an O(W) copy at most and is never held
//! across an await. Overflow evicts the oldest sample and counts an overrun;
//! out-of-order samples are dropped and counted, preserving the monotonic
//! `t_device` invariant.

use linkband_core::sample::{AccSample, BatterySample, EegSample, PpgSample, SensorKind};
use std::{
  collections::VecDeque,
  sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
  },
};

/// Anything with a device timestamp can live in a ring buffer.
pub trait TimedSample: Copy + Send + 'static {
  fn t_device(&self) -> f64;
}

impl TimedSample for EegSample {
  fn t_device(&self) -> f64 {
    self.t_device
  }
}

impl TimedSample for PpgSample {
  fn t_device(&self) -> f64 {
    self.t_device
  }
}

impl TimedSample for AccSample {
  fn t_device(&self) -> f64 {
    self.t_device
  }
}

impl TimedSample for BatterySample {
  fn t_device(&self) -> f64 {
    self.t_device
  }
}

/// Outcome of one [RingBuffer::push_batch].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
  pub accepted: usize,
  pub evicted: u64,
  pub rejected: u64,
}

pub struct RingBuffer<T: TimedSample> {
  samples: Mutex<VecDeque<T>>,
  capacity: usize,
  overruns: AtomicU64,
  out_of_order: AtomicU64,
}

impl<T: TimedSample> RingBuffer<T> {
  pub fn new(capacity: usize) -> Self {
    Self {
      samples: Mutex::new(VecDeque::with_capacity(capacity)),
      capacity,
      overruns: AtomicU64::new(0),
      out_of_order: AtomicU64::new(0),
    }
  }

  /// Capacity for a sensor at a given window length.
  pub fn for_sensor(sensor: SensorKind, window_secs: f64) -> Self {
    Self::new((sensor.nominal_rate() * window_secs).ceil() as usize)
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Push a decoded batch atomically. Evicted samples overflowed the
  /// window; rejected samples violated timestamp monotonicity.
  pub fn push_batch(&self, batch: &[T]) -> PushReport {
    let mut samples = self.samples.lock().expect("ring buffer mutex poisoned");
    let mut report = PushReport::default();
    for sample in batch {
      if let Some(last) = samples.back()
        && sample.t_device() < last.t_device()
      {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
        report.rejected += 1;
        continue;
      }
      if samples.len() == self.capacity {
        samples.pop_front();
        self.overruns.fetch_add(1, Ordering::Relaxed);
        report.evicted += 1;
      }
      samples.push_back(*sample);
      report.accepted += 1;
    }
    report
  }

  /// Copy of the most recent `n` samples (all of them if fewer).
  pub fn latest(&self, n: usize) -> Vec<T> {
    let samples = self.samples.lock().expect("ring buffer mutex poisoned");
    let start = samples.len().saturating_sub(n);
    samples.iter().skip(start).copied().collect()
  }

  pub fn len(&self) -> usize {
    self.samples.lock().expect("ring buffer mutex poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Device timestamp of the oldest retained sample.
  pub fn head_t_device(&self) -> Option<f64> {
    self
      .samples
      .lock()
      .expect("ring buffer mutex poisoned")
      .front()
      .map(|s| s.t_device())
  }

  pub fn overruns(&self) -> u64 {
    self.overruns.load(Ordering::Relaxed)
  }

  pub fn out_of_order(&self) -> u64 {
    self.out_of_order.load(Ordering::Relaxed)
  }

  pub fn clear(&self) {
    self.samples.lock().expect("ring buffer mutex poisoned").clear();
  }
}

/// The four typed windows shared between decoders and processors.
pub struct SharedBuffers {
  pub eeg: RingBuffer<EegSample>,
  pub ppg: RingBuffer<PpgSample>,
  pub acc: RingBuffer<AccSample>,
  pub battery: RingBuffer<BatterySample>,
}

impl SharedBuffers {
  pub fn new(config: &linkband_core::config::ServerConfig) -> Self {
    use SensorKind::*;
    Self {
      eeg: RingBuffer::for_sensor(Eeg, config.window_secs(Eeg)),
      ppg: RingBuffer::for_sensor(Ppg, config.window_secs(Ppg)),
      acc: RingBuffer::for_sensor(Acc, config.window_secs(Acc)),
      battery: RingBuffer::for_sensor(Battery, config.window_secs(Battery)),
    }
  }

  pub fn clear(&self) {
    self.eeg.clear();
    self.ppg.clear();
    self.acc.clear();
    self.battery.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn eeg(t: f64) -> EegSample {
    EegSample {
      t_device: t,
      ch1_uv: 0.0,
      ch2_uv: 0.0,
      leadoff_ch1: false,
      leadoff_ch2: false,
    }
  }

  #[test]
  fn capacity_from_rate_and_window() {
    let buf = RingBuffer::<EegSample>::for_sensor(SensorKind::Eeg, 10.0);
    assert_eq!(buf.capacity(), 2500);
    let acc = RingBuffer::<AccSample>::for_sensor(SensorKind::Acc, 10.0);
    assert_eq!(acc.capacity(), 300);
  }

  #[test]
  fn overflow_evicts_oldest_and_counts() {
    let buf = RingBuffer::new(2500);
    let samples: Vec<_> = (0..2600).map(|i| eeg(i as f64 / 250.0)).collect();
    let report = buf.push_batch(&samples);
    assert_eq!(report.accepted, 2600);
    assert_eq!(report.evicted, 100);
    assert_eq!(buf.len(), 2500);
    assert_eq!(buf.overruns(), 100);
    // Head is sample index 100.
    assert_eq!(buf.head_t_device().unwrap(), 100.0 / 250.0);
  }

  #[test]
  fn push_at_exact_capacity_keeps_len() {
    let buf = RingBuffer::new(4);
    buf.push_batch(&[eeg(0.0), eeg(1.0), eeg(2.0), eeg(3.0)]);
    assert_eq!(buf.len(), 4);
    buf.push_batch(&[eeg(4.0)]);
    assert_eq!(buf.len(), 4);
    assert_eq!(buf.head_t_device().unwrap(), 1.0);
  }

  #[test]
  fn out_of_order_samples_are_dropped() {
    let buf = RingBuffer::new(16);
    buf.push_batch(&[eeg(1.0), eeg(2.0)]);
    assert_eq!(buf.push_batch(&[eeg(1.5)]).accepted, 0);
    assert_eq!(buf.out_of_order(), 1);
    assert_eq!(buf.len(), 2);
  }

  #[test]
  fn latest_returns_most_recent_window() {
    let buf = RingBuffer::new(8);
    buf.push_batch(&(0..8).map(|i| eeg(i as f64)).collect::<Vec<_>>());
    let window = buf.latest(3);
    assert_eq!(window.len(), 3);
    assert_eq!(window[0].t_device, 5.0);
    assert_eq!(window[2].t_device, 7.0);
  }
}
