// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Rolling throughput and health accounting.
//!
//! Producers bump lock-free counters; a 1 Hz tick snapshots the totals into
//! short rolling windows from which per-second rates over 1 s and 10 s are
//! derived. The health score blends delivered rate against the nominal rate
//! with recent error activity; overall health is the minimum across sensors.

use linkband_core::sample::SensorKind;
use serde::{Deserialize, Serialize};
use std::{
  collections::VecDeque,
  sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
  },
};
use strum::IntoEnumIterator;

const WINDOW_TICKS: usize = 10;

#[derive(Default)]
struct SensorCounters {
  samples_received: AtomicU64,
  samples_processed: AtomicU64,
  decode_errors: AtomicU64,
  reorder_drops: AtomicU64,
  overruns: AtomicU64,
  processor_errors: AtomicU64,
}

#[derive(Default)]
struct TickHistory {
  /// (received_total, error_total) at each 1 Hz tick, newest last.
  ticks: VecDeque<(u64, u64)>,
}

/// Point-in-time view of one sensor's counters and rates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorHealth {
  pub samples_received: u64,
  pub samples_processed: u64,
  pub samples_per_second: f64,
  pub samples_per_second_10s: f64,
  pub decode_errors: u64,
  pub reorder_drops: u64,
  pub overruns: u64,
  pub processor_errors: u64,
  pub health_score: f64,
}

/// Snapshot across all sensors, exposed through the control surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
  pub eeg: SensorHealth,
  pub ppg: SensorHealth,
  pub acc: SensorHealth,
  pub bat: SensorHealth,
  pub overall_score: f64,
}

impl HealthSnapshot {
  pub fn sensor(&self, kind: SensorKind) -> &SensorHealth {
    match kind {
      SensorKind::Eeg => &self.eeg,
      SensorKind::Ppg => &self.ppg,
      SensorKind::Acc => &self.acc,
      SensorKind::Battery => &self.bat,
    }
  }
}

pub struct StreamingMonitor {
  counters: [SensorCounters; 4],
  history: [Mutex<TickHistory>; 4],
}

impl Default for StreamingMonitor {
  fn default() -> Self {
    Self {
      counters: Default::default(),
      history: Default::default(),
    }
  }
}

fn slot(sensor: SensorKind) -> usize {
  match sensor {
    SensorKind::Eeg => 0,
    SensorKind::Ppg => 1,
    SensorKind::Acc => 2,
    SensorKind::Battery => 3,
  }
}

impl StreamingMonitor {
  pub fn add_samples(&self, sensor: SensorKind, count: usize) {
    self.counters[slot(sensor)]
      .samples_received
      .fetch_add(count as u64, Ordering::Relaxed);
  }

  pub fn add_processed(&self, sensor: SensorKind, count: usize) {
    self.counters[slot(sensor)]
      .samples_processed
      .fetch_add(count as u64, Ordering::Relaxed);
  }

  pub fn add_decode_error(&self, sensor: SensorKind) {
    self.counters[slot(sensor)]
      .decode_errors
      .fetch_add(1, Ordering::Relaxed);
  }

  pub fn add_reorder_drop(&self, sensor: SensorKind) {
    self.counters[slot(sensor)]
      .reorder_drops
      .fetch_add(1, Ordering::Relaxed);
  }

  pub fn add_overruns(&self, sensor: SensorKind, count: u64) {
    self.counters[slot(sensor)]
      .overruns
      .fetch_add(count, Ordering::Relaxed);
  }

  pub fn add_processor_error(&self, sensor: SensorKind) {
    self.counters[slot(sensor)]
      .processor_errors
      .fetch_add(1, Ordering::Relaxed);
  }

  /// Advance the rolling windows. Called at 1 Hz by the supervisor tick.
  pub fn tick(&self) {
    for sensor in SensorKind::iter() {
      let i = slot(sensor);
      let counters = &self.counters[i];
      let received = counters.samples_received.load(Ordering::Relaxed);
      let errors = counters.decode_errors.load(Ordering::Relaxed)
        + counters.processor_errors.load(Ordering::Relaxed);
      let mut history = self.history[i].lock().expect("monitor history mutex poisoned");
      history.ticks.push_back((received, errors));
      while history.ticks.len() > WINDOW_TICKS + 1 {
        history.ticks.pop_front();
      }
    }
  }

  fn sensor_health(&self, sensor: SensorKind, streaming: bool) -> SensorHealth {
    let i = slot(sensor);
    let counters = &self.counters[i];
    let history = self.history[i].lock().expect("monitor history mutex poisoned");

    let newest = history.ticks.back().copied();
    let rate_over = |ticks_back: usize| -> f64 {
      let len = history.ticks.len();
      if len < 2 {
        return 0.0;
      }
      let span = ticks_back.min(len - 1);
      let (old_received, _) = history.ticks[len - 1 - span];
      let (new_received, _) = newest.unwrap_or_default();
      (new_received - old_received) as f64 / span as f64
    };

    let sps_1s = rate_over(1);
    let sps_10s = rate_over(WINDOW_TICKS);

    let health_score = if !streaming {
      100.0
    } else {
      let expected = sensor.nominal_rate();
      let ratio = (sps_10s / expected).clamp(0.0, 1.0);
      let recent_errors = match (history.ticks.front(), history.ticks.back()) {
        (Some((_, first)), Some((_, last))) => last - first,
        _ => 0,
      };
      (ratio * 100.0 - 5.0 * recent_errors as f64).clamp(0.0, 100.0)
    };

    SensorHealth {
      samples_received: counters.samples_received.load(Ordering::Relaxed),
      samples_processed: counters.samples_processed.load(Ordering::Relaxed),
      samples_per_second: sps_1s,
      samples_per_second_10s: sps_10s,
      decode_errors: counters.decode_errors.load(Ordering::Relaxed),
      reorder_drops: counters.reorder_drops.load(Ordering::Relaxed),
      overruns: counters.overruns.load(Ordering::Relaxed),
      processor_errors: counters.processor_errors.load(Ordering::Relaxed),
      health_score,
    }
  }

  pub fn snapshot(&self, streaming: bool) -> HealthSnapshot {
    let eeg = self.sensor_health(SensorKind::Eeg, streaming);
    let ppg = self.sensor_health(SensorKind::Ppg, streaming);
    let acc = self.sensor_health(SensorKind::Acc, streaming);
    let bat = self.sensor_health(SensorKind::Battery, streaming);
    let overall_score = eeg
      .health_score
      .min(ppg.health_score)
      .min(acc.health_score)
      .min(bat.health_score);
    HealthSnapshot {
      eeg,
      ppg,
      acc,
      bat,
      overall_score,
    }
  }

  /// Forget rate history, e.g. across a stream restart. Totals persist.
  pub fn reset_windows(&self) {
    for history in &self.history {
      history
        .lock()
        .expect("monitor history mutex poisoned")
        .ticks
        .clear();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rates_from_rolling_window() {
    let monitor = StreamingMonitor::default();
    monitor.tick();
    for _ in 0..3 {
      monitor.add_samples(SensorKind::Eeg, 250);
      monitor.tick();
    }
    let snapshot = monitor.snapshot(true);
    assert_eq!(snapshot.eeg.samples_received, 750);
    assert!((snapshot.eeg.samples_per_second - 250.0).abs() < 1e-9);
    assert!((snapshot.eeg.samples_per_second_10s - 250.0).abs() < 1e-9);
  }

  #[test]
  fn overall_is_minimum_of_sensors() {
    let monitor = StreamingMonitor::default();
    monitor.tick();
    // EEG healthy, everything else silent while streaming.
    for _ in 0..10 {
      monitor.add_samples(SensorKind::Eeg, 250);
      monitor.add_samples(SensorKind::Ppg, 50);
      monitor.add_samples(SensorKind::Acc, 30);
      monitor.add_samples(SensorKind::Battery, 1);
      monitor.tick();
    }
    let healthy = monitor.snapshot(true);
    assert!(healthy.overall_score > 90.0, "score {}", healthy.overall_score);

    let idle = StreamingMonitor::default();
    idle.tick();
    idle.tick();
    assert_eq!(idle.snapshot(false).overall_score, 100.0);
    assert_eq!(idle.snapshot(true).overall_score, 0.0);
  }

  #[test]
  fn errors_degrade_health() {
    let monitor = StreamingMonitor::default();
    monitor.tick();
    for _ in 0..10 {
      monitor.add_samples(SensorKind::Eeg, 250);
      monitor.tick();
    }
    let before = monitor.snapshot(true).eeg.health_score;
    for _ in 0..5 {
      monitor.add_decode_error(SensorKind::Eeg);
    }
    monitor.add_samples(SensorKind::Eeg, 250);
    monitor.tick();
    let after = monitor.snapshot(true).eeg.health_score;
    assert!(after < before, "{after} !< {before}");
    assert_eq!(monitor.snapshot(true).eeg.decode_errors, 5);
  }
}
