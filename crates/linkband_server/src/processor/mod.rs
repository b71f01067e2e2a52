// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Per-sensor signal processors.
//!
//! Each sensor gets one long-running task scheduled at a fixed cadence. A
//! tick copies the most recent window from the ring buffer, suppresses it if
//! fewer than 90 % of the expected samples have accumulated, runs the
//! sensor's pipeline, and emits the resulting frame on the `processed`
//! channel and into the recorder tee. Battery frames are pass-through and
//! are emitted by the battery decoder task at arrival, not here.
//!
//! A pipeline error ends the task with `Err`; the supervisor restarts it
//! under the exponential back-off budget. The EEG spectral stage is the one
//! stage that can exceed a few milliseconds, so it runs on the blocking
//! pool.

pub mod acc;
pub mod eeg;
pub mod ppg;

use crate::{buffer::SharedBuffers, bus::BusHandle, monitor::StreamingMonitor, recorder::RecorderHandle};
use linkband_core::{
  errors::ProcessError,
  sample::{ProcessedFrame, SensorKind},
  util::time,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Fraction of the nominal window that must be present before a frame is
/// produced.
pub const MIN_WINDOW_FILL: f64 = 0.9;

/// DSP cadence per sensor.
pub fn period(sensor: SensorKind) -> Duration {
  match sensor {
    SensorKind::Eeg => Duration::from_millis(500),
    SensorKind::Ppg => Duration::from_secs(1),
    SensorKind::Acc => Duration::from_secs(1),
    SensorKind::Battery => Duration::from_secs(1),
  }
}

/// Analysis window per sensor, in samples.
pub fn window_samples(sensor: SensorKind) -> usize {
  match sensor {
    SensorKind::Eeg => 1000,
    SensorKind::Ppg => 500,
    SensorKind::Acc => 90,
    SensorKind::Battery => 1,
  }
}

/// Everything a processor task needs, cheap to clone per restart.
#[derive(Clone)]
pub struct ProcessorContext {
  pub buffers: Arc<SharedBuffers>,
  pub monitor: Arc<StreamingMonitor>,
  pub bus: BusHandle,
  pub recorder: RecorderHandle,
}

impl ProcessorContext {
  async fn emit(&self, sensor: SensorKind, consumed: usize, frame: ProcessedFrame) {
    let t_host = time::host_now();
    self.monitor.add_processed(sensor, consumed);
    self.bus.publish_processed(sensor, t_host, frame.clone()).await;
    self.recorder.record_processed(sensor, t_host, frame).await;
  }
}

/// EEG processor task: 500 ms cadence over a 4 s window.
pub async fn run_eeg(ctx: ProcessorContext, cancel: CancellationToken) -> Result<(), ProcessError> {
  let config = eeg::EegConfig::default();
  let mut tick = tokio::time::interval(period(SensorKind::Eeg));
  tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
  loop {
    tokio::select! {
      _ = cancel.cancelled() => return Ok(()),
      _ = tick.tick() => {}
    }
    let want = window_samples(SensorKind::Eeg);
    let window = ctx.buffers.eeg.latest(want);
    if (window.len() as f64) < want as f64 * MIN_WINDOW_FILL {
      trace!("EEG window underfilled ({}/{want}), suppressing frame", window.len());
      continue;
    }
    let consumed = window.len();
    // The Welch PSD is the only stage that can blow the cooperative
    // budget; hand the whole window to the blocking pool.
    let frame = tokio::task::spawn_blocking(move || eeg::process_window(&config, &window))
      .await
      .map_err(|err| ProcessError::NumericFailure(format!("eeg task join: {err}")))??;
    ctx.emit(SensorKind::Eeg, consumed, ProcessedFrame::Eeg(frame)).await;
  }
}

/// PPG processor task: 1 s cadence over a 10 s window.
pub async fn run_ppg(ctx: ProcessorContext, cancel: CancellationToken) -> Result<(), ProcessError> {
  let config = ppg::PpgConfig::default();
  let mut tick = tokio::time::interval(period(SensorKind::Ppg));
  tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
  loop {
    tokio::select! {
      _ = cancel.cancelled() => return Ok(()),
      _ = tick.tick() => {}
    }
    let want = window_samples(SensorKind::Ppg);
    let window = ctx.buffers.ppg.latest(want);
    if (window.len() as f64) < want as f64 * MIN_WINDOW_FILL {
      trace!("PPG window underfilled ({}/{want}), suppressing frame", window.len());
      continue;
    }
    let frame = ppg::process_window(&config, &window)?;
    ctx.emit(SensorKind::Ppg, window.len(), ProcessedFrame::Ppg(frame)).await;
  }
}

/// ACC processor task: 1 s cadence over a 3 s window.
pub async fn run_acc(ctx: ProcessorContext, cancel: CancellationToken) -> Result<(), ProcessError> {
  let config = acc::AccConfig::default();
  let mut tick = tokio::time::interval(period(SensorKind::Acc));
  tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
  loop {
    tokio::select! {
      _ = cancel.cancelled() => return Ok(()),
      _ = tick.tick() => {}
    }
    let want = window_samples(SensorKind::Acc);
    let window = ctx.buffers.acc.latest(want);
    if (window.len() as f64) < want as f64 * MIN_WINDOW_FILL {
      trace!("ACC window underfilled ({}/{want}), suppressing frame", window.len());
      continue;
    }
    let frame = acc::process_window(&config, &window)?;
    ctx.emit(SensorKind::Acc, window.len(), ProcessedFrame::Acc(frame)).await;
  }
}
