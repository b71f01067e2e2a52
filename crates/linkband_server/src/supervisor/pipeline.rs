// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Streaming pipeline wiring.
//!
//! When streaming starts the supervisor spawns, per sensor: a decoder task
//! that filters the hardware event stream for its characteristic, decodes
//! packets, pushes the ring buffer and tees raw batches to the bus and the
//! recorder; and (for EEG/PPG/ACC) a processor task at the DSP cadence.
//! Battery is pass-through: its decoder emits the processed frame at
//! arrival. All tasks run under one cancellation token, supervised by the
//! restart harness.

use super::restart::{RestartPolicy, spawn_supervised};
use crate::{
  buffer::SharedBuffers,
  bus::BusHandle,
  device::{HardwareEvent, SensorHardware},
  monitor::StreamingMonitor,
  processor::{self, ProcessorContext},
  protocol::{AccDecoder, BatteryDecoder, EegDecoder, PpgDecoder},
  recorder::RecorderHandle,
};
use linkband_core::{
  errors::{DecodeError, LinkBandError},
  sample::{Sample, SampleBatch, SensorKind},
};
use std::sync::{
  Arc,
  atomic::{AtomicU8, Ordering},
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Sentinel for "no battery reading yet".
pub(crate) const BATTERY_UNKNOWN: u8 = u8::MAX;

#[derive(Clone)]
pub(crate) struct PipelineContext {
  pub buffers: Arc<SharedBuffers>,
  pub monitor: Arc<StreamingMonitor>,
  pub bus: BusHandle,
  pub recorder: RecorderHandle,
  pub battery_level: Arc<AtomicU8>,
}

/// Handle to a running pipeline; dropping it does not stop the tasks, the
/// token does.
pub(crate) struct Pipeline {
  cancel: CancellationToken,
}

impl Pipeline {
  pub fn stop(&self) {
    self.cancel.cancel();
  }
}

/// Spawn the full per-sensor task set for a connected, notifying device.
pub(crate) fn spawn_pipeline(
  ctx: &PipelineContext,
  hardware: &Arc<dyn SensorHardware>,
  parent: &CancellationToken,
) -> Pipeline {
  let cancel = parent.child_token();
  let policy = RestartPolicy::default();

  for sensor in [
    SensorKind::Eeg,
    SensorKind::Ppg,
    SensorKind::Acc,
    SensorKind::Battery,
  ] {
    let ctx = ctx.clone();
    let hardware = hardware.clone();
    let task_cancel = cancel.clone();
    // Subscribe before this function returns so no notification can slip
    // between "pipeline up" and "decoder listening". Restarts resubscribe.
    let mut first_events = Some(hardware.event_stream());
    spawn_supervised(
      &format!("{sensor}_decoder"),
      sensor,
      policy,
      cancel.clone(),
      ctx.monitor.clone(),
      ctx.bus.clone(),
      move || {
        let events = first_events
          .take()
          .unwrap_or_else(|| hardware.event_stream());
        run_decoder(sensor, ctx.clone(), events, task_cancel.clone())
      },
    );
  }

  let processor_ctx = ProcessorContext {
    buffers: ctx.buffers.clone(),
    monitor: ctx.monitor.clone(),
    bus: ctx.bus.clone(),
    recorder: ctx.recorder.clone(),
  };
  {
    let ctx = processor_ctx.clone();
    let task_cancel = cancel.clone();
    spawn_supervised(
      "eeg_processor",
      SensorKind::Eeg,
      policy,
      cancel.clone(),
      processor_ctx.monitor.clone(),
      processor_ctx.bus.clone(),
      move || processor::run_eeg(ctx.clone(), task_cancel.clone()),
    );
  }
  {
    let ctx = processor_ctx.clone();
    let task_cancel = cancel.clone();
    spawn_supervised(
      "ppg_processor",
      SensorKind::Ppg,
      policy,
      cancel.clone(),
      processor_ctx.monitor.clone(),
      processor_ctx.bus.clone(),
      move || processor::run_ppg(ctx.clone(), task_cancel.clone()),
    );
  }
  {
    let ctx = processor_ctx.clone();
    let task_cancel = cancel.clone();
    spawn_supervised(
      "acc_processor",
      SensorKind::Acc,
      policy,
      cancel.clone(),
      processor_ctx.monitor.clone(),
      processor_ctx.bus.clone(),
      move || processor::run_acc(ctx.clone(), task_cancel.clone()),
    );
  }

  Pipeline { cancel }
}

/// Per-sensor decoder state, including the ring buffer push.
enum SensorDecoder {
  Eeg(EegDecoder),
  Ppg(PpgDecoder),
  Acc(AccDecoder),
  Battery(BatteryDecoder),
}

impl SensorDecoder {
  fn for_sensor(sensor: SensorKind) -> Self {
    match sensor {
      SensorKind::Eeg => SensorDecoder::Eeg(EegDecoder::default()),
      SensorKind::Ppg => SensorDecoder::Ppg(PpgDecoder::default()),
      SensorKind::Acc => SensorDecoder::Acc(AccDecoder::default()),
      SensorKind::Battery => SensorDecoder::Battery(BatteryDecoder::default()),
    }
  }

  /// Decode one packet and push it into the matching ring buffer. Returns
  /// the wrapped samples for fan-out.
  fn decode_into_buffers(
    &mut self,
    ctx: &PipelineContext,
    data: &[u8],
    t_host: f64,
  ) -> Result<Vec<Sample>, DecodeError> {
    match self {
      SensorDecoder::Eeg(decoder) => {
        let samples = decoder.decode(data)?;
        let report = ctx.buffers.eeg.push_batch(&samples);
        ctx.monitor.add_overruns(SensorKind::Eeg, report.evicted);
        Ok(samples.into_iter().map(Sample::Eeg).collect())
      }
      SensorDecoder::Ppg(decoder) => {
        let samples = decoder.decode(data)?;
        let report = ctx.buffers.ppg.push_batch(&samples);
        ctx.monitor.add_overruns(SensorKind::Ppg, report.evicted);
        Ok(samples.into_iter().map(Sample::Ppg).collect())
      }
      SensorDecoder::Acc(decoder) => {
        let samples = decoder.decode(data)?;
        let report = ctx.buffers.acc.push_batch(&samples);
        ctx.monitor.add_overruns(SensorKind::Acc, report.evicted);
        Ok(samples.into_iter().map(Sample::Acc).collect())
      }
      SensorDecoder::Battery(decoder) => {
        let samples = decoder.decode(data, t_host)?;
        let report = ctx.buffers.battery.push_batch(&samples);
        ctx.monitor.add_overruns(SensorKind::Battery, report.evicted);
        ctx
          .battery_level
          .store(samples[0].level_percent, Ordering::Relaxed);
        Ok(samples.into_iter().map(Sample::Battery).collect())
      }
    }
  }
}

/// One decoder task. Decode errors are counted and dropped; the task only
/// ends on cancellation or when the hardware event stream closes.
async fn run_decoder(
  sensor: SensorKind,
  ctx: PipelineContext,
  mut events: broadcast::Receiver<HardwareEvent>,
  cancel: CancellationToken,
) -> Result<(), LinkBandError> {
  let mut decoder = SensorDecoder::for_sensor(sensor);

  loop {
    let event = tokio::select! {
      _ = cancel.cancelled() => return Ok(()),
      event = events.recv() => event,
    };
    let (t_host, data) = match event {
      Ok(HardwareEvent::Notification {
        sensor: packet_sensor,
        t_host,
        data,
      }) if packet_sensor == sensor => (t_host, data),
      Ok(_) => continue,
      Err(broadcast::error::RecvError::Lagged(missed)) => {
        warn!("{} decoder lagged, {} notifications lost", sensor, missed);
        continue;
      }
      Err(broadcast::error::RecvError::Closed) => return Ok(()),
    };

    let samples = match decoder.decode_into_buffers(&ctx, &data, t_host) {
      Ok(samples) => samples,
      Err(err) => {
        note_decode_error(&ctx, sensor, &err);
        continue;
      }
    };

    if sensor == SensorKind::Battery {
      // Battery is pass-through: the processed frame goes out at arrival
      // rather than on a DSP cadence. It is not teed to the recorder; the
      // session layout only carries bat_raw, the processed side would be a
      // byte-for-byte duplicate.
      if let Some(Sample::Battery(level)) = samples.first() {
        let frame = linkband_core::sample::ProcessedFrame::Battery(*level);
        ctx.monitor.add_processed(sensor, samples.len());
        ctx.bus.publish_processed(sensor, t_host, frame).await;
      }
    }

    ctx.monitor.add_samples(sensor, samples.len());
    let batch = SampleBatch {
      sensor,
      t_host,
      samples,
    };
    ctx.bus.publish_raw(batch.clone()).await;
    ctx.recorder.record_raw(batch).await;
  }
}

fn note_decode_error(ctx: &PipelineContext, sensor: SensorKind, err: &DecodeError) {
  match err {
    DecodeError::ReorderDropped => {
      debug!("{} packet reordered, dropped", sensor);
      ctx.monitor.add_reorder_drop(sensor);
    }
    other => {
      debug!("{} packet rejected: {}", sensor, other);
      ctx.monitor.add_decode_error(sensor);
    }
  }
  ctx.bus.error_event(
    &format!("{sensor}_decode"),
    format!("{sensor} decode error: {err}"),
  );
}
