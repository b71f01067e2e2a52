// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The session recorder.
//!
//! One actor task owns every file handle; decoders and processors tee their
//! output in through a bounded channel and never touch the disk. A session
//! is a directory `session_YYYYMMDD_HHMMSS/` with one append-only file per
//! sensor/channel pair and a `meta.json` manifest. The manifest is written
//! atomically (temp file, then rename) so an ended session can never be left
//! with a torn manifest, and nothing is appended after `stop` returns.
//!
//! If the device drops mid-session the open files are flushed and closed but
//! the session stays open; when the device comes back, recording resumes
//! into `_2`, `_3`… suffixed files and the reconnect is noted in the
//! manifest.

use linkband_core::{
  config::DataFormat,
  errors::{LinkBandResult, StateError},
  message::ChannelKind,
  sample::{ProcessedFrame, Sample, SampleBatch, SensorKind},
  util::time as host_time,
};
use serde::{Deserialize, Serialize};
use std::{
  collections::HashMap,
  fs::{self, File},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
  time::Duration,
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Flush cadence: whichever comes first.
const FLUSH_EVERY_RECORDS: u64 = 100;
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

const DATA_CHANNEL_DEPTH: usize = 1024;

/// One physical file in the session directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSummary {
  pub path: String,
  pub sensor: SensorKind,
  pub channel: ChannelKind,
  pub records: u64,
  pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectNote {
  /// Seconds into the session at which the device came back.
  pub at: f64,
}

/// The `meta.json` manifest, also returned by the control verbs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
  pub session_name: String,
  pub directory: PathBuf,
  pub start_time: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_time: Option<String>,
  pub data_format: DataFormat,
  pub files: Vec<FileSummary>,
  pub errors: Vec<String>,
  pub reconnects: Vec<ReconnectNote>,
}

/// Data tees from the pipeline. Device link markers travel on the same
/// channel as the data so the resume point is exact.
#[derive(Debug)]
pub enum RecordedItem {
  Raw(SampleBatch),
  Processed {
    sensor: SensorKind,
    t_host: f64,
    frame: ProcessedFrame,
  },
  DeviceLost,
  DeviceReconnected,
}

enum RecorderCommand {
  Start {
    session_name: Option<String>,
    reply: oneshot::Sender<LinkBandResult<SessionSummary>>,
  },
  Stop {
    reply: oneshot::Sender<LinkBandResult<SessionSummary>>,
  },
}

#[derive(Clone)]
pub struct RecorderHandle {
  command_tx: mpsc::Sender<RecorderCommand>,
  data_tx: mpsc::Sender<RecordedItem>,
}

impl RecorderHandle {
  pub async fn start(&self, session_name: Option<String>) -> LinkBandResult<SessionSummary> {
    let (tx, rx) = oneshot::channel();
    if self
      .command_tx
      .send(RecorderCommand::Start {
        session_name,
        reply: tx,
      })
      .await
      .is_err()
    {
      return Err(StateError::NotRecording.into());
    }
    rx.await.unwrap_or_else(|_| Err(StateError::NotRecording.into()))
  }

  pub async fn stop(&self) -> LinkBandResult<SessionSummary> {
    let (tx, rx) = oneshot::channel();
    if self
      .command_tx
      .send(RecorderCommand::Stop { reply: tx })
      .await
      .is_err()
    {
      return Err(StateError::NotRecording.into());
    }
    rx.await.unwrap_or_else(|_| Err(StateError::NotRecording.into()))
  }

  pub async fn record_raw(&self, batch: SampleBatch) {
    if self.data_tx.send(RecordedItem::Raw(batch)).await.is_err() {
      debug!("Recorder task gone, dropping raw batch");
    }
  }

  pub async fn record_processed(&self, sensor: SensorKind, t_host: f64, frame: ProcessedFrame) {
    let item = RecordedItem::Processed {
      sensor,
      t_host,
      frame,
    };
    if self.data_tx.send(item).await.is_err() {
      debug!("Recorder task gone, dropping processed frame");
    }
  }

  pub async fn notify_device_lost(&self) {
    let _ = self.data_tx.send(RecordedItem::DeviceLost).await;
  }

  pub async fn notify_device_reconnected(&self) {
    let _ = self.data_tx.send(RecordedItem::DeviceReconnected).await;
  }
}

/// Spawn the recorder actor. The task lives until `cancel` fires,
/// finalizing any active session on the way out.
pub fn spawn_recorder(
  data_root: PathBuf,
  format: DataFormat,
  cancel: CancellationToken,
) -> RecorderHandle {
  let (command_tx, command_rx) = mpsc::channel(16);
  let (data_tx, data_rx) = mpsc::channel(DATA_CHANNEL_DEPTH);
  linkband_core::util::async_manager::spawn(recorder_task(
    data_root, format, command_rx, data_rx, cancel,
  ));
  RecorderHandle {
    command_tx,
    data_tx,
  }
}

struct SensorFile {
  sensor: SensorKind,
  channel: ChannelKind,
  path: PathBuf,
  writer: Option<BufWriter<File>>,
  records: u64,
  unflushed: u64,
  wrote_header: bool,
}

impl SensorFile {
  fn new(dir: &Path, sensor: SensorKind, channel: ChannelKind, suffix: u32, format: DataFormat) -> Self {
    let base = format!("{sensor}_{channel}");
    let name = if suffix <= 1 {
      format!("{base}.{}", format.extension())
    } else {
      format!("{base}_{suffix}.{}", format.extension())
    };
    Self {
      sensor,
      channel,
      path: dir.join(name),
      writer: None,
      records: 0,
      unflushed: 0,
      wrote_header: false,
    }
  }

  fn summary(&self) -> FileSummary {
    FileSummary {
      path: self
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default(),
      sensor: self.sensor,
      channel: self.channel,
      records: self.records,
      bytes: fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
    }
  }
}

struct ActiveSession {
  meta: SessionSummary,
  files: HashMap<(SensorKind, ChannelKind), SensorFile>,
  /// Physical files already closed by a device loss.
  finished_files: Vec<FileSummary>,
  format: DataFormat,
  suffix: u32,
  started_host: f64,
  device_lost: bool,
}

async fn recorder_task(
  data_root: PathBuf,
  format: DataFormat,
  mut command_rx: mpsc::Receiver<RecorderCommand>,
  mut data_rx: mpsc::Receiver<RecordedItem>,
  cancel: CancellationToken,
) {
  let mut session: Option<ActiveSession> = None;
  let mut flush_tick = tokio::time::interval(FLUSH_INTERVAL);
  flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        if let Some(mut active) = session.take() {
          warn!("Recorder cancelled with an active session, finalizing");
          drain_pending(&mut data_rx, &mut active);
          finalize_session(&mut active);
        }
        break;
      }
      command = command_rx.recv() => match command {
        Some(RecorderCommand::Start { session_name, reply }) => {
          let result = if session.is_some() {
            Err(StateError::AlreadyRecording.into())
          } else {
            match open_session(&data_root, format, session_name) {
              Ok(active) => {
                let summary = active.meta.clone();
                session = Some(active);
                Ok(summary)
              }
              Err(err) => Err(err),
            }
          };
          let _ = reply.send(result);
        }
        Some(RecorderCommand::Stop { reply }) => {
          let result = match session.take() {
            Some(mut active) => {
              // Data already queued ahead of the stop belongs to the
              // session.
              drain_pending(&mut data_rx, &mut active);
              finalize_session(&mut active);
              Ok(active.meta)
            }
            None => Err(StateError::NotRecording.into()),
          };
          let _ = reply.send(result);
        }
        None => break,
      },
      item = data_rx.recv() => match item {
        Some(item) => handle_item(&mut session, &item),
        None => break,
      },
      _ = flush_tick.tick() => {
        if let Some(active) = session.as_mut() {
          flush_all(active);
        }
      }
    }
  }
}

/// Apply one pipeline item to the active session, if any.
fn handle_item(session: &mut Option<ActiveSession>, item: &RecordedItem) {
  if let Some(active) = session.as_mut() {
    apply_item(active, item);
  }
}

fn apply_item(active: &mut ActiveSession, item: &RecordedItem) {
  match item {
    RecordedItem::DeviceLost => {
      if !active.device_lost {
        info!("Device lost mid-session, closing current files");
        close_current_files(active);
        active.device_lost = true;
      }
    }
    RecordedItem::DeviceReconnected => {
      if active.device_lost {
        active.device_lost = false;
        active.suffix += 1;
        let at = host_time::host_now() - active.started_host;
        active.meta.reconnects.push(ReconnectNote { at });
        info!(
          "Device back at t+{at:.1}s, resuming with suffix _{}",
          active.suffix
        );
      }
    }
    data => {
      if !active.device_lost {
        write_item(active, data);
      }
    }
  }
}

/// Synchronously consume everything already queued on the data channel.
fn drain_pending(data_rx: &mut mpsc::Receiver<RecordedItem>, active: &mut ActiveSession) {
  while let Ok(item) = data_rx.try_recv() {
    apply_item(active, &item);
  }
}

fn open_session(
  data_root: &Path,
  format: DataFormat,
  session_name: Option<String>,
) -> LinkBandResult<ActiveSession> {
  use linkband_core::errors::RecorderError;

  let now = OffsetDateTime::now_utc();
  let stamp = now
    .format(format_description!(
      "[year][month][day]_[hour][minute][second]"
    ))
    .unwrap_or_default();
  let dir_name = format!("session_{stamp}");
  let directory = data_root.join(&dir_name);
  fs::create_dir_all(&directory).map_err(|err| {
    RecorderError::DirectoryCreateFailed(directory.display().to_string(), err.to_string())
  })?;

  let meta = SessionSummary {
    session_name: session_name.unwrap_or_else(|| dir_name.clone()),
    directory: directory.clone(),
    start_time: now.format(&Rfc3339).unwrap_or_default(),
    end_time: None,
    data_format: format,
    files: Vec::new(),
    errors: Vec::new(),
    reconnects: Vec::new(),
  };
  write_meta(&directory, &meta);
  info!("Recording session {} started at {:?}", meta.session_name, directory);

  Ok(ActiveSession {
    meta,
    files: HashMap::new(),
    finished_files: Vec::new(),
    format,
    suffix: 1,
    started_host: host_time::host_now(),
    device_lost: false,
  })
}

fn write_meta(directory: &Path, meta: &SessionSummary) {
  let json = match serde_json::to_string_pretty(meta) {
    Ok(json) => json,
    Err(err) => {
      error!("Cannot serialize session manifest: {}", err);
      return;
    }
  };
  let tmp = directory.join("meta.json.tmp");
  let target = directory.join("meta.json");
  if let Err(err) = fs::write(&tmp, json).and_then(|_| fs::rename(&tmp, &target)) {
    error!("Cannot write session manifest {:?}: {}", target, err);
    let _ = fs::remove_file(&tmp);
  }
}

fn write_item(active: &mut ActiveSession, item: &RecordedItem) {
  match item {
    RecordedItem::Raw(batch) => {
      for sample in &batch.samples {
        write_record(active, batch.sensor, ChannelKind::Raw, |format, header| match format {
          DataFormat::JsonLines => serde_json::to_string(sample).ok(),
          DataFormat::Csv => Some(if header {
            raw_csv_header(batch.sensor).to_owned()
          } else {
            raw_csv_row(sample)
          }),
        });
      }
    }
    RecordedItem::Processed {
      sensor,
      t_host,
      frame,
    } => {
      write_record(active, *sensor, ChannelKind::Processed, |format, header| match format {
        DataFormat::JsonLines => {
          serde_json::to_string(&serde_json::json!({ "timestamp": t_host, "data": frame })).ok()
        }
        DataFormat::Csv => Some(if header {
          "timestamp,data".to_owned()
        } else {
          format!(
            "{t_host},{}",
            csv_quote(&serde_json::to_string(frame).unwrap_or_default())
          )
        }),
      });
    }
    RecordedItem::DeviceLost | RecordedItem::DeviceReconnected => {}
  }
}

/// Append one line to the right file, opening it on first use and flushing
/// on the record cadence. `line` is called with `header = true` once per
/// CSV file. A failed file is closed, recorded in the manifest, and skipped
/// from then on; the other files keep recording.
fn write_record<F>(active: &mut ActiveSession, sensor: SensorKind, channel: ChannelKind, line: F)
where
  F: Fn(DataFormat, bool) -> Option<String>,
{
  let format = active.format;
  let suffix = active.suffix;
  let directory = active.meta.directory.clone();
  let file = active
    .files
    .entry((sensor, channel))
    .or_insert_with(|| SensorFile::new(&directory, sensor, channel, suffix, format));

  if file.writer.is_none() {
    match File::create(&file.path) {
      Ok(handle) => file.writer = Some(BufWriter::new(handle)),
      Err(err) => {
        let note = format!("{}: create failed: {err}", file.path.display());
        error!("{note}");
        active.meta.errors.push(note);
        write_meta(&directory, &active.meta);
        active.files.remove(&(sensor, channel));
        return;
      }
    }
  }

  let mut failed = false;
  if let Some(writer) = file.writer.as_mut() {
    if format == DataFormat::Csv && !file.wrote_header {
      if let Some(header) = line(format, true) {
        failed |= writeln!(writer, "{header}").is_err();
        file.wrote_header = true;
      }
    }
    if let Some(row) = line(format, false) {
      if writeln!(writer, "{row}").is_err() {
        failed = true;
      } else {
        file.records += 1;
        file.unflushed += 1;
        if file.unflushed >= FLUSH_EVERY_RECORDS {
          let _ = writer.flush();
          file.unflushed = 0;
        }
      }
    }
  }

  if failed {
    let note = format!("{}: write failed", file.path.display());
    error!("{note}");
    let summary = {
      if let Some(mut writer) = file.writer.take() {
        let _ = writer.flush();
      }
      file.summary()
    };
    active.finished_files.push(summary);
    active.files.remove(&(sensor, channel));
    active.meta.errors.push(note);
    write_meta(&directory, &active.meta);
  }
}

fn flush_all(active: &mut ActiveSession) {
  for file in active.files.values_mut() {
    if let Some(writer) = file.writer.as_mut() {
      let _ = writer.flush();
      file.unflushed = 0;
    }
  }
}

/// Flush and close every open file, moving them to the finished list.
fn close_current_files(active: &mut ActiveSession) {
  flush_all(active);
  for (_, mut file) in active.files.drain() {
    if let Some(mut writer) = file.writer.take() {
      let _ = writer.flush();
    }
    if file.records > 0 || file.wrote_header {
      active.finished_files.push(file.summary());
    }
  }
}

fn finalize_session(active: &mut ActiveSession) {
  close_current_files(active);
  active.meta.files = std::mem::take(&mut active.finished_files);
  active.meta.end_time = Some(
    OffsetDateTime::now_utc()
      .format(&Rfc3339)
      .unwrap_or_default(),
  );
  write_meta(&active.meta.directory.clone(), &active.meta);
  info!(
    "Recording session {} finalized: {} files",
    active.meta.session_name,
    active.meta.files.len()
  );
}

fn raw_csv_header(sensor: SensorKind) -> &'static str {
  match sensor {
    SensorKind::Eeg => "t_device,ch1_uV,ch2_uV,leadoff_ch1,leadoff_ch2",
    SensorKind::Ppg => "t_device,red,ir",
    SensorKind::Acc => "t_device,x,y,z",
    SensorKind::Battery => "t_device,level_percent",
  }
}

fn raw_csv_row(sample: &Sample) -> String {
  match sample {
    Sample::Eeg(s) => format!(
      "{},{},{},{},{}",
      s.t_device, s.ch1_uv, s.ch2_uv, s.leadoff_ch1, s.leadoff_ch2
    ),
    Sample::Ppg(s) => format!("{},{},{}", s.t_device, s.red, s.ir),
    Sample::Acc(s) => format!("{},{},{},{}", s.t_device, s.x, s.y, s.z),
    Sample::Battery(s) => format!("{},{}", s.t_device, s.level_percent),
  }
}

/// Quote a cell for CSV, doubling embedded quotes. Arrays and objects are
/// JSON-encoded into a single cell.
fn csv_quote(cell: &str) -> String {
  format!("\"{}\"", cell.replace('"', "\"\""))
}
