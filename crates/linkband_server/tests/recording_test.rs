// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Session recorder integration: manifest/file agreement and the
//! device-loss / resume path.

mod util;

use linkband_core::sample::SensorKind;
use linkband_server::recorder::SessionSummary;
use std::{fs, time::Duration};
use tempdir::TempDir;
use util::*;

fn records_of<'a>(summary: &'a SessionSummary, name: &str) -> &'a linkband_server::recorder::FileSummary {
  summary
    .files
    .iter()
    .find(|f| f.path == name)
    .unwrap_or_else(|| panic!("file {name} missing from manifest: {:?}", summary.files))
}

fn line_count(summary: &SessionSummary, name: &str) -> usize {
  fs::read_to_string(summary.directory.join(name))
    .unwrap()
    .lines()
    .count()
}

#[tokio::test]
async fn session_manifest_matches_files_on_disk() {
  let dir = TempDir::new("recording").unwrap();
  let rig = start_rig(dir.path(), 256).await;
  let control = rig.supervisor.control();

  control.connect(DEVICE_ADDR).await.unwrap();
  control.start_stream().await.unwrap();
  let session = control.start_recording(Some("s4".to_owned())).await.unwrap();
  assert_eq!(session.session_name, "s4");

  // Ten seconds of data, fed fast: 2500 EEG, 500 PPG, 300 ACC, 10 BAT.
  for i in 0..100u32 {
    rig.device.send_packet(SensorKind::Eeg, eeg_packet(i * 100, 25));
  }
  for i in 0..20u32 {
    rig.device.send_packet(SensorKind::Ppg, ppg_packet(i * 500, 25));
  }
  for i in 0..15u32 {
    rig.device.send_packet(SensorKind::Acc, acc_packet(i * 667, 20));
  }
  for level in 0..10u8 {
    rig.device.send_packet(SensorKind::Battery, battery_packet(90 - level));
  }
  // Let the pipeline drain before stopping.
  tokio::time::sleep(Duration::from_secs(1)).await;

  let done = control.stop_recording().await.unwrap();
  assert!(done.end_time.is_some());

  assert_eq!(records_of(&done, "eeg_raw.jsonl").records, 2500);
  assert_eq!(records_of(&done, "ppg_raw.jsonl").records, 500);
  assert_eq!(records_of(&done, "acc_raw.jsonl").records, 300);
  assert_eq!(records_of(&done, "bat_raw.jsonl").records, 10);

  // Manifest record counts equal physical line counts.
  for file in &done.files {
    assert_eq!(
      line_count(&done, &file.path),
      file.records as usize,
      "line count mismatch for {}",
      file.path
    );
    assert!(file.bytes > 0);
  }

  // Stopping again is a typed error, and nothing is appended afterwards.
  assert!(control.stop_recording().await.is_err());
  let eeg_lines = line_count(&done, "eeg_raw.jsonl");
  rig.device.send_packet(SensorKind::Eeg, eeg_packet(20_000, 25));
  tokio::time::sleep(Duration::from_millis(300)).await;
  assert_eq!(line_count(&done, "eeg_raw.jsonl"), eeg_lines);

  rig.supervisor.shutdown().await;
}

#[tokio::test]
async fn device_loss_splits_session_into_suffixed_files() {
  let dir = TempDir::new("reconnect").unwrap();
  let rig = start_rig(dir.path(), 256).await;
  let control = rig.supervisor.control();

  control.connect(DEVICE_ADDR).await.unwrap();
  control.start_stream().await.unwrap();
  control.start_recording(None).await.unwrap();

  for i in 0..50u32 {
    rig.device.send_packet(SensorKind::Eeg, eeg_packet(i * 100, 25));
  }
  tokio::time::sleep(Duration::from_millis(500)).await;

  rig.device.send_disconnect();
  // The supervisor retries after 1 s; wait for notifications to resume.
  let mut waited = Duration::ZERO;
  while !rig.device.is_notifying() && waited < Duration::from_secs(5) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    waited += Duration::from_millis(100);
  }
  assert!(rig.device.is_notifying(), "device did not reconnect");

  for i in 80..130u32 {
    rig.device.send_packet(SensorKind::Eeg, eeg_packet(i * 100, 25));
  }
  tokio::time::sleep(Duration::from_millis(500)).await;

  let done = control.stop_recording().await.unwrap();
  assert_eq!(done.reconnects.len(), 1);
  assert!(done.reconnects[0].at > 0.0);

  let first = records_of(&done, "eeg_raw.jsonl");
  let second = records_of(&done, "eeg_raw_2.jsonl");
  assert_eq!(first.records, 1250);
  assert_eq!(second.records, 1250);

  // No t_device overlap across the split.
  let read_last_t = |name: &str| {
    let contents = fs::read_to_string(done.directory.join(name)).unwrap();
    let line = contents.lines().last().unwrap().to_owned();
    serde_json::from_str::<serde_json::Value>(&line).unwrap()["t_device"]
      .as_f64()
      .unwrap()
  };
  let read_first_t = |name: &str| {
    let contents = fs::read_to_string(done.directory.join(name)).unwrap();
    let line = contents.lines().next().unwrap().to_owned();
    serde_json::from_str::<serde_json::Value>(&line).unwrap()["t_device"]
      .as_f64()
      .unwrap()
  };
  assert!(read_last_t("eeg_raw.jsonl") < read_first_t("eeg_raw_2.jsonl"));

  rig.supervisor.shutdown().await;
}

#[tokio::test]
async fn recording_requires_streaming() {
  let dir = TempDir::new("gate").unwrap();
  let rig = start_rig(dir.path(), 256).await;
  let control = rig.supervisor.control();

  // Not connected at all.
  assert!(control.start_recording(None).await.is_err());

  // Connected but not streaming.
  control.connect(DEVICE_ADDR).await.unwrap();
  assert!(control.start_recording(None).await.is_err());

  control.start_stream().await.unwrap();
  control.start_recording(None).await.unwrap();
  assert!(control.start_recording(None).await.is_err(), "double start");
  control.stop_recording().await.unwrap();

  rig.supervisor.shutdown().await;
}
