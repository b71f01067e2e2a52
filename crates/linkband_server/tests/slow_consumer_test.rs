// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Back-pressure: a subscriber that stops reading is evicted with
//! `slow_consumer` while healthy subscribers keep receiving.

mod util;

use futures::StreamExt;
use linkband_core::sample::SensorKind;
use serde_json::json;
use std::time::Duration;
use tempdir::TempDir;
use util::*;

#[tokio::test]
async fn slow_consumer_is_evicted_without_hurting_others() {
  let dir = TempDir::new("slow").unwrap();
  // A small queue so saturation sets in quickly once the socket jams.
  let rig = start_rig(dir.path(), 16).await;
  let control = rig.supervisor.control();

  let mut slow = ws_connect(rig.addr).await;
  ws_subscribe(&mut slow, json!([{ "sensor": "eeg", "kind": "raw" }])).await;
  let mut healthy = ws_connect(rig.addr).await;
  ws_subscribe(&mut healthy, json!([{ "sensor": "eeg", "kind": "raw" }])).await;

  control.connect(DEVICE_ADDR).await.unwrap();
  control.start_stream().await.unwrap();
  assert_eq!(control.status().await.unwrap().clients_connected, 2);

  // Push raw EEG hard while the slow client reads nothing. The healthy
  // client drains concurrently. The slow client's TCP window fills, its
  // queue saturates, and after the 2 s grace it must be terminated.
  let device = rig.device.clone();
  let feeder = tokio::spawn(async move {
    for i in 0..2000u32 {
      // Large packets fill socket buffers faster.
      device.send_packet(SensorKind::Eeg, eeg_packet(i * 400, 100));
      tokio::time::sleep(Duration::from_millis(2)).await;
    }
  });

  let mut healthy_raw = 0usize;
  let mut dropped_seen = false;
  let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
  loop {
    assert!(
      tokio::time::Instant::now() < deadline,
      "slow consumer was never evicted"
    );
    let msg = ws_recv_json(&mut healthy, Duration::from_secs(5)).await;
    if msg["type"] == "raw_data" {
      healthy_raw += 1;
    }
    if msg["type"] == "stats" {
      if msg["dropped_messages"].as_u64().unwrap_or(0) > 0 {
        dropped_seen = true;
      }
      if msg["clients_connected"] == 1 {
        break;
      }
    }
  }
  assert!(dropped_seen, "drop counter surfaced through stats");
  assert!(healthy_raw > 50, "healthy subscriber kept receiving");

  // The slow client's connection ends once it reads through the backlog.
  // The closing `slow_consumer` error frame is best effort: its socket was
  // jammed when the termination fired, so only the stream end is asserted.
  let drain = tokio::time::timeout(Duration::from_secs(10), async {
    while let Some(frame) = slow.next().await {
      if frame.is_err() {
        break;
      }
    }
  })
  .await;
  assert!(drain.is_ok(), "slow client stream should end");

  // Healthy client still lives.
  let msg = ws_recv_until(&mut healthy, Duration::from_secs(5), |v| {
    v["type"] == "raw_data" || v["type"] == "stats"
  })
  .await;
  assert!(msg["type"].is_string());

  feeder.abort();
  rig.supervisor.shutdown().await;
}
