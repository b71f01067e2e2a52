// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! End-to-end streaming over the WebSocket bus with a mock device.

mod util;

use linkband_core::sample::SensorKind;
use serde_json::json;
use std::time::Duration;
use tempdir::TempDir;
use util::*;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn raw_stream_preserves_decoder_order_and_values() {
  let dir = TempDir::new("streaming").unwrap();
  let rig = start_rig(dir.path(), 256).await;
  let control = rig.supervisor.control();

  let mut client = ws_connect(rig.addr).await;
  ws_subscribe(&mut client, json!([{ "sensor": "eeg", "kind": "raw" }])).await;

  control.connect(DEVICE_ADDR).await.unwrap();
  control.start_stream().await.unwrap();
  assert!(rig.device.is_notifying());

  for i in 0..20u32 {
    rig.device.send_packet(SensorKind::Eeg, eeg_packet(i * 100, 25));
  }

  let uv_per_count = 4.033 / (12.0 * 8_388_607.0) * 1e6;
  let mut last_t = f64::MIN;
  for packet_index in 0..20 {
    let msg = ws_recv_until(&mut client, RECV_TIMEOUT, |v| v["type"] == "raw_data").await;
    assert_eq!(msg["sensor_type"], "eeg");
    assert_eq!(msg["count"], 25);
    let data = msg["data"].as_array().unwrap();
    assert_eq!(data.len(), 25);
    for (i, sample) in data.iter().enumerate() {
      let t = sample["t_device"].as_f64().unwrap();
      assert!(t >= last_t, "t_device regressed: {t} < {last_t}");
      last_t = t;
      let expected_t = packet_index as f64 * 0.1 + i as f64 * 0.004;
      assert!((t - expected_t).abs() < 1e-9);
      let ch1 = sample["ch1_uV"].as_f64().unwrap();
      let expected_uv = 1000.0 * i as f64 * uv_per_count;
      assert!((ch1 - expected_uv).abs() < 1e-6, "{ch1} vs {expected_uv}");
    }
  }

  rig.supervisor.shutdown().await;
}

#[tokio::test]
async fn battery_passes_through_to_processed_channel() {
  let dir = TempDir::new("battery").unwrap();
  let rig = start_rig(dir.path(), 256).await;
  let control = rig.supervisor.control();

  let mut client = ws_connect(rig.addr).await;
  ws_subscribe(&mut client, json!([{ "sensor": "bat", "kind": "processed" }])).await;

  control.connect(DEVICE_ADDR).await.unwrap();
  control.start_stream().await.unwrap();
  rig.device.send_packet(SensorKind::Battery, battery_packet(87));

  let msg = ws_recv_until(&mut client, RECV_TIMEOUT, |v| v["type"] == "processed_data").await;
  assert_eq!(msg["sensor_type"], "bat");
  assert_eq!(msg["data"]["level_percent"], 87);

  // The 1 Hz stats summary picks the level up as well.
  let stats = ws_recv_until(&mut client, Duration::from_secs(3), |v| {
    v["type"] == "stats" && v["bat_level"] == 87
  })
  .await;
  assert!(stats["clients_connected"].as_u64().unwrap() >= 1);

  rig.supervisor.shutdown().await;
}

#[tokio::test]
async fn unknown_channel_keeps_previous_subscription() {
  let dir = TempDir::new("channels").unwrap();
  let rig = start_rig(dir.path(), 256).await;
  let control = rig.supervisor.control();

  let mut client = ws_connect(rig.addr).await;
  ws_subscribe(&mut client, json!([{ "sensor": "eeg", "kind": "raw" }])).await;

  ws_send(
    &mut client,
    json!({ "command": "subscribe",
            "channels": [{ "sensor": "temperature", "kind": "raw" }] }),
  )
  .await;
  let err = ws_recv_until(&mut client, RECV_TIMEOUT, |v| v["type"] == "error").await;
  assert_eq!(err["code"], "unknown_channel");

  // The earlier EEG subscription still delivers.
  control.connect(DEVICE_ADDR).await.unwrap();
  control.start_stream().await.unwrap();
  rig.device.send_packet(SensorKind::Eeg, eeg_packet(0, 25));
  let msg = ws_recv_until(&mut client, RECV_TIMEOUT, |v| v["type"] == "raw_data").await;
  assert_eq!(msg["sensor_type"], "eeg");

  rig.supervisor.shutdown().await;
}

#[tokio::test]
async fn unknown_command_and_bad_payload_are_typed_errors() {
  let dir = TempDir::new("badcmd").unwrap();
  let rig = start_rig(dir.path(), 256).await;

  let mut client = ws_connect(rig.addr).await;
  ws_send(&mut client, json!({ "command": "reticulate_splines" })).await;
  let err = ws_recv_until(&mut client, RECV_TIMEOUT, |v| v["type"] == "error").await;
  assert_eq!(err["code"], "unknown_command");

  ws_send(&mut client, json!({ "command": "connect_device" })).await;
  let err = ws_recv_until(&mut client, RECV_TIMEOUT, |v| v["type"] == "error").await;
  assert_eq!(err["code"], "bad_payload");

  ws_send(&mut client, json!({ "command": "ping" })).await;
  let pong = ws_recv_until(&mut client, RECV_TIMEOUT, |v| v["type"] == "event").await;
  assert_eq!(pong["event_type"], "pong");

  rig.supervisor.shutdown().await;
}

#[tokio::test]
async fn scan_command_replies_with_devices() {
  let dir = TempDir::new("scan").unwrap();
  let rig = start_rig(dir.path(), 256).await;

  let mut client = ws_connect(rig.addr).await;
  ws_send(&mut client, json!({ "command": "scan_devices", "timeout_s": 0.05 })).await;
  let reply = ws_recv_until(&mut client, RECV_TIMEOUT, |v| {
    v["type"] == "event" && v["event_type"] == "scan_result"
  })
  .await;
  let devices = reply["data"]["devices"].as_array().unwrap();
  assert_eq!(devices.len(), 1);
  assert_eq!(devices[0]["address"], DEVICE_ADDR);
  assert_eq!(devices[0]["name"], "LXB-2F3A");

  rig.supervisor.shutdown().await;
}
