// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The WebSocket stream bus.
//!
//! One accept loop hands each connection to its own task; one broadcast task
//! per sensor and channel kind drains the decoder/processor output in
//! production order, so per-sensor delivery order equals decode order.
//! Subscriber queues absorb short stalls; the eviction and slow-consumer
//! policies live in [subscription].
//!
//! Commands arriving on a connection are parsed into
//! [linkband_core::message::ClientCommand] and dispatched to the control
//! surface; replies come back as typed events on the same connection.

mod subscription;

pub use subscription::{SLOW_CONSUMER_GRACE, Subscription};

use crate::control::ControlSurface;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use linkband_core::{
  config::ServerConfig,
  message::{ClientCommand, ErrorCode, EventType, ServerMessage, StreamStats},
  sample::{ProcessedFrame, SampleBatch, SensorKind},
  util::{async_manager, time},
};
use serde_json::json;
use std::{
  collections::HashMap,
  net::SocketAddr,
  sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
  },
  time::{Duration, Instant},
};
use tokio::{
  net::{TcpListener, TcpStream},
  sync::mpsc,
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

const DRAIN_BATCH: usize = 64;
const BROADCAST_CHANNEL_DEPTH: usize = 1024;
const ERROR_EVENT_INTERVAL: Duration = Duration::from_secs(60);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// A processed frame on its way to subscribers.
#[derive(Debug, Clone)]
pub struct ProcessedMsg {
  pub sensor: SensorKind,
  pub t_host: f64,
  pub frame: ProcessedFrame,
}

struct BusInner {
  subscribers: DashMap<u64, Arc<Subscription>>,
  next_id: AtomicU64,
  queue_depth: usize,
  max_subscribers: usize,
  control: ControlSurface,
  cancel: CancellationToken,
  accept_cancel: CancellationToken,
  /// Drops accumulated by subscribers that have already disconnected.
  retired_drops: AtomicU64,
  error_last_seen: Mutex<HashMap<String, Instant>>,
}

impl BusInner {
  fn dropped_total(&self) -> u64 {
    let live: u64 = self.subscribers.iter().map(|s| s.dropped()).sum();
    live + self.retired_drops.load(Ordering::Relaxed)
  }

  /// Deliver to every interested subscriber and enforce the slow-consumer
  /// policy. Queue pushes never block.
  fn fan_out(&self, message: &ServerMessage) {
    for entry in self.subscribers.iter() {
      let sub = entry.value();
      if !sub.wants(message) {
        continue;
      }
      sub.push(message.clone());
      if let Some(saturated) = sub.saturated_for()
        && saturated > SLOW_CONSUMER_GRACE
      {
        warn!(
          "Subscriber {} queue saturated for {:?}, disconnecting slow consumer",
          sub.id(),
          saturated
        );
        sub.close(ErrorCode::SlowConsumer);
      }
    }
  }
}

/// Cloneable producer-side handle onto the bus.
#[derive(Clone)]
pub struct BusHandle {
  inner: Arc<BusInner>,
  raw: [mpsc::Sender<SampleBatch>; 4],
  processed: [mpsc::Sender<ProcessedMsg>; 4],
}

fn sensor_slot(sensor: SensorKind) -> usize {
  match sensor {
    SensorKind::Eeg => 0,
    SensorKind::Ppg => 1,
    SensorKind::Acc => 2,
    SensorKind::Battery => 3,
  }
}

impl BusHandle {
  /// Enqueue a raw batch for broadcast. Awaiting keeps per-sensor FIFO
  /// order from the decoder through the broadcast task.
  pub async fn publish_raw(&self, batch: SampleBatch) {
    if self.raw[sensor_slot(batch.sensor)].send(batch).await.is_err() {
      debug!("Raw broadcast task gone, dropping batch");
    }
  }

  pub async fn publish_processed(&self, sensor: SensorKind, t_host: f64, frame: ProcessedFrame) {
    let msg = ProcessedMsg {
      sensor,
      t_host,
      frame,
    };
    if self.processed[sensor_slot(sensor)].send(msg).await.is_err() {
      debug!("Processed broadcast task gone, dropping frame");
    }
  }

  /// Broadcast an event to every subscriber immediately.
  pub fn broadcast_event(&self, event_type: EventType, data: serde_json::Value) {
    self.inner.fan_out(&ServerMessage::event(event_type, data));
  }

  pub fn broadcast_stats(&self, mut stats: StreamStats) {
    stats.clients_connected = self.clients_connected();
    stats.dropped_messages = self.inner.dropped_total();
    self.inner.fan_out(&ServerMessage::Stats {
      timestamp: time::host_now(),
      stats,
    });
  }

  /// Rate-limited error event: at most one broadcast per error kind per
  /// minute; the rest only count in the monitor.
  pub fn error_event(&self, kind: &str, message: impl Into<String>) {
    let should_send = {
      let mut seen = self
        .inner
        .error_last_seen
        .lock()
        .expect("bus error limiter poisoned");
      match seen.get(kind) {
        Some(last) if last.elapsed() < ERROR_EVENT_INTERVAL => false,
        _ => {
          seen.insert(kind.to_owned(), Instant::now());
          true
        }
      }
    };
    if should_send {
      self.broadcast_event(
        EventType::Error,
        json!({ "error_type": kind, "message": message.into() }),
      );
    }
  }

  pub fn clients_connected(&self) -> usize {
    self.inner.subscribers.len()
  }

  pub fn dropped_total(&self) -> u64 {
    self.inner.dropped_total()
  }

  /// Stop accepting new subscriptions (shutdown step 1).
  pub fn stop_accepting(&self) {
    self.inner.accept_cancel.cancel();
  }
}

/// The running WebSocket server.
pub struct StreamBus {
  handle: BusHandle,
  local_addr: SocketAddr,
}

impl StreamBus {
  /// Bind the listener and spawn the accept and broadcast tasks. Tasks stop
  /// when `cancel` fires.
  pub async fn start(
    config: &ServerConfig,
    control: ControlSurface,
    cancel: CancellationToken,
  ) -> std::io::Result<Self> {
    let listener = TcpListener::bind((config.ws_host().as_str(), config.ws_port())).await?;
    let local_addr = listener.local_addr()?;
    info!("Stream bus listening on ws://{}", local_addr);

    let inner = Arc::new(BusInner {
      subscribers: DashMap::new(),
      next_id: AtomicU64::new(1),
      queue_depth: config.subscriber_queue_depth(),
      max_subscribers: config.max_subscribers(),
      control,
      cancel: cancel.clone(),
      accept_cancel: cancel.child_token(),
      retired_drops: AtomicU64::new(0),
      error_last_seen: Mutex::new(HashMap::new()),
    });

    let mut raw_senders = Vec::with_capacity(4);
    let mut processed_senders = Vec::with_capacity(4);
    for _ in 0..4 {
      let (raw_tx, raw_rx) = mpsc::channel::<SampleBatch>(BROADCAST_CHANNEL_DEPTH);
      let (proc_tx, proc_rx) = mpsc::channel::<ProcessedMsg>(BROADCAST_CHANNEL_DEPTH);
      raw_senders.push(raw_tx);
      processed_senders.push(proc_tx);
      async_manager::spawn(raw_broadcast_task(inner.clone(), raw_rx));
      async_manager::spawn(processed_broadcast_task(inner.clone(), proc_rx));
    }

    async_manager::spawn(accept_loop(inner.clone(), listener));

    let handle = BusHandle {
      inner,
      raw: raw_senders
        .try_into()
        .unwrap_or_else(|_| unreachable!("exactly four raw senders")),
      processed: processed_senders
        .try_into()
        .unwrap_or_else(|_| unreachable!("exactly four processed senders")),
    };
    Ok(Self { handle, local_addr })
  }

  pub fn handle(&self) -> BusHandle {
    self.handle.clone()
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }
}

async fn raw_broadcast_task(inner: Arc<BusInner>, mut rx: mpsc::Receiver<SampleBatch>) {
  loop {
    tokio::select! {
      _ = inner.cancel.cancelled() => break,
      batch = rx.recv() => match batch {
        Some(batch) => {
          let message = ServerMessage::RawData {
            sensor_type: batch.sensor,
            timestamp: batch.t_host,
            count: batch.samples.len(),
            data: batch.samples,
          };
          inner.fan_out(&message);
        }
        None => break,
      },
    }
  }
}

async fn processed_broadcast_task(inner: Arc<BusInner>, mut rx: mpsc::Receiver<ProcessedMsg>) {
  loop {
    tokio::select! {
      _ = inner.cancel.cancelled() => break,
      msg = rx.recv() => match msg {
        Some(msg) => {
          let message = ServerMessage::ProcessedData {
            sensor_type: msg.sensor,
            timestamp: msg.t_host,
            data: msg.frame,
          };
          inner.fan_out(&message);
        }
        None => break,
      },
    }
  }
}

async fn accept_loop(inner: Arc<BusInner>, listener: TcpListener) {
  loop {
    tokio::select! {
      _ = inner.accept_cancel.cancelled() => {
        debug!("Stream bus no longer accepting subscriptions");
        break;
      }
      accepted = listener.accept() => {
        let (stream, peer) = match accepted {
          Ok(pair) => pair,
          Err(err) => {
            error!("Stream bus accept error: {}", err);
            continue;
          }
        };
        let ws_stream = match accept_async(stream).await {
          Ok(ws) => ws,
          Err(err) => {
            error!("WebSocket handshake with {} failed: {}", peer, err);
            continue;
          }
        };
        if inner.subscribers.len() >= inner.max_subscribers {
          warn!("Subscriber limit reached, rejecting {}", peer);
          async_manager::spawn(reject_connection(ws_stream));
          continue;
        }
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Arc::new(Subscription::new(
          id,
          inner.queue_depth,
          inner.cancel.child_token(),
        ));
        inner.subscribers.insert(id, sub.clone());
        info!("Subscriber {} connected from {}", id, peer);
        async_manager::spawn(run_connection(inner.clone(), sub, ws_stream));
      }
    }
  }
}

async fn reject_connection(ws_stream: WebSocketStream<TcpStream>) {
  let (mut sink, _) = ws_stream.split();
  let message = ServerMessage::error(ErrorCode::CommandFailed, "subscriber limit reached");
  if let Ok(json) = serde_json::to_string(&message) {
    let _ = sink.send(Message::text(json)).await;
  }
  let _ = sink.send(Message::Close(None)).await;
}

/// Send one frame, aborting if the subscription is cancelled mid-write so a
/// stalled socket cannot wedge the connection task.
async fn send_or_cancel(
  sink: &mut WsSink,
  message: Message,
  cancel: &CancellationToken,
) -> Result<(), ()> {
  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(()),
    result = sink.send(message) => result.map_err(|_| ()),
  }
}

async fn run_connection(
  inner: Arc<BusInner>,
  sub: Arc<Subscription>,
  ws_stream: WebSocketStream<TcpStream>,
) {
  let (mut sink, mut stream) = ws_stream.split();
  let cancel = sub.cancel_token().clone();

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      incoming = stream.next() => match incoming {
        Some(Ok(Message::Text(text))) => handle_text(&inner, &sub, text.as_str()),
        Some(Ok(Message::Ping(payload))) => {
          if send_or_cancel(&mut sink, Message::Pong(payload), &cancel).await.is_err() {
            break;
          }
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Ok(_)) => {}
        Some(Err(err)) => {
          debug!("Subscriber {} socket error: {}", sub.id(), err);
          break;
        }
      },
      _ = sub.wait() => {
        if !flush_queue(&sub, &mut sink, &cancel).await {
          break;
        }
      }
    }
  }

  // Closing handshake: a termination code becomes a final error frame.
  if let Some(code) = sub.close_code() {
    let message = ServerMessage::error(code, format!("subscription terminated: {code}"));
    if let Ok(json) = serde_json::to_string(&message) {
      let _ = tokio::time::timeout(Duration::from_secs(1), sink.send(Message::text(json))).await;
    }
  }
  let _ = tokio::time::timeout(Duration::from_secs(1), sink.send(Message::Close(None))).await;

  inner
    .retired_drops
    .fetch_add(sub.dropped(), Ordering::Relaxed);
  inner.subscribers.remove(&sub.id());
  info!("Subscriber {} disconnected", sub.id());
}

/// Write out everything currently queued. Returns false when the connection
/// should be torn down.
async fn flush_queue(
  sub: &Arc<Subscription>,
  sink: &mut WsSink,
  cancel: &CancellationToken,
) -> bool {
  loop {
    let pending = sub.drain(DRAIN_BATCH);
    if pending.is_empty() {
      return true;
    }
    for message in pending {
      let json = match serde_json::to_string(&message) {
        Ok(json) => json,
        Err(err) => {
          error!("Cannot serialize bus message for subscriber {}: {}", sub.id(), err);
          continue;
        }
      };
      if send_or_cancel(sink, Message::text(json), cancel).await.is_err() {
        debug!("Subscriber {} write failed or cancelled", sub.id());
        return false;
      }
    }
  }
}

const KNOWN_COMMANDS: [&str; 12] = [
  "subscribe",
  "unsubscribe",
  "health_check",
  "check_device_connection",
  "scan_devices",
  "connect_device",
  "disconnect_device",
  "start_streaming",
  "stop_streaming",
  "start_recording",
  "stop_recording",
  "ping",
];

/// Parse and dispatch one client text frame. Fast commands (subscribe,
/// ping) are answered inline; control verbs run in their own task so a long
/// scan can't stall this connection's writer.
fn handle_text(inner: &Arc<BusInner>, sub: &Arc<Subscription>, text: &str) {
  let value: serde_json::Value = match serde_json::from_str(text) {
    Ok(value) => value,
    Err(err) => {
      sub.push(ServerMessage::error(
        ErrorCode::BadPayload,
        format!("invalid JSON: {err}"),
      ));
      return;
    }
  };
  let command = value
    .get("command")
    .and_then(serde_json::Value::as_str)
    .unwrap_or_default()
    .to_owned();
  if !KNOWN_COMMANDS.contains(&command.as_str()) {
    sub.push(ServerMessage::error(
      ErrorCode::UnknownCommand,
      format!("unknown command {command:?}"),
    ));
    return;
  }

  let parsed: ClientCommand = match serde_json::from_value(value) {
    Ok(parsed) => parsed,
    Err(err) => {
      // A well-named subscribe with a bad channel list keeps the previous
      // subscription state and reports the channel, not the payload.
      let code = if command == "subscribe" || command == "unsubscribe" {
        ErrorCode::UnknownChannel
      } else {
        ErrorCode::BadPayload
      };
      sub.push(ServerMessage::error(code, err.to_string()));
      return;
    }
  };

  match parsed {
    ClientCommand::Subscribe { channels } => {
      sub.add_channels(&channels);
      sub.push(ServerMessage::Subscribed {
        channels: sub.channels(),
      });
    }
    ClientCommand::Unsubscribe { channels } => {
      sub.remove_channels(&channels);
      sub.push(ServerMessage::Subscribed {
        channels: sub.channels(),
      });
    }
    ClientCommand::Ping => {
      sub.push(ServerMessage::event(
        EventType::Pong,
        json!({ "timestamp": time::host_now() }),
      ));
    }
    verb => {
      let inner = inner.clone();
      let sub = sub.clone();
      async_manager::spawn(async move {
        let reply = execute_verb(&inner.control, verb).await;
        sub.push(reply);
      });
    }
  }
}

/// Run one control verb and shape its typed reply event.
async fn execute_verb(control: &ControlSurface, verb: ClientCommand) -> ServerMessage {
  use linkband_core::errors::{LinkBandError, TransportError};

  fn failure(err: LinkBandError) -> ServerMessage {
    match err {
      LinkBandError::Transport(TransportError::Timeout(what)) => {
        ServerMessage::error(ErrorCode::Timeout, format!("timed out: {what}"))
      }
      other => ServerMessage::error(ErrorCode::CommandFailed, other.to_string()),
    }
  }

  match verb {
    ClientCommand::HealthCheck => match control.health_check().await {
      Ok(snapshot) => ServerMessage::event(
        EventType::HealthCheck,
        serde_json::to_value(&snapshot).unwrap_or_default(),
      ),
      Err(err) => failure(err),
    },
    ClientCommand::CheckDeviceConnection => match control.status().await {
      Ok(status) => ServerMessage::event(
        EventType::DeviceStatus,
        serde_json::to_value(&status).unwrap_or_default(),
      ),
      Err(err) => failure(err),
    },
    ClientCommand::ScanDevices { timeout_s } => match control.scan(timeout_s).await {
      Ok(devices) => ServerMessage::event(
        EventType::ScanResult,
        json!({ "status": "success", "devices": devices }),
      ),
      Err(err) => failure(err),
    },
    ClientCommand::ConnectDevice { address } => match control.connect(&address).await {
      Ok(()) => ServerMessage::event(
        EventType::DeviceConnected,
        json!({ "status": "success", "address": address }),
      ),
      Err(err) => failure(err),
    },
    ClientCommand::DisconnectDevice => match control.disconnect().await {
      Ok(()) => ServerMessage::event(
        EventType::DeviceDisconnected,
        json!({ "status": "success" }),
      ),
      Err(err) => failure(err),
    },
    ClientCommand::StartStreaming => match control.start_stream().await {
      Ok(ack) => ServerMessage::event(
        EventType::StreamStarted,
        json!({ "status": "success", "already_running": ack.already_running }),
      ),
      Err(err) => failure(err),
    },
    ClientCommand::StopStreaming => match control.stop_stream().await {
      Ok(ack) => ServerMessage::event(
        EventType::StreamStopped,
        json!({ "status": "success", "already_stopped": ack.already_stopped }),
      ),
      Err(err) => failure(err),
    },
    ClientCommand::StartRecording { session_name } => {
      match control.start_recording(session_name).await {
        Ok(session) => ServerMessage::event(
          EventType::RecordingStarted,
          serde_json::to_value(&session).unwrap_or_default(),
        ),
        Err(err) => failure(err),
      }
    }
    ClientCommand::StopRecording => match control.stop_recording().await {
      Ok(session) => ServerMessage::event(
        EventType::RecordingStopped,
        serde_json::to_value(&session).unwrap_or_default(),
      ),
      Err(err) => failure(err),
    },
    // Handled inline by the connection task.
    ClientCommand::Subscribe { .. } | ClientCommand::Unsubscribe { .. } | ClientCommand::Ping => {
      ServerMessage::error(ErrorCode::UnknownCommand, "not a control verb")
    }
  }
}
