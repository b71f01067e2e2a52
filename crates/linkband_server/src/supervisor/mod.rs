// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The supervisor: owner of every component lifecycle.
//!
//! One actor task processes control verbs strictly in order, so concurrent
//! callers (WebSocket clients, the REST layer) observe a consistent state
//! machine: `Uninitialized → Initialized → Streaming → Stopping →
//! Initialized`. Start/stop transitions are idempotent and report
//! `already_running` / `already_stopped` instead of failing.
//!
//! The supervisor also owns the recovery policies: worker tasks restart
//! under the budget in [restart]; a lost device gets up to five reconnect
//! attempts with 1–10 s back-off, resuming streaming and recording (with
//! suffixed files) when the device returns.

mod pipeline;
mod restart;

use crate::{
  buffer::SharedBuffers,
  bus::{BusHandle, StreamBus},
  control::{ControlRequest, ControlSurface, StatusSnapshot, StreamAck},
  device::{HardwareEvent, HardwareManager, SensorHardware},
  monitor::StreamingMonitor,
  recorder::{RecorderHandle, spawn_recorder},
  registry::DeviceRegistry,
};
use displaydoc::Display;
use linkband_core::{
  config::ServerConfig,
  errors::{LinkBandError, LinkBandResult, StateError, TransportError},
  message::{EventType, StreamStats},
  sample::DeviceDescriptor,
  util::{async_manager, time},
};
use pipeline::{BATTERY_UNKNOWN, Pipeline, PipelineContext, spawn_pipeline};
use serde_json::json;
use std::{
  net::SocketAddr,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, Ordering},
  },
  time::Duration,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const CONTROL_QUEUE_DEPTH: usize = 32;
const RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_BACKOFF_MIN: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(10);
/// Grace for in-flight packets between "notifications stopped" and
/// "decoders cancelled"; well under the 2 s drain deadline.
const PIPELINE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Errors surfaced while bringing the supervisor up.
#[derive(Debug, Error, Display)]
pub enum SupervisorStartError {
  /// No hardware manager configured
  MissingHardwareManager,
  /// Cannot bind stream bus: {0}
  BindFailed(String),
}

#[derive(Default)]
pub struct SupervisorBuilder {
  config: ServerConfig,
  hardware: Option<Arc<dyn HardwareManager>>,
}

impl SupervisorBuilder {
  pub fn new(config: ServerConfig) -> Self {
    Self {
      config,
      hardware: None,
    }
  }

  pub fn hardware_manager(&mut self, manager: Arc<dyn HardwareManager>) -> &mut Self {
    self.hardware = Some(manager);
    self
  }

  /// Bind the stream bus, spawn the recorder, stats tick and command actor,
  /// and hand back the running supervisor.
  pub async fn start(&mut self) -> Result<Supervisor, SupervisorStartError> {
    let hardware = self
      .hardware
      .take()
      .ok_or(SupervisorStartError::MissingHardwareManager)?;
    let config = self.config.clone();
    let cancel = CancellationToken::new();

    let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
    let control = ControlSurface::new(
      control_tx,
      Duration::from_secs_f64(config.command_timeout_s()),
    );

    let bus = StreamBus::start(&config, control.clone(), cancel.clone())
      .await
      .map_err(|err| SupervisorStartError::BindFailed(err.to_string()))?;
    let bus_addr = bus.local_addr();
    let bus_handle = bus.handle();

    let registry = Arc::new(DeviceRegistry::open(config.registry_file().clone()));
    let monitor = Arc::new(StreamingMonitor::default());
    let buffers = Arc::new(SharedBuffers::new(&config));
    let recorder = spawn_recorder(
      config.data_root().clone(),
      config.data_format(),
      cancel.child_token(),
    );

    let battery_level = Arc::new(AtomicU8::new(BATTERY_UNKNOWN));
    let streaming_flag = Arc::new(AtomicBool::new(false));

    async_manager::spawn(run_stats_tick(
      monitor.clone(),
      bus_handle.clone(),
      battery_level.clone(),
      streaming_flag.clone(),
      cancel.clone(),
    ));

    let actor = Actor {
      config,
      hardware,
      registry: registry.clone(),
      monitor,
      buffers,
      bus: bus_handle,
      recorder,
      battery_level,
      streaming_flag,
      control: control.clone(),
      cancel: cancel.clone(),
      device: None,
      pipeline: None,
      lifecycle: Lifecycle::Initialized,
      recording: false,
      watcher_cancel: None,
    };
    async_manager::spawn(actor.run(control_rx));

    info!("Supervisor initialized, stream bus at ws://{}", bus_addr);
    Ok(Supervisor {
      control,
      bus_addr,
      cancel,
      registry,
    })
  }
}

/// Handle onto a running supervisor.
pub struct Supervisor {
  control: ControlSurface,
  bus_addr: SocketAddr,
  cancel: CancellationToken,
  registry: Arc<DeviceRegistry>,
}

impl Supervisor {
  pub fn control(&self) -> ControlSurface {
    self.control.clone()
  }

  pub fn bus_addr(&self) -> SocketAddr {
    self.bus_addr
  }

  pub fn registry(&self) -> Arc<DeviceRegistry> {
    self.registry.clone()
  }

  /// Run the ordered shutdown sequence and stop every task.
  pub async fn shutdown(&self) {
    self.control.shutdown().await;
  }

  /// Resolves when the supervisor has fully stopped.
  pub async fn stopped(&self) {
    self.cancel.cancelled().await;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
  Initialized,
  Streaming,
}

struct ActiveDevice {
  hardware: Arc<dyn SensorHardware>,
  address: String,
  name: String,
}

struct Actor {
  config: ServerConfig,
  hardware: Arc<dyn HardwareManager>,
  registry: Arc<DeviceRegistry>,
  monitor: Arc<StreamingMonitor>,
  buffers: Arc<SharedBuffers>,
  bus: BusHandle,
  recorder: RecorderHandle,
  battery_level: Arc<AtomicU8>,
  streaming_flag: Arc<AtomicBool>,
  control: ControlSurface,
  cancel: CancellationToken,
  device: Option<ActiveDevice>,
  pipeline: Option<Pipeline>,
  lifecycle: Lifecycle,
  recording: bool,
  watcher_cancel: Option<CancellationToken>,
}

impl Actor {
  async fn run(mut self, mut requests: mpsc::Receiver<ControlRequest>) {
    loop {
      let request = tokio::select! {
        _ = self.cancel.cancelled() => break,
        request = requests.recv() => match request {
          Some(request) => request,
          None => break,
        },
      };
      match request {
        ControlRequest::Scan { timeout_s, reply } => {
          let _ = reply.send(self.handle_scan(timeout_s).await);
        }
        ControlRequest::Connect { address, reply } => {
          let _ = reply.send(self.handle_connect(address).await);
        }
        ControlRequest::Disconnect { reply } => {
          let _ = reply.send(self.handle_disconnect().await);
        }
        ControlRequest::Status { reply } => {
          let _ = reply.send(self.handle_status());
        }
        ControlRequest::StartStream { reply } => {
          let _ = reply.send(self.handle_start_stream().await);
        }
        ControlRequest::StopStream { reply } => {
          let _ = reply.send(self.handle_stop_stream().await);
        }
        ControlRequest::StartRecording {
          session_name,
          reply,
        } => {
          let _ = reply.send(self.handle_start_recording(session_name).await);
        }
        ControlRequest::StopRecording { reply } => {
          let _ = reply.send(self.handle_stop_recording().await);
        }
        ControlRequest::HealthCheck { reply } => {
          let _ = reply.send(
            self
              .monitor
              .snapshot(self.streaming_flag.load(Ordering::Relaxed)),
          );
        }
        ControlRequest::DeviceLost { address } => {
          self.handle_device_lost(address).await;
        }
        ControlRequest::ReconnectFailed { address } => {
          self.handle_reconnect_failed(address);
        }
        ControlRequest::Shutdown { reply } => {
          self.do_shutdown().await;
          let _ = reply.send(());
          break;
        }
      }
    }
    self.cancel.cancel();
    info!("Supervisor actor exited");
  }

  async fn handle_scan(
    &mut self,
    timeout_s: Option<f64>,
  ) -> Result<Vec<DeviceDescriptor>, TransportError> {
    let timeout = Duration::from_secs_f64(timeout_s.unwrap_or(self.config.scan_timeout_s()));
    let devices = self.hardware.scan(timeout).await?;
    info!("Scan finished, {} Link Band devices visible", devices.len());
    self
      .bus
      .broadcast_event(EventType::ScanResult, json!({ "devices": devices }));
    Ok(devices)
  }

  async fn handle_connect(&mut self, address: String) -> LinkBandResult<()> {
    if let Some(active) = &self.device {
      return Err(TransportError::AlreadyConnected(active.address.clone()).into());
    }
    let timeout = Duration::from_secs_f64(self.config.connect_timeout_s());
    let hardware = match self.hardware.connect(&address, timeout).await {
      Ok(hardware) => hardware,
      Err(err) => {
        self.bus.broadcast_event(
          EventType::DeviceConnectionFailed,
          json!({ "address": address, "message": err.to_string() }),
        );
        return Err(err.into());
      }
    };
    let name = hardware.name().to_owned();

    let watcher_cancel = self.cancel.child_token();
    async_manager::spawn(device_watcher(
      hardware.event_stream(),
      self.control.clone(),
      watcher_cancel.clone(),
    ));
    self.watcher_cancel = Some(watcher_cancel);

    self.registry.register(DeviceDescriptor {
      address: address.clone(),
      name: name.clone(),
      last_seen: time::unix_now(),
    });
    self.bus.broadcast_event(
      EventType::RegisteredDevices,
      json!({ "devices": self.registry.list() }),
    );

    match hardware.device_info().await {
      Ok(info) => self
        .bus
        .broadcast_event(EventType::DeviceInfo, serde_json::to_value(&info).unwrap_or_default()),
      Err(err) => warn!("Device info read failed for {}: {}", address, err),
    }
    self.bus.broadcast_event(
      EventType::DeviceConnected,
      json!({ "address": address, "name": name }),
    );
    info!("Connected to {} ({})", name, address);

    self.device = Some(ActiveDevice {
      hardware,
      address,
      name,
    });

    // Coming back from a mid-stream device loss: resume the pipeline and
    // let the recorder continue into suffixed files. The resume marker must
    // be queued before the new decoders can produce data.
    if self.lifecycle == Lifecycle::Streaming {
      if self.recording {
        self.recorder.notify_device_reconnected().await;
      }
      self.start_pipeline().await?;
      self
        .bus
        .broadcast_event(EventType::StreamStarted, json!({ "resumed": true }));
    }
    Ok(())
  }

  async fn handle_disconnect(&mut self) -> Result<(), StateError> {
    let Some(active) = self.device.take() else {
      return Err(StateError::NotConnected);
    };
    if self.lifecycle == Lifecycle::Streaming {
      self.stop_pipeline(&active, true).await;
      self.lifecycle = Lifecycle::Initialized;
      self
        .bus
        .broadcast_event(EventType::StreamStopped, json!({ "reason": "disconnect" }));
    }
    if self.recording {
      self.recorder.notify_device_lost().await;
    }
    if let Some(cancel) = self.watcher_cancel.take() {
      cancel.cancel();
    }
    let _ = active.hardware.disconnect().await;
    self.bus.broadcast_event(
      EventType::DeviceDisconnected,
      json!({ "address": active.address }),
    );
    info!("Disconnected from {}", active.address);
    Ok(())
  }

  fn handle_status(&self) -> StatusSnapshot {
    let streaming = self.lifecycle == Lifecycle::Streaming;
    let snapshot = self.monitor.snapshot(streaming && self.device.is_some());
    let battery = match self.battery_level.load(Ordering::Relaxed) {
      BATTERY_UNKNOWN => None,
      level => Some(level),
    };
    StatusSnapshot {
      connected: self.device.is_some(),
      address: self.device.as_ref().map(|d| d.address.clone()),
      name: self.device.as_ref().map(|d| d.name.clone()),
      streaming,
      recording: self.recording,
      eeg_sps: snapshot.eeg.samples_per_second,
      ppg_sps: snapshot.ppg.samples_per_second,
      acc_sps: snapshot.acc.samples_per_second,
      battery,
      clients_connected: self.bus.clients_connected(),
    }
  }

  async fn handle_start_stream(&mut self) -> LinkBandResult<StreamAck> {
    if self.device.is_none() {
      return Err(StateError::NotConnected.into());
    }
    if self.lifecycle == Lifecycle::Streaming {
      debug!("start_stream while already streaming, acknowledging");
      return Ok(StreamAck {
        already_running: true,
        already_stopped: false,
      });
    }
    self.buffers.clear();
    self.monitor.reset_windows();
    self.start_pipeline().await?;
    self.lifecycle = Lifecycle::Streaming;
    self
      .bus
      .broadcast_event(EventType::StreamStarted, json!({}));
    info!("Streaming started");
    Ok(StreamAck::default())
  }

  async fn handle_stop_stream(&mut self) -> LinkBandResult<StreamAck> {
    if self.lifecycle != Lifecycle::Streaming {
      debug!("stop_stream while not streaming, acknowledging");
      return Ok(StreamAck {
        already_running: false,
        already_stopped: true,
      });
    }
    if let Some(active) = self.device.take() {
      self.stop_pipeline(&active, true).await;
      self.device = Some(active);
    } else if let Some(pipeline) = self.pipeline.take() {
      // Device already lost; just stop the workers.
      pipeline.stop();
      self.streaming_flag.store(false, Ordering::Relaxed);
    }
    self.lifecycle = Lifecycle::Initialized;
    self
      .bus
      .broadcast_event(EventType::StreamStopped, json!({}));
    info!("Streaming stopped");
    Ok(StreamAck::default())
  }

  async fn handle_start_recording(
    &mut self,
    session_name: Option<String>,
  ) -> LinkBandResult<crate::recorder::SessionSummary> {
    if self.recording {
      return Err(StateError::AlreadyRecording.into());
    }
    if self.lifecycle != Lifecycle::Streaming || self.device.is_none() {
      return Err(StateError::NotConnected.into());
    }
    let summary = self.recorder.start(session_name).await?;
    self.recording = true;
    self.bus.broadcast_event(
      EventType::RecordingStarted,
      json!({ "session_name": summary.session_name, "directory": summary.directory }),
    );
    Ok(summary)
  }

  async fn handle_stop_recording(&mut self) -> LinkBandResult<crate::recorder::SessionSummary> {
    if !self.recording {
      return Err(StateError::NotRecording.into());
    }
    let summary = self.recorder.stop().await?;
    self.recording = false;
    self.bus.broadcast_event(
      EventType::RecordingStopped,
      json!({ "session_name": summary.session_name, "files": summary.files.len() }),
    );
    Ok(summary)
  }

  async fn handle_device_lost(&mut self, address: String) {
    let Some(active) = &self.device else {
      return;
    };
    if active.address != address {
      return;
    }
    warn!("Device {} lost", address);
    let active = self.device.take().expect("checked above");
    if let Some(cancel) = self.watcher_cancel.take() {
      cancel.cancel();
    }
    if let Some(pipeline) = self.pipeline.take() {
      pipeline.stop();
    }
    self.streaming_flag.store(false, Ordering::Relaxed);
    if self.recording {
      self.recorder.notify_device_lost().await;
    }
    self.bus.broadcast_event(
      EventType::DeviceDisconnected,
      json!({ "address": active.address, "reason": "device_lost" }),
    );
    async_manager::spawn(reconnect_task(
      self.control.clone(),
      address,
      self.cancel.child_token(),
    ));
  }

  fn handle_reconnect_failed(&mut self, address: String) {
    if self.device.is_some() {
      return;
    }
    error!("Reconnect to {} abandoned", address);
    self.bus.error_event(
      "reconnect_failed",
      format!("could not reconnect to {address}"),
    );
    if self.lifecycle == Lifecycle::Streaming {
      self.lifecycle = Lifecycle::Initialized;
      self.streaming_flag.store(false, Ordering::Relaxed);
      self
        .bus
        .broadcast_event(EventType::StreamStopped, json!({ "reason": "device_lost" }));
    }
  }

  async fn start_pipeline(&mut self) -> LinkBandResult<()> {
    let Some(active) = &self.device else {
      return Err(StateError::NotConnected.into());
    };
    // Decoders subscribe to the event stream before notifications start,
    // so the first packets cannot be lost.
    let ctx = PipelineContext {
      buffers: self.buffers.clone(),
      monitor: self.monitor.clone(),
      bus: self.bus.clone(),
      recorder: self.recorder.clone(),
      battery_level: self.battery_level.clone(),
    };
    let pipeline = spawn_pipeline(&ctx, &active.hardware, &self.cancel);
    if let Err(err) = active.hardware.start_notifications().await {
      pipeline.stop();
      return Err(LinkBandError::from(err));
    }
    self.pipeline = Some(pipeline);
    self.streaming_flag.store(true, Ordering::Relaxed);
    Ok(())
  }

  /// Stop notifications, let in-flight packets drain briefly, then cancel
  /// the worker tasks.
  async fn stop_pipeline(&mut self, active: &ActiveDevice, stop_notifications: bool) {
    if stop_notifications {
      let _ = active.hardware.stop_notifications().await;
    }
    if let Some(pipeline) = self.pipeline.take() {
      tokio::time::sleep(PIPELINE_DRAIN_GRACE).await;
      pipeline.stop();
    }
    self.streaming_flag.store(false, Ordering::Relaxed);
  }

  /// The ordered shutdown sequence: stop accepting subscriptions, announce
  /// the stream end, silence the transport, drain, finalize recording,
  /// then drop every socket with a normal close.
  async fn do_shutdown(&mut self) {
    info!("Supervisor shutting down");
    self.bus.stop_accepting();
    if self.lifecycle == Lifecycle::Streaming {
      self
        .bus
        .broadcast_event(EventType::StreamStopped, json!({ "reason": "shutdown" }));
    }
    if let Some(active) = self.device.take() {
      self.stop_pipeline(&active, true).await;
      let _ = active.hardware.disconnect().await;
    } else if let Some(pipeline) = self.pipeline.take() {
      pipeline.stop();
    }
    if self.recording {
      let _ = self.recorder.stop().await;
      self.recording = false;
    }
    if let Some(cancel) = self.watcher_cancel.take() {
      cancel.cancel();
    }
    self.lifecycle = Lifecycle::Initialized;
    self.streaming_flag.store(false, Ordering::Relaxed);
    // Cancelling the root token closes subscriber sockets with a normal
    // close frame and stops the bus, recorder and tick tasks.
    self.cancel.cancel();
  }
}

/// Watches one device's event stream for an unsolicited disconnect.
async fn device_watcher(
  mut events: broadcast::Receiver<HardwareEvent>,
  control: ControlSurface,
  cancel: CancellationToken,
) {
  loop {
    tokio::select! {
      _ = cancel.cancelled() => return,
      event = events.recv() => match event {
        Ok(HardwareEvent::Disconnected { address }) => {
          control.notify_device_lost(address);
          return;
        }
        Ok(_) => continue,
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => return,
      },
    }
  }
}

/// Up to five reconnect attempts with 1–10 s exponential back-off. Runs
/// outside the actor so commands keep flowing; each attempt goes through
/// the serialized connect verb.
async fn reconnect_task(control: ControlSurface, address: String, cancel: CancellationToken) {
  let mut backoff = RECONNECT_BACKOFF_MIN;
  for attempt in 1..=RECONNECT_ATTEMPTS {
    tokio::select! {
      _ = cancel.cancelled() => return,
      _ = tokio::time::sleep(backoff) => {}
    }
    info!(
      "Reconnect attempt {}/{} to {}",
      attempt, RECONNECT_ATTEMPTS, address
    );
    match control.connect(&address).await {
      Ok(()) => {
        info!("Reconnected to {}", address);
        return;
      }
      Err(LinkBandError::Transport(TransportError::AlreadyConnected(_))) => {
        debug!("Device already reconnected by a client, standing down");
        return;
      }
      Err(err) => {
        warn!("Reconnect attempt {} failed: {}", attempt, err);
      }
    }
    backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
  }
  control.notify_reconnect_failed(address);
}

/// 1 Hz housekeeping: advance the monitor windows and broadcast stats.
async fn run_stats_tick(
  monitor: Arc<StreamingMonitor>,
  bus: BusHandle,
  battery_level: Arc<AtomicU8>,
  streaming: Arc<AtomicBool>,
  cancel: CancellationToken,
) {
  let mut tick = tokio::time::interval(Duration::from_secs(1));
  tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
  loop {
    tokio::select! {
      _ = cancel.cancelled() => return,
      _ = tick.tick() => {}
    }
    monitor.tick();
    let snapshot = monitor.snapshot(streaming.load(Ordering::Relaxed));
    let bat_level = match battery_level.load(Ordering::Relaxed) {
      BATTERY_UNKNOWN => None,
      level => Some(level),
    };
    bus.broadcast_stats(StreamStats {
      eeg_sps: snapshot.eeg.samples_per_second,
      ppg_sps: snapshot.ppg.samples_per_second,
      acc_sps: snapshot.acc.samples_per_second,
      bat_level,
      // Filled in by the bus.
      clients_connected: 0,
      dropped_messages: 0,
    });
  }
}
