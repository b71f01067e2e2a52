// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The control verb table.
//!
//! Every mutating operation on the device/stream/recording state goes
//! through one command actor (the supervisor event loop) so that concurrent
//! callers — WebSocket command handlers and the external REST layer alike —
//! observe a consistent state machine. [ControlSurface] is the cloneable
//! handle; each verb enqueues a request with a oneshot reply and waits at
//! most the configured command timeout.

use crate::{monitor::HealthSnapshot, recorder::SessionSummary};
use linkband_core::{
  errors::{LinkBandError, LinkBandResult, StateError, TransportError},
  sample::DeviceDescriptor,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Reply to `status()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
  pub connected: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub address: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub streaming: bool,
  pub recording: bool,
  pub eeg_sps: f64,
  pub ppg_sps: f64,
  pub acc_sps: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub battery: Option<u8>,
  pub clients_connected: usize,
}

/// Reply to `start_stream()` / `stop_stream()`. Both verbs are idempotent;
/// the flags report whether the call was a no-op.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamAck {
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub already_running: bool,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub already_stopped: bool,
}

/// Requests processed one at a time by the supervisor actor.
#[derive(Debug)]
pub enum ControlRequest {
  Scan {
    timeout_s: Option<f64>,
    reply: oneshot::Sender<Result<Vec<DeviceDescriptor>, TransportError>>,
  },
  Connect {
    address: String,
    reply: oneshot::Sender<LinkBandResult<()>>,
  },
  Disconnect {
    reply: oneshot::Sender<Result<(), StateError>>,
  },
  Status {
    reply: oneshot::Sender<StatusSnapshot>,
  },
  StartStream {
    reply: oneshot::Sender<LinkBandResult<StreamAck>>,
  },
  StopStream {
    reply: oneshot::Sender<LinkBandResult<StreamAck>>,
  },
  StartRecording {
    session_name: Option<String>,
    reply: oneshot::Sender<LinkBandResult<SessionSummary>>,
  },
  StopRecording {
    reply: oneshot::Sender<LinkBandResult<SessionSummary>>,
  },
  HealthCheck {
    reply: oneshot::Sender<HealthSnapshot>,
  },
  /// Device link dropped; queued by the hardware event watcher.
  DeviceLost {
    address: String,
  },
  /// The reconnect task exhausted its attempts.
  ReconnectFailed {
    address: String,
  },
  Shutdown {
    reply: oneshot::Sender<()>,
  },
}

#[derive(Clone)]
pub struct ControlSurface {
  sender: mpsc::Sender<ControlRequest>,
  reply_timeout: Duration,
}

impl ControlSurface {
  pub fn new(sender: mpsc::Sender<ControlRequest>, reply_timeout: Duration) -> Self {
    Self {
      sender,
      reply_timeout,
    }
  }

  async fn submit<T>(
    &self,
    request: ControlRequest,
    reply: oneshot::Receiver<T>,
  ) -> LinkBandResult<T> {
    self
      .sender
      .send(request)
      .await
      .map_err(|_| TransportError::Timeout("command actor gone".to_owned()))?;
    match tokio::time::timeout(self.reply_timeout, reply).await {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(_)) => Err(TransportError::Timeout("command actor dropped reply".to_owned()).into()),
      Err(_) => Err(TransportError::Timeout("command reply".to_owned()).into()),
    }
  }

  pub async fn scan(&self, timeout_s: Option<f64>) -> LinkBandResult<Vec<DeviceDescriptor>> {
    let (tx, rx) = oneshot::channel();
    self
      .submit(
        ControlRequest::Scan {
          timeout_s,
          reply: tx,
        },
        rx,
      )
      .await?
      .map_err(LinkBandError::from)
  }

  pub async fn connect(&self, address: &str) -> LinkBandResult<()> {
    let (tx, rx) = oneshot::channel();
    self
      .submit(
        ControlRequest::Connect {
          address: address.to_owned(),
          reply: tx,
        },
        rx,
      )
      .await?
  }

  pub async fn disconnect(&self) -> LinkBandResult<()> {
    let (tx, rx) = oneshot::channel();
    self
      .submit(ControlRequest::Disconnect { reply: tx }, rx)
      .await?
      .map_err(LinkBandError::from)
  }

  pub async fn status(&self) -> LinkBandResult<StatusSnapshot> {
    let (tx, rx) = oneshot::channel();
    self.submit(ControlRequest::Status { reply: tx }, rx).await
  }

  pub async fn start_stream(&self) -> LinkBandResult<StreamAck> {
    let (tx, rx) = oneshot::channel();
    self
      .submit(ControlRequest::StartStream { reply: tx }, rx)
      .await?
  }

  pub async fn stop_stream(&self) -> LinkBandResult<StreamAck> {
    let (tx, rx) = oneshot::channel();
    self
      .submit(ControlRequest::StopStream { reply: tx }, rx)
      .await?
  }

  pub async fn start_recording(&self, session_name: Option<String>) -> LinkBandResult<SessionSummary> {
    let (tx, rx) = oneshot::channel();
    self
      .submit(
        ControlRequest::StartRecording {
          session_name,
          reply: tx,
        },
        rx,
      )
      .await?
  }

  pub async fn stop_recording(&self) -> LinkBandResult<SessionSummary> {
    let (tx, rx) = oneshot::channel();
    self
      .submit(ControlRequest::StopRecording { reply: tx }, rx)
      .await?
  }

  pub async fn health_check(&self) -> LinkBandResult<HealthSnapshot> {
    let (tx, rx) = oneshot::channel();
    self
      .submit(ControlRequest::HealthCheck { reply: tx }, rx)
      .await
  }

  /// Queue a device-lost notification. Fire-and-forget; used by the
  /// hardware event watcher, not by clients.
  pub fn notify_device_lost(&self, address: String) {
    let _ = self.sender.try_send(ControlRequest::DeviceLost { address });
  }

  /// Queue a reconnect-abandoned notification from the reconnect task.
  pub fn notify_reconnect_failed(&self, address: String) {
    let _ = self
      .sender
      .try_send(ControlRequest::ReconnectFailed { address });
  }

  /// Graceful shutdown. Waits for the supervisor to finish its teardown
  /// sequence (bounded by the supervisor's own deadline, not the command
  /// timeout).
  pub async fn shutdown(&self) {
    let (tx, rx) = oneshot::channel();
    if self.sender.send(ControlRequest::Shutdown { reply: tx }).await.is_ok() {
      let _ = rx.await;
    }
  }
}
