// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Link Band error structs/enums.
//!
//! Errors raised inside decoder/processor/recorder tasks never escape the
//! task; they are converted into counter increments and rate-limited `error`
//! events on the stream bus. The types here exist so that command verbs and
//! component boundaries return a single discriminated error instead of
//! stringly-typed failures.

use displaydoc::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type LinkBandResult<T = ()> = Result<T, LinkBandError>;

/// Errors from the BLE transport layer.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportError {
  /// Bluetooth adapter unavailable or cannot start scanning
  BluetoothUnavailable,
  /// Device {0} not found during scan
  NotFound(String),
  /// Timed out while {0}
  Timeout(String),
  /// Already connected to device {0}
  AlreadyConnected(String),
  /// Connection to device lost
  DeviceLost,
  /// Characteristic notification setup failed: {0}
  NotifyFailed(String),
}

/// Errors raised while decoding sensor packets. All variants are dropped
/// in-task and counted; none abort the stream.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeError {
  /// Packet shorter than header plus one sample ({0} bytes)
  ShortPacket(usize),
  /// Packet payload length {0} is not a multiple of the sample stride {1}
  UnexpectedLength(usize, usize),
  /// Packet anchor regressed behind the previous sample, packet dropped
  ReorderDropped,
}

/// Errors from the per-sensor signal processors.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessError {
  /// Numeric failure in DSP stage: {0}
  NumericFailure(String),
  /// Window underfilled, frame suppressed
  WindowUnderfilled,
  /// DSP stage exceeded its deadline
  AlgorithmTimeout,
}

/// Errors from the session recorder.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderError {
  /// Write to {0} failed: {1}
  WriteFailed(String, String),
  /// Could not create session directory {0}: {1}
  DirectoryCreateFailed(String, String),
}

/// Errors in the stream bus wire protocol. `SlowConsumer` closes the
/// offending subscription; the rest elicit an `error` reply.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolError {
  /// Unknown command: {0}
  UnknownCommand(String),
  /// Malformed command payload: {0}
  BadPayload(String),
  /// Subscriber queue saturated for longer than the grace period
  SlowConsumer,
}

/// State machine violations surfaced by the control surface verbs.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateError {
  /// No device connected
  NotConnected,
  /// Streaming already running
  AlreadyRunning,
  /// Streaming not running
  NotRunning,
  /// Recording already in progress
  AlreadyRecording,
  /// No recording in progress
  NotRecording,
  /// Another command is holding the device state
  Busy,
}

/// Aggregated error type for anything that crosses the crate boundary.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkBandError {
  /// Transport error: {0}
  Transport(#[from] TransportError),
  /// Decode error: {0}
  Decode(#[from] DecodeError),
  /// Processing error: {0}
  Process(#[from] ProcessError),
  /// Recorder error: {0}
  Recorder(#[from] RecorderError),
  /// Protocol error: {0}
  Protocol(#[from] ProtocolError),
  /// State error: {0}
  State(#[from] StateError),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_comes_from_doc_comments() {
    let err = TransportError::NotFound("AA:BB".to_owned());
    assert_eq!(err.to_string(), "Device AA:BB not found during scan");
  }

  #[test]
  fn umbrella_converts_from_families() {
    let err: LinkBandError = StateError::NotConnected.into();
    assert!(matches!(err, LinkBandError::State(StateError::NotConnected)));
  }
}
