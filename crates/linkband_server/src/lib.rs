// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The Link Band acquisition server.
//!
//! This crate implements the real-time pipeline between a Link Band device
//! and its local subscribers:
//!
//! - hardware abstraction ([device]) with the state machine driven by the
//!   supervisor; the btleplug implementation lives in
//!   `linkband_server_hwmgr_btleplug`, a channel-backed mock ships with the
//!   test utilities,
//! - per-sensor packet decoders ([protocol]) and bounded sample windows
//!   ([buffer]),
//! - per-sensor signal processors ([processor]) built on `linkband_dsp`,
//! - the WebSocket stream bus ([bus]) with subscription filtering,
//!   back-pressure and slow-consumer eviction,
//! - the session recorder ([recorder]) and the persistent device
//!   [registry],
//! - throughput/health accounting ([monitor]),
//! - the [supervisor], which owns every task lifecycle and exposes the
//!   control verb table ([control]) used by both the WebSocket command
//!   handler and the external REST layer.
//!
//! ## Ownership
//!
//! The supervisor exclusively owns transport, buffers, DSP and recorder.
//! Components communicate over bounded channels; the only shared mutable
//! state is the per-sensor ring buffer behind a short mutex and the
//! subscriber registry inside the bus. Nothing in this crate holds a buffer
//! lock across an await point.

#[macro_use]
extern crate log;

pub mod buffer;
pub mod bus;
pub mod control;
pub mod device;
pub mod monitor;
pub mod processor;
pub mod protocol;
pub mod recorder;
pub mod registry;
pub mod supervisor;

pub use control::ControlSurface;
pub use supervisor::{Supervisor, SupervisorBuilder};
