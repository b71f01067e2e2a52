// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Shared data model and utilities for the Link Band server core.
//!
//! This crate holds everything that crosses a component boundary: the sensor
//! sample and processed-frame types, the stream bus wire protocol, the error
//! taxonomy, runtime configuration, and small async/time utilities. The
//! acquisition pipeline itself lives in `linkband_server`; hardware access
//! lives behind the traits that crate defines.

#[macro_use]
extern crate log;

#[macro_use]
extern crate strum_macros;

pub mod config;
pub mod errors;
pub mod message;
pub mod sample;
pub mod util;
