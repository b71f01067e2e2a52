// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Pure-math signal processing for the Link Band sensor pipelines.
//!
//! Nothing in this crate is async or stateful beyond explicit filter state;
//! the `linkband_server` processors own the cadence, windowing and error
//! policy and call in here for the numerics. All filters are causal
//! (forward-only): real-time processing cannot run a backward pass over a
//! trailing window without smearing the newest samples, so no zero-phase
//! filtering is offered.

pub mod filter;
pub mod hrv;
pub mod peaks;
pub mod spectral;
pub mod stats;
