// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Host clocks. `host_now` is the monotonic clock stamped onto every
//! forwarded packet and bus message; `unix_now` is only used where wall time
//! is part of the contract (registry `last_seen`, session metadata).

use once_cell::sync::Lazy;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static PROCESS_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic seconds since process start. Never goes backwards.
pub fn host_now() -> f64 {
  PROCESS_EPOCH.elapsed().as_secs_f64()
}

/// Wall-clock Unix seconds.
pub fn unix_now() -> f64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs_f64())
    .unwrap_or(0.0)
}
