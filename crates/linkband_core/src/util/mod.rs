// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

pub mod async_manager;
pub mod time;

use std::time::Duration;

/// Runtime-agnostic sleep re-export so components don't import tokio::time
/// directly.
pub async fn sleep(duration: Duration) {
  tokio::time::sleep(duration).await;
}
