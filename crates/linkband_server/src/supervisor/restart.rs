// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Supervised task harness.
//!
//! Worker tasks (decoders, processors, broadcasters) are restarted on error
//! with exponential back-off, capped at 2 s, under a restart budget of 10
//! failures per rolling 60 s window. A task that blows the budget is marked
//! degraded: an `error` event goes out on the bus and the task stays down
//! until streaming is restarted by a client command.

use crate::{bus::BusHandle, monitor::StreamingMonitor};
use linkband_core::{sample::SensorKind, util::async_manager};
use std::{
  collections::VecDeque,
  fmt::Display,
  sync::Arc,
  time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RestartPolicy {
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
  pub budget: usize,
  pub window: Duration,
}

impl Default for RestartPolicy {
  fn default() -> Self {
    Self {
      initial_backoff: Duration::from_millis(100),
      max_backoff: Duration::from_secs(2),
      budget: 10,
      window: Duration::from_secs(60),
    }
  }
}

/// Run `factory`-produced futures until one finishes cleanly, the token is
/// cancelled, or the restart budget is exhausted.
pub(crate) fn spawn_supervised<F, Fut, E>(
  name: &str,
  sensor: SensorKind,
  policy: RestartPolicy,
  cancel: CancellationToken,
  monitor: Arc<StreamingMonitor>,
  bus: BusHandle,
  mut factory: F,
) where
  F: FnMut() -> Fut + Send + 'static,
  Fut: Future<Output = Result<(), E>> + Send + 'static,
  E: Display + Send,
{
  let name = name.to_owned();
  async_manager::spawn(async move {
    let mut backoff = policy.initial_backoff;
    let mut failures: VecDeque<Instant> = VecDeque::new();
    loop {
      let outcome = tokio::select! {
        _ = cancel.cancelled() => break,
        outcome = factory() => outcome,
      };
      match outcome {
        Ok(()) => {
          debug!("Task {} finished cleanly", name);
          break;
        }
        Err(err) => {
          if cancel.is_cancelled() {
            break;
          }
          error!("Task {} failed: {}", name, err);
          monitor.add_processor_error(sensor);
          bus.error_event(&name, err.to_string());

          let now = Instant::now();
          failures.push_back(now);
          while let Some(first) = failures.front()
            && now.duration_since(*first) > policy.window
          {
            failures.pop_front();
          }
          if failures.len() > policy.budget {
            error!(
              "Task {} exceeded its restart budget ({} failures in {:?}), marking degraded",
              name,
              failures.len(),
              policy.window
            );
            bus.error_event(
              &format!("{name}_degraded"),
              format!("{sensor} worker degraded, restart streaming to recover"),
            );
            break;
          }

          tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
          }
          backoff = (backoff * 2).min(policy.max_backoff);
        }
      }
    }
  });
}
