// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Task spawning shims. Components spawn through here rather than calling
//! tokio directly so the executor stays swappable at one point.

use futures::future::{Future, FutureExt, RemoteHandle};

pub fn spawn<Fut>(future: Fut)
where
  Fut: Future<Output = ()> + Send + 'static,
{
  tokio::spawn(future);
}

/// Spawn a task whose output can be awaited later. Dropping the handle
/// cancels the task.
pub fn spawn_with_handle<Fut>(future: Fut) -> RemoteHandle<Fut::Output>
where
  Fut: Future + Send + 'static,
  Fut::Output: Send,
{
  let (remote, handle) = future.remote_handle();
  tokio::spawn(remote);
  handle
}
