// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! One subscriber: its channel filter and bounded outgoing queue.
//!
//! Queue writes are non-blocking. On overflow the oldest droppable message
//! (raw data or stats) is evicted first so events and processed frames
//! survive back-pressure; the eviction is counted and surfaced through the
//! bus stats. A queue that stays saturated past the grace period gets the
//! subscription terminated with `slow_consumer`.

use linkband_core::message::{ChannelSpec, ErrorCode, ServerMessage};
use std::{
  collections::{HashSet, VecDeque},
  sync::{
    Mutex, RwLock,
    atomic::{AtomicU64, Ordering},
  },
  time::{Duration, Instant},
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// How long a queue may stay saturated before the subscriber is dropped.
pub const SLOW_CONSUMER_GRACE: Duration = Duration::from_secs(2);

struct QueueInner {
  messages: VecDeque<ServerMessage>,
  full_since: Option<Instant>,
  closed: Option<ErrorCode>,
}

pub struct Subscription {
  id: u64,
  channels: RwLock<HashSet<ChannelSpec>>,
  queue: Mutex<QueueInner>,
  notify: Notify,
  capacity: usize,
  dropped: AtomicU64,
  cancel: CancellationToken,
}

impl Subscription {
  pub fn new(id: u64, capacity: usize, cancel: CancellationToken) -> Self {
    Self {
      id,
      channels: RwLock::new(HashSet::new()),
      queue: Mutex::new(QueueInner {
        messages: VecDeque::with_capacity(capacity),
        full_since: None,
        closed: None,
      }),
      notify: Notify::new(),
      capacity,
      dropped: AtomicU64::new(0),
      cancel,
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn add_channels(&self, channels: &[ChannelSpec]) {
    let mut set = self.channels.write().expect("subscription channel lock poisoned");
    set.extend(channels.iter().copied());
  }

  pub fn remove_channels(&self, channels: &[ChannelSpec]) {
    let mut set = self.channels.write().expect("subscription channel lock poisoned");
    for channel in channels {
      set.remove(channel);
    }
  }

  pub fn channels(&self) -> Vec<ChannelSpec> {
    self
      .channels
      .read()
      .expect("subscription channel lock poisoned")
      .iter()
      .copied()
      .collect()
  }

  /// Does this subscriber want the given message? Data messages go through
  /// the channel filter; events, stats and errors reach everyone.
  pub fn wants(&self, message: &ServerMessage) -> bool {
    match message.channel() {
      Some(channel) => self
        .channels
        .read()
        .expect("subscription channel lock poisoned")
        .contains(&channel),
      None => true,
    }
  }

  /// Non-blocking enqueue with the raw-first eviction policy.
  pub fn push(&self, message: ServerMessage) {
    {
      let mut queue = self.queue.lock().expect("subscription queue poisoned");
      if queue.closed.is_some() {
        return;
      }
      if queue.messages.len() >= self.capacity {
        if let Some(pos) = queue.messages.iter().position(ServerMessage::droppable) {
          let _ = queue.messages.remove(pos);
          queue.messages.push_back(message);
        } else if message.droppable() {
          // Nothing evictable and the newcomer is itself droppable.
        } else {
          queue.messages.pop_front();
          queue.messages.push_back(message);
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if queue.full_since.is_none() {
          queue.full_since = Some(Instant::now());
        }
      } else {
        queue.messages.push_back(message);
        if queue.messages.len() >= self.capacity && queue.full_since.is_none() {
          queue.full_since = Some(Instant::now());
        }
      }
    }
    self.notify.notify_one();
  }

  /// Take up to `max` pending messages.
  pub fn drain(&self, max: usize) -> Vec<ServerMessage> {
    let mut queue = self.queue.lock().expect("subscription queue poisoned");
    let count = queue.messages.len().min(max);
    let drained = queue.messages.drain(..count).collect();
    if queue.messages.len() < self.capacity {
      queue.full_since = None;
    }
    drained
  }

  pub async fn wait(&self) {
    self.notify.notified().await;
  }

  /// How long the queue has been continuously saturated.
  pub fn saturated_for(&self) -> Option<Duration> {
    self
      .queue
      .lock()
      .expect("subscription queue poisoned")
      .full_since
      .map(|since| since.elapsed())
  }

  /// Terminate this subscription. The connection task observes the token
  /// and sends the closing error frame.
  pub fn close(&self, code: ErrorCode) {
    {
      let mut queue = self.queue.lock().expect("subscription queue poisoned");
      if queue.closed.is_some() {
        return;
      }
      queue.closed = Some(code);
    }
    self.cancel.cancel();
    self.notify.notify_one();
  }

  pub fn close_code(&self) -> Option<ErrorCode> {
    self.queue.lock().expect("subscription queue poisoned").closed
  }

  pub fn dropped(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }
}
