// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Notification bus between the job store and the worker pool.
//!
//! Events are advisory wake-ups with no payload; every worker polls the
//! store after a wake, so dropped or coalesced events are harmless as long
//! as pending work eventually produces one future wake.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Channel published on every job mutation that creates, resumes, or
/// finishes a job.
pub const JOBS_UPDATED: &str = "jobs:updated";

/// Capacity is deliberately small; a lagged receiver just means the worker
/// wakes once instead of N times.
const CHANNEL_CAPACITY: usize = 16;

#[derive(Clone, Default)]
pub struct Notifier {
    channels: Arc<DashMap<String, broadcast::Sender<()>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<()> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Subscribes to a named channel. Events published before the
    /// subscription are not delivered.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<()> {
        self.sender(channel).subscribe()
    }

    /// Publishes a zero-payload event. Succeeds even with no listeners.
    pub fn publish(&self, channel: &str) {
        let _ = self.sender(channel).send(());
    }
}
