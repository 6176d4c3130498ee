// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Process-local index of currently running jobs.
//!
//! Entries are inserted when a worker claims a job and removed when the run
//! terminates. The control surface looks a job up here to deliver a
//! user-initiated stop.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RunningJob {
    pub job_type: String,
    cancel: CancellationToken,
}

impl RunningJob {
    /// Requests cooperative cancellation of the running handler. The
    /// handler observes the same signal as a shutdown or timeout.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[derive(Clone, Default)]
pub struct RunningJobs {
    inner: Arc<DashMap<i64, RunningJob>>,
}

impl RunningJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, job_id: i64, job_type: &str, cancel: CancellationToken) {
        self.inner.insert(
            job_id,
            RunningJob {
                job_type: job_type.to_string(),
                cancel,
            },
        );
    }

    pub fn get(&self, job_id: i64) -> Option<RunningJob> {
        self.inner.get(&job_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn remove(&self, job_id: i64) {
        self.inner.remove(&job_id);
    }

    pub fn contains(&self, job_id: i64) -> bool {
        self.inner.contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
