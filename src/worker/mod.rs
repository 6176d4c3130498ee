// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Worker runtime: claims pending jobs, runs them under a per-job timeout
//! and cancellation handle, persists progress and terminal outcome, and
//! recovers handler panics.

pub mod registry;
pub mod running;

pub use registry::{HandlerFactory, HandlerRegistry, JobHandler};
pub use running::{RunningJob, RunningJobs};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use log::{debug, error, info, warn};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::models::{Job, JobPatch, JobStatus, JobStore};
use crate::notify::{Notifier, JOBS_UPDATED};

/// Safety net: even with notifications lost, every worker re-polls the
/// store at this interval.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Shared dependencies handed to handler factories and handlers.
#[derive(Clone)]
pub struct JobEnv {
    pub pool: SqlitePool,
    pub settings: Arc<Settings>,
}

/// Per-job execution context. Shutdown, timeout, and user stop all collapse
/// into the same cancellation signal.
pub struct JobContext {
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation sample point.
    pub fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested; for racing against slow
    /// operations such as APPEND.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

struct WorkerInner {
    env: JobEnv,
    jobs: JobStore,
    registry: Arc<HandlerRegistry>,
    running: RunningJobs,
    notifier: Notifier,
    shutdown: CancellationToken,
    job_timeout: Duration,
}

/// Pool of N cooperative worker tasks started at process boot.
pub struct WorkerPool {
    inner: Arc<WorkerInner>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(env: JobEnv, jobs: JobStore, registry: Arc<HandlerRegistry>, notifier: Notifier) -> Self {
        let job_timeout = env.settings.job_timeout();
        Self {
            inner: Arc::new(WorkerInner {
                env,
                jobs,
                registry,
                running: RunningJobs::new(),
                notifier,
                shutdown: CancellationToken::new(),
                job_timeout,
            }),
            handles: Vec::new(),
        }
    }

    /// Shrinks the per-job timeout; the configuration granularity is
    /// minutes, which is too coarse for tests.
    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_job_timeout must be called before start");
        inner.job_timeout = job_timeout;
        self
    }

    /// Handle to the running-jobs index, used by the control surface to
    /// cancel in-flight jobs.
    pub fn running(&self) -> RunningJobs {
        self.inner.running.clone()
    }

    /// Spawns the configured number of workers.
    pub fn start(&mut self) {
        let count = self.inner.env.settings.worker_count;
        for worker_id in 0..count {
            let inner = Arc::clone(&self.inner);
            self.handles
                .push(tokio::spawn(async move { inner.worker_loop(worker_id).await }));
        }
        info!("started {count} workers");
    }

    /// Stops accepting new jobs and waits for in-flight jobs to finish or
    /// time out.
    pub async fn shutdown(self) {
        self.inner.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("worker task join failed: {e}");
            }
        }
        info!("worker pool stopped");
    }
}

impl WorkerInner {
    async fn worker_loop(&self, worker_id: usize) {
        info!("worker {worker_id}: started");
        let mut events = self.notifier.subscribe(JOBS_UPDATED);

        loop {
            // The notification is advisory; the poll is authoritative.
            // Drain everything claimable before going back to sleep.
            while !self.shutdown.is_cancelled() {
                match self.claim_next().await {
                    Some(job) => self.run_job(worker_id, job).await,
                    None => break,
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => {
                    if let Err(e) = event {
                        debug!("worker {worker_id}: notification stream lagged: {e}");
                    }
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        info!("worker {worker_id}: stopped");
    }

    /// Finds the oldest pending job and atomically flips it to `running`.
    /// Losing the race to another worker just means trying the next row.
    async fn claim_next(&self) -> Option<Job> {
        loop {
            let job = match self.jobs.find_pending_oldest().await {
                Ok(Some(job)) => job,
                Ok(None) => return None,
                Err(e) => {
                    error!("failed to poll for pending jobs: {e}");
                    return None;
                }
            };

            match self.jobs.claim(job.id).await {
                Ok(true) => return Some(job),
                Ok(false) => continue,
                Err(e) => {
                    error!("failed to claim job {}: {e}", job.id);
                    return None;
                }
            }
        }
    }

    async fn run_job(&self, worker_id: usize, job: Job) {
        info!("worker {worker_id}: starting job {} ({})", job.id, job.job_type);

        let factory = match self.registry.get(&job.job_type) {
            Some(factory) => factory,
            None => {
                self.finish_without_handler(&job, "unknown job type".to_string())
                    .await;
                return;
            }
        };

        let mut handler = match factory(self.env.clone(), job.payload.clone()).await {
            Ok(handler) => handler,
            Err(e) => {
                self.finish_without_handler(&job, e.to_string()).await;
                return;
            }
        };

        let cancel = self.shutdown.child_token();
        self.running.insert(job.id, &job.job_type, cancel.clone());

        let ctx = JobContext::new(cancel.clone());

        // The timeout presents as the same cancellation signal the handler
        // already watches; exceeding it classifies as `interrupted`.
        let watchdog = tokio::spawn({
            let cancel = cancel.clone();
            let timeout = self.job_timeout;
            async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            }
        });

        let outcome = AssertUnwindSafe(handler.run(&ctx)).catch_unwind().await;
        watchdog.abort();

        let panicked = outcome.is_err();
        let (status, job_error) = match &outcome {
            Ok(Ok(())) => (JobStatus::Completed, None),
            Ok(Err(e)) if e.is_cancellation() => (JobStatus::Interrupted, None),
            Ok(Err(e)) => (JobStatus::Failed, Some(e.to_string())),
            Err(panic) => (JobStatus::Failed, Some(panic_repr(panic.as_ref()))),
        };

        let payload = snapshot_handler(handler.as_ref(), panicked);

        let patch = JobPatch {
            status: Some(status),
            error: Some(job_error.clone()),
            payload: Some(payload),
            finished_at: Some(Some(Utc::now())),
            ..Default::default()
        };
        if let Err(e) = self.jobs.update(job.id, &patch).await {
            error!("failed to persist outcome of job {}: {e}", job.id);
        }

        // Best-effort hook, deliberately after the status write.
        if let Err(e) = AssertUnwindSafe(handler.on_stop(&ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::Internal(panic_repr(panic.as_ref()))))
        {
            warn!("stop hook of job {} failed: {e}", job.id);
        }

        self.running.remove(job.id);

        match &job_error {
            Some(e) => warn!(
                "worker {worker_id}: job {} finished as {} ({e})",
                job.id,
                status.as_str()
            ),
            None => info!(
                "worker {worker_id}: job {} finished as {}",
                job.id,
                status.as_str()
            ),
        }
    }

    /// Terminal write for jobs that never produced a handler (unknown type
    /// or factory error). The payload is left untouched so a later restart
    /// still sees the original parameters.
    async fn finish_without_handler(&self, job: &Job, message: String) {
        warn!("job {} ({}) failed: {message}", job.id, job.job_type);

        let patch = JobPatch {
            status: Some(JobStatus::Failed),
            error: Some(Some(message)),
            finished_at: Some(Some(Utc::now())),
            ..Default::default()
        };
        if let Err(e) = self.jobs.update(job.id, &patch).await {
            error!("failed to persist failure of job {}: {e}", job.id);
        }
    }
}

/// Serializes handler state for the payload column. A handler that just
/// panicked may panic again here, so the snapshot itself runs under a
/// recovery guard.
fn snapshot_handler(handler: &dyn JobHandler, panicked: bool) -> serde_json::Value {
    let marshal_failure = serde_json::json!({"error": "failed to marshal handler state"});

    if panicked {
        return match std::panic::catch_unwind(AssertUnwindSafe(|| handler.snapshot())) {
            Ok(Ok(value)) => value,
            _ => marshal_failure,
        };
    }

    handler.snapshot().unwrap_or(marshal_failure)
}

fn panic_repr(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic: unknown payload".to_string()
    }
}
