// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Job-type registry: maps a type tag to a factory producing a fresh
//! handler bound to a payload.
//!
//! The registry is populated once at startup and then shared behind `Arc`;
//! concurrent reads need no locking because it is never mutated afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::worker::{JobContext, JobEnv};

/// Capability set of a job handler.
///
/// `run` must sample cancellation through the context and may be
/// long-running. `snapshot` serializes the handler's in-memory progress; the
/// worker runtime persists it as the job payload on terminal transitions.
#[async_trait]
pub trait JobHandler: Send {
    async fn run(&mut self, ctx: &JobContext) -> Result<()>;

    /// Invoked after `run` returns, for any outcome. Best-effort cleanup:
    /// errors are logged and swallowed by the runtime, never classified
    /// into the job outcome.
    async fn on_stop(&mut self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    fn snapshot(&self) -> std::result::Result<Value, serde_json::Error>;
}

/// Factory closure: decodes the payload, hydrates referenced entities, and
/// returns a ready-to-run handler.
pub type HandlerFactory =
    Arc<dyn Fn(JobEnv, Value) -> BoxFuture<'static, Result<Box<dyn JobHandler>>> + Send + Sync>;

#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, job_type: impl Into<String>, factory: F)
    where
        F: Fn(JobEnv, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn JobHandler>>> + Send + 'static,
    {
        self.factories.insert(
            job_type.into(),
            Arc::new(move |env, payload| Box::pin(factory(env, payload))),
        );
    }

    pub fn get(&self, job_type: &str) -> Option<HandlerFactory> {
        self.factories.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }
}
