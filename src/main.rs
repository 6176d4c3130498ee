// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Server binary: boots the job subsystem and runs until interrupted.
//!
//! The HTTP layer is a separate concern; this process hosts the durable
//! queue and the worker pool that executes migration jobs.

use std::sync::Arc;

use env_logger::Env;
use log::info;

use mailferry::config::Settings;
use mailferry::db;
use mailferry::jobs;
use mailferry::models::JobStore;
use mailferry::notify::Notifier;
use mailferry::vault::CredentialVault;
use mailferry::worker::{HandlerRegistry, JobEnv, WorkerPool};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;

    let default_level = if settings.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    // Fail fast on an unusable key instead of failing the first job.
    CredentialVault::new(&settings.app_key)?;

    let pool = db::connect(&settings.db_uri).await?;
    db::run_migrations(&pool).await?;
    info!("database ready");

    let notifier = Notifier::new();
    let job_store = JobStore::new(pool.clone(), notifier.clone());

    let mut registry = HandlerRegistry::new();
    jobs::register_all(&mut registry);
    let registry = Arc::new(registry);

    let env = JobEnv {
        pool: pool.clone(),
        settings: Arc::new(settings),
    };

    let mut workers = WorkerPool::new(env, job_store, registry, notifier);
    workers.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    workers.shutdown().await;
    pool.close().await;

    Ok(())
}
