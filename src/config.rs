// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Environment-sourced runtime configuration.

use std::time::Duration;

use config::Environment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base64-encoded 32-byte key for the credential vault (`APP_KEY`).
    pub app_key: String,
    /// Number of worker tasks started at boot (`WORKER_COUNT`).
    pub worker_count: usize,
    /// Upper bound on a single job run (`JOB_TIMEOUT_MINUTES`).
    pub job_timeout_minutes: u64,
    /// Database connection string (`DB_URI`).
    pub db_uri: String,
    /// `DEBUG=true` enables verbose logs and permits skipping TLS
    /// certificate verification on IMAP connections.
    #[serde(default)]
    pub debug: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let builder = config::Config::builder()
            .set_default("debug", false)?
            .add_source(Environment::default().try_parsing(true));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.app_key.is_empty() {
            return Err(SettingsError::Invalid("APP_KEY must be set"));
        }
        if self.worker_count == 0 {
            return Err(SettingsError::Invalid("WORKER_COUNT must be positive"));
        }
        if self.job_timeout_minutes == 0 {
            return Err(SettingsError::Invalid("JOB_TIMEOUT_MINUTES must be positive"));
        }
        if self.db_uri.is_empty() {
            return Err(SettingsError::Invalid("DB_URI must be set"));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_minutes * 60)
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load or parse configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
