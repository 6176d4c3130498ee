// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Unified error handling for mailferry.
//!
//! One taxonomy covers the whole core: the control surface maps these onto
//! HTTP status codes (404/403/409/400), the worker runtime classifies them
//! into terminal job statuses.

use thiserror::Error;

use crate::imap::error::ImapError;
use crate::vault::VaultError;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Row missing; the control surface renders this as 404.
    #[error("not found")]
    NotFound,

    /// Ownership mismatch; rendered as 403.
    #[error("unauthorized")]
    Unauthorized,

    /// Mutation forbidden because a related job is pending or running;
    /// rendered as 409.
    #[error("conflict: a related job is pending or running")]
    Conflict,

    /// Input shape rejected; rendered as 400.
    #[error("validation error: {0}")]
    Validation(String),

    /// The cooperative cancellation signal. Workers classify this as
    /// `interrupted`, never as a failure.
    #[error("canceled")]
    Canceled,

    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("credential vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("imap error: {0}")]
    Imap(#[from] ImapError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// True for the cancellation signal in any of its dressings
    /// (shutdown, timeout, user stop).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound | Error::Db(sqlx::Error::RowNotFound))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict)
    }
}
