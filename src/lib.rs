//! Library core for mailferry.
//!
//! An IMAP mailbox-migration service: users define sync lists (source host
//! to destination host) with mailbox credentials; a durable job queue and a
//! worker pool copy messages folder by folder, resumably, under user
//! control. The HTTP layer consuming the control surface lives outside this
//! crate.

// --- Modules ---
pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod imap;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod vault;
pub mod worker;

pub use error::{Error, Result};

// Re-export key types for convenience
pub mod prelude {
    // Config
    pub use crate::config::Settings;

    // Errors
    pub use crate::error::{Error, Result};

    // Stores and entities
    pub use crate::models::{
        Job, JobPatch, JobStatus, JobStore, Mailbox, MailboxStore, SyncList, SyncListStore,
        User, UserStore,
    };

    // Job machinery
    pub use crate::control::Control;
    pub use crate::notify::{Notifier, JOBS_UPDATED};
    pub use crate::vault::CredentialVault;
    pub use crate::worker::{
        HandlerRegistry, JobContext, JobEnv, JobHandler, RunningJobs, WorkerPool,
    };

    // Common Libs
    pub use log::{debug, error, info, trace, warn};
    pub use std::sync::Arc;
}
