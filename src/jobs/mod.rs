// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Concrete job handlers.

pub mod migrate_mailbox;

pub use migrate_mailbox::{MigrateMailboxJob, MigrateMailboxPayload, MIGRATE_MAILBOX_TYPE};

use crate::worker::HandlerRegistry;

/// Registers every built-in job type. Called once at startup, before the
/// registry is frozen behind `Arc`.
pub fn register_all(registry: &mut HandlerRegistry) {
    registry.register(MIGRATE_MAILBOX_TYPE, migrate_mailbox::factory);
}
