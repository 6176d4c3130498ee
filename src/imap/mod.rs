// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! IMAP4rev1 client plumbing: dialing with TLS fallback and the session
//! operations used by the migration handler.

pub mod connect;
pub mod error;
pub mod session;

pub use connect::{dial, Client, ImapStream, DIAL_TIMEOUT};
pub use error::ImapError;
pub use session::MailSession;
