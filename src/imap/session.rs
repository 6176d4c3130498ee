// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Authenticated IMAP session wrapper exposing the operations the
//! migration handler needs.

use async_imap::types::Fetch;
use futures::{Stream, TryStreamExt};
use log::debug;

use crate::imap::connect::{Client, ImapStream};
use crate::imap::error::ImapError;

pub struct MailSession {
    session: async_imap::Session<ImapStream>,
}

impl MailSession {
    /// Authenticates with LOGIN. A rejected login is an authentication
    /// failure, which fails the whole job.
    pub async fn login(client: Client, username: &str, password: &str) -> Result<Self, ImapError> {
        let session = client
            .login(username, password)
            .await
            .map_err(|(err, _client)| ImapError::Auth(format!("login failed: {err}")))?;

        debug!("IMAP login successful for {username}");
        Ok(Self { session })
    }

    /// `LIST "" "*"`: all folder names, in server order.
    pub async fn list_folders(&mut self) -> Result<Vec<String>, ImapError> {
        let mut names = Vec::new();
        {
            let mut stream = self
                .session
                .list(None, Some("*"))
                .await
                .map_err(ImapError::from)?;

            while let Some(name) = stream.try_next().await.map_err(ImapError::from)? {
                names.push(name.name().to_string());
            }
        }

        Ok(names)
    }

    /// Selects a folder read-only and returns its UIDVALIDITY (0 when the
    /// server did not report one).
    pub async fn examine(&mut self, folder: &str) -> Result<u32, ImapError> {
        let mailbox = self.session.examine(folder).await.map_err(ImapError::from)?;
        Ok(mailbox.uid_validity.unwrap_or(0))
    }

    /// `UID SEARCH`, results sorted ascending.
    pub async fn uid_search(&mut self, query: &str) -> Result<Vec<u32>, ImapError> {
        let uids = self
            .session
            .uid_search(query)
            .await
            .map_err(ImapError::from)?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    pub async fn create_folder(&mut self, folder: &str) -> Result<(), ImapError> {
        self.session.create(folder).await.map_err(ImapError::from)
    }

    /// `UID FETCH` as a stream; the caller drains it message by message so
    /// large folders never sit in memory whole.
    pub async fn uid_fetch<'a>(
        &'a mut self,
        uid_set: &'a str,
        query: &'a str,
    ) -> Result<impl Stream<Item = async_imap::error::Result<Fetch>> + Unpin + 'a, ImapError> {
        self.session
            .uid_fetch(uid_set, query)
            .await
            .map_err(ImapError::from)
    }

    /// APPEND with optional flags list and INTERNALDATE, both already in
    /// IMAP syntax.
    pub async fn append(
        &mut self,
        folder: &str,
        flags: Option<&str>,
        internal_date: Option<&str>,
        body: &[u8],
    ) -> Result<(), ImapError> {
        self.session
            .append(folder, flags, internal_date, body)
            .await
            .map_err(ImapError::from)
    }

    pub async fn logout(&mut self) -> Result<(), ImapError> {
        self.session.logout().await.map_err(ImapError::from)
    }
}
