// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resumable per-folder IMAP mailbox migration.
//!
//! Progress is tracked per folder as a pair of maps: the last UID known to
//! be delivered to the destination, and the UIDVALIDITY generation those
//! UIDs belong to. When a folder's UIDVALIDITY rotates, its watermark is
//! reset and the folder is re-scanned from the start — required behavior
//! for IMAP, since a validity change invalidates every stored UID.

use std::time::Duration;

use async_imap::types::{Fetch, Flag};
use async_trait::async_trait;
use chrono::DateTime;
use futures::TryStreamExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::imap::{self, ImapError, MailSession, DIAL_TIMEOUT};
use crate::models::mailbox::FolderMap;
use crate::models::{Mailbox, MailboxStore, SyncList, SyncListStore};
use crate::vault::CredentialVault;
use crate::worker::{JobContext, JobEnv, JobHandler};

pub const MIGRATE_MAILBOX_TYPE: &str = "migrate_mailbox";

const FETCH_ITEMS: &str = "(ENVELOPE FLAGS INTERNALDATE BODY[] UID)";

/// Serialized handler state. The ids rehydrate the sync list and mailbox;
/// the maps are the resumable progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateMailboxPayload {
    pub sync_list_id: i64,
    pub mailbox_id: i64,
    #[serde(default)]
    pub folder_last_uid: FolderMap,
    #[serde(default)]
    pub folder_uid_validity: FolderMap,
}

impl MigrateMailboxPayload {
    pub fn fresh(sync_list_id: i64, mailbox_id: i64) -> Self {
        Self {
            sync_list_id,
            mailbox_id,
            folder_last_uid: FolderMap::new(),
            folder_uid_validity: FolderMap::new(),
        }
    }
}

/// Builds a handler from a stored payload. Registered in the handler
/// registry under [`MIGRATE_MAILBOX_TYPE`].
pub async fn factory(env: JobEnv, payload: Value) -> Result<Box<dyn JobHandler>> {
    let payload: MigrateMailboxPayload = serde_json::from_value(payload)?;

    let list = SyncListStore::new(env.pool.clone())
        .find_by_id(payload.sync_list_id)
        .await?;
    let mut mailbox = MailboxStore::new(env.pool.clone())
        .find_by_id(payload.mailbox_id)
        .await?;

    // The payload is written in the same terminal step as the job status,
    // so its watermarks win over the mailbox row when both exist.
    if !payload.folder_last_uid.is_empty() || !payload.folder_uid_validity.is_empty() {
        mailbox.folder_last_uid = payload.folder_last_uid;
        mailbox.folder_uid_validity = payload.folder_uid_validity;
    }

    Ok(Box::new(MigrateMailboxJob::new(env, list, mailbox)))
}

pub struct MigrateMailboxJob {
    env: JobEnv,
    list: SyncList,
    mailbox: Mailbox,
    dial_timeout: Duration,
}

impl MigrateMailboxJob {
    pub fn new(env: JobEnv, list: SyncList, mailbox: Mailbox) -> Self {
        Self {
            env,
            list,
            mailbox,
            dial_timeout: DIAL_TIMEOUT,
        }
    }

    /// Tests shrink the dial bound; production uses [`DIAL_TIMEOUT`].
    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    async fn dial_pair(&self) -> Result<(MailSession, MailSession)> {
        let insecure = self.env.settings.debug;

        let dial_both = async {
            tokio::join!(
                imap::dial(&self.list.src_host, self.list.src_port, insecure),
                imap::dial(&self.list.dst_host, self.list.dst_port, insecure),
            )
        };
        let (src_client, dst_client) = tokio::time::timeout(self.dial_timeout, dial_both)
            .await
            .map_err(|_| {
                ImapError::DialTimeout(format!(
                    "{}:{} / {}:{}",
                    self.list.src_host, self.list.src_port, self.list.dst_host, self.list.dst_port
                ))
            })?;
        let src_client = src_client?;
        let dst_client = dst_client?;

        let vault = CredentialVault::new(&self.env.settings.app_key)?;
        let src_password = vault.decrypt(&self.mailbox.src_password_cipher)?;
        let dst_password = vault.decrypt(&self.mailbox.dst_password_cipher)?;

        let src = MailSession::login(src_client, &self.mailbox.src_user, &src_password).await?;
        let dst = MailSession::login(dst_client, &self.mailbox.dst_user, &dst_password).await?;

        Ok((src, dst))
    }

    async fn sync_folders(
        &mut self,
        src: &mut MailSession,
        dst: &mut MailSession,
        ctx: &JobContext,
    ) -> Result<()> {
        let folders = src.list_folders().await?;
        debug!(
            "mailbox {}: migrating {} folders",
            self.mailbox.id,
            folders.len()
        );

        for folder in folders {
            ctx.check_canceled()?;
            self.sync_folder(src, dst, ctx, &folder).await?;
        }

        Ok(())
    }

    async fn sync_folder(
        &mut self,
        src: &mut MailSession,
        dst: &mut MailSession,
        ctx: &JobContext,
        folder: &str,
    ) -> Result<()> {
        let uid_validity = src.examine(folder).await?;

        // A rotated UIDVALIDITY invalidates every stored UID for the
        // folder; reset the watermark and re-scan from the start.
        let stored_validity = self
            .mailbox
            .folder_uid_validity
            .get(folder)
            .copied()
            .unwrap_or(0);
        if stored_validity == 0 || stored_validity != uid_validity {
            self.mailbox
                .folder_uid_validity
                .insert(folder.to_string(), uid_validity);
            self.mailbox.folder_last_uid.insert(folder.to_string(), 0);
        }

        let query = if self.list.compare_last_uid {
            let last_uid = self.last_uid(folder);
            format!("UID {}:*", last_uid.saturating_add(1))
        } else {
            "ALL".to_string()
        };

        let uids = src.uid_search(&query).await?;
        if uids.is_empty() {
            return Ok(());
        }

        if let Err(e) = dst.create_folder(folder).await {
            if !folder_already_exists(&e) {
                warn!("failed to create destination folder {folder}: {e}");
                return Err(e.into());
            }
        }

        let uid_set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut stream = src.uid_fetch(&uid_set, FETCH_ITEMS).await?;
        loop {
            ctx.check_canceled()?;

            let msg = tokio::select! {
                next = stream.try_next() => match next.map_err(ImapError::from)? {
                    Some(msg) => msg,
                    None => break,
                },
                _ = ctx.cancelled() => return Err(Error::Canceled),
            };

            let uid = match msg.uid {
                Some(uid) => uid,
                None => continue,
            };

            if self.list.compare_last_uid && uid <= self.last_uid(folder) {
                debug!("folder {folder}: UID {uid} at or below watermark, skipping");
                continue;
            }

            if self.list.compare_message_ids
                && self.destination_has_message(dst, folder, &msg).await
            {
                continue;
            }

            let body = match msg.body() {
                Some(body) if !body.is_empty() => body,
                _ => continue,
            };

            let flags = append_flags(&msg);
            let internal_date = append_date(&msg);

            // APPEND is the long pole; race it against cancellation so a
            // stop lands within one IMAP operation.
            tokio::select! {
                result = dst.append(folder, flags.as_deref(), internal_date.as_deref(), body) => {
                    result?;
                }
                _ = ctx.cancelled() => return Err(Error::Canceled),
            }

            self.mailbox
                .folder_last_uid
                .insert(folder.to_string(), uid);
        }

        Ok(())
    }

    /// Checks whether the destination folder already holds a message with
    /// the same Message-ID. Failures here are logged and treated as "yes":
    /// the message is skipped rather than failing the job.
    async fn destination_has_message(
        &self,
        dst: &mut MailSession,
        folder: &str,
        msg: &Fetch,
    ) -> bool {
        let message_id = match message_id(msg) {
            Some(id) => id,
            None => return false,
        };

        if let Err(e) = dst.examine(folder).await {
            warn!("failed to select destination folder {folder}: {e}");
            return true;
        }

        let query = format!("HEADER Message-ID \"{message_id}\" NOT DELETED");
        match dst.uid_search(&query).await {
            Ok(existing) if !existing.is_empty() => {
                debug!("folder {folder}: Message-ID {message_id} already in destination");
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("destination Message-ID search failed in {folder}: {e}");
                true
            }
        }
    }

    fn last_uid(&self, folder: &str) -> u32 {
        self.mailbox
            .folder_last_uid
            .get(folder)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl JobHandler for MigrateMailboxJob {
    async fn run(&mut self, ctx: &JobContext) -> Result<()> {
        debug!(
            "starting migration of mailbox {} ({} -> {})",
            self.mailbox.id, self.mailbox.src_user, self.mailbox.dst_user
        );

        let (mut src, mut dst) = self.dial_pair().await?;

        let result = self.sync_folders(&mut src, &mut dst, ctx).await;

        if let Err(e) = src.logout().await {
            debug!("source logout failed: {e}");
        }
        if let Err(e) = dst.logout().await {
            debug!("destination logout failed: {e}");
        }

        result
    }

    /// Writes the watermarks back to the mailbox row so the next job
    /// instance resumes without relying on the payload alone.
    async fn on_stop(&mut self, _ctx: &JobContext) -> Result<()> {
        MailboxStore::new(self.env.pool.clone())
            .update_progress(
                self.mailbox.id,
                &self.mailbox.folder_last_uid,
                &self.mailbox.folder_uid_validity,
            )
            .await
    }

    fn snapshot(&self) -> std::result::Result<Value, serde_json::Error> {
        serde_json::to_value(MigrateMailboxPayload {
            sync_list_id: self.list.id,
            mailbox_id: self.mailbox.id,
            folder_last_uid: self.mailbox.folder_last_uid.clone(),
            folder_uid_validity: self.mailbox.folder_uid_validity.clone(),
        })
    }
}

/// `CREATE` of an existing folder is success, not failure. Servers phrase
/// the rejection differently, so match on the response text.
fn folder_already_exists(e: &ImapError) -> bool {
    let text = e.to_string().to_uppercase();
    text.contains("ALREADYEXISTS") || text.contains("ALREADY EXISTS")
}

fn message_id(msg: &Fetch) -> Option<String> {
    let envelope = msg.envelope()?;
    let raw = envelope.message_id.as_ref()?;
    let id = String::from_utf8_lossy(raw).trim().to_string();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Original flags in IMAP list syntax, e.g. `(\Seen \Flagged)`. `\Recent`
/// is server-managed and cannot be APPENDed.
fn append_flags(msg: &Fetch) -> Option<String> {
    let mut flags = Vec::new();
    for flag in msg.flags() {
        match flag {
            Flag::Seen => flags.push("\\Seen".to_string()),
            Flag::Answered => flags.push("\\Answered".to_string()),
            Flag::Flagged => flags.push("\\Flagged".to_string()),
            Flag::Deleted => flags.push("\\Deleted".to_string()),
            Flag::Draft => flags.push("\\Draft".to_string()),
            Flag::Recent => {}
            Flag::Custom(name) => flags.push(name.to_string()),
            _ => {}
        }
    }

    if flags.is_empty() {
        None
    } else {
        Some(format!("({})", flags.join(" ")))
    }
}

/// INTERNALDATE for the APPEND, quoted IMAP date-time. Prefers the
/// envelope's Date header, falling back to the source INTERNALDATE.
fn append_date(msg: &Fetch) -> Option<String> {
    let from_envelope = msg
        .envelope()
        .and_then(|envelope| envelope.date.as_ref())
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|text| DateTime::parse_from_rfc2822(text.trim()).ok());

    from_envelope
        .or_else(|| msg.internal_date())
        .map(|date| format!("\"{}\"", date.format("%d-%b-%Y %H:%M:%S %z")))
}
