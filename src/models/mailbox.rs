// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mailboxes: one credential pair per sync list entry, plus the persisted
//! per-folder migration watermarks.

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::error::{Error, Result};
use crate::models::{Paginated, Pagination, PAGE_LIMIT};

/// Per-folder progress map: folder name to the highest UID known to be
/// delivered (or the folder's UIDVALIDITY generation).
pub type FolderMap = HashMap<String, u32>;

#[derive(Debug, Clone)]
pub struct Mailbox {
    pub id: i64,
    pub sync_list_id: i64,
    pub src_user: String,
    /// AES-256-GCM ciphertext, base64-encoded. Never plaintext.
    pub src_password_cipher: String,
    pub dst_user: String,
    pub dst_password_cipher: String,
    pub folder_last_uid: FolderMap,
    pub folder_uid_validity: FolderMap,
}

#[derive(sqlx::FromRow)]
struct MailboxRow {
    id: i64,
    sync_list_id: i64,
    src_user: String,
    src_password_cipher: String,
    dst_user: String,
    dst_password_cipher: String,
    folder_last_uid: String,
    folder_uid_validity: String,
}

impl From<MailboxRow> for Mailbox {
    fn from(row: MailboxRow) -> Self {
        Mailbox {
            id: row.id,
            sync_list_id: row.sync_list_id,
            src_user: row.src_user,
            src_password_cipher: row.src_password_cipher,
            dst_user: row.dst_user,
            dst_password_cipher: row.dst_password_cipher,
            folder_last_uid: serde_json::from_str(&row.folder_last_uid).unwrap_or_default(),
            folder_uid_validity: serde_json::from_str(&row.folder_uid_validity)
                .unwrap_or_default(),
        }
    }
}

const COLUMNS: &str = "id, sync_list_id, src_user, src_password_cipher, dst_user, \
                       dst_password_cipher, folder_last_uid, folder_uid_validity";

#[derive(Clone)]
pub struct MailboxStore {
    pool: SqlitePool,
}

impl MailboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        sync_list_id: i64,
        src_user: &str,
        src_password_cipher: &str,
        dst_user: &str,
        dst_password_cipher: &str,
    ) -> Result<Mailbox> {
        let sql = format!(
            "INSERT INTO mailboxes \
             (sync_list_id, src_user, src_password_cipher, dst_user, dst_password_cipher, \
              folder_last_uid, folder_uid_validity) \
             VALUES (?, ?, ?, ?, ?, '{{}}', '{{}}') RETURNING {COLUMNS}"
        );
        let row: MailboxRow = sqlx::query_as(&sql)
            .bind(sync_list_id)
            .bind(src_user)
            .bind(src_password_cipher)
            .bind(dst_user)
            .bind(dst_password_cipher)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Mailbox> {
        let sql = format!("SELECT {COLUMNS} FROM mailboxes WHERE id = ?");
        let row: Option<MailboxRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Mailbox::from).ok_or(Error::NotFound)
    }

    pub async fn find_by_sync_list(&self, sync_list_id: i64) -> Result<Vec<Mailbox>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM mailboxes WHERE sync_list_id = ? \
             ORDER BY src_user ASC, dst_user ASC"
        );
        let rows: Vec<MailboxRow> = sqlx::query_as(&sql)
            .bind(sync_list_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Mailbox::from).collect())
    }

    pub async fn find_by_sync_list_paginated(
        &self,
        sync_list_id: i64,
        page: i64,
    ) -> Result<Paginated<Mailbox>> {
        let pagination_probe = Pagination::new(page, 0);
        let sql = format!(
            "SELECT {COLUMNS} FROM mailboxes WHERE sync_list_id = ? \
             ORDER BY src_user ASC, dst_user ASC LIMIT ? OFFSET ?"
        );
        let rows: Vec<MailboxRow> = sqlx::query_as(&sql)
            .bind(sync_list_id)
            .bind(PAGE_LIMIT)
            .bind(pagination_probe.offset())
            .fetch_all(&self.pool)
            .await?;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM mailboxes WHERE sync_list_id = ?")
                .bind(sync_list_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(Paginated {
            items: rows.into_iter().map(Mailbox::from).collect(),
            pagination: Pagination::new(page, total),
        })
    }

    /// Writes the migration watermarks back to the row. Called from the
    /// migration handler's stop hook so the next job instance can resume
    /// without relying on the job payload alone.
    pub async fn update_progress(
        &self,
        id: i64,
        folder_last_uid: &FolderMap,
        folder_uid_validity: &FolderMap,
    ) -> Result<()> {
        sqlx::query("UPDATE mailboxes SET folder_last_uid = ?, folder_uid_validity = ? WHERE id = ?")
            .bind(serde_json::to_string(folder_last_uid)?)
            .bind(serde_json::to_string(folder_uid_validity)?)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Deletes the mailbox and any jobs that reference it.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM jobs WHERE related_table = 'mailboxes' AND related_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM mailboxes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
