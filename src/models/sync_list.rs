// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sync lists: named migration configurations owned by a user.

use sqlx::SqlitePool;

use crate::error::{Error, Result};
use crate::models::{Paginated, Pagination, PAGE_LIMIT};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncList {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub src_host: String,
    pub src_port: u16,
    pub dst_host: String,
    pub dst_port: u16,
    pub compare_message_ids: bool,
    pub compare_last_uid: bool,
}

#[derive(Debug, Clone)]
pub struct CreateSyncListParams {
    pub user_id: i64,
    pub name: String,
    pub src_host: String,
    pub src_port: u16,
    pub dst_host: String,
    pub dst_port: u16,
    pub compare_message_ids: bool,
    pub compare_last_uid: bool,
}

/// Editable fields of a sync list. Ownership never changes.
#[derive(Debug, Clone)]
pub struct UpdateSyncListParams {
    pub name: String,
    pub src_host: String,
    pub src_port: u16,
    pub dst_host: String,
    pub dst_port: u16,
    pub compare_message_ids: bool,
    pub compare_last_uid: bool,
}

const COLUMNS: &str = "id, user_id, name, src_host, src_port, dst_host, dst_port, \
                       compare_message_ids, compare_last_uid";

#[derive(Clone)]
pub struct SyncListStore {
    pool: SqlitePool,
}

impl SyncListStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, params: CreateSyncListParams) -> Result<SyncList> {
        let sql = format!(
            "INSERT INTO sync_lists \
             (user_id, name, src_host, src_port, dst_host, dst_port, compare_message_ids, compare_last_uid) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING {COLUMNS}"
        );
        let list: SyncList = sqlx::query_as(&sql)
            .bind(params.user_id)
            .bind(&params.name)
            .bind(&params.src_host)
            .bind(params.src_port)
            .bind(&params.dst_host)
            .bind(params.dst_port)
            .bind(params.compare_message_ids)
            .bind(params.compare_last_uid)
            .fetch_one(&self.pool)
            .await?;

        Ok(list)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<SyncList> {
        let sql = format!("SELECT {COLUMNS} FROM sync_lists WHERE id = ?");
        let list: Option<SyncList> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        list.ok_or(Error::NotFound)
    }

    pub async fn find_by_user_paginated(
        &self,
        user_id: i64,
        page: i64,
    ) -> Result<Paginated<SyncList>> {
        let pagination_probe = Pagination::new(page, 0);
        let sql = format!(
            "SELECT {COLUMNS} FROM sync_lists WHERE user_id = ? \
             ORDER BY name ASC LIMIT ? OFFSET ?"
        );
        let items: Vec<SyncList> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(PAGE_LIMIT)
            .bind(pagination_probe.offset())
            .fetch_all(&self.pool)
            .await?;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sync_lists WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(Paginated {
            items,
            pagination: Pagination::new(page, total),
        })
    }

    pub async fn update(&self, list: &SyncList) -> Result<()> {
        sqlx::query(
            "UPDATE sync_lists SET name = ?, src_host = ?, src_port = ?, dst_host = ?, \
             dst_port = ?, compare_message_ids = ?, compare_last_uid = ? WHERE id = ?",
        )
        .bind(&list.name)
        .bind(&list.src_host)
        .bind(list.src_port)
        .bind(&list.dst_host)
        .bind(list.dst_port)
        .bind(list.compare_message_ids)
        .bind(list.compare_last_uid)
        .bind(list.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deletes the list, its mailboxes, and every job referencing those
    /// mailboxes, in one transaction. The control surface is responsible
    /// for rejecting the call while related jobs are active.
    pub async fn delete_cascade(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM jobs WHERE related_table = 'mailboxes' \
             AND related_id IN (SELECT id FROM mailboxes WHERE sync_list_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM mailboxes WHERE sync_list_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM sync_lists WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
