// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Durable job rows and the store that owns them.
//!
//! The `jobs` table is the single source of truth for job lifecycle. The
//! store publishes a `jobs:updated` event after every mutation that can move
//! a job into or out of `pending`, so sleeping workers wake up promptly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::Sqlite;
use sqlx::{QueryBuilder, SqlitePool};

use crate::error::{Error, Result};
use crate::notify::{Notifier, JOBS_UPDATED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Interrupted,
    Completed,
    Failed,
    /// Synthetic rollup value for "no related jobs exist"; never stored.
    None,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Interrupted => "interrupted",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::None => "none",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => JobStatus::Running,
            "interrupted" => JobStatus::Interrupted,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "none" => JobStatus::None,
            _ => JobStatus::Pending,
        }
    }

    /// A job in this state may be started (or restarted) by the user.
    pub fn is_startable(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Interrupted
        )
    }

    /// A job in this state blocks edits and deletes of its related entity.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub user_id: i64,
    pub related_table: Option<String>,
    pub related_id: Option<i64>,
    pub job_type: String,
    pub status: JobStatus,
    /// Opaque handler state; rewritten by the worker runtime on terminal
    /// transitions. This is how progress survives restarts.
    pub payload: Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    user_id: i64,
    related_table: Option<String>,
    related_id: Option<i64>,
    #[sqlx(rename = "type")]
    job_type: String,
    status: String,
    payload: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            user_id: row.user_id,
            related_table: row.related_table,
            related_id: row.related_id,
            job_type: row.job_type,
            status: JobStatus::from_str(&row.status),
            payload: serde_json::from_str(&row.payload).unwrap_or(Value::Null),
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

/// Partial update for a job row. Fields left as `None` keep their stored
/// value; `Some(None)` on a nullable column clears it. This is what lets the
/// worker rewrite `payload` and `status` without clobbering `created_at` or
/// `started_at`.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub payload: Option<Value>,
    pub error: Option<Option<String>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub finished_at: Option<Option<DateTime<Utc>>>,
}

impl JobPatch {
    fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.payload.is_none()
            && self.error.is_none()
            && self.started_at.is_none()
            && self.finished_at.is_none()
    }
}

const COLUMNS: &str =
    "id, user_id, related_table, related_id, type, status, payload, error, created_at, started_at, finished_at";

#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
    notifier: Notifier,
}

impl JobStore {
    pub fn new(pool: SqlitePool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }

    pub async fn create(
        &self,
        user_id: i64,
        job_type: &str,
        related: Option<(&str, i64)>,
        payload: Value,
    ) -> Result<Job> {
        let (related_table, related_id) = match related {
            Some((table, id)) => (Some(table), Some(id)),
            None => (None, None),
        };

        let sql = format!(
            "INSERT INTO jobs (user_id, related_table, related_id, type, status, payload, created_at) \
             VALUES (?, ?, ?, ?, 'pending', ?, ?) RETURNING {COLUMNS}"
        );
        let row: JobRow = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(related_table)
            .bind(related_id)
            .bind(job_type)
            .bind(payload.to_string())
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(insert_error)?;

        self.notifier.publish(JOBS_UPDATED);
        Ok(row.into())
    }

    /// Inserts one pending job per `(related_id, payload)` pair in a single
    /// statement.
    pub async fn bulk_create(
        &self,
        user_id: i64,
        job_type: &str,
        related_table: &str,
        items: &[(i64, Value)],
    ) -> Result<Vec<Job>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO jobs (user_id, related_table, related_id, type, status, payload, created_at) ",
        );
        builder.push_values(items, |mut b, (related_id, payload)| {
            b.push_bind(user_id)
                .push_bind(related_table)
                .push_bind(*related_id)
                .push_bind(job_type)
                .push_bind("pending")
                .push_bind(payload.to_string())
                .push_bind(now);
        });
        builder.push(format!(" RETURNING {COLUMNS}"));

        let rows: Vec<JobRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(insert_error)?;

        self.notifier.publish(JOBS_UPDATED);
        Ok(rows.into_iter().map(Job::from).collect())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Job> {
        let sql = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::from).ok_or(Error::NotFound)
    }

    pub async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM jobs WHERE id IN ("));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        builder.push(")");

        let rows: Vec<JobRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Job::from).collect())
    }

    /// At most one job exists per related entity (control-surface invariant
    /// plus a partial unique index for the active states).
    pub async fn find_by_related(&self, table: &str, id: i64) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs WHERE related_table = ? AND related_id = ? \
             ORDER BY created_at DESC LIMIT 1"
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(table)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Job::from))
    }

    pub async fn find_by_related_bulk(&self, table: &str, ids: &[i64]) -> Result<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM jobs WHERE related_table = "
        ));
        builder.push_bind(table);
        builder.push(" AND related_id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        builder.push(")");

        let rows: Vec<JobRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Job::from).collect())
    }

    pub async fn find_pending_oldest(&self) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC LIMIT 1"
        );
        let row: Option<JobRow> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        Ok(row.map(Job::from))
    }

    /// Atomically transitions a pending job to `running`. Returns `false`
    /// when another worker won the race; losing is not an error.
    pub async fn claim(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', started_at = ?, error = NULL \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() > 0;
        if claimed {
            self.notifier.publish(JOBS_UPDATED);
        }
        Ok(claimed)
    }

    /// Primary-key update that only touches the columns present in the
    /// patch.
    pub async fn update(&self, id: i64, patch: &JobPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut builder = Self::patch_query(id, patch);
        builder.build().execute(&self.pool).await?;

        if patch.status.is_some() {
            self.notifier.publish(JOBS_UPDATED);
        }
        Ok(())
    }

    pub async fn bulk_update(&self, updates: &[(i64, JobPatch)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let mut touched_status = false;
        for (id, patch) in updates {
            if patch.is_empty() {
                continue;
            }
            let mut builder = Self::patch_query(*id, patch);
            builder.build().execute(&mut *tx).await?;
            touched_status |= patch.status.is_some();
        }
        tx.commit().await?;

        if touched_status {
            self.notifier.publish(JOBS_UPDATED);
        }
        Ok(())
    }

    fn patch_query(id: i64, patch: &JobPatch) -> QueryBuilder<'_, Sqlite> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE jobs SET ");
        let mut separated = builder.separated(", ");

        if let Some(status) = patch.status {
            separated.push("status = ");
            separated.push_bind_unseparated(status.as_str());
        }
        if let Some(payload) = &patch.payload {
            separated.push("payload = ");
            separated.push_bind_unseparated(payload.to_string());
        }
        if let Some(error) = &patch.error {
            separated.push("error = ");
            separated.push_bind_unseparated(error.clone());
        }
        if let Some(started_at) = &patch.started_at {
            separated.push("started_at = ");
            separated.push_bind_unseparated(*started_at);
        }
        if let Some(finished_at) = &patch.finished_at {
            separated.push("finished_at = ");
            separated.push_bind_unseparated(*finished_at);
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder
    }

    pub async fn delete_by_related(&self, table: &str, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE related_table = ? AND related_id = ?")
            .bind(table)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.notifier.publish(JOBS_UPDATED);
        Ok(())
    }

    pub async fn delete_by_related_bulk(&self, table: &str, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM jobs WHERE related_table = ");
        builder.push_bind(table);
        builder.push(" AND related_id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        builder.push(")");
        builder.build().execute(&self.pool).await?;

        self.notifier.publish(JOBS_UPDATED);
        Ok(())
    }

    /// Collapses the statuses of all jobs under a sync list's mailboxes into
    /// one verdict, in a single round trip.
    ///
    /// Priority: `running` > `interrupted` > `failed` > all-`completed` >
    /// all-`pending` > `none`, where "all" quantifies over related jobs that
    /// actually exist.
    pub async fn list_status(&self, sync_list_id: i64) -> Result<JobStatus> {
        let row: Option<(i64, String)> = sqlx::query_as(ROLLUP_SQL_SINGLE)
            .bind(sync_list_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((_, status)) => Ok(JobStatus::from_str(&status)),
            None => Err(Error::NotFound),
        }
    }

    pub async fn list_status_bulk(&self, sync_list_ids: &[i64]) -> Result<Vec<(i64, JobStatus)>> {
        if sync_list_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(ROLLUP_SQL_PREFIX);
        builder.push(" WHERE sl.id IN (");
        let mut separated = builder.separated(", ");
        for id in sync_list_ids {
            separated.push_bind(*id);
        }
        builder.push(") GROUP BY sl.id");

        let rows: Vec<(i64, String)> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(id, status)| (id, JobStatus::from_str(&status)))
            .collect())
    }
}

/// A lost race on the partial unique index over active `(related_table,
/// related_id)` rows is a conflict, the same verdict the control surface's
/// own pre-check produces.
fn insert_error(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict,
        _ => Error::Db(e),
    }
}

const ROLLUP_SQL_PREFIX: &str = "\
SELECT sl.id AS id,
       CASE
           WHEN MAX(CASE WHEN j.status = 'running' THEN 1 ELSE 0 END) = 1 THEN 'running'
           WHEN MAX(CASE WHEN j.status = 'interrupted' THEN 1 ELSE 0 END) = 1 THEN 'interrupted'
           WHEN MAX(CASE WHEN j.status = 'failed' THEN 1 ELSE 0 END) = 1 THEN 'failed'
           WHEN COUNT(j.id) > 0
                AND SUM(CASE WHEN j.status = 'completed' THEN 1 ELSE 0 END) = COUNT(j.id) THEN 'completed'
           WHEN COUNT(j.id) > 0
                AND SUM(CASE WHEN j.status = 'pending' THEN 1 ELSE 0 END) = COUNT(j.id) THEN 'pending'
           ELSE 'none'
       END AS status
FROM sync_lists sl
LEFT JOIN mailboxes mb ON mb.sync_list_id = sl.id
LEFT JOIN jobs j ON j.related_table = 'mailboxes' AND j.related_id = mb.id";

const ROLLUP_SQL_SINGLE: &str = "\
SELECT sl.id AS id,
       CASE
           WHEN MAX(CASE WHEN j.status = 'running' THEN 1 ELSE 0 END) = 1 THEN 'running'
           WHEN MAX(CASE WHEN j.status = 'interrupted' THEN 1 ELSE 0 END) = 1 THEN 'interrupted'
           WHEN MAX(CASE WHEN j.status = 'failed' THEN 1 ELSE 0 END) = 1 THEN 'failed'
           WHEN COUNT(j.id) > 0
                AND SUM(CASE WHEN j.status = 'completed' THEN 1 ELSE 0 END) = COUNT(j.id) THEN 'completed'
           WHEN COUNT(j.id) > 0
                AND SUM(CASE WHEN j.status = 'pending' THEN 1 ELSE 0 END) = COUNT(j.id) THEN 'pending'
           ELSE 'none'
       END AS status
FROM sync_lists sl
LEFT JOIN mailboxes mb ON mb.sync_list_id = sl.id
LEFT JOIN jobs j ON j.related_table = 'mailboxes' AND j.related_id = mb.id
WHERE sl.id = ?
GROUP BY sl.id";
