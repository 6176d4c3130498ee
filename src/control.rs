// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Control surface: the operations the HTTP layer invokes on behalf of an
//! authenticated user. Start / stop / delete semantics live here; request
//! parsing, sessions, and rendering do not.

use chrono::Utc;
use log::debug;
use sqlx::SqlitePool;

use crate::error::{Error, Result};
use crate::jobs::{MigrateMailboxPayload, MIGRATE_MAILBOX_TYPE};
use crate::models::{
    Job, JobPatch, JobStatus, JobStore, Mailbox, MailboxStore, SyncList, SyncListStore,
    UpdateSyncListParams,
};
use crate::notify::Notifier;
use crate::worker::RunningJobs;

pub const MAILBOXES_TABLE: &str = "mailboxes";

#[derive(Clone)]
pub struct Control {
    sync_lists: SyncListStore,
    mailboxes: MailboxStore,
    jobs: JobStore,
    running: RunningJobs,
}

impl Control {
    pub fn new(pool: SqlitePool, notifier: Notifier, running: RunningJobs) -> Self {
        Self {
            sync_lists: SyncListStore::new(pool.clone()),
            mailboxes: MailboxStore::new(pool.clone()),
            jobs: JobStore::new(pool, notifier),
            running,
        }
    }

    /// Loads a sync list and enforces that the session user owns it.
    async fn owned_list(&self, user_id: i64, sync_list_id: i64) -> Result<SyncList> {
        let list = self.sync_lists.find_by_id(sync_list_id).await?;
        if list.user_id != user_id {
            return Err(Error::Unauthorized);
        }
        Ok(list)
    }

    async fn owned_mailbox(&self, list: &SyncList, mailbox_id: i64) -> Result<Mailbox> {
        let mailbox = self.mailboxes.find_by_id(mailbox_id).await?;
        if mailbox.sync_list_id != list.id {
            return Err(Error::NotFound);
        }
        Ok(mailbox)
    }

    /// Starts (or resumes) migration jobs for every mailbox of a sync list.
    /// An active job on any mailbox rejects the whole operation before any
    /// job row is touched.
    pub async fn start_migration(&self, user_id: i64, sync_list_id: i64) -> Result<Vec<Job>> {
        let list = self.owned_list(user_id, sync_list_id).await?;
        let mailboxes = self.mailboxes.find_by_sync_list(list.id).await?;
        if mailboxes.is_empty() {
            return Err(Error::Validation("sync list has no mailboxes".to_string()));
        }

        let mailbox_ids: Vec<i64> = mailboxes.iter().map(|mailbox| mailbox.id).collect();
        self.ensure_no_active_jobs(&mailbox_ids).await?;

        let mut jobs = Vec::with_capacity(mailboxes.len());
        for mailbox in &mailboxes {
            jobs.push(self.start_mailbox_job(user_id, &list, mailbox.id).await?);
        }
        Ok(jobs)
    }

    /// Starts (or resumes) the migration job for a single mailbox.
    pub async fn start_one(
        &self,
        user_id: i64,
        sync_list_id: i64,
        mailbox_id: i64,
    ) -> Result<Job> {
        let list = self.owned_list(user_id, sync_list_id).await?;
        let mailbox = self.owned_mailbox(&list, mailbox_id).await?;
        self.start_mailbox_job(user_id, &list, mailbox.id).await
    }

    async fn start_mailbox_job(
        &self,
        user_id: i64,
        list: &SyncList,
        mailbox_id: i64,
    ) -> Result<Job> {
        match self.jobs.find_by_related(MAILBOXES_TABLE, mailbox_id).await? {
            None => {
                let payload =
                    serde_json::to_value(MigrateMailboxPayload::fresh(list.id, mailbox_id))?;
                self.jobs
                    .create(
                        user_id,
                        MIGRATE_MAILBOX_TYPE,
                        Some((MAILBOXES_TABLE, mailbox_id)),
                        payload,
                    )
                    .await
            }
            Some(job) if job.status.is_active() => Err(Error::Conflict),
            Some(job) => {
                // Resume: back to pending with the payload preserved, so
                // the next claim picks up the persisted watermarks.
                debug!("resuming job {} for mailbox {mailbox_id}", job.id);
                let patch = JobPatch {
                    status: Some(JobStatus::Pending),
                    started_at: Some(Some(Utc::now())),
                    finished_at: Some(None),
                    ..Default::default()
                };
                self.jobs.update(job.id, &patch).await?;
                self.jobs.find_by_id(job.id).await
            }
        }
    }

    /// Stops every active job under a sync list: cancels the running
    /// handlers through the running-jobs index and marks the rows
    /// `interrupted` in one bulk update.
    pub async fn stop_migration(&self, user_id: i64, sync_list_id: i64) -> Result<()> {
        let list = self.owned_list(user_id, sync_list_id).await?;
        let mailboxes = self.mailboxes.find_by_sync_list(list.id).await?;
        let mailbox_ids: Vec<i64> = mailboxes.iter().map(|mailbox| mailbox.id).collect();

        let jobs = self
            .jobs
            .find_by_related_bulk(MAILBOXES_TABLE, &mailbox_ids)
            .await?;
        self.stop_jobs(&jobs).await
    }

    /// Stops the active job for a single mailbox.
    pub async fn stop_one(&self, user_id: i64, sync_list_id: i64, mailbox_id: i64) -> Result<()> {
        let list = self.owned_list(user_id, sync_list_id).await?;
        let mailbox = self.owned_mailbox(&list, mailbox_id).await?;

        let job = self
            .jobs
            .find_by_related(MAILBOXES_TABLE, mailbox.id)
            .await?
            .ok_or(Error::NotFound)?;
        if !job.status.is_active() {
            return Err(Error::Conflict);
        }

        self.stop_jobs(std::slice::from_ref(&job)).await
    }

    async fn stop_jobs(&self, jobs: &[Job]) -> Result<()> {
        let mut updates = Vec::new();
        for job in jobs {
            if !job.status.is_active() {
                continue;
            }

            if let Some(entry) = self.running.get(job.id) {
                debug!("cancelling running job {}", job.id);
                entry.cancel();
            }

            updates.push((
                job.id,
                JobPatch {
                    status: Some(JobStatus::Interrupted),
                    error: Some(None),
                    finished_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            ));
        }

        self.jobs.bulk_update(&updates).await
    }

    /// Edits a sync list's configuration. Forbidden while any related job
    /// is pending or running: a migration must not see its endpoints or
    /// comparison flags change mid-flight.
    pub async fn update_sync_list(
        &self,
        user_id: i64,
        sync_list_id: i64,
        params: UpdateSyncListParams,
    ) -> Result<SyncList> {
        let mut list = self.owned_list(user_id, sync_list_id).await?;

        let mailboxes = self.mailboxes.find_by_sync_list(list.id).await?;
        let mailbox_ids: Vec<i64> = mailboxes.iter().map(|mailbox| mailbox.id).collect();
        self.ensure_no_active_jobs(&mailbox_ids).await?;

        list.name = params.name;
        list.src_host = params.src_host;
        list.src_port = params.src_port;
        list.dst_host = params.dst_host;
        list.dst_port = params.dst_port;
        list.compare_message_ids = params.compare_message_ids;
        list.compare_last_uid = params.compare_last_uid;

        self.sync_lists.update(&list).await?;
        Ok(list)
    }

    /// Deletes the job history of a mailbox. Forbidden while a job is
    /// pending or running.
    pub async fn delete_jobs(
        &self,
        user_id: i64,
        sync_list_id: i64,
        mailbox_id: i64,
    ) -> Result<()> {
        let list = self.owned_list(user_id, sync_list_id).await?;
        let mailbox = self.owned_mailbox(&list, mailbox_id).await?;

        self.ensure_no_active_jobs(&[mailbox.id]).await?;
        self.jobs.delete_by_related(MAILBOXES_TABLE, mailbox.id).await
    }

    /// Deletes a mailbox and its jobs. Forbidden while a job is active.
    pub async fn delete_mailbox(
        &self,
        user_id: i64,
        sync_list_id: i64,
        mailbox_id: i64,
    ) -> Result<()> {
        let list = self.owned_list(user_id, sync_list_id).await?;
        let mailbox = self.owned_mailbox(&list, mailbox_id).await?;

        self.ensure_no_active_jobs(&[mailbox.id]).await?;
        self.mailboxes.delete(mailbox.id).await
    }

    /// Deletes a sync list with full cascade: mailboxes first, then every
    /// job referencing them. Forbidden while any related job is active;
    /// storage is left untouched in that case.
    pub async fn delete_sync_list(&self, user_id: i64, sync_list_id: i64) -> Result<()> {
        let list = self.owned_list(user_id, sync_list_id).await?;
        let mailboxes = self.mailboxes.find_by_sync_list(list.id).await?;
        let mailbox_ids: Vec<i64> = mailboxes.iter().map(|mailbox| mailbox.id).collect();

        self.ensure_no_active_jobs(&mailbox_ids).await?;
        self.sync_lists.delete_cascade(list.id).await
    }

    /// Aggregated status of a sync list, collapsed by the rollup priority.
    pub async fn sync_list_status(&self, user_id: i64, sync_list_id: i64) -> Result<JobStatus> {
        let list = self.owned_list(user_id, sync_list_id).await?;
        self.jobs.list_status(list.id).await
    }

    pub async fn sync_list_status_bulk(
        &self,
        user_id: i64,
        sync_list_ids: &[i64],
    ) -> Result<Vec<(i64, JobStatus)>> {
        for id in sync_list_ids {
            self.owned_list(user_id, *id).await?;
        }
        self.jobs.list_status_bulk(sync_list_ids).await
    }

    async fn ensure_no_active_jobs(&self, mailbox_ids: &[i64]) -> Result<()> {
        let jobs = self
            .jobs
            .find_by_related_bulk(MAILBOXES_TABLE, mailbox_ids)
            .await?;
        if jobs.iter().any(|job| job.status.is_active()) {
            return Err(Error::Conflict);
        }
        Ok(())
    }
}
