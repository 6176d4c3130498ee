//! Shared fixtures for integration tests.

#![allow(dead_code)]

pub mod fake_imap;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tempfile::NamedTempFile;

use mailferry::config::Settings;
use mailferry::db;
use mailferry::models::{
    CreateSyncListParams, Job, JobStatus, JobStore, Mailbox, MailboxStore, SyncList,
    SyncListStore, User, UserStore,
};
use mailferry::vault::CredentialVault;

/// Base64 of 32 zero bytes; a valid AES-256 key for tests.
pub const TEST_APP_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

pub const SRC_PASSWORD: &str = "source-secret";
pub const DST_PASSWORD: &str = "destination-secret";

static SEQ: AtomicU64 = AtomicU64::new(0);

fn unique() -> u64 {
    SEQ.fetch_add(1, Ordering::Relaxed)
}

/// File-backed SQLite database with migrations applied. The temp file must
/// outlive the pool, so both travel together.
pub struct TestDb {
    pub pool: SqlitePool,
    _file: NamedTempFile,
}

pub async fn test_db() -> TestDb {
    let file = NamedTempFile::new().expect("create temp database file");
    let uri = format!("sqlite://{}", file.path().display());

    let pool = db::connect(&uri).await.expect("open test database");
    db::run_migrations(&pool).await.expect("run migrations");

    TestDb { pool, _file: file }
}

pub fn test_settings(worker_count: usize) -> Arc<Settings> {
    Arc::new(Settings {
        app_key: TEST_APP_KEY.to_string(),
        worker_count,
        job_timeout_minutes: 10,
        db_uri: "unused-by-tests".to_string(),
        debug: true,
    })
}

pub async fn seed_user(pool: &SqlitePool) -> User {
    UserStore::new(pool.clone())
        .create(&format!("user{}@example.test", unique()), "hash")
        .await
        .expect("seed user")
}

pub struct SeedListParams {
    pub src_port: u16,
    pub dst_port: u16,
    pub compare_message_ids: bool,
    pub compare_last_uid: bool,
}

pub async fn seed_list(pool: &SqlitePool, user_id: i64, params: SeedListParams) -> SyncList {
    SyncListStore::new(pool.clone())
        .create(CreateSyncListParams {
            user_id,
            name: format!("list-{}", unique()),
            src_host: "127.0.0.1".to_string(),
            src_port: params.src_port,
            dst_host: "127.0.0.1".to_string(),
            dst_port: params.dst_port,
            compare_message_ids: params.compare_message_ids,
            compare_last_uid: params.compare_last_uid,
        })
        .await
        .expect("seed sync list")
}

pub async fn seed_mailbox(pool: &SqlitePool, sync_list_id: i64) -> Mailbox {
    let vault = CredentialVault::new(TEST_APP_KEY).unwrap();
    let src_cipher = vault.encrypt(SRC_PASSWORD).unwrap();
    let dst_cipher = vault.encrypt(DST_PASSWORD).unwrap();

    MailboxStore::new(pool.clone())
        .create(
            sync_list_id,
            "alice@src.test",
            &src_cipher,
            "alice@dst.test",
            &dst_cipher,
        )
        .await
        .expect("seed mailbox")
}

/// Polls until the job reaches the wanted status or the deadline passes.
pub async fn wait_for_status(store: &JobStore, job_id: i64, wanted: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);

    loop {
        let job = store.find_by_id(job_id).await.expect("job exists");
        if job.status == wanted {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "job {job_id} stuck in {:?} (error: {:?}), wanted {wanted:?}",
                job.status, job.error
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Polls until the job reaches any terminal status.
pub async fn wait_for_terminal(store: &JobStore, job_id: i64) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);

    loop {
        let job = store.find_by_id(job_id).await.expect("job exists");
        if matches!(
            job.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Interrupted
        ) {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {job_id} never finished, stuck in {:?}", job.status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
