#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Durable job store backed by SQLite.
//!
//! The store is an opaque key/value map: one row per job, keyed by
//! info-hash, with the serialized record as JSON. The `state` column is
//! duplicated out of the record purely for operator queries; the record is
//! authoritative.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use tracing::{info, warn};

use fetcharr_core::{InfoHash, Job, JobStore};
use fetcharr_events::JobState;

/// File name of the job database inside the state directory.
const DB_FILE: &str = "fetcharr.db";

/// Handle to the SQLite-backed job store.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: Pool<Sqlite>,
}

impl SqliteJobStore {
    /// Open (or create) the job database under `state_dir` and apply the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or the database
    /// cannot be opened.
    pub async fn open(state_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(state_dir)
            .await
            .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;
        let db_path = state_dir.join(DB_FILE);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open job store {}", db_path.display()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS jobs (
                info_hash TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (unixepoch())
            );
            ",
        )
        .execute(&self.pool)
        .await
        .context("failed to apply job store schema")?;
        Ok(())
    }

    /// Load every record, rewinding interrupted jobs to the state they can
    /// actually re-enter: `downloading` becomes `debrid_ready` (the direct
    /// URL is gone and must be re-unlocked), `debrid_pending` stays pending
    /// (polling resumes). Completed and errored jobs are left as-is.
    ///
    /// The rewound states are written back so a crash during recovery does
    /// not repeat the rewind against stale data.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be read or written.
    pub async fn recover(&self) -> Result<Vec<Job>> {
        let mut jobs = self.load_all().await?;
        let mut rewound = 0usize;
        for job in &mut jobs {
            if matches!(job.state, JobState::DebridPending | JobState::Downloading) {
                let target = job.resume_state();
                if job.state != target {
                    info!(
                        info_hash = %job.info_hash,
                        from = job.state.as_str(),
                        to = target.as_str(),
                        "rewinding interrupted job"
                    );
                    job.state = target;
                    rewound += 1;
                }
                self.put(job).await?;
            }
        }
        if rewound > 0 {
            info!(count = rewound, "rewound interrupted jobs after restart");
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn put(&self, job: &Job) -> Result<()> {
        let record = serde_json::to_string(job).context("failed to serialize job record")?;
        sqlx::query(
            r"
            INSERT INTO jobs (info_hash, state, record, updated_at)
            VALUES (?1, ?2, ?3, unixepoch())
            ON CONFLICT(info_hash) DO UPDATE SET
                state = excluded.state,
                record = excluded.record,
                updated_at = excluded.updated_at;
            ",
        )
        .bind(job.info_hash.as_str())
        .bind(job.state.as_str())
        .bind(record)
        .execute(&self.pool)
        .await
        .context("failed to persist job record")?;
        Ok(())
    }

    async fn get(&self, hash: &InfoHash) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT record FROM jobs WHERE info_hash = ?1")
            .bind(hash.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("failed to read job record")?;
        match row {
            None => Ok(None),
            Some(row) => {
                let record: String = row.get("record");
                let job = serde_json::from_str(&record)
                    .with_context(|| format!("corrupt job record for {hash}"))?;
                Ok(Some(job))
            }
        }
    }

    async fn delete(&self, hash: &InfoHash) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE info_hash = ?1")
            .bind(hash.as_str())
            .execute(&self.pool)
            .await
            .context("failed to delete job record")?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT info_hash, record FROM jobs ORDER BY updated_at, info_hash")
            .fetch_all(&self.pool)
            .await
            .context("failed to enumerate job records")?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let record: String = row.get("record");
            match serde_json::from_str::<Job>(&record) {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    // A corrupt row must not take the whole catalog down.
                    let hash: String = row.get("info_hash");
                    warn!(info_hash = %hash, error = %err, "skipping corrupt job record");
                }
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetcharr_core::{JobSource, RemoteFile};
    use std::path::PathBuf;

    fn sample_job(hash: &str) -> Job {
        Job::new(
            InfoHash::parse(hash).expect("hash"),
            JobSource::Magnet {
                uri: format!("magnet:?xt=urn:btih:{hash}"),
            },
            "demo".to_string(),
            "sonarr".to_string(),
            PathBuf::from("/downloads/sonarr"),
        )
    }

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[tokio::test]
    async fn put_get_delete_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SqliteJobStore::open(dir.path()).await?;

        let mut job = sample_job(HASH_A);
        job.size_total = 100;
        store.put(&job).await?;

        let loaded = store.get(&job.info_hash).await?.expect("job present");
        assert_eq!(loaded.info_hash, job.info_hash);
        assert_eq!(loaded.size_total, 100);
        assert_eq!(loaded.category, "sonarr");

        store.delete(&job.info_hash).await?;
        assert!(store.get(&job.info_hash).await?.is_none());
        // Deleting again is not an error.
        store.delete(&job.info_hash).await?;
        Ok(())
    }

    #[tokio::test]
    async fn put_replaces_existing_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SqliteJobStore::open(dir.path()).await?;

        let mut job = sample_job(HASH_A);
        store.put(&job).await?;
        job.size_done = 42;
        job.state = JobState::Downloading;
        store.put(&job).await?;

        let all = store.load_all().await?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].size_done, 42);
        Ok(())
    }

    #[tokio::test]
    async fn recover_rewinds_interrupted_states() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SqliteJobStore::open(dir.path()).await?;

        let mut downloading = sample_job(HASH_A);
        downloading.debrid_id = Some("1".to_string());
        downloading.files = vec![RemoteFile {
            name: "a.mkv".to_string(),
            size_bytes: 10,
            hosted_url: "https://host/a".to_string(),
        }];
        downloading.size_total = 10;
        downloading.size_done = 4;
        downloading.state = JobState::Downloading;
        store.put(&downloading).await?;

        let mut pending = sample_job(HASH_B);
        pending.debrid_id = Some("2".to_string());
        pending.state = JobState::DebridPending;
        store.put(&pending).await?;

        let jobs = store.recover().await?;
        let find = |hash: &str| {
            jobs.iter()
                .find(|job| job.info_hash.as_str() == hash)
                .expect("job present")
        };
        assert_eq!(find(HASH_A).state, JobState::DebridReady);
        assert_eq!(find(HASH_A).size_done, 4, "progress survives the rewind");
        assert_eq!(find(HASH_B).state, JobState::DebridPending);

        // The rewound state is durable.
        let reloaded = store.get(&downloading.info_hash).await?.expect("present");
        assert_eq!(reloaded.state, JobState::DebridReady);
        Ok(())
    }

    #[tokio::test]
    async fn recover_leaves_terminal_states_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SqliteJobStore::open(dir.path()).await?;

        let mut completed = sample_job(HASH_A);
        completed.state = JobState::Completed;
        store.put(&completed).await?;

        let mut errored = sample_job(HASH_B);
        errored.state = JobState::Error;
        errored.last_error = Some("dead".to_string());
        store.put(&errored).await?;

        let jobs = store.recover().await?;
        assert!(jobs.iter().any(|job| job.state == JobState::Completed));
        let errored = jobs
            .iter()
            .find(|job| job.state == JobState::Error)
            .expect("error job");
        assert_eq!(errored.last_error.as_deref(), Some("dead"));
        Ok(())
    }
}
