#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Engine-agnostic job interfaces and DTOs shared across the workspace.
//!
//! The broker's moving parts (store, gateway, downloader, API adapter) meet
//! here: the [`Job`] record, the [`InfoHash`] key type, the error taxonomy,
//! and the capability traits each variant implements.

pub mod cancel;
pub mod error;
pub mod hash;
pub mod model;
pub mod profile;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;

pub use cancel::CancelToken;
pub use error::JobError;
pub use hash::{InfoHash, Magnet};
pub use model::{AddJob, FileCursor, Job, JobSource, RemoteFile, RemoveJob};
pub use profile::{DiskKind, TuningProfile};
pub use retry::RetryPolicy;

/// Result of submitting a magnet or metainfo payload to the unrestricting
/// service.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Opaque identifier assigned by the service.
    pub debrid_id: String,
    /// Info-hash reported by the service, when it reports one (metainfo
    /// uploads rely on this; magnet submissions already know theirs).
    pub info_hash: Option<InfoHash>,
    /// Display name reported by the service, if any.
    pub name: Option<String>,
}

/// Poll outcome for a submitted magnet.
#[derive(Debug, Clone)]
pub enum DebridStatus {
    /// The service is still joining the swarm or transferring content.
    Processing,
    /// Every file is hosted and ready to be unlocked.
    Ready {
        /// Ordered file listing; the broker downloads these sequentially.
        files: Vec<RemoteFile>,
    },
    /// The service gave up on the magnet.
    Error {
        /// Reason reported by the service.
        reason: String,
    },
}

/// A hosted link converted into a directly downloadable URL.
#[derive(Debug, Clone)]
pub struct UnlockedLink {
    /// Direct HTTP(S) URL to stream from.
    pub direct_url: String,
    /// How long the URL is assumed to stay valid.
    pub ttl: Duration,
}

/// Client of the external unrestricting service.
///
/// Implementations are selected at startup (real HTTP client or in-process
/// mock); every call is expected to honour the shared rate limiter.
#[async_trait]
pub trait DebridGateway: Send + Sync {
    /// Submit a magnet URI; returns the service-side identifier.
    async fn submit_magnet(&self, uri: &str) -> Result<Submission, JobError>;

    /// Submit raw torrent metainfo bytes; the service reports the info-hash.
    async fn submit_metainfo(&self, bytes: &[u8]) -> Result<Submission, JobError>;

    /// Poll the processing status of an earlier submission.
    async fn status(&self, debrid_id: &str) -> Result<DebridStatus, JobError>;

    /// Convert a hosted URL into a short-lived direct URL.
    async fn unlock(&self, hosted_url: &str) -> Result<UnlockedLink, JobError>;
}

/// Durable map from info-hash to serialized job record.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the record for `job.info_hash`.
    async fn put(&self, job: &Job) -> anyhow::Result<()>;

    /// Fetch a single record.
    async fn get(&self, hash: &InfoHash) -> anyhow::Result<Option<Job>>;

    /// Remove a record; removing an absent record is not an error.
    async fn delete(&self, hash: &InfoHash) -> anyhow::Result<()>;

    /// Load every stored record.
    async fn load_all(&self) -> anyhow::Result<Vec<Job>>;
}

/// Lifecycle control surface exposed to the API adapter.
#[async_trait]
pub trait JobWorkflow: Send + Sync {
    /// Register a new job; re-adding an existing hash is idempotent and
    /// returns the existing job's hash.
    async fn add(&self, request: AddJob) -> anyhow::Result<InfoHash>;

    /// Remove a job, cancelling any in-flight work.
    async fn remove(&self, hash: &InfoHash, options: RemoveJob) -> anyhow::Result<()>;

    /// Stop a job's workers, keeping partial data.
    async fn pause(&self, hash: &InfoHash) -> anyhow::Result<()>;

    /// Re-enter a paused job via the scheduler.
    async fn resume(&self, hash: &InfoHash) -> anyhow::Result<()>;
}

/// Read-only snapshot surface exposed to the API adapter.
#[async_trait]
pub trait JobInspector: Send + Sync {
    /// Snapshot every non-deleted job.
    async fn list(&self) -> anyhow::Result<Vec<Job>>;

    /// Snapshot a single job.
    async fn get(&self, hash: &InfoHash) -> anyhow::Result<Option<Job>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlocked_link_defaults_are_preserved() {
        let link = UnlockedLink {
            direct_url: "https://cdn.example/file".to_string(),
            ttl: Duration::from_secs(3600),
        };
        assert_eq!(link.ttl.as_secs(), 3600);
    }

    #[test]
    fn debrid_status_ready_carries_files_in_order() {
        let status = DebridStatus::Ready {
            files: vec![
                RemoteFile {
                    name: "a.mkv".to_string(),
                    size_bytes: 10,
                    hosted_url: "https://host/a".to_string(),
                },
                RemoteFile {
                    name: "b.srt".to_string(),
                    size_bytes: 1,
                    hosted_url: "https://host/b".to_string(),
                },
            ],
        };
        match status {
            DebridStatus::Ready { files } => {
                assert_eq!(files[0].name, "a.mkv");
                assert_eq!(files[1].name, "b.srt");
            }
            DebridStatus::Processing | DebridStatus::Error { .. } => {
                panic!("expected ready status")
            }
        }
    }
}
