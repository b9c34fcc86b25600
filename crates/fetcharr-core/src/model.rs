//! The job record and its request DTOs.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::InfoHash;
use fetcharr_events::JobState;

/// How a job's content was handed to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSource {
    /// A magnet URI; retained verbatim until completion.
    Magnet {
        /// The original magnet URI.
        uri: String,
    },
    /// Raw `.torrent` metainfo bytes; never parsed locally.
    Metainfo {
        /// Bencoded payload forwarded to the unrestricting service as-is.
        bytes: Vec<u8>,
    },
}

/// One file the unrestricting service hosts for a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFile {
    /// File name as reported by the service (sanitized before use on disk).
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Hosted URL that must be unlocked into a direct URL before download.
    pub hosted_url: String,
}

/// Position of the aggregate byte cursor within the ordered file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCursor {
    /// Index of the file currently being written.
    pub index: usize,
    /// Byte offset inside that file.
    pub offset: u64,
}

/// The unit of work: one magnet or metainfo submission tracked end to end.
///
/// Mutated only by the job manager under the per-job lock and persisted after
/// every state change (throttled while downloading).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique key: 40-char lowercase hex info-hash.
    pub info_hash: InfoHash,
    /// Original submission payload.
    pub source: JobSource,
    /// Best-known human name (magnet `dn`, else service-reported, else hash).
    pub display_name: String,
    /// Opaque tag from the caller (e.g. `radarr`).
    pub category: String,
    /// Absolute destination directory.
    pub save_path: PathBuf,
    /// Current lifecycle state.
    pub state: JobState,
    /// Total bytes, known once the service reports the file list; 0 before.
    pub size_total: u64,
    /// Bytes persisted to the destination files.
    pub size_done: u64,
    /// Instantaneous download rate; runtime-only, reset on restart.
    #[serde(skip)]
    pub speed_bps: u64,
    /// Identifier assigned by the unrestricting service after submission.
    pub debrid_id: Option<String>,
    /// Ordered file listing reported by the service; empty until ready.
    pub files: Vec<RemoteFile>,
    /// Retry counter within the current state; runtime-only.
    #[serde(skip)]
    pub attempt: u32,
    /// Human-readable cause, populated only in the `error` state.
    pub last_error: Option<String>,
    /// Wall-clock time the job was added.
    pub added_at: DateTime<Utc>,
    /// Wall-clock time the job completed, if it has.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a fresh job in the `queued` state.
    #[must_use]
    pub fn new(
        info_hash: InfoHash,
        source: JobSource,
        display_name: String,
        category: String,
        save_path: PathBuf,
    ) -> Self {
        Self {
            info_hash,
            source,
            display_name,
            category,
            save_path,
            state: JobState::Queued,
            size_total: 0,
            size_done: 0,
            speed_bps: 0,
            debrid_id: None,
            files: Vec::new(),
            attempt: 0,
            last_error: None,
            added_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Completion fraction in `0..=1`; 0 while the total is unknown.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.size_total == 0 {
            0.0
        } else {
            to_f64(self.size_done) / to_f64(self.size_total)
        }
    }

    /// Seconds until completion at the current rate, when derivable.
    #[must_use]
    pub fn eta_seconds(&self) -> Option<u64> {
        if self.state == JobState::Completed {
            return Some(0);
        }
        if self.size_total == 0 || self.speed_bps == 0 || self.size_done > self.size_total {
            return None;
        }
        Some((self.size_total - self.size_done).div_ceil(self.speed_bps))
    }

    /// Whether the job occupies a large slot under the given threshold.
    #[must_use]
    pub const fn is_large(&self, threshold_bytes: u64) -> bool {
        self.size_total >= threshold_bytes
    }

    /// Locate the aggregate byte cursor within the ordered file list.
    ///
    /// Returns `None` when the file list is empty or every file is written.
    #[must_use]
    pub fn file_cursor(&self) -> Option<FileCursor> {
        let mut remaining = self.size_done;
        for (index, file) in self.files.iter().enumerate() {
            if remaining < file.size_bytes {
                return Some(FileCursor {
                    index,
                    offset: remaining,
                });
            }
            remaining -= file.size_bytes;
        }
        None
    }

    /// The state a paused or restarted job re-enters through the scheduler.
    ///
    /// Derived from what the job has already learned rather than stored:
    /// resolved files mean the hosted links exist (`debrid_ready`), a
    /// submission id without files means the service is still processing
    /// (`debrid_pending`), anything earlier starts over in `queued`.
    #[must_use]
    pub fn resume_state(&self) -> JobState {
        if !self.files.is_empty() {
            JobState::DebridReady
        } else if self.debrid_id.is_some() {
            JobState::DebridPending
        } else {
            JobState::Queued
        }
    }
}

/// Request payload for admitting a job.
#[derive(Debug, Clone)]
pub struct AddJob {
    /// Magnet URI or metainfo bytes.
    pub source: JobSource,
    /// Caller-supplied category tag; may be empty.
    pub category: String,
    /// Destination override; the configured download root applies otherwise.
    pub save_path: Option<PathBuf>,
}

/// Options controlling job removal.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveJob {
    /// Whether to delete partial or complete destination files as well.
    pub with_data: bool,
}

const fn to_f64(value: u64) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "u64 to f64 conversion is required for user-facing progress reporting"
    )]
    {
        value as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::new(
            InfoHash::parse("c12fe1c06bba254a9dc9f519b335aa7c1367a88a").expect("hash"),
            JobSource::Magnet {
                uri: "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a".to_string(),
            },
            "demo".to_string(),
            "radarr".to_string(),
            PathBuf::from("/downloads/radarr"),
        )
    }

    #[test]
    fn new_job_starts_queued_with_zero_sizes() {
        let job = sample_job();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.size_total, 0);
        assert_eq!(job.size_done, 0);
        assert!(job.completed_at.is_none());
        assert!((job.progress()).abs() < f64::EPSILON);
    }

    #[test]
    fn eta_requires_known_total_and_speed() {
        let mut job = sample_job();
        assert_eq!(job.eta_seconds(), None);
        job.size_total = 100;
        assert_eq!(job.eta_seconds(), None);
        job.speed_bps = 30;
        assert_eq!(job.eta_seconds(), Some(4));
        job.state = JobState::Completed;
        assert_eq!(job.eta_seconds(), Some(0));
    }

    #[test]
    fn file_cursor_walks_the_ordered_list() {
        let mut job = sample_job();
        job.files = vec![
            RemoteFile {
                name: "a".to_string(),
                size_bytes: 100,
                hosted_url: "h/a".to_string(),
            },
            RemoteFile {
                name: "b".to_string(),
                size_bytes: 50,
                hosted_url: "h/b".to_string(),
            },
        ];
        job.size_total = 150;

        job.size_done = 0;
        assert_eq!(job.file_cursor(), Some(FileCursor { index: 0, offset: 0 }));
        job.size_done = 99;
        assert_eq!(
            job.file_cursor(),
            Some(FileCursor {
                index: 0,
                offset: 99
            })
        );
        job.size_done = 100;
        assert_eq!(job.file_cursor(), Some(FileCursor { index: 1, offset: 0 }));
        job.size_done = 150;
        assert_eq!(job.file_cursor(), None);
    }

    #[test]
    fn resume_state_is_derived_from_progress_markers() {
        let mut job = sample_job();
        assert_eq!(job.resume_state(), JobState::Queued);
        job.debrid_id = Some("42".to_string());
        assert_eq!(job.resume_state(), JobState::DebridPending);
        job.files = vec![RemoteFile {
            name: "a".to_string(),
            size_bytes: 1,
            hosted_url: "h/a".to_string(),
        }];
        assert_eq!(job.resume_state(), JobState::DebridReady);
    }

    #[test]
    fn runtime_fields_are_not_persisted() {
        let mut job = sample_job();
        job.speed_bps = 9_999;
        job.attempt = 3;
        let json = serde_json::to_string(&job).expect("serialize");
        let back: Job = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.speed_bps, 0);
        assert_eq!(back.attempt, 0);
        assert_eq!(back.info_hash, job.info_hash);
    }

    #[test]
    fn large_classification_uses_threshold() {
        let mut job = sample_job();
        job.size_total = 21_474_836_480;
        assert!(job.is_large(21_474_836_480));
        job.size_total -= 1;
        assert!(!job.is_large(21_474_836_480));
    }
}
