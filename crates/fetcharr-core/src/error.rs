//! Error taxonomy for the job pipeline.
//!
//! Every failure a worker can hit collapses into one of these kinds; the job
//! manager recovers transient kinds under the backoff policy and surfaces the
//! rest as the terminal `error` state.

use thiserror::Error;

/// Failure kinds observed while driving a job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// Malformed magnet, missing hash, or otherwise unusable input.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// The unrestricting service is unreachable, rate limiting, or serving
    /// 5xx responses.
    #[error("debrid service unavailable: {0}")]
    DebridUnavailable(String),

    /// The unrestricting service rejected the request outright (auth, quota).
    #[error("debrid request rejected: {0}")]
    DebridReject(String),

    /// The unrestricting service reported a terminal processing failure.
    #[error("debrid processing failed: {0}")]
    DebridProcessingFailed(String),

    /// The direct URL is no longer valid and must be re-unlocked.
    #[error("direct url expired")]
    UrlExpired,

    /// Connection reset, read timeout, short read, or retryable HTTP status.
    #[error("transient network failure: {0}")]
    NetworkTransient(String),

    /// The destination filesystem ran out of space.
    #[error("destination disk full")]
    DiskFull,

    /// A non-recoverable disk failure (permissions, I/O error).
    #[error("disk failure: {0}")]
    DiskPermanent(String),

    /// The bytes on disk do not match the expected total.
    #[error("size mismatch: expected {expected} bytes, observed {actual}")]
    SizeMismatch {
        /// Bytes the job was expected to produce.
        expected: u64,
        /// Bytes actually observed.
        actual: u64,
    },

    /// The work was cancelled by pause, delete, or shutdown.
    #[error("cancelled")]
    Cancelled,

    /// A bug or unexpected condition inside the broker.
    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Whether the job manager should recover this failure locally with
    /// backoff rather than park the job in the terminal `error` state.
    ///
    /// A size mismatch starts out transient (the completion predicate calls
    /// for a retry); the consecutive-failure cap escalates it to fatal.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DebridUnavailable(_)
                | Self::UrlExpired
                | Self::NetworkTransient(_)
                | Self::DiskFull
                | Self::SizeMismatch { .. }
        )
    }

    /// Whether the failure means the current direct URL must be re-unlocked.
    #[must_use]
    pub const fn needs_fresh_url(&self) -> bool {
        matches!(self, Self::UrlExpired)
    }
}
