//! Engine wiring knobs.
//!
//! Everything timing-related is a field so tests can shrink the cadences;
//! production uses the defaults, which mirror the polling and retry policy
//! the gateway expects.

use std::path::PathBuf;
use std::time::Duration;

use fetcharr_core::{RetryPolicy, TuningProfile};

use crate::scheduler::MAX_OUTSTANDING_SUBMISSIONS;

/// Static configuration the job manager runs under.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tuning profile resolved from the storage probe and overrides.
    pub profile: TuningProfile,
    /// Root under which `<category>/` destination directories live.
    pub download_root: PathBuf,
    /// Status poll cadence right after submission.
    pub poll_fast: Duration,
    /// How long the fast cadence lasts.
    pub poll_fast_window: Duration,
    /// Status poll cadence after the fast window.
    pub poll_slow: Duration,
    /// Hard cap on unrestricting-service processing time.
    pub poll_cap: Duration,
    /// Submissions allowed in flight against the gateway.
    pub max_outstanding_submissions: usize,
    /// Minimum spacing of persistence writes while downloading.
    pub persist_interval: Duration,
    /// Backoff policy for transient download failures.
    pub retry: RetryPolicy,
    /// How long shutdown waits for workers before abandoning them.
    pub shutdown_grace: Duration,
}

impl EngineConfig {
    /// Production defaults for the given profile and download root.
    #[must_use]
    pub fn new(profile: TuningProfile, download_root: PathBuf) -> Self {
        Self {
            profile,
            download_root,
            poll_fast: Duration::from_secs(2),
            poll_fast_window: Duration::from_secs(30),
            poll_slow: Duration::from_secs(5),
            poll_cap: Duration::from_secs(300),
            max_outstanding_submissions: MAX_OUTSTANDING_SUBMISSIONS,
            persist_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}
