//! Storage tuning profiles.
//!
//! The storage probe classifies the download directory; the profile turns
//! that classification into the knobs the scheduler and downloader honour.
//! Configuration may override any individual field.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Classification of the medium backing the download directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskKind {
    /// Rotational disk: sequential access, one stream, big buffers.
    Rotational,
    /// Solid-state disk: parallel streams, small buffers.
    Solid,
}

/// Large-job threshold shared by both profiles: 20 GiB.
pub const LARGE_THRESHOLD_BYTES: u64 = 20 * 1024 * 1024 * 1024;

/// Tuning knobs derived from the detected (or forced) storage medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningProfile {
    /// Medium this profile was derived from.
    pub disk: DiskKind,
    /// HTTP connections a single job may open.
    pub max_connections_per_job: u32,
    /// Jobs at or above the large threshold allowed to run concurrently.
    pub concurrent_large: u32,
    /// Jobs below the large threshold allowed to run concurrently.
    pub concurrent_small: u32,
    /// Boundary between small and large jobs in bytes.
    pub large_threshold_bytes: u64,
    /// Per-job buffer between the network readers and the disk writer.
    pub disk_buffer_bytes: u64,
    /// Upper bound on a single batched write submission.
    pub write_batch_bytes: u64,
    /// How often the writer fsyncs the destination file.
    pub flush_interval: Duration,
    /// Whether to extend the file to its full length before writing.
    pub preallocate: bool,
}

impl TuningProfile {
    /// Profile for rotational media: one sequential stream, a large buffer,
    /// preallocated files.
    #[must_use]
    pub const fn hdd() -> Self {
        Self {
            disk: DiskKind::Rotational,
            max_connections_per_job: 1,
            concurrent_large: 1,
            concurrent_small: 3,
            large_threshold_bytes: LARGE_THRESHOLD_BYTES,
            disk_buffer_bytes: 64 * 1024 * 1024,
            write_batch_bytes: 64 * 1024 * 1024,
            flush_interval: Duration::from_secs(5),
            preallocate: true,
        }
    }

    /// Profile for solid-state media: parallel streams, small buffers.
    #[must_use]
    pub const fn ssd() -> Self {
        Self {
            disk: DiskKind::Solid,
            max_connections_per_job: 4,
            concurrent_large: 3,
            concurrent_small: 5,
            large_threshold_bytes: LARGE_THRESHOLD_BYTES,
            disk_buffer_bytes: 8 * 1024 * 1024,
            write_batch_bytes: 64 * 1024 * 1024,
            flush_interval: Duration::from_secs(1),
            preallocate: false,
        }
    }

    /// Profile matching a detected medium.
    #[must_use]
    pub const fn for_kind(kind: DiskKind) -> Self {
        match kind {
            DiskKind::Rotational => Self::hdd(),
            DiskKind::Solid => Self::ssd(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdd_profile_matches_rotational_tuning() {
        let profile = TuningProfile::hdd();
        assert_eq!(profile.max_connections_per_job, 1);
        assert_eq!(profile.concurrent_large, 1);
        assert_eq!(profile.concurrent_small, 3);
        assert_eq!(profile.disk_buffer_bytes, 67_108_864);
        assert_eq!(profile.flush_interval, Duration::from_secs(5));
        assert!(profile.preallocate);
    }

    #[test]
    fn ssd_profile_matches_solid_tuning() {
        let profile = TuningProfile::ssd();
        assert_eq!(profile.max_connections_per_job, 4);
        assert_eq!(profile.concurrent_large, 3);
        assert_eq!(profile.concurrent_small, 5);
        assert_eq!(profile.disk_buffer_bytes, 8_388_608);
        assert_eq!(profile.flush_interval, Duration::from_secs(1));
        assert!(!profile.preallocate);
    }

    #[test]
    fn both_profiles_share_the_large_threshold() {
        assert_eq!(TuningProfile::hdd().large_threshold_bytes, 21_474_836_480);
        assert_eq!(
            TuningProfile::for_kind(DiskKind::Solid).large_threshold_bytes,
            TuningProfile::for_kind(DiskKind::Rotational).large_threshold_bytes
        );
    }
}
