//! Typed configuration model.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fetcharr_core::{DiskKind, TuningProfile};

/// How the storage medium should be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePreference {
    /// Probe the download directory at startup.
    Auto,
    /// Force the rotational profile.
    Hdd,
    /// Force the solid-state profile.
    Ssd,
}

impl StoragePreference {
    /// The forced medium, if the probe is bypassed.
    #[must_use]
    pub const fn forced_kind(self) -> Option<DiskKind> {
        match self {
            Self::Auto => None,
            Self::Hdd => Some(DiskKind::Rotational),
            Self::Ssd => Some(DiskKind::Solid),
        }
    }
}

/// Validated broker configuration.
///
/// `None` tuning fields mean "no override": the value comes from the profile
/// the storage probe (or the forced preference) selects.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Storage medium selection (`STORAGE_TYPE`).
    pub storage_type: StoragePreference,
    /// Override for concurrent large jobs (`MAX_CONCURRENT_LARGE`).
    pub max_concurrent_large: Option<u32>,
    /// Override for concurrent small jobs (`MAX_CONCURRENT_SMALL`).
    pub max_concurrent_small: Option<u32>,
    /// Override for the large-job boundary (`LARGE_THRESHOLD_BYTES`).
    pub large_threshold_bytes: Option<u64>,
    /// Override for the per-job disk buffer (`DISK_BUFFER_BYTES`).
    pub disk_buffer_bytes: Option<u64>,
    /// Override for the write batch size (`WRITE_BATCH_BYTES`).
    pub write_batch_bytes: Option<u64>,
    /// Override for the fsync cadence (`FLUSH_INTERVAL_SECONDS`).
    pub flush_interval: Option<Duration>,
    /// Override for per-job connections (`MAX_CONNECTIONS_PER_JOB`).
    pub max_connections_per_job: Option<u32>,
    /// Override for file preallocation (`FILE_ALLOCATE`).
    pub file_allocate: Option<bool>,
    /// AllDebrid API key (`DEBRID_API_KEY`, required).
    pub debrid_api_key: String,
    /// Unrestricting service base URL (`DEBRID_BASE_URL`).
    pub debrid_base_url: String,
    /// Listen address for the HTTP surface (`API_BIND`).
    pub api_bind: SocketAddr,
    /// Download root; destination files live under `<root>/<category>/`
    /// (`DOWNLOAD_PATH`).
    pub download_path: PathBuf,
    /// State directory holding the job store (`STATE_PATH`).
    pub state_path: PathBuf,
}

impl AppConfig {
    /// Resolve the effective tuning profile for a detected medium, applying
    /// any configured overrides on top.
    #[must_use]
    pub fn tuning(&self, detected: DiskKind) -> TuningProfile {
        let kind = self.storage_type.forced_kind().unwrap_or(detected);
        let mut profile = TuningProfile::for_kind(kind);
        if let Some(value) = self.max_concurrent_large {
            profile.concurrent_large = value;
        }
        if let Some(value) = self.max_concurrent_small {
            profile.concurrent_small = value;
        }
        if let Some(value) = self.large_threshold_bytes {
            profile.large_threshold_bytes = value;
        }
        if let Some(value) = self.disk_buffer_bytes {
            profile.disk_buffer_bytes = value;
        }
        if let Some(value) = self.write_batch_bytes {
            profile.write_batch_bytes = value;
        }
        if let Some(value) = self.flush_interval {
            profile.flush_interval = value;
        }
        if let Some(value) = self.max_connections_per_job {
            profile.max_connections_per_job = value;
        }
        if let Some(value) = self.file_allocate {
            profile.preallocate = value;
        }
        profile
    }
}
