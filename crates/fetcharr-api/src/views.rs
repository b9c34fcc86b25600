//! qBittorrent-shaped serializations of the job model.

use serde::Serialize;

use fetcharr_core::Job;
use fetcharr_events::JobState;

/// ETA reported when the remaining time cannot be derived.
pub(crate) const ETA_UNKNOWN: i64 = 8_640_000;

/// One row of `/api/v2/torrents/info`.
#[derive(Debug, Serialize)]
pub(crate) struct JobView {
    pub hash: String,
    pub name: String,
    pub size: i64,
    pub progress: f64,
    pub dlspeed: i64,
    pub upspeed: i64,
    pub eta: i64,
    pub state: String,
    pub category: String,
    pub save_path: String,
    pub added_on: i64,
    pub completion_on: i64,
    pub completed: i64,
    pub downloaded: i64,
    pub uploaded: i64,
    pub ratio: f64,
}

/// `/api/v2/torrents/properties` payload.
#[derive(Debug, Serialize)]
pub(crate) struct JobProperties {
    pub save_path: String,
    pub name: String,
    pub hash: String,
    pub total_size: i64,
    pub total_downloaded: i64,
    pub progress: f64,
    pub dl_speed: i64,
    pub up_speed: i64,
    pub eta: i64,
    pub addition_date: i64,
    pub completion_date: i64,
    pub time_elapsed: i64,
    pub comment: String,
    pub ratio: f64,
}

/// One row of `/api/v2/torrents/files`.
#[derive(Debug, Serialize)]
pub(crate) struct FileView {
    pub name: String,
    pub size: i64,
    pub progress: f64,
}

/// Map the internal lifecycle onto qBittorrent state strings.
pub(crate) const fn qb_state(state: JobState) -> &'static str {
    match state {
        JobState::Queued | JobState::DebridPending => "queuedDL",
        JobState::DebridReady => "stalledDL",
        JobState::Downloading => "downloading",
        JobState::Paused => "pausedDL",
        JobState::Completed => "completed",
        JobState::Error => "error",
    }
}

/// Whether a job matches a qBittorrent `filter` query value.
pub(crate) fn matches_filter(state: JobState, filter: &str) -> bool {
    match filter {
        "downloading" => matches!(
            state,
            JobState::Downloading | JobState::Queued | JobState::DebridPending
        ),
        "completed" => matches!(state, JobState::Completed),
        "paused" | "stopped" => matches!(state, JobState::Paused),
        "active" => matches!(state, JobState::Downloading),
        "stalled" => matches!(state, JobState::DebridReady),
        "errored" => matches!(state, JobState::Error),
        _ => true,
    }
}

pub(crate) fn job_view(job: &Job) -> JobView {
    JobView {
        hash: job.info_hash.to_string(),
        name: job.display_name.clone(),
        size: clamp(job.size_total),
        progress: job.progress(),
        dlspeed: clamp(job.speed_bps),
        upspeed: 0,
        eta: job.eta_seconds().map_or(ETA_UNKNOWN, clamp),
        state: qb_state(job.state).to_string(),
        category: job.category.clone(),
        save_path: job.save_path.display().to_string(),
        added_on: job.added_at.timestamp(),
        completion_on: job.completed_at.map_or(0, |at| at.timestamp()),
        completed: clamp(job.size_done),
        downloaded: clamp(job.size_done),
        uploaded: 0,
        ratio: 0.0,
    }
}

pub(crate) fn job_properties(job: &Job) -> JobProperties {
    let now = chrono::Utc::now().timestamp();
    JobProperties {
        save_path: job.save_path.display().to_string(),
        name: job.display_name.clone(),
        hash: job.info_hash.to_string(),
        total_size: clamp(job.size_total),
        total_downloaded: clamp(job.size_done),
        progress: job.progress(),
        dl_speed: clamp(job.speed_bps),
        up_speed: 0,
        eta: job.eta_seconds().map_or(ETA_UNKNOWN, clamp),
        addition_date: job.added_at.timestamp(),
        completion_date: job.completed_at.map_or(0, |at| at.timestamp()),
        time_elapsed: now.saturating_sub(job.added_at.timestamp()),
        comment: job.last_error.clone().unwrap_or_default(),
        ratio: 0.0,
    }
}

pub(crate) fn file_views(job: &Job) -> Vec<FileView> {
    let mut remaining = job.size_done;
    job.files
        .iter()
        .map(|file| {
            let done = remaining.min(file.size_bytes);
            remaining -= done;
            let progress = if file.size_bytes == 0 {
                1.0
            } else {
                to_f64(done) / to_f64(file.size_bytes)
            };
            FileView {
                name: file.name.clone(),
                size: clamp(file.size_bytes),
                progress,
            }
        })
        .collect()
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

const fn to_f64(value: u64) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "u64 to f64 conversion is required for qBittorrent progress fields"
    )]
    {
        value as f64
    }
}
