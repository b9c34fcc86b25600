//! The job manager: owns every job's state machine and its workers.
//!
//! One submission/poll worker or one download worker runs per job at a time,
//! holding a clone of the job's cancel token. State transitions happen under
//! the per-job lock and are persisted before the next admission pass; the
//! scheduler lock is only ever taken for bookkeeping, never across an await.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fetcharr_core::{
    AddJob, CancelToken, DebridGateway, DebridStatus, InfoHash, Job, JobError, JobInspector,
    JobSource, JobStore, JobWorkflow, Magnet, RemoveJob,
};
use fetcharr_events::{Event, EventBus, JobState, ResolvedFile};
use fetcharr_fetch::{FetchRequest, Fetcher, ProgressSample, sanitize_file_name};
use fetcharr_telemetry::Metrics;

use crate::config::EngineConfig;
use crate::scheduler::{Admission, Scheduler, SlotClass};

/// Safety margin subtracted from unlock TTLs so a lease is refreshed before
/// the service actually kills it.
const LEASE_SAFETY_MARGIN: std::time::Duration = std::time::Duration::from_secs(30);

struct JobRuntime {
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
    last_persist: Instant,
}

impl JobRuntime {
    fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            worker: None,
            last_persist: Instant::now(),
        }
    }
}

struct Shared {
    config: EngineConfig,
    gateway: Arc<dyn DebridGateway>,
    store: Arc<dyn JobStore>,
    events: EventBus,
    metrics: Metrics,
    fetcher: Fetcher,
    jobs: RwLock<HashMap<InfoHash, Arc<RwLock<Job>>>>,
    runtime: Mutex<HashMap<InfoHash, JobRuntime>>,
    sched: Mutex<Scheduler>,
}

/// Coordinates persistence, the gateway, the scheduler, and the downloader
/// for every job.
#[derive(Clone)]
pub struct JobManager {
    shared: Arc<Shared>,
}

impl JobManager {
    /// Wire a manager from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error when the downloader's HTTP client cannot be built.
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn DebridGateway>,
        store: Arc<dyn JobStore>,
        events: EventBus,
        metrics: Metrics,
    ) -> anyhow::Result<Self> {
        let fetcher = Fetcher::new(config.profile)?;
        let sched = Scheduler::new(
            config.profile.concurrent_large,
            config.profile.concurrent_small,
            config.max_outstanding_submissions,
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                gateway,
                store,
                events,
                metrics,
                fetcher,
                jobs: RwLock::new(HashMap::new()),
                runtime: Mutex::new(HashMap::new()),
                sched: Mutex::new(sched),
            }),
        })
    }

    /// Register recovered jobs and kick off admission.
    ///
    /// Interrupted jobs arrive already rewound by the store; this re-queues
    /// them in their recovery states before the API starts taking traffic.
    pub async fn start(&self, jobs: Vec<Job>) {
        for job in jobs {
            let hash = job.info_hash.clone();
            let state = job.state;
            let large = job.is_large(self.shared.config.profile.large_threshold_bytes);
            self.shared
                .jobs
                .write()
                .await
                .insert(hash.clone(), Arc::new(RwLock::new(job)));
            self.shared
                .runtime
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(hash.clone(), JobRuntime::new());

            match state {
                JobState::Queued => lock_sched(&self.shared).enqueue_new(hash),
                JobState::DebridPending => {
                    lock_sched(&self.shared).note_submitted(hash.clone());
                    spawn_submission(&self.shared, hash);
                }
                JobState::DebridReady => lock_sched(&self.shared).enqueue_ready(hash, large),
                JobState::Downloading
                | JobState::Paused
                | JobState::Completed
                | JobState::Error => {}
            }
        }
        info!("job manager started");
        tick(&self.shared);
    }

    /// Cancel every worker and wait out the shutdown grace period.
    ///
    /// Workers that outlive the grace period are abandoned; their partial
    /// files stay as-is and resume on the next start.
    pub async fn shutdown(&self) {
        let handles: Vec<(InfoHash, JoinHandle<()>)> = {
            let mut runtime = self
                .shared
                .runtime
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            runtime
                .iter_mut()
                .filter_map(|(hash, rt)| {
                    rt.cancel.cancel();
                    rt.worker.take().map(|handle| (hash.clone(), handle))
                })
                .collect()
        };

        let deadline = Instant::now() + self.shared.config.shutdown_grace;
        for (hash, handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!(info_hash = %hash, "worker outlived shutdown grace; abandoning");
            }
        }
        info!("job manager stopped");
    }
}

#[async_trait]
impl JobWorkflow for JobManager {
    async fn add(&self, request: AddJob) -> anyhow::Result<InfoHash> {
        let shared = &self.shared;

        let (info_hash, name_hint, debrid_id) = match &request.source {
            JobSource::Magnet { uri } => {
                let magnet = Magnet::parse(uri)?;
                (magnet.info_hash, magnet.display_name, None)
            }
            JobSource::Metainfo { bytes } => {
                // The broker never parses Bencode; the service reports the
                // hash for uploaded metainfo.
                let submission = shared.gateway.submit_metainfo(bytes).await?;
                let hash = submission.info_hash.clone().ok_or_else(|| {
                    JobError::InputInvalid(
                        "service reported no info hash for the upload".to_string(),
                    )
                })?;
                (hash, submission.name, Some(submission.debrid_id))
            }
        };

        if shared.jobs.read().await.contains_key(&info_hash) {
            debug!(info_hash = %info_hash, "re-add of existing job is a no-op");
            return Ok(info_hash);
        }

        let category = request.category.trim().to_string();
        let save_path = request
            .save_path
            .clone()
            .unwrap_or_else(|| category_path(&shared.config.download_root, &category));
        let display_name = name_hint.unwrap_or_else(|| info_hash.to_string());
        let mut job = Job::new(
            info_hash.clone(),
            request.source,
            display_name.clone(),
            category,
            save_path,
        );
        let submitted_at_add = debrid_id.is_some();
        if let Some(id) = debrid_id {
            job.debrid_id = Some(id);
            job.state = JobState::DebridPending;
        }

        {
            let mut jobs = shared.jobs.write().await;
            if jobs.contains_key(&info_hash) {
                return Ok(info_hash);
            }
            jobs.insert(info_hash.clone(), Arc::new(RwLock::new(job.clone())));
        }
        shared.store.put(&job).await?;
        shared
            .runtime
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(info_hash.clone(), JobRuntime::new());

        shared.metrics.inc_job_added();
        let _ = shared.events.publish(Event::JobAdded {
            info_hash: info_hash.to_string(),
            name: display_name,
        });
        info!(info_hash = %info_hash, "job added");

        if submitted_at_add {
            lock_sched(shared).note_submitted(info_hash.clone());
            spawn_submission(shared, info_hash.clone());
        } else {
            lock_sched(shared).enqueue_new(info_hash.clone());
        }
        tick(shared);
        Ok(info_hash)
    }

    async fn remove(&self, hash: &InfoHash, options: RemoveJob) -> anyhow::Result<()> {
        let shared = &self.shared;
        let Some(entry) = shared.jobs.write().await.remove(hash) else {
            return Ok(());
        };
        if let Some(rt) = shared
            .runtime
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(hash)
        {
            rt.cancel.cancel();
        }
        lock_sched(shared).remove(hash);
        shared.store.delete(hash).await?;

        if options.with_data {
            let job = entry.read().await.clone();
            for file in &job.files {
                let path = job.save_path.join(sanitize_file_name(&file.name));
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!(path = %path.display(), "removed destination file"),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => warn!(path = %path.display(), error = %err, "failed to remove file"),
                }
            }
        }

        shared.metrics.inc_job_removed();
        let _ = shared.events.publish(Event::JobRemoved {
            info_hash: hash.to_string(),
        });
        info!(info_hash = %hash, with_data = options.with_data, "job removed");
        tick(shared);
        Ok(())
    }

    async fn pause(&self, hash: &InfoHash) -> anyhow::Result<()> {
        let shared = &self.shared;
        let Some(entry) = lookup(shared, hash).await else {
            return Ok(());
        };
        {
            let mut job = entry.write().await;
            match job.state {
                JobState::Paused | JobState::Completed | JobState::Error => return Ok(()),
                _ => {
                    job.state = JobState::Paused;
                    job.speed_bps = 0;
                    job.attempt = 0;
                }
            }
        }
        {
            let mut runtime = shared
                .runtime
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(rt) = runtime.get_mut(hash) {
                rt.cancel.cancel();
                rt.cancel = CancelToken::new();
            }
        }
        lock_sched(shared).remove(hash);
        persist(shared, hash).await;
        publish_state(shared, hash, JobState::Paused);
        info!(info_hash = %hash, "job paused");
        tick(shared);
        Ok(())
    }

    async fn resume(&self, hash: &InfoHash) -> anyhow::Result<()> {
        let shared = &self.shared;
        let Some(entry) = lookup(shared, hash).await else {
            return Ok(());
        };
        let (target, large) = {
            let mut job = entry.write().await;
            if job.state != JobState::Paused {
                return Ok(());
            }
            job.state = job.resume_state();
            job.attempt = 0;
            (
                job.state,
                job.is_large(shared.config.profile.large_threshold_bytes),
            )
        };
        persist(shared, hash).await;
        publish_state(shared, hash, target);
        info!(info_hash = %hash, target = target.as_str(), "job resumed");

        match target {
            JobState::Queued => lock_sched(shared).enqueue_new(hash.clone()),
            JobState::DebridPending => {
                lock_sched(shared).note_submitted(hash.clone());
                spawn_submission(shared, hash.clone());
            }
            JobState::DebridReady => lock_sched(shared).enqueue_ready(hash.clone(), large),
            _ => {}
        }
        tick(shared);
        Ok(())
    }
}

#[async_trait]
impl JobInspector for JobManager {
    async fn list(&self) -> anyhow::Result<Vec<Job>> {
        let entries: Vec<Arc<RwLock<Job>>> =
            self.shared.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            jobs.push(entry.read().await.clone());
        }
        jobs.sort_by(|a, b| a.added_at.cmp(&b.added_at));
        Ok(jobs)
    }

    async fn get(&self, hash: &InfoHash) -> anyhow::Result<Option<Job>> {
        match lookup(&self.shared, hash).await {
            None => Ok(None),
            Some(entry) => Ok(Some(entry.read().await.clone())),
        }
    }
}

fn lock_sched(shared: &Shared) -> MutexGuard<'_, Scheduler> {
    shared
        .sched
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

async fn lookup(shared: &Shared, hash: &InfoHash) -> Option<Arc<RwLock<Job>>> {
    shared.jobs.read().await.get(hash).cloned()
}

fn category_path(root: &std::path::Path, category: &str) -> PathBuf {
    if category.is_empty() {
        root.to_path_buf()
    } else {
        root.join(sanitize_file_name(category))
    }
}

/// Run one admission pass and act on the decisions.
fn tick(shared: &Arc<Shared>) {
    let admissions = lock_sched(shared).admissions();
    update_gauges(shared);
    for admission in admissions {
        match admission {
            Admission::Submit(hash) => spawn_submission(shared, hash),
            Admission::Run(hash, class) => spawn_download(shared, hash, class),
        }
    }
}

fn update_gauges(shared: &Shared) {
    let (depth, running) = {
        let sched = lock_sched(shared);
        (sched.depth(), sched.running())
    };
    shared
        .metrics
        .set_queue_depth(i64::try_from(depth).unwrap_or(i64::MAX));
    shared
        .metrics
        .set_active_jobs(i64::try_from(running).unwrap_or(i64::MAX));
}

fn worker_token(shared: &Shared, hash: &InfoHash) -> Option<CancelToken> {
    shared
        .runtime
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get(hash)
        .map(|rt| rt.cancel.clone())
}

fn register_worker(shared: &Shared, hash: &InfoHash, handle: JoinHandle<()>) {
    if let Some(rt) = shared
        .runtime
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get_mut(hash)
    {
        rt.worker = Some(handle);
    }
}

fn spawn_submission(shared: &Arc<Shared>, hash: InfoHash) {
    let Some(cancel) = worker_token(shared, &hash) else {
        lock_sched(shared).remove(&hash);
        return;
    };
    let task_shared = Arc::clone(shared);
    let worker_hash = hash.clone();
    let handle = tokio::spawn(async move {
        run_submission(&task_shared, &worker_hash, &cancel).await;
    });
    register_worker(shared, &hash, handle);
}

fn spawn_download(shared: &Arc<Shared>, hash: InfoHash, _class: SlotClass) {
    let Some(cancel) = worker_token(shared, &hash) else {
        lock_sched(shared).remove(&hash);
        return;
    };
    let task_shared = Arc::clone(shared);
    let worker_hash = hash.clone();
    let handle = tokio::spawn(async move {
        run_download(&task_shared, &worker_hash, &cancel).await;
    });
    register_worker(shared, &hash, handle);
}

/// Submit (if needed) and poll the unrestricting service until the job is
/// ready, fails, or times out.
async fn run_submission(shared: &Arc<Shared>, hash: &InfoHash, cancel: &CancelToken) {
    let Some(entry) = lookup(shared, hash).await else {
        lock_sched(shared).remove(hash);
        return;
    };

    let (source, existing_id, state) = {
        let job = entry.read().await;
        (job.source.clone(), job.debrid_id.clone(), job.state)
    };
    if !matches!(state, JobState::Queued | JobState::DebridPending) {
        lock_sched(shared).submission_done(hash);
        return;
    }

    let debrid_id = match existing_id {
        Some(id) => id,
        None => {
            set_state(shared, hash, JobState::DebridPending).await;
            let submitted = tokio::select! {
                () = cancel.cancelled() => return,
                submitted = submit_source(shared, &source) => submitted,
            };
            match submitted {
                Ok(submission) => {
                    {
                        let mut job = entry.write().await;
                        job.debrid_id = Some(submission.debrid_id.clone());
                        if let Some(name) = submission.name {
                            if job.display_name == job.info_hash.as_str() {
                                job.display_name = name;
                            }
                        }
                    }
                    persist(shared, hash).await;
                    submission.debrid_id
                }
                Err(err) => {
                    lock_sched(shared).submission_done(hash);
                    fail_job(shared, hash, &err).await;
                    return;
                }
            }
        }
    };

    let started = Instant::now();
    loop {
        if started.elapsed() >= shared.config.poll_cap {
            lock_sched(shared).submission_done(hash);
            fail_job(
                shared,
                hash,
                &JobError::DebridProcessingFailed("debrid processing timed out".to_string()),
            )
            .await;
            return;
        }
        let delay = if started.elapsed() < shared.config.poll_fast_window {
            shared.config.poll_fast
        } else {
            shared.config.poll_slow
        };
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        match shared.gateway.status(&debrid_id).await {
            Err(err) if err.is_transient() => {
                debug!(info_hash = %hash, error = %err, "status poll failed; will poll again");
            }
            Err(err) => {
                lock_sched(shared).submission_done(hash);
                fail_job(shared, hash, &err).await;
                return;
            }
            Ok(DebridStatus::Processing) => {}
            Ok(DebridStatus::Error { reason }) => {
                lock_sched(shared).submission_done(hash);
                fail_job(shared, hash, &JobError::DebridProcessingFailed(reason)).await;
                return;
            }
            Ok(DebridStatus::Ready { files }) => {
                let large = {
                    let mut job = entry.write().await;
                    job.size_total = files.iter().map(|f| f.size_bytes).sum();
                    if job.display_name == job.info_hash.as_str() {
                        if let Some(first) = files.first() {
                            job.display_name = first.name.clone();
                        }
                    }
                    job.files = files.clone();
                    job.state = JobState::DebridReady;
                    job.attempt = 0;
                    job.is_large(shared.config.profile.large_threshold_bytes)
                };
                persist(shared, hash).await;
                let _ = shared.events.publish(Event::FilesResolved {
                    info_hash: hash.to_string(),
                    files: files
                        .iter()
                        .map(|f| ResolvedFile {
                            name: f.name.clone(),
                            size_bytes: f.size_bytes,
                        })
                        .collect(),
                });
                publish_state(shared, hash, JobState::DebridReady);
                info!(info_hash = %hash, files = files.len(), "hosted links ready");
                {
                    let mut sched = lock_sched(shared);
                    sched.submission_done(hash);
                    sched.enqueue_ready(hash.clone(), large);
                }
                tick(shared);
                return;
            }
        }
    }
}

async fn submit_source(
    shared: &Arc<Shared>,
    source: &JobSource,
) -> Result<fetcharr_core::Submission, JobError> {
    match source {
        JobSource::Magnet { uri } => shared.gateway.submit_magnet(uri).await,
        JobSource::Metainfo { bytes } => shared.gateway.submit_metainfo(bytes).await,
    }
}

/// Stream every file of a ready job, sequentially, resuming at the
/// aggregate byte cursor.
async fn run_download(shared: &Arc<Shared>, hash: &InfoHash, cancel: &CancelToken) {
    let Some(entry) = lookup(shared, hash).await else {
        lock_sched(shared).remove(hash);
        return;
    };
    {
        let mut job = entry.write().await;
        if job.state != JobState::DebridReady {
            drop(job);
            lock_sched(shared).release_run(hash);
            update_gauges(shared);
            return;
        }
        job.state = JobState::Downloading;
    }
    persist(shared, hash).await;
    publish_state(shared, hash, JobState::Downloading);
    update_gauges(shared);

    // The lease is worker-local: a restart always re-unlocks.
    let mut lease: Option<(usize, String, Instant)> = None;

    loop {
        if cancel.is_cancelled() {
            return;
        }
        let snapshot = entry.read().await.clone();
        let Some(cursor) = snapshot.file_cursor() else {
            complete_job(shared, hash).await;
            return;
        };
        let file = snapshot.files[cursor.index].clone();

        if let Err(err) = tokio::fs::create_dir_all(&snapshot.save_path).await {
            release_and_fail(shared, hash, &JobError::DiskPermanent(err.to_string())).await;
            return;
        }
        let path = snapshot.save_path.join(sanitize_file_name(&file.name));

        let reusable = match &lease {
            Some((index, url, expires))
                if *index == cursor.index && Instant::now() < *expires =>
            {
                Some(url.clone())
            }
            _ => None,
        };
        let direct_url = if let Some(url) = reusable {
            url
        } else {
            if matches!(&lease, Some((index, _, _)) if *index == cursor.index) {
                // Natural TTL expiry between attempts on the same file.
                shared.metrics.inc_url_refresh();
            }
            let unlocked = tokio::select! {
                () = cancel.cancelled() => return,
                unlocked = shared.gateway.unlock(&file.hosted_url) => unlocked,
            };
            match unlocked {
                Ok(link) => {
                    let expires = Instant::now()
                        + link
                            .ttl
                            .saturating_sub(LEASE_SAFETY_MARGIN)
                            .max(std::time::Duration::from_secs(1));
                    lease = Some((cursor.index, link.direct_url.clone(), expires));
                    link.direct_url
                }
                Err(err) if err.is_transient() => {
                    retry_or_fail(shared, hash, &entry, err).await;
                    return;
                }
                Err(err) => {
                    release_and_fail(shared, hash, &err).await;
                    return;
                }
            }
        };

        let request = FetchRequest {
            direct_url,
            path,
            size_total: file.size_bytes,
            offset: cursor.offset,
        };
        let base = snapshot
            .files
            .iter()
            .take(cursor.index)
            .map(|f| f.size_bytes)
            .sum::<u64>();

        let (tx, mut rx) = mpsc::channel::<ProgressSample>(16);
        let fetch = shared.fetcher.fetch_file(&request, &tx, cancel);
        tokio::pin!(fetch);
        let result = loop {
            tokio::select! {
                result = &mut fetch => break result,
                received = rx.recv() => {
                    if let Some(sample) = received {
                        apply_progress(shared, hash, &entry, base, sample).await;
                    }
                }
            }
        };
        while let Ok(sample) = rx.try_recv() {
            apply_progress(shared, hash, &entry, base, sample).await;
        }

        match result {
            Ok(outcome) => {
                shared.metrics.add_disk_flushes(outcome.flushes);
                debug!(
                    info_hash = %hash,
                    file = cursor.index,
                    bytes = outcome.bytes_written,
                    "file finished"
                );
                // Next file (or completion) on the next loop turn.
            }
            Err(JobError::Cancelled) => return,
            Err(err @ JobError::UrlExpired) => {
                // The fresh worker unlocks again on re-admission; the backoff
                // policy still applies so a permanently dead link cannot
                // flap forever.
                shared.metrics.inc_url_refresh();
                info!(info_hash = %hash, "direct url expired mid-transfer; re-unlock scheduled");
                retry_or_fail(shared, hash, &entry, err).await;
                return;
            }
            Err(err) if err.is_transient() => {
                retry_or_fail(shared, hash, &entry, err).await;
                return;
            }
            Err(err) => {
                release_and_fail(shared, hash, &err).await;
                return;
            }
        }
    }
}

/// Fold a writer progress sample into the job record, publish it, and
/// persist at most once per interval.
async fn apply_progress(
    shared: &Arc<Shared>,
    hash: &InfoHash,
    entry: &Arc<RwLock<Job>>,
    base: u64,
    sample: ProgressSample,
) {
    let (done, total, speed) = {
        let mut job = entry.write().await;
        let new_done = base + sample.file_done;
        if new_done > job.size_done {
            shared.metrics.add_bytes_downloaded(new_done - job.size_done);
            job.size_done = new_done;
            // Byte progress resets the consecutive-failure budget.
            job.attempt = 0;
        }
        // A sample can race a pause; the bytes are on disk either way, but
        // the published rate belongs to the downloading state only.
        job.speed_bps = if job.state == JobState::Downloading {
            sample.speed_bps
        } else {
            0
        };
        (job.size_done, job.size_total, job.speed_bps)
    };
    let _ = shared.events.publish(Event::Progress {
        info_hash: hash.to_string(),
        bytes_done: done,
        bytes_total: total,
        speed_bps: speed,
    });

    let due = {
        let mut runtime = shared
            .runtime
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match runtime.get_mut(hash) {
            Some(rt) if rt.last_persist.elapsed() >= shared.config.persist_interval => {
                rt.last_persist = Instant::now();
                true
            }
            _ => false,
        }
    };
    if due {
        persist(shared, hash).await;
    }
}

/// Transient failure: hand the slot back, park in `debrid_ready`, and
/// re-queue after the backoff delay, or park in `error` once the
/// consecutive-failure budget is spent.
async fn retry_or_fail(
    shared: &Arc<Shared>,
    hash: &InfoHash,
    entry: &Arc<RwLock<Job>>,
    err: JobError,
) {
    let attempt = {
        let mut job = entry.write().await;
        job.attempt += 1;
        job.attempt
    };
    match shared.config.retry.next_delay(attempt) {
        Some(delay) => {
            warn!(
                info_hash = %hash,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient download failure; backing off"
            );
            requeue_ready(shared, hash, entry, delay).await;
        }
        None => {
            warn!(info_hash = %hash, attempt, error = %err, "transient failure budget exhausted");
            release_and_fail(shared, hash, &err).await;
        }
    }
}

/// Park a job back in `debrid_ready` and schedule its re-admission.
async fn requeue_ready(
    shared: &Arc<Shared>,
    hash: &InfoHash,
    entry: &Arc<RwLock<Job>>,
    delay: std::time::Duration,
) {
    let large = {
        let mut job = entry.write().await;
        if job.state != JobState::Downloading {
            // Pause or delete won the race; leave their state alone.
            return;
        }
        job.state = JobState::DebridReady;
        job.speed_bps = 0;
        job.is_large(shared.config.profile.large_threshold_bytes)
    };
    lock_sched(shared).release_run(hash);
    persist(shared, hash).await;
    publish_state(shared, hash, JobState::DebridReady);
    update_gauges(shared);

    let shared = Arc::clone(shared);
    let hash = hash.clone();
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(entry) = lookup(&shared, &hash).await {
            if entry.read().await.state == JobState::DebridReady {
                lock_sched(&shared).enqueue_ready(hash, large);
                tick(&shared);
            }
        }
    });
}

async fn complete_job(shared: &Arc<Shared>, hash: &InfoHash) {
    let save_path = {
        let Some(entry) = lookup(shared, hash).await else {
            return;
        };
        let mut job = entry.write().await;
        job.state = JobState::Completed;
        job.completed_at = Some(Utc::now());
        job.speed_bps = 0;
        job.attempt = 0;
        job.save_path.display().to_string()
    };
    lock_sched(shared).release_run(hash);
    persist(shared, hash).await;
    publish_state(shared, hash, JobState::Completed);
    let _ = shared.events.publish(Event::Completed {
        info_hash: hash.to_string(),
        save_path,
    });
    shared.metrics.inc_job_completed();
    update_gauges(shared);
    info!(info_hash = %hash, "job completed");
    tick(shared);
}

async fn release_and_fail(shared: &Arc<Shared>, hash: &InfoHash, err: &JobError) {
    lock_sched(shared).release_run(hash);
    fail_job(shared, hash, err).await;
}

async fn fail_job(shared: &Arc<Shared>, hash: &InfoHash, err: &JobError) {
    if let Some(entry) = lookup(shared, hash).await {
        let mut job = entry.write().await;
        job.state = JobState::Error;
        job.last_error = Some(err.to_string());
        job.speed_bps = 0;
    }
    lock_sched(shared).remove(hash);
    persist(shared, hash).await;
    publish_state(shared, hash, JobState::Error);
    shared.metrics.inc_job_errored();
    update_gauges(shared);
    warn!(info_hash = %hash, error = %err, "job parked in error state");
    tick(shared);
}

async fn set_state(shared: &Arc<Shared>, hash: &InfoHash, state: JobState) {
    if let Some(entry) = lookup(shared, hash).await {
        entry.write().await.state = state;
    }
    persist(shared, hash).await;
    publish_state(shared, hash, state);
}

fn publish_state(shared: &Shared, hash: &InfoHash, state: JobState) {
    let _ = shared.events.publish(Event::StateChanged {
        info_hash: hash.to_string(),
        state,
    });
}

async fn persist(shared: &Arc<Shared>, hash: &InfoHash) {
    let Some(entry) = lookup(shared, hash).await else {
        return;
    };
    let job = entry.read().await.clone();
    if let Err(err) = shared.store.put(&job).await {
        warn!(info_hash = %hash, error = %err, "failed to persist job record");
        let _ = shared.events.publish(Event::HealthChanged {
            degraded: vec!["store".to_string()],
        });
    }
}
