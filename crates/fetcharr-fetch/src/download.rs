//! Memory-bounded streaming download of one file.
//!
//! One reader task per segment streams the HTTP body into a bounded buffer
//! (a channel guarded by a byte-budget semaphore); a single writer drains
//! the buffers in file order, submitting positional write batches from a
//! blocking task. The writer owns all progress accounting, so `file_done`
//! is always the length of the contiguous committed prefix.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_ENCODING, RANGE};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use fetcharr_core::{CancelToken, JobError, TuningProfile};

use crate::meter::SpeedMeter;
use crate::segment::{Segment, plan_segments};
use crate::storage::FileWriter;

/// Cadence of progress publication.
const PROGRESS_TICK: Duration = Duration::from_millis(500);
/// Window of the published EWMA rate.
const SPEED_WINDOW: Duration = Duration::from_secs(3);
/// Idle-read timeout on the HTTP body.
const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(60);
/// TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Message slots per segment channel; bytes are bounded by the semaphore.
const READER_CHANNEL_SLOTS: usize = 256;
/// Floor for the per-segment byte budget.
const MIN_SEGMENT_BUDGET: u64 = 256 * 1024;

/// One file to stream to disk.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Unlocked direct URL.
    pub direct_url: String,
    /// Destination file path.
    pub path: PathBuf,
    /// Expected length of the file.
    pub size_total: u64,
    /// Committed prefix already on disk; streaming resumes here.
    pub offset: u64,
}

/// Progress published by the writer every 500 ms.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSample {
    /// Contiguous bytes committed to this file.
    pub file_done: u64,
    /// Smoothed rate in bytes per second.
    pub speed_bps: u64,
}

/// Totals for a completed fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOutcome {
    /// Bytes written by this call (excludes the resumed prefix).
    pub bytes_written: u64,
    /// Explicit fsyncs issued.
    pub flushes: u64,
}

enum ReadEnd {
    /// Body streamed to the end of the segment (possibly short).
    Complete,
    /// Server answered 200 to a ranged request it cannot honour.
    RangeUnsupported,
}

enum Failure {
    Job(JobError),
    RangeUnsupported,
}

impl From<JobError> for Failure {
    fn from(err: JobError) -> Self {
        Self::Job(err)
    }
}

/// Streaming downloader configured by a tuning profile.
pub struct Fetcher {
    http: reqwest::Client,
    profile: TuningProfile,
}

impl Fetcher {
    /// Build a downloader sharing one HTTP connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Internal`] when the HTTP client cannot be built.
    pub fn new(profile: TuningProfile) -> Result<Self, JobError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(IDLE_READ_TIMEOUT)
            .build()
            .map_err(|err| JobError::Internal(format!("failed to build http client: {err}")))?;
        Ok(Self { http, profile })
    }

    /// The tuning profile this fetcher runs under.
    #[must_use]
    pub const fn profile(&self) -> &TuningProfile {
        &self.profile
    }

    /// Stream one file to disk, resuming from `request.offset`.
    ///
    /// On a 200 answer to a ranged request the transfer restarts from byte
    /// zero over a single connection, as plain sequential streaming.
    ///
    /// # Errors
    ///
    /// Transient failures (timeouts, resets, short bodies, expired URLs,
    /// full disks, size mismatch at EOF) surface as their [`JobError`] kind
    /// for the job manager to classify; cancellation surfaces as
    /// [`JobError::Cancelled`].
    pub async fn fetch_file(
        &self,
        request: &FetchRequest,
        progress: &mpsc::Sender<ProgressSample>,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, JobError> {
        match self.attempt(request, progress, cancel, false).await {
            Ok(outcome) => Ok(outcome),
            Err(Failure::Job(err)) => Err(err),
            Err(Failure::RangeUnsupported) => {
                debug!(url = %request.direct_url, "server ignored range request; restarting sequentially");
                match self.attempt(request, progress, cancel, true).await {
                    Ok(outcome) => Ok(outcome),
                    Err(Failure::Job(err)) => Err(err),
                    Err(Failure::RangeUnsupported) => Err(JobError::NetworkTransient(
                        "server ignored range request twice".to_string(),
                    )),
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &FetchRequest,
        progress: &mpsc::Sender<ProgressSample>,
        cancel: &CancelToken,
        force_sequential: bool,
    ) -> Result<FetchOutcome, Failure> {
        let offset = if force_sequential { 0 } else { request.offset };
        let writer = open_writer(
            request.path.clone(),
            request.size_total,
            self.profile.preallocate,
        )
        .await?;

        let mut outcome = FetchOutcome::default();
        if request.size_total == 0 {
            sync_writer(&writer).await?;
            outcome.flushes = 1;
            return Ok(outcome);
        }

        let segments = if force_sequential {
            vec![Segment {
                start: 0,
                end: request.size_total,
            }]
        } else {
            plan_segments(offset, request.size_total, self.profile.max_connections_per_job)
        };
        if segments.is_empty() {
            // Nothing left to stream; still verify the completion predicate.
            verify_length(&writer, request.size_total).await?;
            return Ok(outcome);
        }

        let budget = (self.profile.disk_buffer_bytes / segments.len() as u64)
            .max(MIN_SEGMENT_BUDGET);
        let open_ended = segments.len() == 1;

        let mut pipes = VecDeque::with_capacity(segments.len());
        let mut handles = Vec::with_capacity(segments.len());
        for segment in &segments {
            let (tx, rx) = mpsc::channel::<Bytes>(READER_CHANNEL_SLOTS);
            let permits = Arc::new(Semaphore::new(usize::try_from(budget).unwrap_or(usize::MAX)));
            handles.push(tokio::spawn(read_segment(
                self.http.clone(),
                request.direct_url.clone(),
                *segment,
                open_ended,
                budget,
                tx,
                Arc::clone(&permits),
                cancel.clone(),
            )));
            pipes.push_back((rx, permits));
        }

        let result = self
            .drive_writer(
                &writer,
                &segments,
                &mut pipes,
                &mut handles,
                budget,
                offset,
                request.size_total,
                progress,
                cancel,
                &mut outcome,
            )
            .await;

        for handle in &handles {
            handle.abort();
        }
        result.map(|()| outcome)
    }

    #[expect(
        clippy::too_many_arguments,
        reason = "single call site; splitting would only scatter the writer state"
    )]
    async fn drive_writer(
        &self,
        writer: &FileWriter,
        segments: &[Segment],
        pipes: &mut VecDeque<(mpsc::Receiver<Bytes>, Arc<Semaphore>)>,
        handles: &mut [JoinHandle<Result<ReadEnd, JobError>>],
        budget: u64,
        start_offset: u64,
        size_total: u64,
        progress: &mpsc::Sender<ProgressSample>,
        cancel: &CancelToken,
        outcome: &mut FetchOutcome,
    ) -> Result<(), Failure> {
        let effective_batch = self
            .profile
            .write_batch_bytes
            .min(self.profile.disk_buffer_bytes)
            .max(1);

        let mut flush_tick = tokio::time::interval(self.profile.flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut progress_tick = tokio::time::interval(PROGRESS_TICK);
        progress_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut meter = SpeedMeter::new(PROGRESS_TICK, SPEED_WINDOW);
        let mut file_done = start_offset;
        let mut last_published = (file_done, Instant::now());
        let mut dirty = false;

        for (index, segment) in segments.iter().enumerate() {
            let Some((mut rx, permits)) = pipes.pop_front() else {
                return Err(JobError::Internal("segment pipe missing".to_string()).into());
            };
            let mut seg_written = 0u64;
            let mut batch: Vec<Bytes> = Vec::new();
            let mut batch_bytes = 0u64;
            let mut batch_charge = 0u64;
            let mut closed = false;

            while seg_written < segment.len() && !closed {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        // A batch in flight is completed to keep the file a
                        // contiguous prefix, then the worker stops.
                        commit_batch(
                            writer,
                            segment.start + seg_written,
                            &mut batch,
                            &mut batch_bytes,
                            &mut batch_charge,
                            &permits,
                            &mut seg_written,
                            &mut file_done,
                            &mut dirty,
                            outcome,
                        )
                        .await?;
                        return Err(JobError::Cancelled.into());
                    }
                    _ = flush_tick.tick() => {
                        commit_batch(
                            writer,
                            segment.start + seg_written,
                            &mut batch,
                            &mut batch_bytes,
                            &mut batch_charge,
                            &permits,
                            &mut seg_written,
                            &mut file_done,
                            &mut dirty,
                            outcome,
                        )
                        .await?;
                        if dirty {
                            sync_writer(writer).await?;
                            outcome.flushes += 1;
                            dirty = false;
                        }
                    }
                    _ = progress_tick.tick() => {
                        let now = Instant::now();
                        meter.update(file_done - last_published.0, now - last_published.1);
                        last_published = (file_done, now);
                        let _ = progress.try_send(ProgressSample {
                            file_done,
                            speed_bps: meter.bps(),
                        });
                    }
                    received = rx.recv() => {
                        match received {
                            None => closed = true,
                            Some(chunk) => {
                                batch_bytes += chunk.len() as u64;
                                batch_charge += charge(chunk.len(), budget);
                                batch.push(chunk);
                                // Drain whatever is already buffered before
                                // touching the disk again.
                                while batch_bytes < effective_batch {
                                    match rx.try_recv() {
                                        Ok(chunk) => {
                                            batch_bytes += chunk.len() as u64;
                                            batch_charge += charge(chunk.len(), budget);
                                            batch.push(chunk);
                                        }
                                        Err(_) => break,
                                    }
                                }
                                commit_batch(
                                    writer,
                                    segment.start + seg_written,
                                    &mut batch,
                                    &mut batch_bytes,
                                    &mut batch_charge,
                                    &permits,
                                    &mut seg_written,
                                    &mut file_done,
                                    &mut dirty,
                                    outcome,
                                )
                                .await?;
                            }
                        }
                    }
                }
            }

            if seg_written < segment.len() {
                // The channel closed before the window filled: consult the
                // reader for the cause.
                let handle = &mut handles[index];
                return match handle.await {
                    Ok(Ok(ReadEnd::RangeUnsupported)) => Err(Failure::RangeUnsupported),
                    Ok(Ok(ReadEnd::Complete)) => {
                        warn!(
                            segment = index,
                            expected = segment.len(),
                            got = seg_written,
                            "body ended before the segment window filled"
                        );
                        Err(JobError::NetworkTransient(
                            "connection closed before the segment completed".to_string(),
                        )
                        .into())
                    }
                    Ok(Err(err)) => Err(err.into()),
                    Err(join) => {
                        Err(JobError::Internal(format!("segment reader panicked: {join}")).into())
                    }
                };
            }
        }

        sync_writer(writer).await?;
        outcome.flushes += 1;
        verify_length(writer, size_total).await?;

        let now = Instant::now();
        meter.update(file_done - last_published.0, now - last_published.1);
        let _ = progress.try_send(ProgressSample {
            file_done,
            speed_bps: meter.bps(),
        });
        Ok(())
    }
}

/// Bytes a chunk counts against the segment budget; oversized chunks are
/// clamped so a single chunk can never starve the semaphore.
const fn charge(len: usize, budget: u64) -> u64 {
    let len = len as u64;
    if len < budget { len } else { budget }
}

#[expect(
    clippy::too_many_arguments,
    reason = "the batch state lives in the writer loop; a struct would be churn for two call sites"
)]
async fn commit_batch(
    writer: &FileWriter,
    offset: u64,
    batch: &mut Vec<Bytes>,
    batch_bytes: &mut u64,
    batch_charge: &mut u64,
    permits: &Arc<Semaphore>,
    seg_written: &mut u64,
    file_done: &mut u64,
    dirty: &mut bool,
    outcome: &mut FetchOutcome,
) -> Result<(), JobError> {
    if batch.is_empty() {
        return Ok(());
    }
    let chunks = std::mem::take(batch);
    let bytes = *batch_bytes;
    let released = *batch_charge;
    *batch_bytes = 0;
    *batch_charge = 0;

    let blocking_writer = writer.clone();
    let written = tokio::task::spawn_blocking(move || blocking_writer.write_batch(offset, &chunks))
        .await
        .map_err(|err| JobError::Internal(format!("disk writer task failed: {err}")))?
        .map_err(|err| classify_io(&err))?;
    debug_assert_eq!(written, bytes);

    permits.add_permits(usize::try_from(released).unwrap_or(usize::MAX));
    *seg_written += bytes;
    *file_done += bytes;
    *dirty = true;
    outcome.bytes_written += bytes;
    Ok(())
}

async fn open_writer(path: PathBuf, size_total: u64, preallocate: bool) -> Result<FileWriter, JobError> {
    tokio::task::spawn_blocking(move || FileWriter::open(&path, size_total, preallocate))
        .await
        .map_err(|err| JobError::Internal(format!("disk open task failed: {err}")))?
        .map_err(|err| classify_io(&err))
}

async fn sync_writer(writer: &FileWriter) -> Result<(), JobError> {
    let writer = writer.clone();
    tokio::task::spawn_blocking(move || writer.sync())
        .await
        .map_err(|err| JobError::Internal(format!("disk sync task failed: {err}")))?
        .map_err(|err| classify_io(&err))
}

async fn verify_length(writer: &FileWriter, size_total: u64) -> Result<(), JobError> {
    let writer = writer.clone();
    let len = tokio::task::spawn_blocking(move || writer.len())
        .await
        .map_err(|err| JobError::Internal(format!("disk stat task failed: {err}")))?
        .map_err(|err| classify_io(&err))?;
    if len == size_total {
        Ok(())
    } else {
        Err(JobError::SizeMismatch {
            expected: size_total,
            actual: len,
        })
    }
}

fn classify_io(err: &io::Error) -> JobError {
    if err.raw_os_error() == Some(28) || err.kind() == io::ErrorKind::StorageFull {
        JobError::DiskFull
    } else {
        JobError::DiskPermanent(err.to_string())
    }
}

#[expect(
    clippy::too_many_arguments,
    reason = "reader wiring mirrors the per-segment pipe construction"
)]
async fn read_segment(
    http: reqwest::Client,
    url: String,
    segment: Segment,
    open_ended: bool,
    budget: u64,
    tx: mpsc::Sender<Bytes>,
    permits: Arc<Semaphore>,
    cancel: CancelToken,
) -> Result<ReadEnd, JobError> {
    let request = http
        .get(&url)
        .header(RANGE, segment.range_header_value(open_ended))
        .header(ACCEPT_ENCODING, "identity");

    let mut response = tokio::select! {
        () = cancel.cancelled() => return Err(JobError::Cancelled),
        sent = request.send() => sent.map_err(classify_transport)?,
    };

    match response.status() {
        StatusCode::PARTIAL_CONTENT => {}
        StatusCode::OK => {
            if !(open_ended && segment.start == 0) {
                return Ok(ReadEnd::RangeUnsupported);
            }
        }
        status => return Err(classify_direct_status(status)),
    }

    let limit = segment.len();
    let mut received = 0u64;
    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return Err(JobError::Cancelled),
            chunk = response.chunk() => chunk.map_err(classify_transport)?,
        };
        let Some(mut chunk) = chunk else {
            return Ok(ReadEnd::Complete);
        };
        if received + chunk.len() as u64 > limit {
            // Servers occasionally pad past the requested window; never let
            // a segment write outside it.
            chunk.truncate(usize::try_from(limit - received).unwrap_or(usize::MAX));
        }
        if chunk.is_empty() {
            return Ok(ReadEnd::Complete);
        }

        let needed = charge(chunk.len(), budget);
        let acquired = tokio::select! {
            () = cancel.cancelled() => return Err(JobError::Cancelled),
            acquired = permits.acquire_many(u32::try_from(needed).unwrap_or(u32::MAX)) => acquired,
        };
        match acquired {
            Ok(permit) => permit.forget(),
            Err(_) => return Err(JobError::Cancelled),
        }

        received += chunk.len() as u64;
        if tx.send(chunk).await.is_err() {
            // Writer went away; it knows why.
            return Err(JobError::Cancelled);
        }
        if received >= limit {
            return Ok(ReadEnd::Complete);
        }
    }
}

fn classify_transport(err: reqwest::Error) -> JobError {
    if err.is_timeout() {
        JobError::NetworkTransient("read timed out".to_string())
    } else {
        JobError::NetworkTransient(err.to_string())
    }
}

fn classify_direct_status(status: StatusCode) -> JobError {
    match status {
        StatusCode::FORBIDDEN | StatusCode::GONE | StatusCode::NOT_FOUND => JobError::UrlExpired,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            JobError::NetworkTransient(format!("http {status}"))
        }
        status if status.is_server_error() => JobError::NetworkTransient(format!("http {status}")),
        status => JobError::DebridReject(format!("direct download rejected: http {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_status_classification_follows_the_taxonomy() {
        assert_eq!(classify_direct_status(StatusCode::GONE), JobError::UrlExpired);
        assert_eq!(
            classify_direct_status(StatusCode::FORBIDDEN),
            JobError::UrlExpired
        );
        assert!(classify_direct_status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(classify_direct_status(StatusCode::BAD_GATEWAY).is_transient());
        assert!(!classify_direct_status(StatusCode::UNAUTHORIZED).is_transient());
    }

    #[test]
    fn charge_clamps_oversized_chunks() {
        assert_eq!(charge(1_000, 4_096), 1_000);
        assert_eq!(charge(10_000, 4_096), 4_096);
    }

    #[test]
    fn enospc_maps_to_disk_full() {
        let err = io::Error::from_raw_os_error(28);
        assert_eq!(classify_io(&err), JobError::DiskFull);
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(classify_io(&err), JobError::DiskPermanent(_)));
    }
}
