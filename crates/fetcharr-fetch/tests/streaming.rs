//! End-to-end tests for the streaming downloader against a local server.

mod common {
    pub mod range_server;
}

use std::time::Duration;

use tokio::sync::mpsc;

use common::range_server::{RangeServerOptions, start, start_with_options};
use fetcharr_core::{CancelToken, JobError, TuningProfile};
use fetcharr_fetch::{FetchRequest, Fetcher, FileWriter};

fn test_profile(connections: u32) -> TuningProfile {
    let mut profile = TuningProfile::hdd();
    profile.max_connections_per_job = connections;
    profile.disk_buffer_bytes = 512 * 1024;
    profile.write_batch_bytes = 128 * 1024;
    profile.flush_interval = Duration::from_millis(200);
    profile
}

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn request(url: &str, dir: &tempfile::TempDir, size_total: u64, offset: u64) -> FetchRequest {
    FetchRequest {
        direct_url: url.to_string(),
        path: dir.path().join("out.bin"),
        size_total,
        offset,
    }
}

#[tokio::test]
async fn sequential_download_writes_the_exact_body() {
    let payload = body(1_200_000);
    let url = start(payload.clone());
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Fetcher::new(test_profile(1)).expect("fetcher");
    let (tx, mut rx) = mpsc::channel(64);

    let request = request(&url, &dir, payload.len() as u64, 0);
    let outcome = fetcher
        .fetch_file(&request, &tx, &CancelToken::new())
        .await
        .expect("fetch");
    assert_eq!(outcome.bytes_written, payload.len() as u64);
    assert!(outcome.flushes >= 1, "completion must fsync");

    let written = std::fs::read(&request.path).expect("read output");
    assert_eq!(written, payload);

    // Progress is monotone and ends at the full length.
    let mut last = 0;
    while let Ok(sample) = rx.try_recv() {
        assert!(sample.file_done >= last);
        last = sample.file_done;
    }
    assert_eq!(last, payload.len() as u64);
}

#[tokio::test]
async fn resume_skips_the_committed_prefix() {
    let payload = body(800_000);
    let url = start(payload.clone());
    let dir = tempfile::tempdir().expect("tempdir");
    let request = request(&url, &dir, payload.len() as u64, 300_000);

    // Simulate a previous run that committed the first 300_000 bytes.
    let writer = FileWriter::open(&request.path, payload.len() as u64, true).expect("open");
    writer.write_at(0, &payload[..300_000]).expect("seed prefix");
    writer.sync().expect("sync");
    drop(writer);

    let fetcher = Fetcher::new(test_profile(1)).expect("fetcher");
    let (tx, _rx) = mpsc::channel(64);
    let outcome = fetcher
        .fetch_file(&request, &tx, &CancelToken::new())
        .await
        .expect("fetch");
    assert_eq!(outcome.bytes_written, 500_000, "only the tail is streamed");

    let written = std::fs::read(&request.path).expect("read output");
    assert_eq!(written, payload, "no byte of the prefix is rewritten");
}

#[tokio::test]
async fn multi_connection_download_reassembles_in_order() {
    let payload = body(6 * 1024 * 1024);
    let url = start(payload.clone());
    let dir = tempfile::tempdir().expect("tempdir");
    let mut profile = test_profile(4);
    profile.preallocate = false;
    let fetcher = Fetcher::new(profile).expect("fetcher");
    let (tx, _rx) = mpsc::channel(64);

    let request = request(&url, &dir, payload.len() as u64, 0);
    let outcome = fetcher
        .fetch_file(&request, &tx, &CancelToken::new())
        .await
        .expect("fetch");
    assert_eq!(outcome.bytes_written, payload.len() as u64);
    assert_eq!(std::fs::read(&request.path).expect("read"), payload);
}

#[tokio::test]
async fn servers_without_range_support_restart_from_zero() {
    let payload = body(500_000);
    let url = start_with_options(
        payload.clone(),
        RangeServerOptions {
            support_ranges: false,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Fetcher::new(test_profile(4)).expect("fetcher");
    let (tx, _rx) = mpsc::channel(64);

    // Ask to resume from an offset the server cannot honour.
    let request = request(&url, &dir, payload.len() as u64, 100_000);
    let outcome = fetcher
        .fetch_file(&request, &tx, &CancelToken::new())
        .await
        .expect("fetch");
    assert_eq!(
        outcome.bytes_written,
        payload.len() as u64,
        "sequential restart re-streams the whole body"
    );
    assert_eq!(std::fs::read(&request.path).expect("read"), payload);
}

#[tokio::test]
async fn expired_links_surface_as_url_expired() {
    let url = start_with_options(
        body(1024),
        RangeServerOptions {
            status_override: Some(410),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Fetcher::new(test_profile(1)).expect("fetcher");
    let (tx, _rx) = mpsc::channel(64);

    let request = request(&url, &dir, 1024, 0);
    let err = fetcher
        .fetch_file(&request, &tx, &CancelToken::new())
        .await
        .expect_err("must fail");
    assert_eq!(err, JobError::UrlExpired);
}

#[tokio::test]
async fn truncated_bodies_are_transient() {
    let payload = body(400_000);
    let url = start_with_options(
        payload.clone(),
        RangeServerOptions {
            truncate_to: Some(100_000),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Fetcher::new(test_profile(1)).expect("fetcher");
    let (tx, _rx) = mpsc::channel(64);

    let request = request(&url, &dir, payload.len() as u64, 0);
    let err = fetcher
        .fetch_file(&request, &tx, &CancelToken::new())
        .await
        .expect_err("must fail");
    assert!(err.is_transient(), "short body must be retryable, got {err:?}");
}

#[tokio::test]
async fn cancellation_stops_the_transfer_promptly() {
    let payload = body(4 * 1024 * 1024);
    let url = start_with_options(
        payload.clone(),
        RangeServerOptions {
            throttle: Some(Duration::from_millis(20)),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Fetcher::new(test_profile(1)).expect("fetcher");
    let (tx, _rx) = mpsc::channel(64);
    let cancel = CancelToken::new();

    let request = request(&url, &dir, payload.len() as u64, 0);
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            cancel.cancel();
        })
    };

    let err = fetcher
        .fetch_file(&request, &tx, &cancel)
        .await
        .expect_err("must be cancelled");
    assert_eq!(err, JobError::Cancelled);
    canceller.await.expect("canceller");
}

#[tokio::test]
async fn zero_length_files_complete_immediately() {
    let url = start(Vec::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Fetcher::new(test_profile(1)).expect("fetcher");
    let (tx, _rx) = mpsc::channel(64);

    let request = request(&url, &dir, 0, 0);
    let outcome = fetcher
        .fetch_file(&request, &tx, &CancelToken::new())
        .await
        .expect("fetch");
    assert_eq!(outcome.bytes_written, 0);
    assert_eq!(std::fs::metadata(&request.path).expect("stat").len(), 0);
}
