//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - The `/metrics` endpoint serves the JSON snapshot; the text exposition
//!   renderer is kept for operators scraping with Prometheus directly.

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across the broker.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    jobs_added_total: IntCounter,
    jobs_completed_total: IntCounter,
    jobs_errored_total: IntCounter,
    jobs_removed_total: IntCounter,
    bytes_downloaded_total: IntCounter,
    debrid_requests_total: IntCounterVec,
    debrid_retries_total: IntCounter,
    url_refreshes_total: IntCounter,
    disk_flushes_total: IntCounter,
    active_jobs: IntGauge,
    queue_depth: IntGauge,
}

/// Point-in-time view of every counter, served as JSON by `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Jobs accepted over the process lifetime.
    pub jobs_added_total: u64,
    /// Jobs that reached `completed`.
    pub jobs_completed_total: u64,
    /// Jobs that reached the terminal `error` state.
    pub jobs_errored_total: u64,
    /// Jobs explicitly deleted.
    pub jobs_removed_total: u64,
    /// Bytes persisted to destination files.
    pub bytes_downloaded_total: u64,
    /// Retried calls against the unrestricting service.
    pub debrid_retries_total: u64,
    /// Direct URLs re-unlocked after expiry.
    pub url_refreshes_total: u64,
    /// Explicit fsyncs of destination files.
    pub disk_flushes_total: u64,
    /// Jobs currently bound to a download worker.
    pub active_jobs: i64,
    /// Jobs waiting for a run slot.
    pub queue_depth: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )?;
        let jobs_added_total =
            IntCounter::with_opts(Opts::new("jobs_added_total", "Jobs accepted"))?;
        let jobs_completed_total =
            IntCounter::with_opts(Opts::new("jobs_completed_total", "Jobs completed"))?;
        let jobs_errored_total =
            IntCounter::with_opts(Opts::new("jobs_errored_total", "Jobs ending in error"))?;
        let jobs_removed_total =
            IntCounter::with_opts(Opts::new("jobs_removed_total", "Jobs deleted by callers"))?;
        let bytes_downloaded_total = IntCounter::with_opts(Opts::new(
            "bytes_downloaded_total",
            "Bytes persisted to destination files",
        ))?;
        let debrid_requests_total = IntCounterVec::new(
            Opts::new(
                "debrid_requests_total",
                "Calls against the unrestricting service by operation",
            ),
            &["op"],
        )?;
        let debrid_retries_total = IntCounter::with_opts(Opts::new(
            "debrid_retries_total",
            "Retried unrestricting service calls",
        ))?;
        let url_refreshes_total = IntCounter::with_opts(Opts::new(
            "url_refreshes_total",
            "Direct URLs re-unlocked after expiry",
        ))?;
        let disk_flushes_total = IntCounter::with_opts(Opts::new(
            "disk_flushes_total",
            "Explicit fsyncs of destination files",
        ))?;
        let active_jobs = IntGauge::with_opts(Opts::new(
            "active_jobs",
            "Jobs currently bound to a download worker",
        ))?;
        let queue_depth =
            IntGauge::with_opts(Opts::new("queue_depth", "Jobs waiting for a run slot"))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(jobs_added_total.clone()))?;
        registry.register(Box::new(jobs_completed_total.clone()))?;
        registry.register(Box::new(jobs_errored_total.clone()))?;
        registry.register(Box::new(jobs_removed_total.clone()))?;
        registry.register(Box::new(bytes_downloaded_total.clone()))?;
        registry.register(Box::new(debrid_requests_total.clone()))?;
        registry.register(Box::new(debrid_retries_total.clone()))?;
        registry.register(Box::new(url_refreshes_total.clone()))?;
        registry.register(Box::new(disk_flushes_total.clone()))?;
        registry.register(Box::new(active_jobs.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                http_requests_total,
                jobs_added_total,
                jobs_completed_total,
                jobs_errored_total,
                jobs_removed_total,
                bytes_downloaded_total,
                debrid_requests_total,
                debrid_retries_total,
                url_refreshes_total,
                disk_flushes_total,
                active_jobs,
                queue_depth,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Count one accepted job.
    pub fn inc_job_added(&self) {
        self.inner.jobs_added_total.inc();
    }

    /// Count one completed job.
    pub fn inc_job_completed(&self) {
        self.inner.jobs_completed_total.inc();
    }

    /// Count one job parked in the terminal error state.
    pub fn inc_job_errored(&self) {
        self.inner.jobs_errored_total.inc();
    }

    /// Count one deleted job.
    pub fn inc_job_removed(&self) {
        self.inner.jobs_removed_total.inc();
    }

    /// Add persisted bytes to the running total.
    pub fn add_bytes_downloaded(&self, bytes: u64) {
        self.inner.bytes_downloaded_total.inc_by(bytes);
    }

    /// Count one call against the unrestricting service.
    pub fn inc_debrid_request(&self, op: &str) {
        self.inner
            .debrid_requests_total
            .with_label_values(&[op])
            .inc();
    }

    /// Count one retried unrestricting service call.
    pub fn inc_debrid_retry(&self) {
        self.inner.debrid_retries_total.inc();
    }

    /// Count one re-unlocked direct URL.
    pub fn inc_url_refresh(&self) {
        self.inner.url_refreshes_total.inc();
    }

    /// Add explicit fsyncs to the running total.
    pub fn add_disk_flushes(&self, count: u64) {
        self.inner.disk_flushes_total.inc_by(count);
    }

    /// Set the number of jobs bound to a download worker.
    pub fn set_active_jobs(&self, count: i64) {
        self.inner.active_jobs.set(count);
    }

    /// Set the number of jobs waiting for a run slot.
    pub fn set_queue_depth(&self, depth: i64) {
        self.inner.queue_depth.set(depth);
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or the buffer is not
    /// valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of every counter and gauge.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_added_total: self.inner.jobs_added_total.get(),
            jobs_completed_total: self.inner.jobs_completed_total.get(),
            jobs_errored_total: self.inner.jobs_errored_total.get(),
            jobs_removed_total: self.inner.jobs_removed_total.get(),
            bytes_downloaded_total: self.inner.bytes_downloaded_total.get(),
            debrid_retries_total: self.inner.debrid_retries_total.get(),
            url_refreshes_total: self.inner.url_refreshes_total.get(),
            disk_flushes_total: self.inner.disk_flushes_total.get(),
            active_jobs: self.inner.active_jobs.get(),
            queue_depth: self.inner.queue_depth.get(),
        }
    }
}
