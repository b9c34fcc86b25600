#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Core event bus for the Fetcharr broker.
//!
//! The bus provides a typed event enum, sequential identifiers, and support
//! for replaying recent events when a consumer reconnects. Internally it uses
//! `tokio::broadcast` with a bounded buffer; when the channel overflows, the
//! oldest events are dropped, matching the desired backpressure behaviour.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};

/// Identifier assigned to each event emitted by the broker.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Lifecycle states a job moves through.
///
/// Transitions are monotonic through queued → `debrid_pending` →
/// `debrid_ready` → downloading → completed, with paused and error as
/// sidetracks owned by the job manager.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted but not yet submitted to the unrestricting service.
    Queued,
    /// Submitted; the unrestricting service is fetching the content.
    DebridPending,
    /// Hosted links are available and the job is waiting for a run slot.
    DebridReady,
    /// A download worker is streaming bytes to disk.
    Downloading,
    /// Stopped by the caller; partial data is kept.
    Paused,
    /// All files fully written and fsynced.
    Completed,
    /// Terminal failure; the cause is recorded on the job record.
    Error,
}

impl JobState {
    /// Snake-case name used in persistence and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::DebridPending => "debrid_pending",
            Self::DebridReady => "debrid_ready",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Individual file reported by the unrestricting service for a job.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ResolvedFile {
    /// File name as reported by the service (unsanitized).
    pub name: String,
    /// Size of the file in bytes.
    pub size_bytes: u64,
}

/// Typed domain events surfaced across the broker.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A job was registered with the manager.
    JobAdded {
        /// Info-hash of the new job.
        info_hash: String,
        /// Best-known display name at add time.
        name: String,
    },
    /// The unrestricting service produced the file listing for a job.
    FilesResolved {
        /// Info-hash of the job.
        info_hash: String,
        /// Files the job will download, in order.
        files: Vec<ResolvedFile>,
    },
    /// Periodic progress update emitted while a job is downloading.
    Progress {
        /// Info-hash of the job being tracked.
        info_hash: String,
        /// Aggregate bytes persisted so far.
        bytes_done: u64,
        /// Total bytes expected for the job.
        bytes_total: u64,
        /// Instantaneous download rate in bytes per second.
        speed_bps: u64,
    },
    /// Job transitioned into a new lifecycle state.
    StateChanged {
        /// Info-hash of the job whose state changed.
        info_hash: String,
        /// Updated state.
        state: JobState,
    },
    /// Job finished and its destination files are durable.
    Completed {
        /// Info-hash of the completed job.
        info_hash: String,
        /// Absolute path of the destination directory.
        save_path: String,
    },
    /// Job was removed from the catalog.
    JobRemoved {
        /// Info-hash of the removed job.
        info_hash: String,
    },
    /// A component degraded or recovered.
    HealthChanged {
        /// Components currently considered degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for metrics and log consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JobAdded { .. } => "job_added",
            Self::FilesResolved { .. } => "files_resolved",
            Self::Progress { .. } => "progress",
            Self::StateChanged { .. } => "state_changed",
            Self::Completed { .. } => "completed",
            Self::JobRemoved { .. } => "job_removed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, ensuring dropped events impact both structures consistently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.lock_buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.lock_buffer();
            for item in buffer.iter() {
                if item.id > since {
                    backlog.push_back(item.clone());
                }
            }
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Return a snapshot of buffered events newer than the supplied identifier.
    #[must_use]
    pub fn backlog_since(&self, since_id: EventId) -> Vec<EventEnvelope> {
        let buffer = self.lock_buffer();
        buffer
            .iter()
            .filter(|item| item.id > since_id)
            .cloned()
            .collect()
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.lock_buffer();
        buffer.back().map(|event| event.id)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from
/// the live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => self.receiver.recv().await.ok(),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}
