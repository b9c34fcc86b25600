//! API application state and helpers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;
use tracing::debug;

use fetcharr_core::{JobInspector, JobWorkflow};
use fetcharr_events::{Event, EventBus};
use fetcharr_telemetry::Metrics;

/// Workflow and inspector handles the facade dispatches into.
#[derive(Clone)]
pub struct JobHandles {
    workflow: Arc<dyn JobWorkflow>,
    inspector: Arc<dyn JobInspector>,
}

impl JobHandles {
    /// Pair a workflow with its inspector.
    #[must_use]
    pub fn new(workflow: Arc<dyn JobWorkflow>, inspector: Arc<dyn JobInspector>) -> Self {
        Self {
            workflow,
            inspector,
        }
    }

    /// Lifecycle control surface.
    #[must_use]
    pub fn workflow(&self) -> &Arc<dyn JobWorkflow> {
        &self.workflow
    }

    /// Snapshot surface.
    #[must_use]
    pub fn inspector(&self) -> &Arc<dyn JobInspector> {
        &self.inspector
    }
}

/// Values served by `/api/v2/app/preferences`.
#[derive(Debug, Clone)]
pub struct Preferences {
    /// Default save path reported to callers.
    pub save_path: String,
    /// Maximum simultaneously active downloads under the current profile.
    pub max_active_downloads: i64,
}

/// Shared state behind every handler.
pub struct ApiState {
    pub(crate) handles: JobHandles,
    pub(crate) events: EventBus,
    pub(crate) metrics: Metrics,
    pub(crate) preferences: Preferences,
    sessions: Mutex<HashSet<String>>,
    degraded: Mutex<Vec<String>>,
}

impl ApiState {
    /// Assemble the state shared by all handlers.
    #[must_use]
    pub fn new(
        handles: JobHandles,
        events: EventBus,
        metrics: Metrics,
        preferences: Preferences,
    ) -> Self {
        Self {
            handles,
            events,
            metrics,
            preferences,
            sessions: Mutex::new(HashSet::new()),
            degraded: Mutex::new(Vec::new()),
        }
    }

    /// Issue a fresh session identifier for a login.
    pub(crate) fn issue_session(&self) -> String {
        let mut rng = rand::rng();
        let sid: String = (0..32)
            .map(|_| {
                let nibble: u8 = rng.random_range(0..16);
                char::from_digit(u32::from(nibble), 16).unwrap_or('0')
            })
            .collect();
        self.lock_sessions().insert(sid.clone());
        sid
    }

    /// Forget a session identifier.
    pub(crate) fn revoke_session(&self, sid: &str) {
        self.lock_sessions().remove(sid);
    }

    /// Whether a session identifier was issued by this process.
    pub(crate) fn session_known(&self, sid: &str) -> bool {
        self.lock_sessions().contains(sid)
    }

    /// Components currently reporting degradation.
    pub(crate) fn degraded(&self) -> Vec<String> {
        match self.degraded.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Track `HealthChanged` events so `/health` can report detail without
    /// coupling the facade to the engine.
    pub(crate) fn spawn_health_listener(self: Arc<Self>) {
        let mut stream = self.events.subscribe(None);
        tokio::spawn(async move {
            while let Some(envelope) = stream.next().await {
                if let Event::HealthChanged { degraded } = envelope.event {
                    debug!(components = degraded.len(), "health state updated");
                    match self.degraded.lock() {
                        Ok(mut guard) => *guard = degraded,
                        Err(poisoned) => *poisoned.into_inner() = degraded,
                    }
                }
            }
        });
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
