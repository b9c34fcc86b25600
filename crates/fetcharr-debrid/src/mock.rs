//! In-process gateway used by engine and adapter tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use fetcharr_core::{
    DebridGateway, DebridStatus, InfoHash, JobError, RemoteFile, Submission, UnlockedLink,
};

/// Behaviour the mock applies to a submitted magnet.
#[derive(Debug, Clone)]
pub struct ScriptedMagnet {
    /// Status polls that report `Processing` before the magnet turns ready.
    pub polls_until_ready: u32,
    /// Files reported once ready.
    pub files: Vec<RemoteFile>,
    /// Terminal failure reported instead of ever turning ready.
    pub failure: Option<String>,
    /// Validity window attached to unlocked links.
    pub unlock_ttl: Duration,
}

impl Default for ScriptedMagnet {
    fn default() -> Self {
        Self {
            polls_until_ready: 0,
            files: vec![RemoteFile {
                name: "payload.bin".to_string(),
                size_bytes: 1_024,
                hosted_url: "https://hosted.mock/payload.bin".to_string(),
            }],
            failure: None,
            unlock_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug)]
struct Entry {
    script: ScriptedMagnet,
    polls_seen: u32,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    default_script: Option<ScriptedMagnet>,
    by_hash: HashMap<String, ScriptedMagnet>,
    entries: HashMap<String, Entry>,
    submit_failures: u32,
    unlock_failures: u32,
    unlocks_served: u64,
}

/// Scriptable in-process implementation of the gateway capability.
#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    /// Gateway where every submission follows the default script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the script applied to magnets without a per-hash script.
    pub fn set_default(&self, script: ScriptedMagnet) {
        self.lock().default_script = Some(script);
    }

    /// Script the behaviour of one specific info-hash.
    pub fn script(&self, info_hash: &InfoHash, script: ScriptedMagnet) {
        self.lock()
            .by_hash
            .insert(info_hash.as_str().to_string(), script);
    }

    /// Make the next `count` submissions fail as unavailable.
    pub fn fail_submissions(&self, count: u32) {
        self.lock().submit_failures = count;
    }

    /// Make the next `count` unlock calls report an expired link.
    pub fn fail_unlocks(&self, count: u32) {
        self.lock().unlock_failures = count;
    }

    /// Unlock calls served so far, expiry failures included.
    #[must_use]
    pub fn unlocks_served(&self) -> u64 {
        self.lock().unlocks_served
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn submit(&self, hash_hint: Option<&str>) -> Result<Submission, JobError> {
        let mut state = self.lock();
        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(JobError::DebridUnavailable(
                "scripted submission failure".to_string(),
            ));
        }
        state.next_id += 1;
        let id = state.next_id.to_string();
        let script = hash_hint
            .and_then(|hash| state.by_hash.get(hash).cloned())
            .or_else(|| state.default_script.clone())
            .unwrap_or_default();
        state.entries.insert(
            id.clone(),
            Entry {
                script,
                polls_seen: 0,
            },
        );
        let info_hash = hash_hint.and_then(|hash| InfoHash::parse(hash).ok()).or_else(|| {
            // Metainfo submissions learn their hash from the service.
            InfoHash::parse(&format!("{:040x}", state.next_id)).ok()
        });
        Ok(Submission {
            debrid_id: id,
            info_hash,
            name: Some("mock-magnet".to_string()),
        })
    }
}

#[async_trait]
impl DebridGateway for MockGateway {
    async fn submit_magnet(&self, uri: &str) -> Result<Submission, JobError> {
        let magnet = fetcharr_core::Magnet::parse(uri)?;
        self.submit(Some(magnet.info_hash.as_str()))
    }

    async fn submit_metainfo(&self, _bytes: &[u8]) -> Result<Submission, JobError> {
        self.submit(None)
    }

    async fn status(&self, debrid_id: &str) -> Result<DebridStatus, JobError> {
        let mut state = self.lock();
        let entry = state.entries.get_mut(debrid_id).ok_or_else(|| {
            JobError::DebridReject(format!("magnet {debrid_id} is unknown to the service"))
        })?;
        if let Some(reason) = &entry.script.failure {
            return Ok(DebridStatus::Error {
                reason: reason.clone(),
            });
        }
        if entry.polls_seen < entry.script.polls_until_ready {
            entry.polls_seen += 1;
            return Ok(DebridStatus::Processing);
        }
        Ok(DebridStatus::Ready {
            files: entry.script.files.clone(),
        })
    }

    async fn unlock(&self, hosted_url: &str) -> Result<UnlockedLink, JobError> {
        let mut state = self.lock();
        state.unlocks_served += 1;
        if state.unlock_failures > 0 {
            state.unlock_failures -= 1;
            return Err(JobError::UrlExpired);
        }
        let ttl = state
            .entries
            .values()
            .find(|entry| {
                entry
                    .script
                    .files
                    .iter()
                    .any(|file| file.hosted_url == hosted_url)
            })
            .map_or(Duration::from_secs(3600), |entry| entry.script.unlock_ttl);
        Ok(UnlockedLink {
            direct_url: format!("{hosted_url}?direct=1"),
            ttl,
        })
    }
}
