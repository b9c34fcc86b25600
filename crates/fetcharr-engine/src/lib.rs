#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Job manager, state machine, and scheduler.
//!
//! The engine owns the per-job finite-state machine (queued →
//! `debrid_pending` → `debrid_ready` → downloading → completed, with paused
//! and error as sidetracks), admits work under the tuning profile's
//! concurrency limits, and binds exactly one worker to a job at a time: a
//! submission poller while the unrestricting service processes the magnet, a
//! download worker while bytes stream to disk.

mod config;
mod manager;
mod scheduler;

pub use config::EngineConfig;
pub use manager::JobManager;
