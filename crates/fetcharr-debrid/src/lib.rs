#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! AllDebrid gateway client.
//!
//! Implements the [`fetcharr_core::DebridGateway`] capability against the
//! AllDebrid v4 REST API, plus an in-process mock used by engine tests. All
//! calls pass through a shared token-bucket rate limiter and retry 429/5xx
//! responses with jittered backoff.

mod client;
mod mock;
mod rate_limit;
mod wire;

pub use client::{AllDebridClient, GatewayConfig};
pub use mock::{MockGateway, ScriptedMagnet};
pub use rate_limit::RateLimiter;
