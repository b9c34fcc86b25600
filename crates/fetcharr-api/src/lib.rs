#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! qBittorrent-compatible HTTP surface (`/api/v2`).
//!
//! The facade maps the broker's job model onto the subset of qBittorrent
//! endpoints Sonarr and Radarr poll. Authentication is deliberately a no-op:
//! any credentials succeed and receive a session cookie, matching the
//! behaviour those clients expect from a private download client. Errors
//! collapse to HTTP 200 with a `state` field in the job view, except the
//! documented 400/404/415 cases.

mod errors;
mod routes;
mod state;
mod views;

pub use state::{ApiState, JobHandles, Preferences};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tracing::info;

/// HTTP server wrapping the compatibility router.
pub struct ApiServer {
    state: Arc<ApiState>,
}

impl ApiServer {
    /// Build the server and start the health listener.
    #[must_use]
    pub fn new(state: ApiState) -> Self {
        let state = Arc::new(state);
        state.clone().spawn_health_listener();
        Self { state }
    }

    /// The assembled router; exposed for in-process tests.
    #[must_use]
    pub fn router(&self) -> Router {
        routes::router(Arc::clone(&self.state))
    }

    /// Serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener cannot bind or the server fails.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind API listener on {addr}"))?;
        info!(addr = %addr, "API listener ready");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("API server failed")
    }
}
