#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Binary entrypoint that wires the broker's services together.

mod bootstrap;
mod error;

use error::AppResult;

/// Bootstraps the broker and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    bootstrap::run_app().await
}
