#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Environment-style configuration for the broker.
//!
//! All knobs arrive as `KEY=value` pairs. The loader accepts an injected map
//! so tests never touch the process environment; validation names the
//! offending key on failure. Tuning knobs are optional overrides layered on
//! top of the profile the storage probe selects.

mod loader;
mod model;
mod validate;

pub use loader::load_from;
pub use model::{AppConfig, StoragePreference};
pub use validate::ConfigError;

use std::collections::HashMap;

/// Load and validate configuration from the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] naming the first key that is missing or
/// malformed.
pub fn load_from_env() -> Result<AppConfig, ConfigError> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    load_from(&vars)
}
