//! Key/value loader.

use std::collections::HashMap;
use std::time::Duration;

use crate::model::{AppConfig, StoragePreference};
use crate::validate::{ConfigError, validate};

/// Default unrestricting service endpoint.
const DEFAULT_DEBRID_BASE_URL: &str = "https://api.alldebrid.com/v4";
/// Default HTTP listen address.
const DEFAULT_API_BIND: &str = "0.0.0.0:6500";
/// Default download root inside the container.
const DEFAULT_DOWNLOAD_PATH: &str = "/downloads";
/// Default state directory inside the container.
const DEFAULT_STATE_PATH: &str = "/config";

/// Build a validated [`AppConfig`] from a key/value map.
///
/// # Errors
///
/// Returns a [`ConfigError`] naming the first missing or malformed key.
pub fn load_from(vars: &HashMap<String, String>) -> Result<AppConfig, ConfigError> {
    let storage_type = match trimmed(vars, "STORAGE_TYPE") {
        None => StoragePreference::Auto,
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "auto" => StoragePreference::Auto,
            "hdd" => StoragePreference::Hdd,
            "ssd" => StoragePreference::Ssd,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "STORAGE_TYPE",
                    value: value.to_string(),
                    expected: "auto, hdd, or ssd",
                });
            }
        },
    };

    let config = AppConfig {
        storage_type,
        max_concurrent_large: parse_opt(vars, "MAX_CONCURRENT_LARGE")?,
        max_concurrent_small: parse_opt(vars, "MAX_CONCURRENT_SMALL")?,
        large_threshold_bytes: parse_opt(vars, "LARGE_THRESHOLD_BYTES")?,
        disk_buffer_bytes: parse_opt(vars, "DISK_BUFFER_BYTES")?,
        write_batch_bytes: parse_opt(vars, "WRITE_BATCH_BYTES")?,
        flush_interval: parse_opt::<u64>(vars, "FLUSH_INTERVAL_SECONDS")?
            .map(Duration::from_secs),
        max_connections_per_job: parse_opt(vars, "MAX_CONNECTIONS_PER_JOB")?,
        file_allocate: parse_flag(vars, "FILE_ALLOCATE")?,
        debrid_api_key: trimmed(vars, "DEBRID_API_KEY")
            .ok_or(ConfigError::MissingKey {
                key: "DEBRID_API_KEY",
            })?
            .to_string(),
        debrid_base_url: trimmed(vars, "DEBRID_BASE_URL")
            .unwrap_or(DEFAULT_DEBRID_BASE_URL)
            .trim_end_matches('/')
            .to_string(),
        api_bind: trimmed(vars, "API_BIND")
            .unwrap_or(DEFAULT_API_BIND)
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "API_BIND",
                value: trimmed(vars, "API_BIND").unwrap_or_default().to_string(),
                expected: "a socket address such as 0.0.0.0:6500",
            })?,
        download_path: trimmed(vars, "DOWNLOAD_PATH")
            .unwrap_or(DEFAULT_DOWNLOAD_PATH)
            .into(),
        state_path: trimmed(vars, "STATE_PATH").unwrap_or(DEFAULT_STATE_PATH).into(),
    };

    validate(&config)?;
    Ok(config)
}

fn trimmed<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(String::as_str).map(str::trim).filter(|v| !v.is_empty())
}

fn parse_opt<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match trimmed(vars, key) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            expected: "an unsigned integer",
        }),
    }
}

fn parse_flag(
    vars: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    match trimmed(vars, key) {
        None => Ok(None),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key,
                value: value.to_string(),
                expected: "a boolean flag",
            }),
        },
    }
}
