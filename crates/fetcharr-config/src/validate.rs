//! Configuration validation.

use thiserror::Error;

use crate::model::AppConfig;

/// Reasons a configuration cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key was absent.
    #[error("missing required configuration key {key}")]
    MissingKey {
        /// The absent key.
        key: &'static str,
    },
    /// A key was present but unparsable.
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    InvalidValue {
        /// The offending key.
        key: &'static str,
        /// The raw value supplied.
        value: String,
        /// Human description of the accepted form.
        expected: &'static str,
    },
}

/// Reject configurations that would misbehave at runtime.
pub(crate) fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(0) = config.disk_buffer_bytes {
        return Err(ConfigError::InvalidValue {
            key: "DISK_BUFFER_BYTES",
            value: "0".to_string(),
            expected: "a positive byte count",
        });
    }
    if let Some(0) = config.write_batch_bytes {
        return Err(ConfigError::InvalidValue {
            key: "WRITE_BATCH_BYTES",
            value: "0".to_string(),
            expected: "a positive byte count",
        });
    }
    if let Some(0) = config.max_connections_per_job {
        return Err(ConfigError::InvalidValue {
            key: "MAX_CONNECTIONS_PER_JOB",
            value: "0".to_string(),
            expected: "at least one connection",
        });
    }
    if let Some(0) = config.large_threshold_bytes {
        return Err(ConfigError::InvalidValue {
            key: "LARGE_THRESHOLD_BYTES",
            value: "0".to_string(),
            expected: "a positive byte count",
        });
    }
    if !config.download_path.is_absolute() {
        return Err(ConfigError::InvalidValue {
            key: "DOWNLOAD_PATH",
            value: config.download_path.display().to_string(),
            expected: "an absolute path",
        });
    }
    if !config.state_path.is_absolute() {
        return Err(ConfigError::InvalidValue {
            key: "STATE_PATH",
            value: config.state_path.display().to_string(),
            expected: "an absolute path",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_from;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn zero_buffers_are_rejected() {
        let err = load_from(&env(&[
            ("DEBRID_API_KEY", "secret"),
            ("DISK_BUFFER_BYTES", "0"),
        ]))
        .expect_err("must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "DISK_BUFFER_BYTES",
                ..
            }
        ));
    }

    #[test]
    fn zero_connections_are_rejected() {
        let err = load_from(&env(&[
            ("DEBRID_API_KEY", "secret"),
            ("MAX_CONNECTIONS_PER_JOB", "0"),
        ]))
        .expect_err("must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "MAX_CONNECTIONS_PER_JOB",
                ..
            }
        ));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let err = load_from(&env(&[
            ("DEBRID_API_KEY", "secret"),
            ("DOWNLOAD_PATH", "downloads"),
        ]))
        .expect_err("must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "DOWNLOAD_PATH",
                ..
            }
        ));
    }
}
