//! HTTP client for the AllDebrid v4 API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use fetcharr_core::{
    DebridGateway, DebridStatus, InfoHash, JobError, RemoteFile, RetryPolicy, Submission,
    UnlockedLink,
};
use fetcharr_telemetry::Metrics;

use crate::rate_limit::RateLimiter;
use crate::wire::{
    Envelope, StatusData, UnlockData, UploadData, STATUS_CODE_READY,
};

/// Default validity assumed for unlocked URLs when the service does not say.
const DEFAULT_UNLOCK_TTL: Duration = Duration::from_secs(3600);

/// Shared rate limiter defaults: 8 requests of burst, 4/s sustained.
const RATE_BURST: u32 = 8;
const RATE_SUSTAINED: u32 = 4;

/// Connection settings for the gateway client.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL without a trailing slash, e.g. `https://api.alldebrid.com/v4`.
    pub base_url: String,
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Agent identifier the service requires on every call.
    pub agent: String,
}

/// AllDebrid v4 client.
///
/// All calls pass through the process-wide token bucket and retry 429/5xx
/// and transport failures under the jittered backoff policy.
pub struct AllDebridClient {
    http: reqwest::Client,
    config: GatewayConfig,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    metrics: Metrics,
}

impl AllDebridClient {
    /// Build a client with the standard timeouts and rate limits.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Internal`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: GatewayConfig, metrics: Metrics) -> Result<Self, JobError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| JobError::Internal(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            config,
            limiter: Arc::new(RateLimiter::new(RATE_BURST, RATE_SUSTAINED)),
            retry: RetryPolicy::default(),
            metrics,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url)
    }

    /// Issue one API call with rate limiting and transient retries.
    async fn call<T, F>(&self, op: &'static str, build: F) -> Result<T, JobError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.limiter.acquire().await;
            self.metrics.inc_debrid_request(op);

            let request = build(&self.http)
                .bearer_auth(&self.config.api_key)
                .query(&[("agent", self.config.agent.as_str())]);

            let outcome = match request.send().await {
                Err(err) => Err(classify_transport_error(&err)),
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<Envelope<T>>().await {
                            Ok(envelope) => unwrap_envelope(envelope),
                            Err(err) => Err(JobError::DebridUnavailable(format!(
                                "malformed response: {err}"
                            ))),
                        }
                    } else {
                        Err(classify_http_status(status))
                    }
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    let Some(delay) = self.retry.next_delay(attempt) else {
                        warn!(op, attempt, error = %err, "gateway retries exhausted");
                        return Err(err);
                    };
                    self.metrics.inc_debrid_retry();
                    debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying gateway call");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn submission_from_upload(data: &UploadData) -> Result<Submission, JobError> {
        let magnet = data
            .first()
            .ok_or_else(|| JobError::DebridReject("upload response listed no magnets".to_string()))?;
        if let Some(error) = &magnet.error {
            return Err(map_api_error(&error.code, &error.message));
        }
        let id = magnet
            .id
            .ok_or_else(|| JobError::DebridReject("upload response carried no id".to_string()))?;
        Ok(Submission {
            debrid_id: id.to_string(),
            info_hash: magnet
                .hash
                .as_deref()
                .and_then(|hash| InfoHash::parse(hash).ok()),
            name: magnet.name.clone(),
        })
    }
}

#[async_trait]
impl DebridGateway for AllDebridClient {
    async fn submit_magnet(&self, uri: &str) -> Result<Submission, JobError> {
        let url = self.endpoint("magnet/upload");
        let uri = uri.to_string();
        let data: UploadData = self
            .call("magnet_upload", move |http| {
                http.get(&url).query(&[("magnets[]", uri.as_str())])
            })
            .await?;
        Self::submission_from_upload(&data)
    }

    async fn submit_metainfo(&self, bytes: &[u8]) -> Result<Submission, JobError> {
        let url = self.endpoint("magnet/upload/file");
        let bytes = bytes.to_vec();
        let data: UploadData = self
            .call("magnet_upload_file", move |http| {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name("upload.torrent")
                    .mime_str("application/x-bittorrent")
                    .unwrap_or_else(|_| {
                        reqwest::multipart::Part::bytes(bytes.clone())
                            .file_name("upload.torrent")
                    });
                http.post(&url)
                    .multipart(reqwest::multipart::Form::new().part("files[]", part))
            })
            .await?;
        Self::submission_from_upload(&data)
    }

    async fn status(&self, debrid_id: &str) -> Result<DebridStatus, JobError> {
        let url = self.endpoint("magnet/status");
        let id = debrid_id.to_string();
        let data: StatusData = self
            .call("magnet_status", move |http| {
                http.get(&url).query(&[("id", id.as_str())])
            })
            .await?;
        let Some(status) = data.magnets.into_one() else {
            return Err(JobError::DebridReject(format!(
                "magnet {debrid_id} is unknown to the service"
            )));
        };

        if status.status_code == STATUS_CODE_READY {
            let files = status
                .links
                .into_iter()
                .map(|link| RemoteFile {
                    name: link.filename,
                    size_bytes: link.size,
                    hosted_url: link.link,
                })
                .collect::<Vec<_>>();
            if files.is_empty() {
                return Err(JobError::DebridProcessingFailed(
                    "ready magnet exposed no files".to_string(),
                ));
            }
            return Ok(DebridStatus::Ready { files });
        }
        if status.status_code > STATUS_CODE_READY {
            let reason = if status.status.is_empty() {
                format!("status code {}", status.status_code)
            } else {
                status.status
            };
            return Ok(DebridStatus::Error { reason });
        }
        Ok(DebridStatus::Processing)
    }

    async fn unlock(&self, hosted_url: &str) -> Result<UnlockedLink, JobError> {
        let url = self.endpoint("link/unlock");
        let link = hosted_url.to_string();
        let data: UnlockData = self
            .call("link_unlock", move |http| {
                http.get(&url).query(&[("link", link.as_str())])
            })
            .await?;
        Ok(UnlockedLink {
            direct_url: data.link,
            ttl: DEFAULT_UNLOCK_TTL,
        })
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, JobError> {
    if envelope.status == "success" {
        return envelope.data.ok_or_else(|| {
            JobError::DebridUnavailable("success envelope without data".to_string())
        });
    }
    match envelope.error {
        Some(error) => Err(map_api_error(&error.code, &error.message)),
        None => Err(JobError::DebridUnavailable(
            "error envelope without error detail".to_string(),
        )),
    }
}

fn map_api_error(code: &str, message: &str) -> JobError {
    if code.starts_with("MAGNET_INVALID") || code == "MAGNET_NO_URI" {
        return JobError::InputInvalid(format!("{code}: {message}"));
    }
    if code == "LINK_DOWN" || code == "LINK_TEMPORARY_UNAVAILABLE" {
        return JobError::NetworkTransient(format!("{code}: {message}"));
    }
    JobError::DebridReject(format!("{code}: {message}"))
}

fn classify_http_status(status: StatusCode) -> JobError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        JobError::DebridUnavailable(format!("http {status}"))
    } else {
        JobError::DebridReject(format!("http {status}"))
    }
}

fn classify_transport_error(err: &reqwest::Error) -> JobError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        JobError::DebridUnavailable(err.to_string())
    } else {
        JobError::NetworkTransient(err.to_string())
    }
}
