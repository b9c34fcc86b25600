//! AllDebrid v4 wire types.
//!
//! Every response wraps its payload in a `status`/`data` envelope; errors
//! arrive as HTTP 200 with `status = "error"` and a code/message pair.

use serde::Deserialize;

/// Top-level response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub(crate) status: String,
    pub(crate) data: Option<T>,
    pub(crate) error: Option<ApiError>,
}

/// Error payload carried inside the envelope.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiError {
    pub(crate) code: String,
    pub(crate) message: String,
}

/// Payload of `magnet/upload` and `magnet/upload/file`.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadData {
    #[serde(default)]
    pub(crate) magnets: Vec<UploadedMagnet>,
    #[serde(default)]
    pub(crate) files: Vec<UploadedMagnet>,
}

impl UploadData {
    /// Upload responses use `magnets` for URIs and `files` for metainfo.
    pub(crate) fn first(&self) -> Option<&UploadedMagnet> {
        self.magnets.first().or_else(|| self.files.first())
    }
}

/// One submitted magnet as echoed back by the service.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadedMagnet {
    pub(crate) id: Option<i64>,
    pub(crate) hash: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) error: Option<ApiError>,
}

/// Payload of `magnet/status`.
#[derive(Debug, Deserialize)]
pub(crate) struct StatusData {
    pub(crate) magnets: MagnetStatusEntry,
}

/// The service answers a single-id query with an object, but some proxies
/// normalise it into a one-element array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MagnetStatusEntry {
    One(MagnetStatus),
    Many(Vec<MagnetStatus>),
}

impl MagnetStatusEntry {
    pub(crate) fn into_one(self) -> Option<MagnetStatus> {
        match self {
            Self::One(status) => Some(status),
            Self::Many(mut statuses) => {
                if statuses.is_empty() {
                    None
                } else {
                    Some(statuses.swap_remove(0))
                }
            }
        }
    }
}

/// Processing status of one magnet.
#[derive(Debug, Deserialize)]
pub(crate) struct MagnetStatus {
    #[serde(default)]
    pub(crate) status: String,
    #[serde(rename = "statusCode")]
    pub(crate) status_code: i64,
    #[serde(default)]
    pub(crate) links: Vec<HostedLink>,
}

/// One hosted file of a ready magnet.
#[derive(Debug, Deserialize)]
pub(crate) struct HostedLink {
    pub(crate) link: String,
    pub(crate) filename: String,
    #[serde(default)]
    pub(crate) size: u64,
}

/// Payload of `link/unlock`.
#[derive(Debug, Deserialize)]
pub(crate) struct UnlockData {
    pub(crate) link: String,
}

/// Ready state in the magnet status code space.
pub(crate) const STATUS_CODE_READY: i64 = 4;
