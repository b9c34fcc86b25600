//! Route table and handlers for the `/api/v2` facade.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Form, FromRequest, MatchedPath, Multipart, Query, Request, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use fetcharr_core::{AddJob, InfoHash, Job, JobError, JobSource, RemoveJob};

use crate::errors::ApiError;
use crate::state::ApiState;
use crate::views::{file_views, job_properties, job_view, matches_filter};

/// Version string expected by Sonarr/Radarr compatibility checks.
const APP_VERSION: &str = "v4.5.0";
/// Web API version advertised alongside it.
const WEBAPI_VERSION: &str = "2.8.18";

pub(crate) fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v2/auth/login", post(login))
        .route("/api/v2/auth/logout", post(logout))
        .route("/api/v2/app/version", get(app_version))
        .route("/api/v2/app/webapiVersion", get(webapi_version))
        .route("/api/v2/app/preferences", get(preferences))
        .route("/api/v2/torrents/add", post(torrents_add))
        .route("/api/v2/torrents/info", get(torrents_info))
        .route("/api/v2/torrents/delete", post(torrents_delete))
        .route("/api/v2/torrents/pause", post(torrents_pause))
        .route("/api/v2/torrents/resume", post(torrents_resume))
        .route("/api/v2/torrents/properties", get(torrents_properties))
        .route("/api/v2/torrents/files", get(torrents_files))
        .route("/api/v2/torrents/trackers", get(torrents_trackers))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_requests(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |m| m.as_str().to_string());
    let response = next.run(request).await;
    state
        .metrics
        .inc_http_request(&route, response.status().as_u16());
    response
}

#[derive(Deserialize, Default)]
struct LoginForm {
    username: Option<String>,
    password: Option<String>,
}

/// Any credentials succeed; the cookie only exists so clients that insist on
/// one have something to send back.
async fn login(
    State(state): State<Arc<ApiState>>,
    Form(form): Form<LoginForm>,
) -> Result<Response, ApiError> {
    if form.username.is_some() || form.password.is_some() {
        debug!("ignoring login credentials (compatibility mode)");
    }
    let sid = state.issue_session();
    let cookie = format!("SID={sid}; HttpOnly; Path=/; SameSite=Lax");
    let mut response = ok_plain();
    response.headers_mut().insert(
        SET_COOKIE,
        HeaderValue::from_str(&cookie)
            .map_err(|_| ApiError::internal("failed to encode session cookie"))?,
    );
    Ok(response)
}

async fn logout(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    if let Some(sid) = sid_from_headers(&headers) {
        if state.session_known(&sid) {
            state.revoke_session(&sid);
        }
    }
    let mut response = ok_plain();
    response.headers_mut().insert(
        SET_COOKIE,
        HeaderValue::from_static("SID=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax"),
    );
    response
}

async fn app_version() -> impl IntoResponse {
    plain(APP_VERSION)
}

async fn webapi_version() -> impl IntoResponse {
    plain(WEBAPI_VERSION)
}

async fn preferences(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "save_path": state.preferences.save_path,
        "max_active_downloads": state.preferences.max_active_downloads,
    }))
}

#[derive(Deserialize, Default)]
struct AddForm {
    urls: Option<String>,
    category: Option<String>,
    savepath: Option<String>,
}

/// `torrents/add` accepts both encodings qBittorrent clients use: a plain
/// urlencoded form with newline-separated magnets, or multipart with `urls`
/// and/or `torrents` file parts.
async fn torrents_add(
    State(state): State<Arc<ApiState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut urls: Option<String> = None;
    let mut torrents: Vec<Vec<u8>> = Vec::new();
    let mut category = String::new();
    let mut save_path: Option<String> = None;

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|err| ApiError::unsupported_media(err.to_string()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::bad_request(err.to_string()))?
        {
            match field.name().unwrap_or_default() {
                "urls" => {
                    urls = Some(
                        field
                            .text()
                            .await
                            .map_err(|err| ApiError::bad_request(err.to_string()))?,
                    );
                }
                "torrents" => torrents.push(
                    field
                        .bytes()
                        .await
                        .map_err(|err| ApiError::bad_request(err.to_string()))?
                        .to_vec(),
                ),
                "category" => {
                    category = field
                        .text()
                        .await
                        .map_err(|err| ApiError::bad_request(err.to_string()))?;
                }
                "savepath" => {
                    save_path = Some(
                        field
                            .text()
                            .await
                            .map_err(|err| ApiError::bad_request(err.to_string()))?,
                    );
                }
                _ => {
                    let _ = field.bytes().await;
                }
            }
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(form) = Form::<AddForm>::from_request(request, &())
            .await
            .map_err(|err| ApiError::bad_request(err.to_string()))?;
        urls = form.urls;
        category = form.category.unwrap_or_default();
        save_path = form.savepath;
    } else {
        return Err(ApiError::unsupported_media(format!(
            "unsupported content type {content_type:?}"
        )));
    }

    let save_path = save_path
        .filter(|p| !p.trim().is_empty())
        .map(std::path::PathBuf::from);

    let magnet_lines: Vec<String> = urls
        .as_deref()
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect();
    if magnet_lines.is_empty() && torrents.is_empty() {
        return Err(ApiError::unsupported_media(
            "request carried neither magnet urls nor torrent files",
        ));
    }

    for uri in magnet_lines {
        let request = AddJob {
            source: JobSource::Magnet { uri },
            category: category.clone(),
            save_path: save_path.clone(),
        };
        state
            .handles
            .workflow()
            .add(request)
            .await
            .map_err(add_error)?;
    }
    for bytes in torrents {
        let request = AddJob {
            source: JobSource::Metainfo { bytes },
            category: category.clone(),
            save_path: save_path.clone(),
        };
        state
            .handles
            .workflow()
            .add(request)
            .await
            .map_err(upload_error)?;
    }

    Ok(ok_plain())
}

fn add_error(err: anyhow::Error) -> ApiError {
    match err.downcast_ref::<JobError>() {
        Some(JobError::InputInvalid(detail)) => ApiError::bad_request(detail.clone()),
        _ => {
            error!(error = %err, "failed to add job");
            ApiError::internal("failed to add job")
        }
    }
}

fn upload_error(err: anyhow::Error) -> ApiError {
    match err.downcast_ref::<JobError>() {
        Some(JobError::InputInvalid(detail) | JobError::DebridReject(detail)) => {
            ApiError::unsupported_media(detail.clone())
        }
        _ => {
            error!(error = %err, "failed to add uploaded torrent");
            ApiError::internal("failed to add uploaded torrent")
        }
    }
}

#[derive(Deserialize, Default)]
struct InfoParams {
    category: Option<String>,
    hashes: Option<String>,
    filter: Option<String>,
}

async fn torrents_info(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<InfoParams>,
) -> Result<Json<Vec<crate::views::JobView>>, ApiError> {
    let jobs = list_jobs(&state).await?;
    let hash_filter: Option<Vec<String>> = params
        .hashes
        .as_deref()
        .filter(|value| !value.is_empty())
        .map(split_hashes);

    let views = jobs
        .iter()
        .filter(|job| {
            params
                .category
                .as_deref()
                .is_none_or(|category| job.category == category)
        })
        .filter(|job| {
            hash_filter.as_ref().is_none_or(|hashes| {
                hashes
                    .iter()
                    .any(|hash| hash.eq_ignore_ascii_case(job.info_hash.as_str()))
            })
        })
        .filter(|job| {
            params
                .filter
                .as_deref()
                .is_none_or(|filter| matches_filter(job.state, filter))
        })
        .map(job_view)
        .collect();
    Ok(Json(views))
}

#[derive(Deserialize)]
struct DeleteForm {
    hashes: String,
    #[serde(rename = "deleteFiles")]
    delete_files: Option<bool>,
}

async fn torrents_delete(
    State(state): State<Arc<ApiState>>,
    Form(form): Form<DeleteForm>,
) -> Result<Response, ApiError> {
    let with_data = form.delete_files.unwrap_or(false);
    for hash in parse_hashes(&form.hashes) {
        state
            .handles
            .workflow()
            .remove(&hash, RemoveJob { with_data })
            .await
            .map_err(|err| {
                error!(error = %err, info_hash = %hash, "delete failed");
                ApiError::internal("delete failed")
            })?;
    }
    Ok(ok_plain())
}

#[derive(Deserialize)]
struct HashesForm {
    hashes: String,
}

async fn torrents_pause(
    State(state): State<Arc<ApiState>>,
    Form(form): Form<HashesForm>,
) -> Result<Response, ApiError> {
    for hash in parse_hashes(&form.hashes) {
        state
            .handles
            .workflow()
            .pause(&hash)
            .await
            .map_err(|err| {
                error!(error = %err, info_hash = %hash, "pause failed");
                ApiError::internal("pause failed")
            })?;
    }
    Ok(ok_plain())
}

async fn torrents_resume(
    State(state): State<Arc<ApiState>>,
    Form(form): Form<HashesForm>,
) -> Result<Response, ApiError> {
    for hash in parse_hashes(&form.hashes) {
        state
            .handles
            .workflow()
            .resume(&hash)
            .await
            .map_err(|err| {
                error!(error = %err, info_hash = %hash, "resume failed");
                ApiError::internal("resume failed")
            })?;
    }
    Ok(ok_plain())
}

#[derive(Deserialize)]
struct HashQuery {
    hash: String,
}

async fn torrents_properties(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashQuery>,
) -> Result<Json<crate::views::JobProperties>, ApiError> {
    let job = find_job(&state, &params.hash).await?;
    Ok(Json(job_properties(&job)))
}

async fn torrents_files(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashQuery>,
) -> Result<Json<Vec<crate::views::FileView>>, ApiError> {
    let job = find_job(&state, &params.hash).await?;
    Ok(Json(file_views(&job)))
}

async fn torrents_trackers(
    State(_state): State<Arc<ApiState>>,
    Query(_params): Query<HashQuery>,
) -> Json<Vec<serde_json::Value>> {
    // The broker never talks to trackers; the list is always empty.
    Json(Vec::new())
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "degraded": state.degraded(),
    }))
}

async fn metrics(State(state): State<Arc<ApiState>>) -> Json<fetcharr_telemetry::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn list_jobs(state: &Arc<ApiState>) -> Result<Vec<Job>, ApiError> {
    state.handles.inspector().list().await.map_err(|err| {
        error!(error = %err, "failed to list jobs");
        ApiError::internal("failed to list jobs")
    })
}

async fn find_job(state: &Arc<ApiState>, raw_hash: &str) -> Result<Job, ApiError> {
    let Ok(hash) = InfoHash::parse(raw_hash) else {
        return Err(ApiError::not_found(format!("unknown hash {raw_hash:?}")));
    };
    state
        .handles
        .inspector()
        .get(&hash)
        .await
        .map_err(|err| {
            error!(error = %err, "failed to fetch job");
            ApiError::internal("failed to fetch job")
        })?
        .ok_or_else(|| ApiError::not_found(format!("unknown hash {raw_hash:?}")))
}

fn parse_hashes(raw: &str) -> Vec<InfoHash> {
    split_hashes(raw)
        .iter()
        .filter_map(|hash| match InfoHash::parse(hash) {
            Ok(hash) => Some(hash),
            Err(_) => {
                warn!(hash = %hash, "ignoring malformed hash in request");
                None
            }
        })
        .collect()
}

fn split_hashes(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|hash| !hash.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn sid_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| {
            raw.split(';').find_map(|entry| {
                let (name, value) = entry.split_once('=')?;
                if name.trim().eq_ignore_ascii_case("sid") && !value.trim().is_empty() {
                    Some(value.trim().to_string())
                } else {
                    None
                }
            })
        })
}

fn plain(body: &'static str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    (headers, body).into_response()
}

fn ok_plain() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    (StatusCode::OK, headers, "Ok.").into_response()
}
