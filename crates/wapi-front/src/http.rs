//! The HTTP surface, grounded in
//! `original_source/src/whisper_api/api_endpoints/endpoints.py`'s
//! `EndPoints` class, rebuilt on `axum::Router` the way
//! `mpv-stt-server::server::HttpServer` assembles its own routes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Router, serve};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use wapi_common::{Config, WApiError};
use wapi_protocol::{AudioProbe, Task, TaskStatus, TaskType};

use crate::coordinator::Coordinator;

const V1_PREFIX: &str = "/api/v1";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub config: Arc<Config>,
    pub audio_probe: Arc<dyn AudioProbe>,
}

/// Always reports audio present; real deployments wire an `ffmpeg`-backed
/// probe in its place, matching `endpoints.py::is_file_audio`.
pub struct AlwaysAudio;

impl AudioProbe for AlwaysAudio {
    fn has_audio_stream(&self, _path: &str) -> bool {
        true
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&format!("{V1_PREFIX}/transcribe"), post(start_transcribe))
        .route(&format!("{V1_PREFIX}/translate"), post(start_translate))
        .route(&format!("{V1_PREFIX}/status"), get(status))
        .route(&format!("{V1_PREFIX}/status/:task_id"), get(status))
        .route(&format!("{V1_PREFIX}/srt/:task_id"), get(srt))
        .route(&format!("{V1_PREFIX}/decoder_status"), get(decoder_status))
        .route(&format!("{V1_PREFIX}/decoder_status_refresh"), post(decoder_status_refresh))
        .route(&format!("{V1_PREFIX}/userinfo"), get(userinfo))
        .route(&format!("{V1_PREFIX}/logs"), get(logs))
        .route(&format!("{V1_PREFIX}/login"), get(login))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve_forever(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {bind_addr}");
    serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Deserialize)]
struct StartQuery {
    #[serde(default)]
    model_size: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

async fn start_transcribe(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
    mut multipart: Multipart,
) -> Response {
    start_task(state, query, &mut multipart, TaskType::Transcribe).await
}

async fn start_translate(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
    mut multipart: Multipart,
) -> Response {
    start_task(state, query, &mut multipart, TaskType::Translate).await
}

/// Stages the uploaded file, probes it, and enqueues a task. Grounded in
/// `endpoints.py::__start_task`'s staging-to-`NamedTemporaryFile` and
/// `is_file_audio` probe check.
async fn start_task(
    state: AppState,
    query: StartQuery,
    multipart: &mut Multipart,
    task_type: TaskType,
) -> Response {
    let target_model_size = match query.model_size.as_deref().map(str::parse) {
        Some(Ok(size)) => Some(size),
        Some(Err(e)) => return bad_request(&e.to_string()),
        None => None,
    };

    let mut original_file_name = None;
    let mut staged_path: Option<PathBuf> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        original_file_name = field.file_name().map(str::to_string);
        let data = match field.bytes().await {
            Ok(d) => d,
            Err(e) => return bad_request(&format!("failed reading upload: {e}")),
        };
        let temp = match tempfile::NamedTempFile::new() {
            Ok(t) => t,
            Err(e) => return internal_error(&format!("failed staging upload: {e}")),
        };
        if let Err(e) = std::fs::write(temp.path(), &data) {
            return internal_error(&format!("failed writing staged upload: {e}"));
        }
        match temp.into_temp_path().keep() {
            Ok(path) => staged_path = Some(path),
            Err(e) => return internal_error(&format!("failed persisting staged upload: {e}")),
        }
    }

    let Some(path) = staged_path else {
        return bad_request("missing file field");
    };

    if !state.audio_probe.has_audio_stream(&path.to_string_lossy()) {
        let _ = std::fs::remove_file(&path);
        return bad_request("uploaded file has no audio stream");
    }

    let task = Task::new(
        path.to_string_lossy().to_string(),
        original_file_name,
        task_type,
        query.language,
        target_model_size,
    );
    let response = task.to_response();

    if let Err(e) = state.coordinator.submit(task, Some(path)).await {
        let _ = std::fs::remove_file(&path);
        return match e {
            WApiError::QueueFull(cap) => service_unavailable(&format!("queue is full (capacity {cap})")),
            other => internal_error(&format!("failed to enqueue task: {other}")),
        };
    }

    Json(response).into_response()
}

async fn status(State(state): State<AppState>, path: Option<Path<String>>) -> Response {
    match path {
        Some(Path(task_id)) => match state.coordinator.task(&task_id) {
            Some(task) => Json(task.to_response()).into_response(),
            None => not_found("unknown task_id"),
        },
        None => bad_request("task_id is required"),
    }
}

async fn srt(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let Some(task) = state.coordinator.task(&task_id) else {
        return not_found("unknown task_id");
    };
    if task.status != TaskStatus::Finished {
        return bad_request("task not finished");
    }
    let Some(result) = task.whisper_result.as_ref() else {
        return internal_error("finished task missing result");
    };
    let body = wapi_srt::render(&result.segments);
    let filename = wapi_srt::srt_filename(&task.original_file_name, &result.output_language);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{filename}\"").parse().expect("valid header value"),
    );
    (headers, body).into_response()
}

async fn decoder_status(State(state): State<AppState>) -> Response {
    Json(state.coordinator.decoder_state().await).into_response()
}

async fn decoder_status_refresh(State(state): State<AppState>) -> Response {
    match state.coordinator.request_status_refresh().await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => internal_error(&e.to_string()),
    }
}

#[derive(Serialize)]
struct UserInfo {
    email: Option<String>,
    user: Option<String>,
    user_agent: Option<String>,
    authorized: bool,
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|h| h.to_str().ok()).map(str::to_string)
}

fn is_local_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.starts_with("127.0.0.1") || h.starts_with("localhost"))
        .unwrap_or(false)
}

/// Grounded in `endpoints.py::verify_user_mail`: a localhost caller is
/// always authorized; otherwise the `X-Email` header must be in
/// `AUTHORIZED_MAILS`.
fn verify_user_mail(state: &AppState, headers: &HeaderMap) -> bool {
    is_local_request(headers)
        || header_str(headers, "x-email").is_some_and(|email| state.config.authorized_mails.iter().any(|m| *m == email))
}

/// Echoes the caller's identity headers, grounded in `endpoints.py::get_userinfo`,
/// which returns the `X-Email`/`X-User`/`User-Agent` headers FastAPI's
/// reverse-proxy setup injects.
async fn userinfo(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let authorized = verify_user_mail(&state, &headers);
    Json(UserInfo {
        email: header_str(&headers, "x-email"),
        user: header_str(&headers, "x-user"),
        user_agent: header_str(&headers, header::USER_AGENT.as_str()),
        authorized,
    })
    .into_response()
}

/// Grounded in `endpoints.py::get_logs`: gate on `verify_user_mail`, then
/// zip every `*.log*` file under `LOG_DIR` into a single archive and
/// return it, matching the original's `zipfile.ZipFile(..., ZIP_DEFLATED)`
/// over `glob.glob(LOG_DIR + '/*.log*')`.
async fn logs(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !verify_user_mail(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, "your mail is not in the whitelist").into_response();
    }
    let Some(dir) = state.config.log_dir.as_deref() else {
        return (StatusCode::NOT_FOUND, "no log directory configured").into_response();
    };
    match build_logs_archive(dir) {
        Ok(bytes) => {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, "application/zip".parse().expect("valid header value"));
            headers.insert(
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"logs.zip\"".parse().expect("valid header value"),
            );
            (headers, bytes).into_response()
        }
        Err(e) => internal_error(&format!("failed building logs archive: {e}")),
    }
}

fn build_logs_archive(log_dir: &str) -> std::io::Result<Vec<u8>> {
    use std::io::{Cursor, Write};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !name.contains(".log") {
            continue;
        }
        zip.start_file(name, options).map_err(std::io::Error::other)?;
        zip.write_all(&std::fs::read(&path)?)?;
    }
    let buf = zip.finish().map_err(std::io::Error::other)?;
    Ok(buf.into_inner())
}

async fn login() -> Response {
    Redirect::temporary("/").into_response()
}

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, msg.to_string()).into_response()
}

fn not_found(msg: &str) -> Response {
    (StatusCode::NOT_FOUND, msg.to_string()).into_response()
}

fn service_unavailable(msg: &str) -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, msg.to_string()).into_response()
}

fn internal_error(msg: &str) -> Response {
    warn!("internal error: {msg}");
    (StatusCode::INTERNAL_SERVER_ERROR, msg.to_string()).into_response()
}
