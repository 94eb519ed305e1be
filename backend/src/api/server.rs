//! HTTP Server for the salesdiff API.
//!
//! # API Endpoints
//!
//! | Method | Path                                | Description                       |
//! |--------|-------------------------------------|-----------------------------------|
//! | GET    | `/health`                           | Health check                      |
//! | POST   | `/api/upload`                       | Upload a batch (`files` fields)   |
//! | GET    | `/api/sessions/{id}`                | Stored session summary            |
//! | GET    | `/api/sessions/{id}/stages/{stage}` | Stage preview (`?rows=`)          |
//! | GET    | `/api/sessions/{id}/export`         | `?stage=&format=csv\|jsonl`       |
//! | GET    | `/api/sessions/{id}/bundle`         | `?stage=` → ZIP bundle            |
//! | DELETE | `/api/sessions/{id}`                | Purge a session                   |
//! | GET    | `/api/logs`                         | SSE stream for real-time logs     |

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::{log_error, log_info, LOG_BROADCASTER};
use super::types::{error_response, ExportQuery, StageQuery, StageResponse};
use crate::config::Config;
use crate::error::{PipelineError, ServerError, ServerResult, StorageError};
use crate::export::{bundle_stage, export_name, serialize, Encoding};
use crate::ingest::{has_allowed_file, ingest, Upload};
use crate::registry::RoleMap;
use crate::storage::{SessionManifest, SessionStore};
use crate::transform::compute_named;

/// Multipart field carrying the uploaded files.
const FILES_FIELD: &str = "files";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: SessionStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = SessionStore::new(&config.data_dir);
        Self {
            config: Arc::new(config),
            store,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    // Permissive CORS for the browser client during development
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/upload", post(upload))
        .route("/api/sessions/{id}", get(session_summary).delete(purge_session))
        .route("/api/sessions/{id}/stages/{stage}", get(stage_preview))
        .route("/api/sessions/{id}/export", get(export_table))
        .route("/api/sessions/{id}/bundle", get(export_bundle))
        .route("/api/logs", get(sse_logs))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: Config, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = config.data_dir.display().to_string();
    let app = router(AppState::new(config));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 salesdiff server running on http://localhost:{}", port);
    println!("   POST   /api/upload                      - Upload files");
    println!("   GET    /api/sessions/{{id}}               - Session summary");
    println!("   GET    /api/sessions/{{id}}/stages/{{stage}} - Stage preview");
    println!("   GET    /api/sessions/{{id}}/export        - Export a stage");
    println!("   GET    /api/sessions/{{id}}/bundle        - Download a bundle");
    println!("   DELETE /api/sessions/{{id}}               - Purge a session");
    println!("   GET    /api/logs                        - SSE log stream");
    println!("   GET    /health                          - Health check");
    println!();
    println!("💾 Sessions stored in {}", data_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Pipeline(PipelineError::MissingFactTable) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Storage(e) => match e {
                StorageError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                StorageError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
                StorageError::AlreadyExists(_) => StatusCode::CONFLICT,
                StorageError::IncompatibleManifest { .. } | StorageError::InvalidManifest(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                StorageError::Io(_) | StorageError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Export(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log_error(format!("{}: {}", self.kind(), self));
        }
        (status, Json(error_response(&self.to_string(), self.kind()))).into_response()
    }
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "salesdiff",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "upload": "POST /api/upload",
            "session": "GET /api/sessions/{id}",
            "stage": "GET /api/sessions/{id}/stages/{stage}",
            "export": "GET /api/sessions/{id}/export",
            "bundle": "GET /api/sessions/{id}/bundle",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

/// SSE endpoint for real-time log streaming
///
/// Recent history is replayed first, then live entries follow.
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();
    let history = tokio_stream::iter(LOG_BROADCASTER.recent().into_iter().map(Ok));

    let stream = history
        .chain(BroadcastStream::new(rx))
        .filter_map(|result| match result {
            Ok(entry) => {
                let json = serde_json::to_string(&entry).ok()?;
                Some(Ok(Event::default().data(json)))
            }
            Err(_) => None,
        });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Upload endpoint: parse, classify and store a batch.
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ServerResult<Json<SessionManifest>> {
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
        uploads.push(Upload::new(filename, bytes.to_vec()));
    }

    if uploads.is_empty() {
        return Err(ServerError::BadRequest("No files provided".to_string()));
    }
    if !has_allowed_file(&uploads) {
        return Err(ServerError::BadRequest(
            "No file with an allowed extension (csv, xlsx, xls)".to_string(),
        ));
    }

    println!("\n{}", "=".repeat(70));
    println!("📄 NEW UPLOAD: {} file(s)", uploads.len());
    println!("{}\n", "=".repeat(70));

    let batch = ingest(uploads, state.config.parse_timeout).await;
    let store = state.store.clone();
    let manifest = blocking(move || store.persist(&batch)).await?;

    Ok(Json(manifest))
}

/// Stored summary of a session.
async fn session_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<SessionManifest>> {
    let store = state.store.clone();
    let manifest = blocking(move || store.load_manifest(&id)).await?;
    Ok(Json(manifest))
}

/// Before/after preview of one stage.
async fn stage_preview(
    State(state): State<AppState>,
    Path((id, stage)): Path<(String, String)>,
    Query(query): Query<StageQuery>,
) -> ServerResult<Json<StageResponse>> {
    let roles = load_roles(&state, id).await?;
    let output = blocking(move || compute_named(&roles, &stage)).await?;
    let rows = query.rows.unwrap_or(state.config.preview_rows);
    Ok(Json(StageResponse::from_output(output, rows)))
}

/// Full stage table as CSV or record lines.
async fn export_table(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> ServerResult<Response> {
    let encoding: Encoding = query
        .format
        .as_deref()
        .unwrap_or("csv")
        .parse()
        .map_err(ServerError::BadRequest)?;
    let roles = load_roles(&state, id).await?;
    let stage = query.stage.unwrap_or_else(|| "raw".to_string());

    let (filename, body) = blocking(move || -> ServerResult<(String, Vec<u8>)> {
        let output = compute_named(&roles, &stage)?;
        let filename = format!("{}.{}", export_name(&roles, &output), encoding.extension());
        Ok((filename, serialize(&output.after, encoding)?))
    })
    .await?;
    log_info(format!("📤 Exported {} ({} bytes)", filename, body.len()));

    Ok(attachment(encoding.content_type(), &filename, body))
}

/// ZIP bundle of a stage with its report and the other tables.
async fn export_bundle(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> ServerResult<Response> {
    let roles = load_roles(&state, id).await?;
    let stage = query.stage.unwrap_or_else(|| "raw".to_string());

    let (filename, body) = blocking(move || -> ServerResult<(String, Vec<u8>)> {
        let output = compute_named(&roles, &stage)?;
        let filename = format!("{}.zip", export_name(&roles, &output));
        Ok((filename, bundle_stage(&roles, &output, chrono::Utc::now())?))
    })
    .await?;

    Ok(attachment("application/zip", &filename, body))
}

/// Delete a session.
async fn purge_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let store = state.store.clone();
    let session_id = id.clone();
    blocking(move || store.purge(&session_id)).await?;
    Ok(Json(json!({ "status": "ok", "sessionId": id })))
}

async fn load_roles(state: &AppState, id: String) -> ServerResult<RoleMap> {
    let store = state.store.clone();
    blocking(move || store.load_roles(&id)).await
}

/// Run stage computation or session IO on the blocking pool.
async fn blocking<T, E, F>(work: F) -> ServerResult<T>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    ServerError: From<E>,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
        .map_err(ServerError::from)
}

fn attachment(content_type: &str, filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}
