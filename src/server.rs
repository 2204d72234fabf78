//! HTTP boundary.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/artifacts/upload` | Multipart upload (field `file`). 201 on create, 303 to the existing record on a cache hit |
//! | `GET`  | `/api/v1/artifacts` | List records, newest first |
//! | `GET`  | `/api/v1/artifacts/{id}` | One record |
//! | `PATCH` | `/api/v1/artifacts/{id}` | Set `displayName` |
//! | `DELETE` | `/api/v1/artifacts/{id}` | Remove a record (204) |
//! | `POST` | `/api/v1/improve` | Rewrite items toward a target; SSE unless `?stream=false` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "artifact not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `payload_too_large`
//! (413), `parse_error` (422), `provider_unavailable` (503),
//! `timeout` (504), `provider_error` (502), `internal` (500).
//!
//! A failure inside an SSE stream cannot change the status code any more;
//! it is sent as a final `data: {"error": "..."}` frame instead of a patch.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use refinery_core::models::ArtifactRecord;
use refinery_core::store::ArtifactStore;
use refinery_core::Error;

use crate::artifacts;
use crate::cache::IngestionCache;
use crate::config::Config;
use crate::extract::parse_document;
use crate::rewrite::{RewriteEngine, RewriteEvent};
use crate::sse::to_axum_event;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Multipart framing allowance on top of the payload limit, so that the
/// handler (not the body limit) reports oversized files.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    cache: Arc<IngestionCache>,
    /// Selected on first use so the server starts without any model backend.
    engine: Arc<OnceCell<Arc<RewriteEngine>>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn ArtifactStore>) -> Self {
        let cache = IngestionCache::new(store, &config.cache);
        Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            engine: Arc::new(OnceCell::new()),
        }
    }

    /// Use a fixed engine instead of provider selection.
    pub fn with_engine(mut self, engine: RewriteEngine) -> Self {
        self.engine = Arc::new(OnceCell::new_with(Some(Arc::new(engine))));
        self
    }

    fn store(&self) -> &dyn ArtifactStore {
        self.cache.store().as_ref()
    }

    async fn engine(&self) -> Result<Arc<RewriteEngine>, Error> {
        let config = self.config.clone();
        self.engine
            .get_or_try_init(|| async move {
                RewriteEngine::from_config(&config).await.map(Arc::new)
            })
            .await
            .cloned()
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::LOCATION]);
    let body_limit = state.cache.max_bytes().saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/artifacts", get(handle_list))
        .route("/api/v1/artifacts/upload", post(handle_upload))
        .route(
            "/api/v1/artifacts/{id}",
            get(handle_get).patch(handle_rename).delete(handle_delete),
        )
        .route("/api/v1/improve", post(handle_improve))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the database, apply migrations, and serve until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let store: Arc<dyn ArtifactStore> = Arc::new(SqliteStore::new(pool));

    let bind_addr = config.server.bind.clone();
    let app = build_router(AppState::new(config.clone(), store));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "refinery server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match err.root_cause() {
            Error::OversizePayload { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            Error::Parse { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "parse_error"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::ProviderUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable"),
            Error::ProviderTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Error::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            warn!(error = %err, "request failed");
        }
        AppError::new(status, code, err.to_string())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/v1/artifacts/upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    request_id: String,
    artifact_id: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let request_id = uuid::Uuid::new_v4().to_string();

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::new(e.status(), "bad_request", e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::new(e.status(), "bad_request", e.body_text()))?;
        upload = Some((filename, bytes));
        break;
    }
    let (filename, bytes) = upload
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "bad_request", "missing multipart field `file`"))?;

    if bytes.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "bad_request", "empty file"));
    }

    let owned = bytes.to_vec();
    let name = filename.clone();
    let resolution = state
        .cache
        .resolve(&bytes, &state.config.cache.model, move || parse_document(owned, name))
        .await?;

    let id = resolution.record.id.clone();
    if resolution.was_cached {
        info!(request_id = %request_id, id = %id, filename = %filename, "upload answered from cache");
        let location = format!("/api/v1/artifacts/{}", id);
        return Ok((
            StatusCode::SEE_OTHER,
            [(header::LOCATION, location)],
            Json(UploadResponse {
                message: format!("{} was already processed", filename),
                request_id,
                artifact_id: id,
            }),
        )
            .into_response());
    }

    info!(request_id = %request_id, id = %id, filename = %filename, "upload stored");
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: format!("{} successfully processed and stored", filename),
            request_id,
            artifact_id: id,
        }),
    )
        .into_response())
}

// ============ Artifact CRUD ============

async fn handle_list(State(state): State<AppState>) -> Result<Json<Vec<ArtifactRecord>>, AppError> {
    Ok(Json(artifacts::list(state.store()).await?))
}

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ArtifactRecord>, AppError> {
    Ok(Json(artifacts::get(state.store(), &id).await?))
}

#[derive(Deserialize)]
struct RenameRequest {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

async fn handle_rename(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> Result<Json<ArtifactRecord>, AppError> {
    let updated = artifacts::rename(state.store(), &id, body.display_name.as_deref()).await?;
    Ok(Json(updated))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    artifacts::delete(state.store(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /api/v1/improve ============

#[derive(Deserialize)]
struct ImproveParams {
    #[serde(default = "default_stream")]
    stream: bool,
}

fn default_stream() -> bool {
    true
}

#[derive(Deserialize)]
struct ImproveRequest {
    items: Vec<String>,
    target: String,
    #[serde(default)]
    threshold: Option<f32>,
}

async fn handle_improve(
    State(state): State<AppState>,
    Query(params): Query<ImproveParams>,
    Json(body): Json<ImproveRequest>,
) -> Result<Response, AppError> {
    if body.items.is_empty() {
        return Err(Error::InvalidInput("items must not be empty".to_string()).into());
    }
    if body.target.trim().is_empty() {
        return Err(Error::InvalidInput("target must not be empty".to_string()).into());
    }

    let engine = state.engine().await?;
    let engine = match body.threshold {
        Some(t) => Arc::new(engine.with_threshold(t)?),
        None => engine,
    };
    let events = engine.evaluate(body.items, body.target);

    if params.stream {
        let stream = events.map(|item| {
            if let Err(e) = &item {
                warn!(error = %e, "improve stream aborted");
            }
            Ok::<Event, Infallible>(to_axum_event(&item))
        });
        return Ok(Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
            .into_response());
    }

    let mut events = Box::pin(events);
    while let Some(event) = events.next().await {
        if let RewriteEvent::Patch(ops) = event? {
            return Ok(Json(serde_json::json!({ "patch": ops })).into_response());
        }
    }
    Err(Error::Store("evaluation ended without a patch".to_string()).into())
}
