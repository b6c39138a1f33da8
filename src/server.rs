//! Storefront collector and dashboard HTTP API.
//!
//! The storefront pages post tracking events and order forms here; the
//! admin dashboard signs in and reads aggregated snapshots or follows a
//! live stream of inserts.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/health` | | Health check (returns version) |
//! | `POST` | `/track/visit` | | Record the session's visit (once per `session_id`) |
//! | `POST` | `/track/page-view` | | Record one navigation |
//! | `POST` | `/track/interaction` | | Record a UI interaction |
//! | `POST` | `/orders` | | Submit the order form |
//! | `POST` | `/auth/sign-in` | | Exchange admin credentials for a token |
//! | `GET`  | `/dashboard/snapshot` | bearer | Aggregated analytics snapshot |
//! | `GET`  | `/dashboard/stream/{collection}` | bearer | Server-sent events of new inserts |
//!
//! Tracking endpoints always answer `200` with an `outcome`; a failed
//! insert is logged and reported as `"dropped"`, never as an HTTP error.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "name must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `internal` (500).

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, Utc};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use stitchboard_core::models::Collection;
use stitchboard_core::orders::{submit_order, OrderError, OrderForm};
use stitchboard_core::snapshot::{load_snapshot, Snapshot};
use stitchboard_core::store::{Record, RecordStore};
use stitchboard_core::tracker::{ClientEnvironment, TrackOutcome, Tracker};

use crate::auth::{AuthProvider, IssuedToken, Session, SignedSessionProvider};
use crate::config::Config;
use crate::sessions::SessionRegistry;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<SqliteStore>,
    tracker: Tracker<SqliteStore>,
    sessions: Arc<SessionRegistry>,
    /// `None` when no admin account is configured.
    auth: Option<Arc<SignedSessionProvider>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<SqliteStore>) -> anyhow::Result<Self> {
        let auth = SignedSessionProvider::from_config(&config.auth)?.map(Arc::new);
        let tracker = Tracker::new(store.clone(), config.analytics.classifier());
        let idle_minutes = config.analytics.session_idle_minutes.max(1) as u64;
        let sessions = SessionRegistry::new(Duration::from_secs(idle_minutes.saturating_mul(60)));

        Ok(Self {
            config: Arc::new(config),
            store,
            tracker,
            sessions: Arc::new(sessions),
            auth,
        })
    }
}

/// Starts the HTTP server.
///
/// Opens the database (creating the schema if needed), binds to
/// `[server].bind`, and serves until Ctrl+C or SIGTERM.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let state = AppState::new(config.clone(), store)?;

    if state.auth.is_none() {
        info!("no [auth] admin configured, dashboard routes will reject every request");
    }

    let app = router(state)?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "stitchboard listening");
    eprintln!("Stitchboard server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shut down");
    Ok(())
}

/// Build the router with CORS and request tracing applied.
pub fn router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config.server.allowed_origins)?;

    Ok(Router::new()
        .route("/health", get(handle_health))
        .route("/track/visit", post(handle_track_visit))
        .route("/track/page-view", post(handle_track_page_view))
        .route("/track/interaction", post(handle_track_interaction))
        .route("/orders", post(handle_submit_order))
        .route("/auth/sign-in", post(handle_sign_in))
        .route("/dashboard/snapshot", get(handle_snapshot))
        .route("/dashboard/stream/{collection}", get(handle_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

fn cors_layer(allowed_origins: &[String]) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return Ok(cors.allow_origin(Any));
    }
    let origins = allowed_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|_| anyhow::anyhow!("invalid origin in server.allowed_origins: '{}'", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(cors.allow_origin(AllowOrigin::list(origins)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                error!(error = %e, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Unwrap a JSON body, reporting malformed input in the error contract's shape.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

/// Resolve the bearer token to a dashboard session.
async fn require_session(state: &AppState, headers: &HeaderMap) -> Result<Session, AppError> {
    let Some(auth) = state.auth.as_deref() else {
        return Err(unauthorized("dashboard authentication is not configured"));
    };
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| unauthorized("missing bearer token"))?;

    match auth.get_session(token).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(unauthorized("invalid or expired session")),
        Err(e) => {
            error!(error = %e, "session lookup failed");
            Err(internal(e.to_string()))
        }
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /track/* ============

#[derive(Serialize)]
struct TrackResponse {
    outcome: TrackOutcome,
}

#[derive(Deserialize)]
struct VisitRequest {
    session_id: String,
    #[serde(flatten)]
    env: ClientEnvironment,
}

async fn handle_track_visit(
    State(state): State<AppState>,
    payload: Result<Json<VisitRequest>, JsonRejection>,
) -> Result<Json<TrackResponse>, AppError> {
    let req = json_body(payload)?;
    let session_id = req.session_id.trim();
    if session_id.is_empty() {
        return Err(bad_request("session_id must not be empty"));
    }

    let outcome = state
        .sessions
        .record_visit(&state.tracker, session_id, &req.env)
        .await;
    Ok(Json(TrackResponse { outcome }))
}

#[derive(Deserialize)]
struct PageViewRequest {
    #[serde(default)]
    page_id: String,
    #[serde(default)]
    page_name: String,
    #[serde(flatten)]
    env: ClientEnvironment,
}

async fn handle_track_page_view(
    State(state): State<AppState>,
    payload: Result<Json<PageViewRequest>, JsonRejection>,
) -> Result<Json<TrackResponse>, AppError> {
    let req = json_body(payload)?;
    let outcome = state
        .tracker
        .record_page_view(&req.page_id, &req.page_name, &req.env)
        .await;
    Ok(Json(TrackResponse { outcome }))
}

#[derive(Deserialize)]
struct InteractionRequest {
    interaction_type: String,
    #[serde(default)]
    details: serde_json::Value,
}

async fn handle_track_interaction(
    State(state): State<AppState>,
    payload: Result<Json<InteractionRequest>, JsonRejection>,
) -> Result<Json<TrackResponse>, AppError> {
    let req = json_body(payload)?;
    let outcome = state
        .tracker
        .record_interaction(&req.interaction_type, req.details)
        .await;
    Ok(Json(TrackResponse { outcome }))
}

// ============ POST /orders ============

async fn handle_submit_order(
    State(state): State<AppState>,
    payload: Result<Json<OrderForm>, JsonRejection>,
) -> Result<(StatusCode, Json<Record>), AppError> {
    let form = json_body(payload)?;
    match submit_order(state.store.as_ref(), &state.config.catalog, form).await {
        Ok(record) => Ok((StatusCode::CREATED, Json(record))),
        Err(e) => Err(order_error(e)),
    }
}

fn order_error(err: OrderError) -> AppError {
    match &err {
        OrderError::Invalid(_) => bad_request(err.to_string()),
        OrderError::Storage(cause) => {
            error!(error = %format!("{:#}", cause), "order submission failed");
            internal(err.to_string())
        }
    }
}

// ============ POST /auth/sign-in ============

#[derive(Deserialize)]
struct SignInRequest {
    email: String,
    password: String,
}

async fn handle_sign_in(
    State(state): State<AppState>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<Json<IssuedToken>, AppError> {
    let req = json_body(payload)?;
    let Some(auth) = state.auth.as_deref() else {
        return Err(not_found("dashboard sign-in is not configured"));
    };
    match auth.sign_in(&req.email, &req.password, Utc::now()) {
        Ok(Some(token)) => Ok(Json(token)),
        Ok(None) => Err(unauthorized("invalid email or password")),
        Err(e) => Err(internal(e.to_string())),
    }
}

// ============ GET /dashboard/snapshot ============

async fn handle_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Snapshot>, AppError> {
    require_session(&state, &headers).await?;
    let options = state.config.analytics.snapshot_options(&Local::now());
    let snapshot = load_snapshot(state.store.as_ref(), &options).await;
    Ok(Json(snapshot))
}

// ============ GET /dashboard/stream/{collection} ============

async fn handle_stream(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_session(&state, &headers).await?;
    let collection: Collection = collection
        .parse()
        .map_err(|e: anyhow::Error| not_found(e.to_string()))?;

    let stream = state
        .store
        .subscribe(collection)
        .into_stream()
        .map(|record| {
            let json = serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string());
            Ok::<Event, Infallible>(Event::default().event("insert").data(json))
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
