use axum::{
    body::Body,
    extract::{RawQuery, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{any, get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::auth::{FailureClassifier, IdentityService, RefreshCoordinator};
use crate::config::Config;
use crate::error::{ApiError, IdentityError, Result};
use crate::http_client::ApiClient;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::middleware;
use crate::session::{EndReason, SessionStore};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<ApiClient>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub metrics: Arc<PipelineMetrics>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the pipeline together from configuration
    pub fn new(
        config: Config,
        identity: Arc<dyn IdentityService>,
        store: SessionStore,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(PipelineMetrics::new());
        let coordinator = Arc::new(RefreshCoordinator::new(
            store,
            identity,
            metrics.clone(),
            Duration::from_secs(config.refresh_timeout),
        ));
        let classifier = FailureClassifier::new(config.refresh_url()?);
        let api = Arc::new(ApiClient::new(
            config.upstream_url.clone(),
            classifier,
            coordinator.clone(),
            metrics.clone(),
            config.http_max_connections,
            config.http_connect_timeout,
            config.http_request_timeout,
        )?);

        Ok(Self {
            api,
            coordinator,
            metrics,
            config: Arc::new(config),
        })
    }
}

/// Build the application with all routes and middleware
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(auth_routes(state.clone()))
        .merge(api_routes(state))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(middleware::cors_layer())
}

/// Health check routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// Session lifecycle routes
pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/session", get(session_handler))
        .route("/auth/events", get(events_handler))
        .with_state(state)
}

/// Resource API proxy and pipeline metrics
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/*path", any(proxy_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Session Gateway is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

/// POST /auth/login
async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Value>> {
    if body.username.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::ValidationError(
            "username and password are required".to_string(),
        ));
    }

    let session = state
        .coordinator
        .login(body.username.trim(), &body.password)
        .await
        .map_err(|e| match e {
            IdentityError::Transport(message) => ApiError::Transport {
                kind: "identity_unreachable",
                message,
            },
            IdentityError::Rejected { status, .. } if (400..500).contains(&status) => {
                ApiError::AuthError("Invalid username or password".to_string())
            }
            other => ApiError::AuthError(other.to_string()),
        })?;

    Ok(Json(json!({
        "authenticated": true,
        "identity": session.identity,
    })))
}

/// POST /auth/logout
async fn logout_handler(State(state): State<AppState>) -> Json<Value> {
    let ended = state.coordinator.end(EndReason::LoggedOut).await;
    Json(json!({ "ended": ended }))
}

/// GET /auth/session - Session status without credentials
async fn session_handler(State(state): State<AppState>) -> Json<Value> {
    let refreshing = state.coordinator.is_refreshing().await;
    match state.coordinator.current().await {
        Some(session) => Json(json!({
            "authenticated": true,
            "identity": session.identity,
            "issued_at": session.issued_at,
            "expires_at": session.expires_at,
            "refreshing": refreshing,
        })),
        None => Json(json!({
            "authenticated": false,
            "refreshing": refreshing,
        })),
    }
}

/// GET /auth/events - Server-sent `session_ended` notifications
async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let events = state.coordinator.subscribe();

    let stream = futures::stream::unfold(events, |mut events| async move {
        loop {
            match events.recv().await {
                Ok(ended) => match Event::default().event("session_ended").json_data(&ended) {
                    Ok(event) => return Some((Ok::<_, Infallible>(event), events)),
                    Err(e) => tracing::warn!("Failed to encode session-ended event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Session event stream skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// ANY /api/*path - Forward to the resource API through the pipeline
async fn proxy_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let body = axum::body::to_bytes(body, state.config.max_body_bytes)
        .await
        .map_err(|e| ApiError::ValidationError(format!("Failed to read request body: {}", e)))?;

    // Still percent-encoded, so an escaped `?` or `#` stays part of the path
    let path = uri
        .path()
        .strip_prefix("/api/")
        .ok_or_else(|| ApiError::ValidationError(format!("Not an API path: {}", uri.path())))?;

    let mut url = state.api.endpoint(path)?;
    url.set_query(query.as_deref());

    let mut builder = state.api.client().request(method, url);
    for (name, value) in headers.iter() {
        if is_forwardable(name) {
            builder = builder.header(name, value);
        }
    }
    let request = builder.body(body).build()?;

    match state.api.send(request).await {
        Ok(upstream) => relay(upstream),
        Err(ApiError::UpstreamError {
            status,
            message,
            content_type,
        }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response = (status, message).into_response();
            if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            Ok(response)
        }
        Err(e) => Err(e),
    }
}

/// Stream an upstream response back to the console
fn relay(upstream: reqwest::Response) -> Result<Response> {
    let mut builder = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        if is_forwardable(name) && name != header::CONTENT_LENGTH {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ApiError::Internal(e.into()))
}

/// Connection-level and credential headers stay on their side of the gateway
fn is_forwardable(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "host"
            | "authorization"
            | "proxy-authorization"
            | "cookie"
            | "set-cookie"
            | "connection"
            | "keep-alive"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}
