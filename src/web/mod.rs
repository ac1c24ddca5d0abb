//! HTTP API for the gateway.
//!
//! The server binds to `server.listen` (default `127.0.0.1:18090`) and exposes:
//!
//! - `POST /v1/invoke`         : run a request through both gates and the agent
//! - `POST /v1/check/input`    : dry-run the input gate
//! - `POST /v1/check/output`   : dry-run the output gate against a given response
//! - `GET  /api/audit`         : recent audit entries
//! - `GET  /api/audit/stream`  : real-time SSE audit stream
//! - `GET  /api/status`        : gate layout, sessions and audit statistics
//! - `GET  /api/config`        : configuration in force
//! - `PUT  /api/config`        : validate and apply a new configuration
//! - `GET  /api/usage/{session}`: token usage for one session

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::audit::{self, AuditStats};
use crate::config::HailstormConfig;
use crate::error::HailstormError;
use crate::gateway::{AgentRequest, Gateway, GatewayStatus};
use crate::usage::Usage;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/invoke", post(invoke))
        .route("/v1/check/input", post(check_input))
        .route("/v1/check/output", post(check_output))
        .route("/api/audit", get(get_audit))
        .route("/api/audit/stream", get(get_audit_stream))
        .route("/api/status", get(get_status))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/usage/{session}", get(get_usage))
        .with_state(state)
}

/// Serve the API on `listen_addr` until `shutdown` resolves.
pub async fn start(
    listen_addr: &str,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> crate::error::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("Hailstorm API listening on {}", listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ─── Request / Response Types ───────────────────────────────────────────────

/// Query parameters for `GET /api/audit`.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    /// Maximum number of entries to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Body of `POST /v1/check/output`: the request plus the candidate response.
#[derive(Debug, Deserialize)]
pub struct OutputCheckBody {
    #[serde(flatten)]
    pub request: AgentRequest,
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub gateway: GatewayStatus,
    /// `None` when auditing is disabled.
    pub audit: Option<AuditStats>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub usage: Usage,
    pub total_tokens: u64,
}

fn error_body(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

fn no_database() -> Response {
    error_body(StatusCode::SERVICE_UNAVAILABLE, "no database")
}

/// Map a gateway error to its HTTP status.
fn error_response(gateway: &Gateway, e: HailstormError) -> Response {
    match e {
        HailstormError::Blocked {
            stage,
            check,
            reason,
        } => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "status": "denied",
                "stage": stage,
                "check": check,
                "reason": reason,
                "message": gateway.config().denial_message,
            })),
        )
            .into_response(),
        HailstormError::Executor(_) => error_body(StatusCode::BAD_GATEWAY, e),
        HailstormError::ConfigValidation(_)
        | HailstormError::ConfigInvalid { .. }
        | HailstormError::Json(_)
        | HailstormError::Pattern(_) => error_body(StatusCode::BAD_REQUEST, e),
        other => error_body(StatusCode::INTERNAL_SERVER_ERROR, other),
    }
}

// ─── Handlers ───────────────────────────────────────────────────────────────

/// `POST /v1/invoke`: 200 when allowed, 403 when either gate denies.
async fn invoke(State(state): State<Arc<AppState>>, Json(request): Json<AgentRequest>) -> Response {
    let gateway = &state.gateway;
    if !gateway.has_executor() {
        return error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "no executor configured (set executor.url)",
        );
    }
    match gateway.invoke(request).await {
        Ok(outcome) if outcome.is_allowed() => Json(outcome).into_response(),
        Ok(denied) => (StatusCode::FORBIDDEN, Json(denied)).into_response(),
        Err(e) => error_response(gateway, e),
    }
}

/// `POST /v1/check/input`: input gate report, without calling the agent.
async fn check_input(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AgentRequest>,
) -> Response {
    Json(state.gateway.check_input(request).await).into_response()
}

/// `POST /v1/check/output`: output gate report for a supplied response.
async fn check_output(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OutputCheckBody>,
) -> Response {
    Json(state.gateway.check_output(body.request, &body.response).await).into_response()
}

/// `GET /api/audit`: most recent audit entries, newest first.
async fn get_audit(State(state): State<Arc<AppState>>, Query(params): Query<AuditQuery>) -> Response {
    let Some(sink) = state.gateway.audit() else {
        return no_database();
    };
    let conn = match sink.pool().get() {
        Ok(c) => c,
        Err(e) => return error_body(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    match audit::query_recent(&conn, params.limit) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// `GET /api/audit/stream`: SSE stream of audit entries as they are written.
async fn get_audit_stream(State(state): State<Arc<AppState>>) -> Response {
    let Some(sink) = state.gateway.audit() else {
        return no_database();
    };
    let stream = BroadcastStream::new(sink.subscribe()).filter_map(|result| match result {
        Ok(entry) => match serde_json::to_string(&entry) {
            Ok(data) => Some(Ok::<_, Infallible>(Event::default().event("audit").data(data))),
            Err(e) => {
                warn!("Failed to serialize audit entry: {}", e);
                None
            }
        },
        Err(_) => None, // lagged receiver, skip
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// `GET /api/status`: gate layout plus audit statistics when available.
async fn get_status(State(state): State<Arc<AppState>>) -> Response {
    let gateway = &state.gateway;
    let audit = match gateway.audit() {
        None => None,
        Some(sink) => {
            let stats = sink
                .pool()
                .get()
                .map_err(|e| HailstormError::Pool(e.to_string()))
                .and_then(|conn| audit::query_stats(&conn));
            match stats {
                Ok(stats) => Some(stats),
                Err(e) => return error_body(StatusCode::INTERNAL_SERVER_ERROR, e),
            }
        }
    };
    Json(StatusResponse {
        gateway: gateway.status(),
        audit,
    })
    .into_response()
}

/// `GET /api/config`: the configuration currently in force, credentials redacted.
async fn get_config(State(state): State<Arc<AppState>>) -> Response {
    Json(state.gateway.config().redacted()).into_response()
}

/// `PUT /api/config`: replace the configuration. 400 if it does not validate.
async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let mut config: HailstormConfig = match serde_json::from_value(body) {
        Ok(c) => c,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, e),
    };
    config.restore_redacted(&state.gateway.config());
    match state.gateway.apply_config(config) {
        Ok(()) => {
            let status = state.gateway.status();
            info!("Configuration replaced via API");
            Json(json!({
                "status": "ok",
                "input_checks": status.input_checks,
                "output_checks": status.output_checks,
            }))
            .into_response()
        }
        Err(e) => error_response(&state.gateway, e),
    }
}

/// `GET /api/usage/{session}`: cumulative token usage for a session.
async fn get_usage(State(state): State<Arc<AppState>>, Path(session): Path<String>) -> Response {
    let usage = state.gateway.usage().usage(&session);
    Json(UsageResponse {
        session_id: session,
        total_tokens: usage.total(),
        usage,
    })
    .into_response()
}
