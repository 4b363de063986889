use crate::config::Config;
use crate::logging::{TraceId, MAX_REQUEST_BODY};
use crate::registry::DispatchError;
use crate::state::AppState;
use alertpush_notify::MultiError;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Response envelope shared by every JSON endpoint.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success.
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "payload_too_large" => 1413,
        "internal_error" => 1500,
        "upstream_error" => 1502,
        "reload_failed" => 1503,
        _ => 1999,
    }
}

fn error_body<T: Serialize>(status: StatusCode, trace_id: &str, code: &str, msg: &str, data: Option<T>) -> Response {
    (
        status,
        Json(ApiResponse {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data,
        }),
    )
        .into_response()
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    error_body::<Value>(status, trace_id, code, msg, None)
}

/// One failed channel, as reported to the webhook caller.
#[derive(Serialize)]
struct FailureView {
    receiver: String,
    channel: String,
    retryable: bool,
    error: String,
}

fn failure_views(errs: &MultiError) -> Vec<FailureView> {
    errs.failures()
        .iter()
        .map(|f| FailureView {
            receiver: f.receiver.clone(),
            channel: f.channel.clone(),
            retryable: f.retryable,
            error: f.error.to_string(),
        })
        .collect()
}

/// `POST /:receiver/send`: the Alertmanager webhook.
async fn send(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(receiver): Path<String>,
    body: Bytes,
) -> Response {
    match state.registry.handle_webhook(&receiver, &body).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            let msg = e.to_string();
            match e {
                DispatchError::NotFound(_) => error_response(StatusCode::NOT_FOUND, &trace_id, "not_found", &msg),
                DispatchError::BadData(_) => error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &msg),
                DispatchError::Upstream(errs) => error_body(
                    StatusCode::BAD_GATEWAY,
                    &trace_id,
                    "upstream_error",
                    &msg,
                    Some(failure_views(&errs)),
                ),
                DispatchError::Internal(errs) => error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &trace_id,
                    "internal_error",
                    &msg,
                    Some(failure_views(&errs)),
                ),
            }
        }
    }
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    version: &'static str,
    uptime_secs: i64,
    config_loaded_at: DateTime<Utc>,
    chart_enrichment: bool,
    config: &'a Config,
}

/// `GET /api/v1/status`: running configuration (secrets redacted) and build info.
async fn status(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> Response {
    let snapshot = state.registry.snapshot();
    success_response(
        StatusCode::OK,
        &trace_id,
        StatusResponse {
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: (Utc::now() - state.start_time).num_seconds(),
            config_loaded_at: snapshot.loaded_at,
            chart_enrichment: snapshot.enrichment_enabled(),
            config: &snapshot.config,
        },
    )
}

#[derive(Serialize)]
struct ReceiverView {
    name: String,
    channels: usize,
}

/// `GET /api/v1/receivers`
async fn receivers(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> Response {
    let snapshot = state.registry.snapshot();
    let items: Vec<ReceiverView> = snapshot
        .config
        .receiver_names()
        .into_iter()
        .map(|name| ReceiverView {
            channels: snapshot.channel_count(&name),
            name,
        })
        .collect();
    success_response(StatusCode::OK, &trace_id, items)
}

async fn healthy() -> &'static str {
    "OK"
}

/// `POST /-/reload`
async fn reload(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> Response {
    match state.reload() {
        Ok(()) => success_response(StatusCode::OK, &trace_id, state.registry.snapshot().config.receiver_names()),
        Err(e) => {
            tracing::error!(error = %e, "Reload failed, keeping previous configuration");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "reload_failed",
                &e.to_string(),
            )
        }
    }
}

/// Introspection endpoints.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/receivers", get(receivers))
}

/// Health and reload endpoints.
pub fn lifecycle_routes() -> Router<AppState> {
    Router::new()
        .route("/-/healthy", get(healthy))
        .route("/-/reload", post(reload))
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/:receiver/send", post(send))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
}
