use crate::api;
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use rand::RngCore;
use std::time::Instant;

/// Largest request body accepted, by this middleware and by the webhook
/// route's `DefaultBodyLimit`.
pub const MAX_REQUEST_BODY: usize = 4 * 1024 * 1024;

/// Characters of a request or response body kept in a log line.
const MAX_BODY_LOG_CHARS: usize = 200;

/// Probe endpoints are served without log lines.
const QUIET_PATHS: [&str; 1] = ["/-/healthy"];

/// Per-request correlation id, available to handlers as a request extension.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl TraceId {
    /// 16 hex chars from 8 random bytes.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }
}

/// Cuts `bytes` to at most `max` bytes on a char boundary.
fn snippet(bytes: &[u8], max: usize) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.len() > max => {
            let end = (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0);
            format!("{}...", &s[..end])
        }
        Ok(s) => s.to_string(),
        Err(_) => "<non-utf8 body>".to_string(),
    }
}

fn format_elapsed(elapsed_us: u128) -> String {
    if elapsed_us < 1000 {
        format!("{elapsed_us}µs")
    } else if elapsed_us < 1_000_000 {
        format!("{}ms", elapsed_us / 1000)
    } else {
        format!("{:.1}s", elapsed_us as f64 / 1_000_000.0)
    }
}

async fn buffer(body: Body, limit: usize) -> Result<Bytes, axum::Error> {
    axum::body::to_bytes(body, limit).await
}

fn with_trace_header(mut resp: Response, trace_id: &TraceId) -> Response {
    if let Ok(val) = HeaderValue::from_str(trace_id) {
        resp.headers_mut().insert("X-Trace-Id", val);
    }
    resp
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Response bodies are logged only for JSON envelopes.
fn loggable_response(headers: &HeaderMap, bytes: &[u8]) -> String {
    match header_str(headers, header::CONTENT_TYPE) {
        Some(ct) if ct.starts_with("application/json") => snippet(bytes, MAX_BODY_LOG_CHARS),
        _ => String::new(),
    }
}

fn log_response(trace_id: &TraceId, status: StatusCode, elapsed: &str, body: &str) {
    let code = status.as_u16();
    if status.is_server_error() {
        tracing::error!(trace_id = %trace_id.0, status = code, elapsed, body, "<-- response");
    } else if status.is_client_error() {
        tracing::warn!(trace_id = %trace_id.0, status = code, elapsed, body, "<-- response");
    } else {
        tracing::info!(trace_id = %trace_id.0, status = code, elapsed, "<-- response");
    }
}

/// Logs every request and response with a trace id, and returns the id in
/// the `X-Trace-Id` header.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = TraceId::generate();
    req.extensions_mut().insert(trace_id.clone());

    if QUIET_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let ua = header_str(req.headers(), header::USER_AGENT).unwrap_or("-").to_owned();

    // Webhook payloads are buffered so their head can be logged.
    let (req, body) = if method == Method::POST {
        let (parts, body) = req.into_parts();
        let bytes = match buffer(body, MAX_REQUEST_BODY).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(trace_id = %trace_id.0, %method, %path, error = %e, "request body rejected");
                let msg = format!("failed to read request body (limit {MAX_REQUEST_BODY} bytes): {e}");
                let resp = api::error_response(StatusCode::PAYLOAD_TOO_LARGE, &trace_id, "payload_too_large", &msg);
                return with_trace_header(resp, &trace_id);
            }
        };
        let logged = snippet(&bytes, MAX_BODY_LOG_CHARS);
        (Request::from_parts(parts, Body::from(bytes)), logged)
    } else {
        (req, String::new())
    };
    tracing::info!(trace_id = %trace_id.0, %method, %path, %body, %ua, "--> request");

    let start = Instant::now();
    let (parts, body) = next.run(req).await.into_parts();
    let elapsed = format_elapsed(start.elapsed().as_micros());

    let bytes = match buffer(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(trace_id = %trace_id.0, error = %e, "failed to buffer response body");
            Bytes::new()
        }
    };
    log_response(&trace_id, parts.status, &elapsed, &loggable_response(&parts.headers, &bytes));

    with_trace_header(Response::from_parts(parts, Body::from(bytes)), &trace_id)
}
