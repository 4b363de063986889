#![allow(dead_code)]

use alertpush_common::types::KV;
use alertpush_notify::enrich::{Enricher, DEFAULT_RESOLUTION};
use alertpush_notify::metrics::MetricsSource;
use alertpush_notify::store::Store;
use alertpush_notify::EnrichError;
use alertpush_plot::{ChartRender, Matrix, Operator, PlotError, Sample, Series};
use alertpush_server::app;
use alertpush_server::config::Config;
use alertpush_server::registry::Registry;
use alertpush_server::state::AppState;
use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const FIRING_PAYLOAD: &str = r#"{"receiver":"ops","status":"firing","alerts":[{"status":"firing","labels":{"alertname":"HighCPU"},"generatorURL":"http://x/graph?g0.expr=cpu%20%3E%2090"}]}"#;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
    pub state: AppState,
    pub app: axum::Router,
}

impl TestContext {
    /// Replaces the config file on disk; takes effect on the next reload.
    pub fn write_config(&self, toml: &str) -> Result<()> {
        std::fs::write(&self.config_path, toml)?;
        Ok(())
    }
}

fn write_config_file(toml: &str) -> Result<(TempDir, PathBuf)> {
    let temp_dir = tempfile::tempdir()?;
    let config_path = temp_dir.path().join("alertpush.toml");
    std::fs::write(&config_path, toml)?;
    Ok((temp_dir, config_path))
}

/// Serves `toml` the way the binary does, enrichment included.
pub fn build_test_context(toml: &str) -> Result<TestContext> {
    let (temp_dir, config_path) = write_config_file(toml)?;
    let state = AppState::load(&config_path, None)?;
    let app = app::build_http_app(state.clone());
    Ok(TestContext {
        temp_dir,
        config_path,
        state,
        app,
    })
}

/// Serves `toml` with charts produced by `enricher`.
pub fn build_test_context_with_enricher(toml: &str, enricher: Enricher) -> Result<TestContext> {
    let (temp_dir, config_path) = write_config_file(toml)?;
    let config = Config::load(&config_path)?;
    let template = config.template()?;
    let state = AppState {
        registry: Arc::new(Registry::with_enricher(config, template, Some(enricher))?),
        config_file: Arc::new(config_path.clone()),
        external_url: None,
        start_time: Utc::now(),
    };
    let app = app::build_http_app(state.clone());
    Ok(TestContext {
        temp_dir,
        config_path,
        state,
        app,
    })
}

/// A receiver `ops` with one DingTalk channel posting to `base`.
pub fn dingtalk_config(base: &str) -> String {
    format!(
        r#"
[global]
dingtalk_api_url = "{base}/robot/send"
dingtalk_api_token = "dt-token"

[[receivers]]
name = "ops"
[receivers.dingtalk_config]
"#
    )
}

pub async fn send_raw(app: &axum::Router, method: &str, uri: &str, body: &str) -> (StatusCode, String, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");

    let resp = app.clone().oneshot(req).await.expect("request should succeed");
    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("X-Trace-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    (status, String::from_utf8_lossy(&bytes).into_owned(), trace_id)
}

pub async fn request_json(app: &axum::Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let (status, text, _) = send_raw(app, method, uri, body.unwrap_or("")).await;
    let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
    (status, value)
}

pub struct FakeMetrics {
    pub fail: bool,
    pub queries: AtomicUsize,
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn query_range(
        &self,
        _expr: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _step: std::time::Duration,
    ) -> Result<Matrix, EnrichError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EnrichError::Query("metrics backend unavailable".to_string()));
        }
        Ok(vec![Series::new(
            KV::from_iter([("__name__", "cpu"), ("alertname", "HighCPU")]),
            vec![
                Sample {
                    timestamp: 0.0,
                    value: 95.0,
                },
                Sample {
                    timestamp: 60.0,
                    value: 97.0,
                },
            ],
        )])
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub uploads: AtomicUsize,
}

#[async_trait]
impl Store for FakeStore {
    async fn put(&self, _bytes: Vec<u8>, name: &str, _content_type: &str) -> Result<String, EnrichError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("http://charts.example/{name}"))
    }
}

pub struct FakeChart;

impl ChartRender for FakeChart {
    fn render(&self, _matrix: &[Series], _level: f64, _direction: Operator) -> Result<Vec<u8>, PlotError> {
        Ok(b"\x89PNG".to_vec())
    }
}

pub fn fake_enricher(fail: bool) -> (Enricher, Arc<FakeMetrics>, Arc<FakeStore>) {
    let metrics = Arc::new(FakeMetrics {
        fail,
        queries: AtomicUsize::new(0),
    });
    let store = Arc::new(FakeStore::default());
    let enricher = Enricher::new(metrics.clone(), store.clone(), Arc::new(FakeChart), DEFAULT_RESOLUTION);
    (enricher, metrics, store)
}
