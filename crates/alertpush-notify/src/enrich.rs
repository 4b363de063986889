//! Attaches metric charts to alerts.
//!
//! For every alert the enricher recovers the alerting expression from the
//! generator URL, splits it into threshold comparisons, queries each
//! comparison's formula around the alert's lifetime, draws it and publishes
//! the image.

use crate::error::EnrichError;
use crate::metrics::MetricsSource;
use crate::store::Store;
use crate::utils::random_hex;
use alertpush_common::types::{Alert, AlertImage, Data, KV};
use alertpush_plot::{decompose, ChartRender, Matrix};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use url::Url;

/// Query parameter of a Prometheus graph link holding the expression.
const EXPR_PARAM: &str = "g0.expr";

/// Shortest window a chart covers, in seconds.
pub const MIN_WINDOW_SECS: i64 = 20 * 60;

pub const DEFAULT_RESOLUTION: u32 = 100;

/// Extracts the alerting expression from a generator URL.
///
/// An empty URL, or one without `g0.expr`, has no expression.
pub fn alert_expression(generator_url: &str) -> Result<Option<String>, EnrichError> {
    if generator_url.is_empty() {
        return Ok(None);
    }
    let url = Url::parse(generator_url)?;
    Ok(url
        .query_pairs()
        .find(|(k, _)| k == EXPR_PARAM)
        .map(|(_, v)| v.into_owned()))
}

/// The end of the chart window and its length.
///
/// An alert whose start is after its end (an unset `endsAt`) is charted over
/// the 20 minutes before it started. Otherwise the chart ends at `endsAt`
/// and covers the alert's lifetime, at least 20 minutes.
pub fn query_window(alert: &Alert) -> (DateTime<Utc>, Duration) {
    let min = Duration::seconds(MIN_WINDOW_SECS);
    if alert.starts_at > alert.ends_at {
        (alert.starts_at, min)
    } else {
        (alert.ends_at, (alert.ends_at - alert.starts_at).max(min))
    }
}

/// Keeps the first series describing the alert, or the whole matrix when
/// none does.
pub fn select_series(matrix: Matrix, labels: &KV) -> Matrix {
    match matrix.iter().position(|s| s.matches(labels)) {
        Some(idx) => {
            tracing::debug!(series = %matrix[idx], "Best match found");
            matrix.into_iter().skip(idx).take(1).collect()
        }
        None => {
            tracing::debug!(labels = ?labels.values(), "No matching series, using entire result");
            matrix
        }
    }
}

pub struct Enricher {
    metrics: Arc<dyn MetricsSource>,
    store: Arc<dyn Store>,
    chart: Arc<dyn ChartRender>,
    resolution: u32,
}

impl Enricher {
    pub fn new(
        metrics: Arc<dyn MetricsSource>,
        store: Arc<dyn Store>,
        chart: Arc<dyn ChartRender>,
        resolution: u32,
    ) -> Self {
        Self {
            metrics,
            store,
            chart,
            resolution: resolution.max(1),
        }
    }

    fn step(&self, window: Duration) -> std::time::Duration {
        let secs = window.num_seconds().max(0) as u64 / u64::from(self.resolution);
        std::time::Duration::from_secs(secs.max(1))
    }

    /// Appends one chart per threshold comparison of the alert's expression.
    ///
    /// Images are attached only when every chart succeeds.
    pub async fn enrich(&self, alert: &mut Alert) -> Result<(), EnrichError> {
        let Some(expr) = alert_expression(&alert.generator_url)? else {
            return Ok(());
        };

        let (end, window) = query_window(alert);
        let step = self.step(window);
        let mut images = Vec::new();

        for plot in decompose(&expr) {
            tracing::debug!(formula = %plot.formula, "Querying metrics for chart");
            let matrix = self
                .metrics
                .query_range(&plot.formula, end - window, end, step)
                .await?;
            let selected = select_series(matrix, &alert.labels);
            let chart = self.chart.clone();
            let (level, operator) = (plot.level, plot.operator);
            // Drawing and PNG encoding are CPU-bound.
            let png = tokio::task::spawn_blocking(move || chart.render(&selected, level, operator)).await??;

            let name = format!("pictures/{}_{}.png", random_hex(12), Utc::now().timestamp());
            let url = self.store.put(png, &name, "image/png").await?;
            images.push(AlertImage {
                url,
                title: plot.to_string(),
            });
        }

        alert.images.extend(images);
        Ok(())
    }

    /// Enriches every alert of a webhook payload.
    ///
    /// With `abort_on_error` the first failure is returned. Otherwise a
    /// failing alert is logged and delivered without charts.
    pub async fn enrich_data(&self, data: &mut Data, abort_on_error: bool) -> Result<(), EnrichError> {
        for alert in data.alerts.iter_mut() {
            if let Err(e) = self.enrich(alert).await {
                if abort_on_error {
                    return Err(e);
                }
                tracing::warn!(
                    fingerprint = %alert.fingerprint,
                    error = %e,
                    "Chart generation failed, sending alert without image"
                );
            }
        }
        Ok(())
    }
}
