use crate::error::EnrichError;
use alertpush_common::types::KV;
use alertpush_plot::{Matrix, Sample, Series};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// A time-series backend able to answer range queries.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn query_range(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Matrix, EnrichError>;
}

/// Range queries against the Prometheus HTTP API.
pub struct PrometheusSource {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: String,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: KV,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

fn seconds(t: DateTime<Utc>) -> String {
    format!("{:.3}", t.timestamp_millis() as f64 / 1000.0)
}

impl PrometheusSource {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn decode(resp: QueryResponse) -> Result<Matrix, EnrichError> {
        if resp.status != "success" {
            return Err(EnrichError::Query(format!(
                "{}: {}",
                resp.error_type, resp.error
            )));
        }
        let data = resp
            .data
            .ok_or_else(|| EnrichError::Query("response has no data".to_string()))?;
        if data.result_type != "matrix" {
            return Err(EnrichError::Query(format!(
                "unsupported result format: {}",
                data.result_type
            )));
        }

        data.result
            .into_iter()
            .map(|s| {
                let samples = s
                    .values
                    .into_iter()
                    .map(|(timestamp, raw)| {
                        raw.parse::<f64>()
                            .map(|value| Sample { timestamp, value })
                            .map_err(|_| EnrichError::Query(format!("sample value not float: {raw}")))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Series::new(s.metric, samples))
            })
            .collect()
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query_range(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Matrix, EnrichError> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let (start, end) = (seconds(start), seconds(end));
        let step = format!("{}s", step.as_secs().max(1));
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("query", expr),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step.as_str()),
            ])
            .send()
            .await
            .map_err(|e| EnrichError::Query(e.without_url().to_string()))?;

        // Prometheus reports query errors as JSON with a 4xx/5xx status.
        let body: QueryResponse = resp
            .json()
            .await
            .map_err(|e| EnrichError::Query(e.without_url().to_string()))?;
        tracing::debug!(expr, "Range query answered");
        Self::decode(body)
    }
}
