//! Receiver routing and fan-out.
//!
//! The registry owns an immutable [`Snapshot`] built from one configuration
//! load. Reloading builds a new snapshot and swaps it in; requests already in
//! flight keep the snapshot they started with.

use crate::config::{Config, ConfigError, GlobalConfig};
use alertpush_common::types::Data;
use alertpush_notify::dingtalk::DingtalkNotifier;
use alertpush_notify::enrich::Enricher;
use alertpush_notify::metrics::PrometheusSource;
use alertpush_notify::store::S3Store;
use alertpush_notify::wechat::WechatNotifier;
use alertpush_notify::{http_client, MultiError, Notifier, NotifierFailure, NotifyError};
use alertpush_plot::ChartRenderer;
use alertpush_template::Template;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("receiver {0:?} not found")]
    NotFound(String),

    #[error("{0}")]
    BadData(String),

    #[error("{0}")]
    Upstream(MultiError),

    /// Every failing channel failed before delivery (rendering or encoding).
    #[error("{0}")]
    Internal(MultiError),
}

/// Everything one configuration load produces.
pub struct Snapshot {
    pub config: Arc<Config>,
    pub template: Arc<Template>,
    pub loaded_at: DateTime<Utc>,
    enricher: Option<Enricher>,
    receivers: HashMap<String, Vec<Box<dyn Notifier>>>,
}

impl Snapshot {
    fn build(config: Config, template: Template, enricher: Option<Enricher>) -> Result<Self, ConfigError> {
        let template = Arc::new(template);
        let client = http_client(Duration::from_secs(config.global.http_timeout_secs))?;
        let mut receivers = HashMap::with_capacity(config.receivers.len());

        for rcv in &config.receivers {
            let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();

            if let Some(conf) = &rcv.dingtalk_config {
                match DingtalkNotifier::new(conf.clone(), template.clone(), client.clone()) {
                    Ok(n) => notifiers.push(Box::new(n)),
                    Err(e) => tracing::error!(
                        receiver = %rcv.name,
                        error = %e,
                        "Failed to build DingTalk notifier, skipping"
                    ),
                }
            }
            if let Some(conf) = &rcv.wechat_config {
                match WechatNotifier::new(conf.clone(), template.clone(), client.clone()) {
                    Ok(n) => notifiers.push(Box::new(n)),
                    Err(e) => tracing::error!(
                        receiver = %rcv.name,
                        error = %e,
                        "Failed to build WeChat notifier, skipping"
                    ),
                }
            }

            receivers.insert(rcv.name.clone(), notifiers);
        }

        Ok(Self {
            config: Arc::new(config),
            template,
            loaded_at: Utc::now(),
            enricher,
            receivers,
        })
    }

    /// Number of notifiers built for `receiver`.
    pub fn channel_count(&self, receiver: &str) -> usize {
        self.receivers.get(receiver).map_or(0, Vec::len)
    }

    pub fn enrichment_enabled(&self) -> bool {
        self.enricher.is_some()
    }
}

/// Builds the chart enricher when metrics, storage and a font are configured.
///
/// A misconfigured piece disables enrichment instead of failing the load.
pub fn build_enricher(config: &Config) -> Option<Enricher> {
    let GlobalConfig {
        prometheus_url,
        chart_font,
        metric_resolution,
        http_timeout_secs,
        ..
    } = &config.global;

    let (Some(prometheus_url), Some(s3)) = (prometheus_url, &config.s3) else {
        tracing::info!("Chart enrichment disabled: prometheus_url or [s3] not configured");
        return None;
    };
    let Some(font) = chart_font else {
        tracing::warn!("Chart enrichment disabled: no chart_font configured");
        return None;
    };

    let chart = match ChartRenderer::with_font_file(font) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Chart enrichment disabled: font unusable");
            return None;
        }
    };
    let store = match S3Store::new(s3) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Chart enrichment disabled: object store unusable");
            return None;
        }
    };
    let client = match http_client(Duration::from_secs(*http_timeout_secs)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Chart enrichment disabled: http client unusable");
            return None;
        }
    };

    Some(Enricher::new(
        Arc::new(PrometheusSource::new(prometheus_url.as_str(), client)),
        Arc::new(store),
        Arc::new(chart),
        *metric_resolution,
    ))
}

fn is_pre_delivery(e: &NotifyError) -> bool {
    matches!(e, NotifyError::Template(_) | NotifyError::Json(_))
}

pub struct Registry {
    current: RwLock<Arc<Snapshot>>,
}

impl Registry {
    pub fn new(config: Config, template: Template) -> Result<Self, ConfigError> {
        let enricher = build_enricher(&config);
        Self::with_enricher(config, template, enricher)
    }

    /// Like [`Registry::new`] with an explicitly provided enricher.
    pub fn with_enricher(
        config: Config,
        template: Template,
        enricher: Option<Enricher>,
    ) -> Result<Self, ConfigError> {
        let snapshot = Snapshot::build(config, template, enricher)?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The current snapshot. Callers hold it for the whole request.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Rebuilds every notifier from `config` and swaps the result in.
    pub fn update(&self, config: Config, template: Template) -> Result<(), ConfigError> {
        let enricher = build_enricher(&config);
        self.update_with_enricher(config, template, enricher)
    }

    pub fn update_with_enricher(
        &self,
        config: Config,
        template: Template,
        enricher: Option<Enricher>,
    ) -> Result<(), ConfigError> {
        let snapshot = Arc::new(Snapshot::build(config, template, enricher)?);
        let receivers = snapshot.receivers.len();
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot;
        tracing::info!(receivers, "Receiver registry updated");
        Ok(())
    }

    /// Decodes a webhook payload for `receiver`, attaches charts and
    /// delivers it to every channel of the receiver.
    ///
    /// All channels are attempted. Failures are reported together, in
    /// channel configuration order.
    pub async fn handle_webhook(&self, receiver: &str, body: &[u8]) -> Result<(), DispatchError> {
        let snapshot = self.snapshot();
        let notifiers = snapshot
            .receivers
            .get(receiver)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DispatchError::NotFound(receiver.to_string()))?;

        let mut data: Data = serde_json::from_slice(body)
            .map_err(|e| DispatchError::BadData(format!("failed to decode webhook body: {e}")))?;

        if let Some(enricher) = &snapshot.enricher {
            enricher
                .enrich_data(&mut data, snapshot.config.global.abort_on_enrich_error)
                .await
                .map_err(|e| DispatchError::BadData(format!("failed to attach alert images: {e}")))?;
        }

        let results = join_all(notifiers.iter().map(|n| n.notify(&data))).await;

        let mut errs = MultiError::new();
        for (notifier, result) in notifiers.iter().zip(results) {
            let channel = notifier.channel_name();
            match result {
                Ok(()) => tracing::info!(receiver, channel, alerts = data.alerts.len(), "Notification sent"),
                Err(e) => {
                    tracing::warn!(
                        receiver,
                        channel,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Notification failed"
                    );
                    errs.push(NotifierFailure {
                        receiver: receiver.to_string(),
                        channel: channel.to_string(),
                        retryable: e.is_retryable(),
                        error: e,
                    });
                }
            }
        }

        if errs.is_empty() {
            Ok(())
        } else if errs.failures().iter().all(|f| is_pre_delivery(&f.error)) {
            Err(DispatchError::Internal(errs))
        } else {
            Err(DispatchError::Upstream(errs))
        }
    }
}
