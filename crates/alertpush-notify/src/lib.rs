//! Notification delivery for alertpush.
//!
//! A receiver's chat channels are [`Notifier`] implementations built from
//! configuration. Built-in channels are DingTalk robots and WeChat Work
//! applications. Before delivery, the [`enrich::Enricher`] can attach a chart
//! of the alerting metric to every alert.

pub mod dingtalk;
pub mod enrich;
pub mod error;
pub mod metrics;
pub mod store;
pub mod utils;
pub mod wechat;


use alertpush_common::types::Data;
use async_trait::async_trait;
use std::time::Duration;

pub use error::{EnrichError, MultiError, NotifierFailure, NotifyError, Result};

/// Sent with every outbound request.
pub const USER_AGENT: &str = concat!("alertpush/", env!("CARGO_PKG_VERSION"));

/// A delivery channel for one receiver.
///
/// Implementations are built once per configuration load and shared by all
/// requests for that receiver, so any internal state must be synchronized.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Renders and delivers one notification for `data`.
    ///
    /// # Errors
    ///
    /// Returns the delivery failure. [`NotifyError::is_retryable`] tells
    /// whether a later attempt could succeed.
    async fn notify(&self, data: &Data) -> Result<()>;

    /// Returns the channel type name (e.g., `"dingtalk"`).
    fn channel_name(&self) -> &str;
}

/// Builds the HTTP client shared by the notifiers of one configuration.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(NotifyError::transport)
}
