//! Errors raised while enriching and delivering notifications.
//!
//! # Examples
//!
//! ```rust
//! use alertpush_notify::error::NotifyError;
//!
//! let err = NotifyError::Status(503);
//! assert!(err.is_retryable());
//! assert!(err.to_string().contains("503"));
//! ```

use alertpush_plot::PlotError;
use alertpush_template::TemplateError;

/// A failed delivery attempt through one channel.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The channel configuration is missing a required value.
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// A message template failed to render.
    #[error("render message: {0}")]
    Template(#[from] TemplateError),

    /// The request never produced a response. The URL is stripped, since it
    /// carries access tokens and signatures.
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    /// The endpoint answered with a non-success HTTP status.
    #[error("unexpected status code {0}")]
    Status(u16),

    /// The response body could not be read or decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The chat platform rejected the request.
    #[error("{service} error {code}: {message}")]
    Api {
        service: &'static str,
        code: i64,
        message: String,
        retryable: bool,
    },

    /// No access token could be obtained.
    #[error("access token: {0}")]
    Token(String),

    #[error("encode message: {0}")]
    Json(#[from] serde_json::Error),
}

impl NotifyError {
    /// Wraps a transport error after removing its URL.
    pub fn transport(err: reqwest::Error) -> Self {
        Self::Http(err.without_url())
    }

    /// Whether the same notification could succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Status(_) | Self::InvalidResponse(_) => true,
            Self::Api { retryable, .. } => *retryable,
            Self::InvalidConfig(_) | Self::Template(_) | Self::Token(_) | Self::Json(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, NotifyError>;

/// One channel that failed while serving a webhook.
#[derive(Debug)]
pub struct NotifierFailure {
    pub receiver: String,
    pub channel: String,
    pub retryable: bool,
    pub error: NotifyError,
}

impl std::fmt::Display for NotifierFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.receiver, self.channel, self.error)
    }
}

/// Every channel failure of one webhook call, in invocation order.
#[derive(Debug, Default)]
pub struct MultiError(Vec<NotifierFailure>);

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failure: NotifierFailure) {
        self.0.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn failures(&self) -> &[NotifierFailure] {
        &self.0
    }

    /// Whether every failure could be retried.
    pub fn is_retryable(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|f| f.retryable)
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for failure in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// A failure while attaching charts to an alert.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("invalid generator URL: {0}")]
    GeneratorUrl(#[from] url::ParseError),

    #[error("query metrics: {0}")]
    Query(String),

    #[error("render chart: {0}")]
    Plot(#[from] PlotError),

    #[error("chart task failed: {0}")]
    ChartTask(#[from] tokio::task::JoinError),

    #[error("upload chart: {0}")]
    Upload(String),
}
