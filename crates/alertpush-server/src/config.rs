use alertpush_common::types::Secret;
use alertpush_notify::dingtalk::{self, DingtalkConfig};
use alertpush_notify::store::S3Config;
use alertpush_notify::wechat::{self, WechatConfig};
use alertpush_notify::NotifyError;
use alertpush_template::{Template, TemplateError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing name in receiver")]
    MissingName,

    #[error("receiver name {0:?} is not unique")]
    DuplicateReceiver(String),

    #[error("receiver {receiver:?}: no global {field} set")]
    MissingGlobal {
        receiver: String,
        field: &'static str,
    },

    #[error("failed to load templates: {0}")]
    Template(#[from] TemplateError),

    #[error("failed to build http client: {0}")]
    Client(#[from] NotifyError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Glob patterns of template files, loaded after the builtin templates.
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub global: GlobalConfig,
    /// Chart storage. Enrichment is off without it.
    #[serde(default)]
    pub s3: Option<S3Config>,
    #[serde(default)]
    pub receivers: Vec<Receiver>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Link used by templates when a webhook carries no `externalURL`.
    #[serde(default)]
    pub external_url: String,
    /// Points per chart.
    #[serde(default = "default_metric_resolution")]
    pub metric_resolution: u32,
    /// Prometheus base URL for chart queries. Enrichment is off without it.
    #[serde(default)]
    pub prometheus_url: Option<Url>,

    #[serde(default = "default_wechat_api_url")]
    pub wechat_api_url: Option<Url>,
    #[serde(default)]
    pub wechat_api_secret: Option<Secret>,
    #[serde(default)]
    pub wechat_api_corp_id: Option<Secret>,

    #[serde(default = "default_dingtalk_api_url")]
    pub dingtalk_api_url: Option<Url>,
    #[serde(default)]
    pub dingtalk_api_token: Option<Secret>,
    #[serde(default)]
    pub dingtalk_api_secret: Option<Secret>,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// TTF/OTF font for chart text. Enrichment is off without it.
    #[serde(default)]
    pub chart_font: Option<PathBuf>,
    /// Fail the webhook when a chart cannot be produced, instead of
    /// delivering the alert without it.
    #[serde(default)]
    pub abort_on_enrich_error: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            external_url: String::new(),
            metric_resolution: default_metric_resolution(),
            prometheus_url: None,
            wechat_api_url: default_wechat_api_url(),
            wechat_api_secret: None,
            wechat_api_corp_id: None,
            dingtalk_api_url: default_dingtalk_api_url(),
            dingtalk_api_token: None,
            dingtalk_api_secret: None,
            http_timeout_secs: default_http_timeout_secs(),
            chart_font: None,
            abort_on_enrich_error: false,
        }
    }
}

fn default_metric_resolution() -> u32 {
    100
}

fn default_wechat_api_url() -> Option<Url> {
    Url::parse(wechat::DEFAULT_API_URL).ok()
}

fn default_dingtalk_api_url() -> Option<Url> {
    Url::parse(dingtalk::DEFAULT_API_URL).ok()
}

fn default_http_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Receiver {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub dingtalk_config: Option<DingtalkConfig>,
    #[serde(default)]
    pub wechat_config: Option<WechatConfig>,
}

/// Fills `slot` from `global` when unset, failing when neither has a value.
fn inherit<T: Clone>(
    slot: &mut Option<T>,
    global: &Option<T>,
    receiver: &str,
    field: &'static str,
) -> Result<()> {
    if slot.is_none() {
        *slot = Some(global.clone().ok_or_else(|| ConfigError::MissingGlobal {
            receiver: receiver.to_string(),
            field,
        })?);
    }
    Ok(())
}

impl Config {
    /// Reads and validates the config file at `path`.
    ///
    /// Relative template globs are resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut config = Self::parse(&content)?;
        if let Some(dir) = path.parent() {
            config.resolve_template_paths(dir);
        }
        Ok(config)
    }

    /// Parses and validates a config document.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_template_paths(&mut self, base: &Path) {
        for pattern in &mut self.templates {
            if Path::new(pattern.as_str()).is_relative() {
                *pattern = base.join(pattern.as_str()).to_string_lossy().into_owned();
            }
        }
    }

    fn validate(&mut self) -> Result<()> {
        let mut names = HashSet::new();
        let global = &self.global;

        for rcv in &mut self.receivers {
            if rcv.name.is_empty() {
                return Err(ConfigError::MissingName);
            }
            if !names.insert(rcv.name.clone()) {
                return Err(ConfigError::DuplicateReceiver(rcv.name.clone()));
            }

            if let Some(wc) = rcv.wechat_config.as_mut() {
                inherit(&mut wc.api_url, &global.wechat_api_url, &rcv.name, "Wechat URL")?;
                inherit(&mut wc.api_secret, &global.wechat_api_secret, &rcv.name, "Wechat ApiSecret")?;
                inherit(&mut wc.corp_id, &global.wechat_api_corp_id, &rcv.name, "Wechat CorpID")?;
                if let Some(url) = wc.api_url.as_mut().filter(|u| !u.path().ends_with('/')) {
                    let path = format!("{}/", url.path());
                    url.set_path(&path);
                }
            }

            if let Some(dc) = rcv.dingtalk_config.as_mut() {
                inherit(&mut dc.api_url, &global.dingtalk_api_url, &rcv.name, "Dingtalk URL")?;
                inherit(&mut dc.api_token, &global.dingtalk_api_token, &rcv.name, "Dingtalk ApiToken")?;
                // Signing is optional for DingTalk robots.
                if dc.api_secret.is_none() {
                    dc.api_secret = global.dingtalk_api_secret.clone();
                }
            }
        }
        Ok(())
    }

    pub fn receiver(&self, name: &str) -> Option<&Receiver> {
        self.receivers.iter().find(|r| r.name == name)
    }

    pub fn receiver_names(&self) -> Vec<String> {
        self.receivers.iter().map(|r| r.name.clone()).collect()
    }

    /// Builds the template set named by `templates`.
    pub fn template(&self) -> Result<Template> {
        Ok(Template::from_globs(&self.templates)?.with_external_url(self.global.external_url.clone()))
    }
}
