use crate::error::{NotifyError, Result};
use crate::utils::decode_response;
use crate::Notifier;
use alertpush_common::types::{Data, Secret};
use alertpush_template::{Mode, Template};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_API_URL: &str = "https://oapi.dingtalk.com/robot/send";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DingtalkMessageType {
    Text,
    #[default]
    Markdown,
}

fn default_title() -> String {
    "{{> dingtalk_default_title}}".to_string()
}

fn default_content() -> String {
    "{{> dingtalk_default_content}}".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DingtalkText {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_content")]
    pub content: String,
}

impl Default for DingtalkText {
    fn default() -> Self {
        Self {
            title: default_title(),
            content: default_content(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DingtalkMarkdown {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_content")]
    pub text: String,
}

impl Default for DingtalkMarkdown {
    fn default() -> Self {
        Self {
            title: default_title(),
            text: default_content(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DingtalkAt {
    #[serde(default, rename = "atMobiles", alias = "at_mobiles")]
    pub at_mobiles: Vec<String>,
    #[serde(default, rename = "isAtAll", alias = "is_at_all")]
    pub is_at_all: bool,
}

/// A DingTalk robot channel.
///
/// `api_url`, `api_token` and `api_secret` fall back to the `[global]`
/// values when omitted; configuration loading fills them in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DingtalkConfig {
    pub api_url: Option<Url>,
    pub api_token: Option<Secret>,
    pub api_secret: Option<Secret>,
    #[serde(default)]
    pub message_type: DingtalkMessageType,
    #[serde(default)]
    pub text: DingtalkText,
    #[serde(default)]
    pub markdown: DingtalkMarkdown,
    pub at: Option<DingtalkAt>,
}

/// Computes the robot signature: `base64(HMAC-SHA256(secret, "{timestamp}\n{secret}"))`.
pub fn sign(secret: &str, timestamp_ms: i64) -> Result<String> {
    let string_to_sign = format!("{timestamp_ms}\n{secret}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::InvalidConfig(format!("signing key: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Serialize)]
struct DingtalkMessage<'a> {
    msgtype: DingtalkMessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    markdown: Option<MarkdownBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    at: Option<&'a DingtalkAt>,
}

#[derive(Debug, Serialize)]
struct TextBody {
    title: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct MarkdownBody {
    title: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct DingtalkResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

pub struct DingtalkNotifier {
    conf: DingtalkConfig,
    api_url: Url,
    api_token: Secret,
    template: Arc<Template>,
    client: reqwest::Client,
}

impl DingtalkNotifier {
    pub fn new(conf: DingtalkConfig, template: Arc<Template>, client: reqwest::Client) -> Result<Self> {
        let api_url = conf
            .api_url
            .clone()
            .ok_or_else(|| NotifyError::InvalidConfig("dingtalk api_url is missing".to_string()))?;
        let api_token = conf
            .api_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| NotifyError::InvalidConfig("dingtalk api_token is missing".to_string()))?;
        Ok(Self {
            conf,
            api_url,
            api_token,
            template,
            client,
        })
    }

    fn build_message(&self, data: &Data) -> Result<DingtalkMessage<'_>> {
        let r = self.template.renderer(Mode::Text, data)?;
        let mut msg = DingtalkMessage {
            msgtype: self.conf.message_type,
            text: None,
            markdown: None,
            at: self.conf.at.as_ref(),
        };
        match self.conf.message_type {
            DingtalkMessageType::Markdown => {
                msg.markdown = Some(MarkdownBody {
                    title: r.render(&self.conf.markdown.title)?,
                    text: r.render(&self.conf.markdown.text)?,
                });
            }
            DingtalkMessageType::Text => {
                msg.text = Some(TextBody {
                    title: r.render(&self.conf.text.title)?,
                    content: r.render(&self.conf.text.content)?,
                });
            }
        }
        Ok(msg)
    }

    /// The send URL with the access token and, when a secret is set, the signature.
    fn signed_url(&self, timestamp_ms: i64) -> Result<Url> {
        let mut url = self.api_url.clone();
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("access_token", self.api_token.expose());
            if let Some(secret) = self.conf.api_secret.as_ref().filter(|s| !s.is_empty()) {
                q.append_pair("timestamp", &timestamp_ms.to_string());
                q.append_pair("sign", &sign(secret.expose(), timestamp_ms)?);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Notifier for DingtalkNotifier {
    async fn notify(&self, data: &Data) -> Result<()> {
        let msg = self.build_message(data)?;
        let url = self.signed_url(chrono::Utc::now().timestamp_millis())?;

        let resp = self
            .client
            .post(url)
            .json(&msg)
            .send()
            .await
            .map_err(NotifyError::transport)?;
        let body: DingtalkResponse = decode_response("dingtalk", resp).await?;

        if body.errcode != 0 {
            return Err(NotifyError::Api {
                service: "dingtalk",
                code: body.errcode,
                message: body.errmsg,
                retryable: false,
            });
        }
        tracing::debug!(receiver = %data.receiver, "DingTalk notification sent");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "dingtalk"
    }
}
