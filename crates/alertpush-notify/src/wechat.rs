use crate::error::{NotifyError, Result};
use crate::utils::decode_response;
use crate::Notifier;
use alertpush_common::types::{Data, Secret};
use alertpush_template::{Mode, Renderer, Template};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://qyapi.weixin.qq.com/cgi-bin/";

/// Tokens are refreshed after this long even without an expiry error.
pub const TOKEN_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Response code for an expired access token.
const CODE_TOKEN_EXPIRED: i64 = 42001;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WechatMessageType {
    #[default]
    Text,
    Markdown,
    TemplateCard,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WechatTemplateCard {
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "desc")]
    pub description: String,
    #[serde(default)]
    pub image_url: String,
}

fn default_message() -> String {
    "{{> wechat_default_message}}".to_string()
}

fn default_to_user() -> String {
    "{{> wechat_default_to_user}}".to_string()
}

fn default_to_party() -> String {
    "{{> wechat_default_to_party}}".to_string()
}

fn default_to_tag() -> String {
    "{{> wechat_default_to_tag}}".to_string()
}

fn default_agent_id() -> String {
    "{{> wechat_default_agent_id}}".to_string()
}

/// A WeChat Work application channel.
///
/// `api_url`, `api_secret` and `corp_id` fall back to the `[global]` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WechatConfig {
    pub api_url: Option<Url>,
    pub api_secret: Option<Secret>,
    pub corp_id: Option<Secret>,
    #[serde(default)]
    pub message_type: WechatMessageType,
    #[serde(default = "default_message")]
    pub message: String,
    pub template_card: Option<WechatTemplateCard>,
    #[serde(default = "default_to_user")]
    pub to_user: String,
    #[serde(default = "default_to_party")]
    pub to_party: String,
    #[serde(default = "default_to_tag")]
    pub to_tag: String,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
}

impl Default for WechatConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_secret: None,
            corp_id: None,
            message_type: WechatMessageType::default(),
            message: default_message(),
            template_card: None,
            to_user: default_to_user(),
            to_party: default_to_party(),
            to_tag: default_to_tag(),
            agent_id: default_agent_id(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WechatMessage {
    touser: String,
    toparty: String,
    totag: String,
    agentid: String,
    safe: &'static str,
    msgtype: WechatMessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    markdown: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_card: Option<TemplateCardBody>,
}

#[derive(Debug, Serialize)]
struct Content {
    content: String,
}

#[derive(Debug, Serialize)]
struct TemplateCardBody {
    card_type: &'static str,
    main_title: MainTitle,
    image_text_area: ImageTextArea,
}

#[derive(Debug, Serialize)]
struct MainTitle {
    title: String,
    desc: String,
}

#[derive(Debug, Serialize)]
struct ImageTextArea {
    #[serde(rename = "type")]
    kind: u8,
    url: String,
    title: String,
    desc: String,
    image_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct WechatResponse {
    #[serde(default, alias = "code")]
    errcode: i64,
    #[serde(default, alias = "error")]
    errmsg: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    fetched_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < TOKEN_TTL
    }
}

pub struct WechatNotifier {
    conf: WechatConfig,
    api_url: Url,
    api_secret: Secret,
    corp_id: Secret,
    template: Arc<Template>,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl WechatNotifier {
    pub fn new(conf: WechatConfig, template: Arc<Template>, client: reqwest::Client) -> Result<Self> {
        let mut api_url = conf
            .api_url
            .clone()
            .ok_or_else(|| NotifyError::InvalidConfig("wechat api_url is missing".to_string()))?;
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }
        let api_secret = conf
            .api_secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| NotifyError::InvalidConfig("wechat api_secret is missing".to_string()))?;
        let corp_id = conf
            .corp_id
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| NotifyError::InvalidConfig("wechat corp_id is missing".to_string()))?;
        Ok(Self {
            conf,
            api_url,
            api_secret,
            corp_id,
            template,
            client,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        self.api_url
            .join(name)
            .map_err(|e| NotifyError::InvalidConfig(format!("wechat api_url: {e}")))
    }

    /// Returns a cached token, fetching a new one when none is cached or the
    /// cached one is older than [`TOKEN_TTL`]. The lock is held across the
    /// fetch, so concurrent callers wait for one refresh.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let mut url = self.endpoint("gettoken")?;
        url.query_pairs_mut()
            .append_pair("corpid", self.corp_id.expose())
            .append_pair("corpsecret", self.api_secret.expose());

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(NotifyError::transport)?;
        let body: TokenResponse = decode_response("wechat", resp).await?;
        if body.access_token.is_empty() {
            return Err(NotifyError::Token(
                "no access token returned, check api_secret and corp_id".to_string(),
            ));
        }

        tracing::debug!("WeChat Work access token refreshed");
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            fetched_at: Instant::now(),
        });
        Ok(body.access_token)
    }

    /// Drops the cached token if it is still the one that was rejected.
    async fn invalidate(&self, rejected: &str) {
        let mut cached = self.token.lock().await;
        if cached.as_ref().is_some_and(|t| t.value == rejected) {
            *cached = None;
        }
    }

    fn build_message(&self, r: &Renderer<'_>) -> Result<WechatMessage> {
        let mut msg = WechatMessage {
            touser: r.render(&self.conf.to_user)?,
            toparty: r.render(&self.conf.to_party)?,
            totag: r.render(&self.conf.to_tag)?,
            agentid: r.render(&self.conf.agent_id)?,
            safe: "0",
            msgtype: self.conf.message_type,
            text: None,
            markdown: None,
            template_card: None,
        };
        match self.conf.message_type {
            WechatMessageType::Text => {
                msg.text = Some(Content {
                    content: r.render(&self.conf.message)?,
                });
            }
            WechatMessageType::Markdown => {
                msg.markdown = Some(Content {
                    content: r.render(&self.conf.message)?,
                });
            }
            WechatMessageType::TemplateCard => {
                let card = self.conf.template_card.clone().unwrap_or_default();
                let title = r.render(&card.title)?;
                let desc = r.render(&card.description)?;
                msg.template_card = Some(TemplateCardBody {
                    card_type: "news_notice",
                    main_title: MainTitle {
                        title: title.clone(),
                        desc: desc.clone(),
                    },
                    image_text_area: ImageTextArea {
                        kind: 1,
                        url: self.template.external_url().to_string(),
                        title,
                        desc,
                        image_url: r.render(&card.image_url)?,
                    },
                });
            }
        }
        Ok(msg)
    }
}

#[async_trait]
impl Notifier for WechatNotifier {
    async fn notify(&self, data: &Data) -> Result<()> {
        let renderer = self.template.renderer(Mode::Text, data)?;
        let msg = self.build_message(&renderer)?;
        let token = self.access_token().await?;

        let mut url = self.endpoint("message/send")?;
        url.query_pairs_mut().append_pair("access_token", &token);

        let resp = self
            .client
            .post(url)
            .json(&msg)
            .send()
            .await
            .map_err(NotifyError::transport)?;
        let body: WechatResponse = decode_response("wechat", resp).await?;

        match body.errcode {
            0 => {
                tracing::debug!(receiver = %data.receiver, "WeChat Work notification sent");
                Ok(())
            }
            CODE_TOKEN_EXPIRED => {
                self.invalidate(&token).await;
                Err(NotifyError::Api {
                    service: "wechat",
                    code: body.errcode,
                    message: body.errmsg,
                    retryable: true,
                })
            }
            code => Err(NotifyError::Api {
                service: "wechat",
                code,
                message: body.errmsg,
                retryable: false,
            }),
        }
    }

    fn channel_name(&self) -> &str {
        "wechat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn data() -> Data {
        serde_json::from_value(json!({
            "receiver": "ops",
            "status": "firing",
            "alerts": [{"status": "firing", "labels": {"alertname": "DiskFull"}}],
            "commonLabels": {"alertname": "DiskFull"}
        }))
        .unwrap()
    }

    fn notifier(server: &MockServer, conf: WechatConfig) -> WechatNotifier {
        let conf = WechatConfig {
            // No trailing slash: the notifier adds it.
            api_url: Some(Url::parse(&format!("{}/cgi-bin", server.uri())).unwrap()),
            api_secret: Some(Secret::from("s3cr3t")),
            corp_id: Some(Secret::from("corp")),
            ..conf
        };
        let template = Arc::new(
            Template::from_globs::<&str>(&[])
                .unwrap()
                .with_external_url("http://alertpush.example"),
        );
        WechatNotifier::new(conf, template, reqwest::Client::new()).unwrap()
    }

    async fn mount_token(server: &MockServer, expected: u64) {
        Mock::given(method("GET"))
            .and(path("/cgi-bin/gettoken"))
            .and(query_param("corpid", "corp"))
            .and(query_param("corpsecret", "s3cr3t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-1"})))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn token_is_fetched_once_and_reused() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/send"))
            .and(query_param("access_token", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "errmsg": "ok"})))
            .expect(2)
            .mount(&server)
            .await;

        let n = notifier(&server, WechatConfig::default());
        n.notify(&data()).await.unwrap();
        n.notify(&data()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_share_one_token_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/gettoken"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok-1"}))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/send"))
            .and(query_param("access_token", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "errmsg": "ok"})))
            .expect(8)
            .mount(&server)
            .await;

        let n = Arc::new(notifier(&server, WechatConfig::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let n = n.clone();
                tokio::spawn(async move { n.notify(&data()).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let fetches = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/cgi-bin/gettoken")
            .count();
        assert_eq!(fetches, 1);
    }

    #[tokio::test]
    async fn failed_token_fetch_is_retried_on_next_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/gettoken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 40013})))
            .expect(2)
            .mount(&server)
            .await;

        let n = notifier(&server, WechatConfig::default());
        for _ in 0..2 {
            let err = n.notify(&data()).await.unwrap_err();
            assert!(matches!(err, NotifyError::Token(_)));
        }
    }

    #[tokio::test]
    async fn expired_token_is_cleared_and_refetched() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/send"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"errcode": 42001, "errmsg": "access_token expired"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0})))
            .mount(&server)
            .await;

        let n = notifier(&server, WechatConfig::default());
        let err = n.notify(&data()).await.unwrap_err();
        assert!(err.is_retryable());
        n.notify(&data()).await.unwrap();
    }

    #[tokio::test]
    async fn other_error_codes_are_not_retryable_and_keep_the_token() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 60020, "error": "not allow to access from your ip"})))
            .mount(&server)
            .await;

        let n = notifier(&server, WechatConfig::default());
        for _ in 0..2 {
            let err = n.notify(&data()).await.unwrap_err();
            assert!(!err.is_retryable());
            assert!(err.to_string().contains("60020"));
        }
    }

    #[tokio::test]
    async fn message_body_follows_message_type() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0})))
            .mount(&server)
            .await;

        let conf = WechatConfig {
            message_type: WechatMessageType::TemplateCard,
            template_card: Some(WechatTemplateCard {
                title: "{{commonLabels.alertname}}".into(),
                description: "{{status}}".into(),
                image_url: String::new(),
            }),
            agent_id: "1000002".into(),
            ..Default::default()
        };
        notifier(&server, conf).notify(&data()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let send = requests
            .iter()
            .find(|r| r.url.path().ends_with("message/send"))
            .unwrap();
        let body: serde_json::Value = send.body_json().unwrap();
        assert_eq!(body["msgtype"], "template_card");
        assert_eq!(body["touser"], "@all");
        assert_eq!(body["agentid"], "1000002");
        assert_eq!(body["safe"], "0");
        assert_eq!(body["template_card"]["card_type"], "news_notice");
        assert_eq!(body["template_card"]["main_title"]["title"], "DiskFull");
        assert_eq!(body["template_card"]["image_text_area"]["url"], "http://alertpush.example");
        assert!(body.get("text").is_none());
    }
}
