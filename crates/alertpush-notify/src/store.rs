use crate::error::EnrichError;
use alertpush_common::types::Secret;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use serde::{Deserialize, Serialize};

/// Somewhere rendered charts can be published.
#[async_trait]
pub trait Store: Send + Sync {
    /// Stores `bytes` under `name` and returns a URL chat clients can fetch.
    async fn put(&self, bytes: Vec<u8>, name: &str, content_type: &str) -> Result<String, EnrichError>;
}

/// S3-compatible bucket settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    pub access_key: Secret,
    pub secret_key: Secret,
    /// Host (`oss-cn-beijing.aliyuncs.com`) or URL. A bare host is reached over HTTP.
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    pub bucket: String,
    /// Base of published URLs. Defaults to the bucket address.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Address the bucket as `{endpoint}/{bucket}` instead of `{bucket}.{endpoint}`.
    #[serde(default)]
    pub path_style: bool,
}

impl S3Config {
    fn endpoint_parts(&self) -> (&str, &str) {
        match self.endpoint.split_once("://") {
            Some((scheme, host)) => (scheme, host.trim_end_matches('/')),
            None => ("http", self.endpoint.trim_end_matches('/')),
        }
    }

    /// The URL requests are sent to.
    fn request_endpoint(&self) -> String {
        let (scheme, host) = self.endpoint_parts();
        if self.path_style {
            format!("{scheme}://{host}")
        } else {
            format!("{scheme}://{}.{host}", self.bucket)
        }
    }

    /// The base URL objects are published under.
    pub fn public_base(&self) -> String {
        if let Some(base) = self.public_url.as_deref().filter(|b| !b.is_empty()) {
            return base.trim_end_matches('/').to_string();
        }
        let (scheme, host) = self.endpoint_parts();
        if self.path_style {
            format!("{scheme}://{host}/{}", self.bucket)
        } else {
            format!("{scheme}://{}.{host}", self.bucket)
        }
    }
}

pub struct S3Store {
    store: AmazonS3,
    public_base: String,
}

impl S3Store {
    pub fn new(conf: &S3Config) -> Result<Self, EnrichError> {
        let store = AmazonS3Builder::new()
            .with_access_key_id(conf.access_key.expose())
            .with_secret_access_key(conf.secret_key.expose())
            .with_region(if conf.region.is_empty() { "us-east-1" } else { conf.region.as_str() })
            .with_bucket_name(&conf.bucket)
            .with_endpoint(conf.request_endpoint())
            .with_virtual_hosted_style_request(!conf.path_style)
            .with_allow_http(true)
            .build()
            .map_err(|e| EnrichError::Upload(e.to_string()))?;
        Ok(Self {
            store,
            public_base: conf.public_base(),
        })
    }
}

#[async_trait]
impl Store for S3Store {
    async fn put(&self, bytes: Vec<u8>, name: &str, content_type: &str) -> Result<String, EnrichError> {
        let location = Path::from(name);
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&location, PutPayload::from(Bytes::from(bytes)), opts)
            .await
            .map_err(|e| EnrichError::Upload(e.to_string()))?;

        let url = format!("{}/{}", self.public_base, location);
        tracing::debug!(url = %url, "Chart uploaded");
        Ok(url)
    }
}
