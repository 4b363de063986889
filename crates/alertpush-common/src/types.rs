use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The label that names an alerting rule. Always sorted first.
pub const ALERT_NAME_LABEL: &str = "alertname";

/// Alert lifecycle state as reported by Alertmanager.
///
/// # Examples
///
/// ```
/// use alertpush_common::types::Status;
///
/// let status: Status = serde_json::from_str("\"resolved\"").unwrap();
/// assert_eq!(status, Status::Resolved);
/// assert_eq!(status.to_string(), "resolved");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Firing,
    Resolved,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Firing => write!(f, "firing"),
            Status::Resolved => write!(f, "resolved"),
        }
    }
}

/// A key/value string pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pair {
    pub name: String,
    pub value: String,
}

/// An ordered list of key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Pairs(pub Vec<Pair>);

impl Pairs {
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|p| p.name.clone()).collect()
    }

    pub fn values(&self) -> Vec<String> {
        self.0.iter().map(|p| p.value.clone()).collect()
    }
}

impl IntoIterator for Pairs {
    type Item = Pair;
    type IntoIter = std::vec::IntoIter<Pair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A set of label or annotation key/value pairs.
///
/// # Examples
///
/// ```
/// use alertpush_common::types::KV;
///
/// let kv = KV::from_iter([("zone", "b"), ("alertname", "HighCPU"), ("app", "api")]);
/// assert_eq!(kv.names(), vec!["alertname", "app", "zone"]);
/// assert_eq!(kv.remove(&["zone"]).values(), vec!["HighCPU", "api"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KV(pub BTreeMap<String, String>);

impl KV {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Returns the pairs sorted by name, with the alert name label first.
    pub fn sorted_pairs(&self) -> Pairs {
        let mut pairs = Vec::with_capacity(self.0.len());
        if let Some(value) = self.0.get(ALERT_NAME_LABEL) {
            pairs.push(Pair {
                name: ALERT_NAME_LABEL.to_string(),
                value: value.clone(),
            });
        }
        // BTreeMap iteration is already lexicographic.
        pairs.extend(
            self.0
                .iter()
                .filter(|(k, _)| k.as_str() != ALERT_NAME_LABEL)
                .map(|(k, v)| Pair {
                    name: k.clone(),
                    value: v.clone(),
                }),
        );
        Pairs(pairs)
    }

    /// Returns a copy without the given keys.
    pub fn remove<S: AsRef<str>>(&self, keys: &[S]) -> KV {
        KV(self
            .0
            .iter()
            .filter(|(k, _)| !keys.iter().any(|r| r.as_ref() == k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    pub fn names(&self) -> Vec<String> {
        self.sorted_pairs().names()
    }

    pub fn values(&self) -> Vec<String> {
        self.sorted_pairs().values()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KV {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        KV(iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect())
    }
}

/// A chart attached to an alert during enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertImage {
    pub url: String,
    /// Rendered threshold expression, e.g. `cpu > 90.00`.
    pub title: String,
}

/// One alert of a webhook notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub labels: KV,
    #[serde(default)]
    pub annotations: KV,
    #[serde(default)]
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: DateTime<Utc>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: String,
    #[serde(default)]
    pub fingerprint: String,
    /// Charts appended by the enricher; never part of an inbound payload.
    #[serde(default)]
    pub images: Vec<AlertImage>,
}

/// A list of alerts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Alerts(pub Vec<Alert>);

impl Alerts {
    pub fn firing(&self) -> Vec<&Alert> {
        self.0.iter().filter(|a| a.status == Status::Firing).collect()
    }

    pub fn resolved(&self) -> Vec<&Alert> {
        self.0
            .iter()
            .filter(|a| a.status == Status::Resolved)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Alert> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Alert> {
        self.0.iter_mut()
    }
}

/// The webhook payload, and the context every notification template renders against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub alerts: Alerts,
    #[serde(default)]
    pub group_labels: KV,
    #[serde(default)]
    pub common_labels: KV,
    #[serde(default)]
    pub common_annotations: KV,
    #[serde(default, rename = "externalURL")]
    pub external_url: String,
}

/// A credential that never leaves the process through serialization.
///
/// # Examples
///
/// ```
/// use alertpush_common::types::Secret;
///
/// let s = Secret::from("hunter2");
/// assert_eq!(s.expose(), "hunter2");
/// assert_eq!(serde_json::to_string(&s).unwrap(), "\"<secret>\"");
/// ```
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Serialize for Secret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("<secret>")
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}
