//! Helpers shared by the DingTalk and WeChat clients.

use crate::error::{NotifyError, Result};
use rand::RngCore;
use serde::de::DeserializeOwned;

/// Bytes of an API reply kept in debug logs.
pub const MAX_LOGGED_REPLY: usize = 4000;

/// Shortens `s` to `max_len` bytes, backing off to a char boundary.
pub fn clip(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let cut = (0..=max_len).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0);
    format!("{}... [truncated]", &s[..cut])
}

/// Lowercase hex of `n` random bytes, used for object names.
pub fn random_hex(n: usize) -> String {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// Rejects non-200 replies, then decodes the JSON body as `T`.
pub(crate) async fn decode_response<T: DeserializeOwned>(
    service: &'static str,
    resp: reqwest::Response,
) -> Result<T> {
    match resp.status() {
        reqwest::StatusCode::OK => {}
        other => return Err(NotifyError::Status(other.as_u16())),
    }

    let text = resp.text().await.map_err(NotifyError::transport)?;
    tracing::debug!(service, reply = %clip(&text, MAX_LOGGED_REPLY), "api reply");
    serde_json::from_str(&text).map_err(|e| NotifyError::InvalidResponse(e.to_string()))
}
