//! reqwest-backed [`AuthorityTransport`].
//!
//! Anything that prevents a reply from arriving (connect failure, timeout,
//! unreadable body) is [`BridgeError::Unreachable`]. An error status is
//! [`BridgeError::Remote`] carrying the authority's own error message.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use wgenix_protocol::consensus::AuthorityTransport;
use wgenix_protocol::rpc::{Endpoint, ErrorResponse};
use wgenix_protocol::{BridgeError, BridgeResult};

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::InvalidInput(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn remote_message(status: u16, body: &[u8]) -> String {
    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(error) => format!("{}: {}", error.kind, error.error),
        Err(_) if body.is_empty() => format!("HTTP {status}"),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

#[async_trait]
impl AuthorityTransport for HttpTransport {
    async fn post(&self, url: &str, endpoint: Endpoint, body: Value) -> BridgeResult<Value> {
        let unreachable = |reason: String| BridgeError::Unreachable {
            authority: url.to_string(),
            reason,
        };

        let target = format!("{}{}", url.trim_end_matches('/'), endpoint.path());
        let response = self
            .client
            .post(&target)
            .json(&body)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| unreachable(e.to_string()))?;

        if !status.is_success() {
            return Err(BridgeError::Remote {
                authority: url.to_string(),
                status: status.as_u16(),
                message: remote_message(status.as_u16(), &bytes),
            });
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| BridgeError::InvalidPayload(format!("reply from {url}: {e}")))
    }
}
