//! # JSON-RPC Client Plumbing
//!
//! Request/response envelopes and a small reqwest-based caller shared by
//! the ledger daemon client and the contract indexer client. Both backends
//! speak JSON-RPC over HTTP POST; they differ only in version string,
//! method names, and authentication.
//!
//! The ledger daemon answers failed calls with a non-2xx status *and* a
//! regular JSON-RPC error body, so the body is parsed whatever the status.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A JSON-RPC request. `M` is the backend's method enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest<M> {
    pub jsonrpc: String,
    /// Echoed back in the response.
    pub id: Value,
    pub method: M,
    #[serde(default)]
    pub params: Value,
}

impl<M> RpcRequest<M> {
    pub fn new(version: &str, id: Value, method: M, params: Value) -> Self {
        Self {
            jsonrpc: version.to_string(),
            id,
            method,
            params,
        }
    }
}

/// Exactly one of `result` or `error` is meaningful. The ledger daemon
/// always sends both keys, with the unused one `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// The result, or the backend's error.
    pub fn into_result(self) -> Result<Value, CallError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(CallError::Rpc(error)),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CallError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    #[error("HTTP {status} without a JSON-RPC body")]
    Status { status: u16 },

    #[error("cannot decode result of {method}: {reason}")]
    Decode { method: String, reason: String },
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Basic-auth credentials. Empty user means no authentication.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    version: &'static str,
    credentials: Credentials,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(
        url: impl Into<String>,
        version: &'static str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, CallError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            version,
            credentials,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Invoke `method` and decode its result as `T`.
    pub async fn call<M, T>(&self, method: M, params: Value) -> Result<T, CallError>
    where
        M: Serialize + std::fmt::Debug,
        T: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method_name = format!("{method:?}");
        let request = RpcRequest::new(self.version, Value::from(id), method, params);

        let mut builder = self.http.post(&self.url).json(&request);
        if !self.credentials.username.is_empty() {
            builder = builder.basic_auth(&self.credentials.username, Some(&self.credentials.password));
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let decoded: RpcResponse = match serde_json::from_slice(&body) {
            Ok(decoded) => decoded,
            Err(_) if !status.is_success() => {
                return Err(CallError::Status {
                    status: status.as_u16(),
                })
            }
            Err(e) => {
                return Err(CallError::Decode {
                    method: method_name,
                    reason: e.to_string(),
                })
            }
        };
        let result = decoded.into_result()?;
        tracing::trace!(method = %method_name, id, "json-rpc call returned");
        serde_json::from_value(result).map_err(|e| CallError::Decode {
            method: method_name,
            reason: e.to_string(),
        })
    }
}
