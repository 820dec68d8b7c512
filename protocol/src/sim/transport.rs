//! In-process authority transport.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::authority::AuthorityService;
use crate::consensus::AuthorityTransport;
use crate::error::{BridgeError, BridgeResult};
use crate::rpc::Endpoint;

/// Routes each request to the service registered under its base URL.
/// URLs marked down answer with [`BridgeError::Unreachable`].
#[derive(Default)]
pub struct SimTransport {
    services: RwLock<BTreeMap<String, Arc<AuthorityService>>>,
    down: RwLock<BTreeSet<String>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, url: impl Into<String>, service: Arc<AuthorityService>) {
        self.services.write().insert(url.into(), service);
    }

    pub fn set_down(&self, url: &str, down: bool) {
        let mut set = self.down.write();
        if down {
            set.insert(url.to_string());
        } else {
            set.remove(url);
        }
    }
}

#[async_trait]
impl AuthorityTransport for SimTransport {
    async fn post(&self, url: &str, endpoint: Endpoint, body: Value) -> BridgeResult<Value> {
        let unreachable = |reason: &str| BridgeError::Unreachable {
            authority: url.to_string(),
            reason: reason.to_string(),
        };
        if self.down.read().contains(url) {
            return Err(unreachable("connection refused"));
        }
        let service = self
            .services
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| unreachable("no such host"))?;

        match service.handle(endpoint, body).await {
            Ok(envelope) => Ok(serde_json::to_value(envelope)?),
            Err(e) => Err(BridgeError::Remote {
                authority: url.to_string(),
                status: e.status_code(),
                message: format!("{}: {}", e.kind(), e),
            }),
        }
    }
}
