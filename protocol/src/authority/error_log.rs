//! Bounded in-memory record of failed requests, served by `/log`.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::error;

use crate::error::BridgeError;
use crate::rpc::ErrorLogEntry;

pub struct ErrorLog {
    entries: Mutex<VecDeque<ErrorLogEntry>>,
    capacity: usize,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record one failure, evicting the oldest entry when full.
    pub fn record(&self, path: &str, request: &Value, err: &BridgeError) {
        error!(path, kind = err.kind(), error = %err, "request failed");
        if self.capacity == 0 {
            return;
        }
        let entry = ErrorLogEntry {
            timestamp: chrono::Utc::now(),
            path: path.to_string(),
            request: request.clone(),
            kind: err.kind().to_string(),
            error: err.to_string(),
        };
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<ErrorLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
