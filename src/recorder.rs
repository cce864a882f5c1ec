//! Request recording.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// One request as observed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Request method, as received
    pub method: String,
    /// Request path, as received (no query string)
    pub path: String,
    /// Request headers, as delivered by the transport
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Parsed request body parts
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl RequestRecord {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(name.into(), content.into());
        self
    }
}

/// Append-only record of every request received, in receipt order.
#[derive(Debug, Default)]
pub struct RequestRecorder {
    records: Mutex<Vec<RequestRecord>>,
}

impl RequestRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: RequestRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// A copy of all records so far.
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
