//! Stub registry.
//!
//! Holds the live queue of responses. Matching scans the queue in insertion
//! order and removes the first response that matches, so every queued
//! response answers exactly one request.

use crate::error::ServerError;
use crate::response::{Pattern, ResponseSpec};
use bytes::Bytes;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A queued response and the builder-only state that shapes it.
#[derive(Debug, Default)]
struct QueuedResponse {
    spec: ResponseSpec,
    content_length: Option<u64>,
}

impl QueuedResponse {
    /// The response as it will be served.
    fn resolved(&self) -> ResponseSpec {
        let mut spec = self.spec.clone();
        if let Some(length) = self.content_length {
            if let Ok(length) = usize::try_from(length) {
                if length < spec.content.len() {
                    spec.content = spec.content.slice(..length);
                }
            }
        }
        spec
    }
}

type Slot = Arc<Mutex<QueuedResponse>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The live, ordered queue of single-use responses.
#[derive(Debug, Default)]
pub struct StubRegistry {
    queue: Mutex<Vec<Slot>>,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a default response to the end of the queue and return a
    /// builder for it.
    pub fn add(&self) -> ResponseBuilder {
        let slot = Slot::default();
        let mut queue = lock(&self.queue);
        queue.push(Arc::clone(&slot));
        debug!(queued = queue.len(), "Response added");
        ResponseBuilder { slot }
    }

    /// Append an already-built response to the end of the queue.
    pub fn push(&self, spec: ResponseSpec) {
        let slot = Arc::new(Mutex::new(QueuedResponse {
            spec,
            content_length: None,
        }));
        lock(&self.queue).push(slot);
    }

    /// A copy of the queued responses, in insertion order.
    pub fn snapshot(&self) -> Vec<ResponseSpec> {
        lock(&self.queue)
            .iter()
            .map(|slot| lock(slot).resolved())
            .collect()
    }

    /// Number of responses still queued.
    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find, remove and return the first queued response matching the
    /// request. The scan and the removal happen under one lock, so two
    /// concurrent requests can never both receive the same response.
    pub fn take_match(&self, method: &str, path: &str) -> Option<ResponseSpec> {
        let mut queue = lock(&self.queue);
        let index = queue
            .iter()
            .position(|slot| lock(slot).spec.matches(method, path))?;
        let slot = queue.remove(index);
        drop(queue);

        let spec = lock(&slot).resolved();
        Some(spec)
    }
}

/// Fluent handle for configuring a queued response.
///
/// The response is already in the queue when the builder is handed out, and
/// it keeps taking effect until a request consumes it.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    slot: Slot,
}

impl ResponseBuilder {
    fn update(&self, f: impl FnOnce(&mut QueuedResponse)) -> &Self {
        f(&mut lock(&self.slot));
        self
    }

    /// Match methods against a case-insensitive regular expression.
    pub fn for_method(&self, pattern: &str) -> Result<&Self, ServerError> {
        let pattern = Pattern::case_insensitive(pattern)?;
        Ok(self.update(|r| r.spec.method = pattern))
    }

    /// Match paths against a regular expression. The expression is anchored
    /// at the start of the path as if it began with `^`.
    pub fn for_path(&self, pattern: &str) -> Result<&Self, ServerError> {
        let pattern = Pattern::new(&format!("^{}", pattern))?;
        Ok(self.update(|r| r.spec.path = pattern))
    }

    pub fn with_status(&self, code: u16) -> &Self {
        self.update(|r| r.spec.status = code)
    }

    /// Add a header. Names are stored in lower case.
    pub fn with_header(&self, name: &str, value: &str) -> &Self {
        self.update(|r| r.spec.set_header(name, value))
    }

    pub fn with_content_type(&self, content_type: &str) -> &Self {
        self.with_header("Content-Type", content_type)
    }

    /// Limit the served content to `size` bytes.
    pub fn with_content_length(&self, size: u64) -> &Self {
        self.update(|r| r.content_length = Some(size))
    }

    /// Serve the given bytes.
    pub fn with_fixed_data(&self, data: impl Into<Bytes>) -> &Self {
        let data = data.into();
        let length = data.len() as u64;
        self.update(|r| {
            r.spec.content = data;
            r.content_length = Some(length);
        })
    }

    /// Serve the given text, encoded as UTF-8.
    pub fn with_fixed_text(&self, text: &str) -> &Self {
        self.with_fixed_data(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Serve everything the reader produces. The reader is drained now.
    pub fn with_data<R: Read>(&self, mut data: R) -> Result<&Self, ServerError> {
        let mut content = Vec::new();
        data.read_to_end(&mut content)?;
        Ok(self.update(|r| r.spec.content = Bytes::from(content)))
    }

    /// The response as currently configured.
    pub fn spec(&self) -> ResponseSpec {
        lock(&self.slot).resolved()
    }
}
