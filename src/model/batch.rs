//! Logical batches and their results.
//!
//! A [`Batch`] is a cheap cloneable handle over shared state, so transient
//! sub-batches created during execution alias the very same request objects
//! and every result write-back is visible to the caller's handle.

use crate::error::ServiceError;
use crate::model::descriptor::Protocol;
use crate::model::request::{BatchRequest, HttpMethod};
use bytes::Bytes;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Shared handle to one logical request. Splitters clone handles, never
/// requests, so attribution writes land in the original batch.
pub type SharedRequest = Arc<RwLock<BatchRequest>>;

/// Outcome of one logical request after its physical call resolved.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Correlation back to the originating request.
    pub request_id: Uuid,
    /// Stable position of the originating request in its batch.
    pub order: usize,
    pub protocol: Protocol,
    pub method: HttpMethod,
    pub url: String,
    /// Body the request carried, if any.
    pub request_body: Option<Value>,
    pub status: u16,
    pub error: Option<ServiceError>,
    /// Raw response payload, exclusively attributed to this request.
    pub payload: Bytes,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

struct BatchState {
    requests: Vec<SharedRequest>,
    executed: bool,
    throw_on_error: bool,
    raw: bool,
    results: Vec<BatchResult>,
}

/// A logical grouping of operations submitted together for combined
/// execution.
#[derive(Clone)]
pub struct Batch {
    id: Uuid,
    state: Arc<RwLock<BatchState>>,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Arc::new(RwLock::new(BatchState {
                requests: Vec::new(),
                executed: false,
                throw_on_error: false,
                raw: false,
                results: Vec::new(),
            })),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Append a request, assigning its stable order index. Returns the
    /// shared handle under which the request is tracked.
    pub fn add(&self, mut request: BatchRequest) -> SharedRequest {
        let mut state = self.state.write().expect("batch lock poisoned");
        request.set_order(state.requests.len());
        let shared: SharedRequest = Arc::new(RwLock::new(request));
        state.requests.push(Arc::clone(&shared));
        shared
    }

    pub fn requests(&self) -> Vec<SharedRequest> {
        self.state
            .read()
            .expect("batch lock poisoned")
            .requests
            .clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("batch lock poisoned").requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn executed(&self) -> bool {
        self.state.read().expect("batch lock poisoned").executed
    }

    pub(crate) fn mark_executed(&self) {
        self.state.write().expect("batch lock poisoned").executed = true;
    }

    pub fn throw_on_error(&self) -> bool {
        self.state.read().expect("batch lock poisoned").throw_on_error
    }

    pub fn set_throw_on_error(&self, throw: bool) -> &Self {
        self.state.write().expect("batch lock poisoned").throw_on_error = throw;
        self
    }

    /// Raw mode: execute and attribute results, skip reconciliation and
    /// materialization.
    pub fn raw(&self) -> bool {
        self.state.read().expect("batch lock poisoned").raw
    }

    pub fn set_raw(&self, raw: bool) -> &Self {
        self.state.write().expect("batch lock poisoned").raw = raw;
        self
    }

    pub fn results(&self) -> Vec<BatchResult> {
        self.state
            .read()
            .expect("batch lock poisoned")
            .results
            .clone()
    }

    pub(crate) fn store_results(&self, results: Vec<BatchResult>) {
        self.state.write().expect("batch lock poisoned").results = results;
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("executed", &self.executed())
            .finish()
    }
}
