//! Wire codecs.
//!
//! One codec per protocol. Encoding turns a physical sub-batch into the
//! bytes of a single wire call; decoding attributes the physical response
//! back to the sub-batch's requests: positionally for REST, by 1-based id
//! for Graph, and through next-action-id markers for CSOM.

pub mod csom;
pub mod graph;
pub mod rest;

use crate::model::request::HttpMethod;
use bytes::Bytes;

/// A fully encoded physical call, ready for the transport.
#[derive(Debug, Clone)]
pub struct EncodedCall {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Decoder verdict for a physical call on the Graph path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Every sub-request resolved (successfully or with a recorded error).
    Complete,
    /// At least one sub-request hit a retryable status and is still
    /// flagged for execution; the physical sub-batch must be re-sent.
    RetryNeeded,
}
