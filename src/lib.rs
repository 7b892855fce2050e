//! # batchmux
//!
//! Request batching and multiplexing engine for three wire protocols of
//! one backend family: OData `multipart/mixed` REST batches, JSON-array
//! Graph batches, and legacy CSOM XML RPC batches.
//!
//! ## Overview
//!
//! Many independent logical operations (fetch/create/update/delete against
//! remote domain objects) are packed into as few physical network calls as
//! possible. The engine preserves strict positional/identity correlation
//! between logical requests and their results while handling per-protocol
//! size limits, per-protocol failure granularity, throttling retries, and
//! partial-failure semantics.
//!
//! ## Key pieces
//!
//! - **Unified entry point**: [`BatchExecutor`] drives a [`Batch`] to
//!   completion and hands back one [`BatchResult`] per request, in order.
//! - **Protocol splitting**: mixed batches collapse onto REST fallbacks
//!   when possible, otherwise partition by protocol, site, and size cap.
//! - **Retry/backoff**: throttled Graph sub-batches are re-sent with
//!   exponential, cancellable backoff until resolved or the budget runs out.
//! - **Reconciliation**: duplicate fetches merge, deletions propagate out
//!   of parent collections, pagination follow-ups run to quiescence.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use batchmux::{
//!     BatchExecutor, BatchRequest, EngineConfig, HttpTransport, Protocol,
//!     StaticTokenProvider, WireCallDescriptor,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> batchmux::Result<()> {
//!     let tokens = Arc::new(StaticTokenProvider::new("token"));
//!     let config = EngineConfig::default();
//!     let transport = Arc::new(HttpTransport::new(
//!         tokens,
//!         Duration::from_secs(30),
//!         &config.user_agent,
//!     )?);
//!     let executor = BatchExecutor::new(transport, config);
//!
//!     let batch = executor.new_batch();
//!     batch.add(BatchRequest::get(WireCallDescriptor::new(
//!         Protocol::Rest,
//!         "https://contoso.sharepoint.com/sites/hr/_api/web",
//!     )));
//!     let results = executor.execute(&batch).await?;
//!     assert_eq!(results.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`model`] | Batches, requests, wire descriptors, entity facade |
//! | [`splitter`] | Protocol / site / size partitioning |
//! | [`codec`] | REST, Graph, and CSOM wire codecs |
//! | [`executor`] | Orchestrator, retry policy, batch registry |
//! | [`reconcile`] | Duplicate merge, deletion propagation, paging |
//! | [`materialize`] | Descriptor-table materializer collaborator |
//! | [`transport`] | HTTP transport seam and token provider |
//! | [`config`] | Size caps and retry configuration |

pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod materialize;
pub mod model;
pub mod reconcile;
pub mod splitter;
pub mod transport;

// Re-export main types for convenience
pub use config::{EngineConfig, RetryConfig};
pub use error::{Error, Result, ServiceError};
pub use executor::registry::BatchRegistry;
pub use executor::retry::RetryPolicy;
pub use executor::BatchExecutor;
pub use materialize::{FieldMapMaterializer, Materializer};
pub use model::{
    Batch, BatchRequest, BatchResult, CallFlags, CallTarget, CsomOperation, DescriptorRegistry,
    Entity, EntityCollection, EntityDescriptor, EntityHandle, FieldDescriptor, HttpMethod,
    Protocol, ProtocolFamily, SharedRequest, WireCallDescriptor,
};
pub use transport::{
    HttpTransport, StaticTokenProvider, StreamedResponse, TokenProvider, Transport, WireCall,
    WireResponse,
};

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A pinned, boxed byte stream for streaming response bodies.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;
