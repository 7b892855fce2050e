//! Transport seam.
//!
//! The engine is written against the [`Transport`] trait so the wire can be
//! scripted in tests; [`http::HttpTransport`] is the production
//! implementation. Token acquisition stays behind [`TokenProvider`].

pub mod http;

use crate::error::Result;
use crate::model::request::HttpMethod;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub use http::HttpTransport;

/// One outbound physical call.
#[derive(Debug, Clone)]
pub struct WireCall {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// The raw response of one physical call.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl WireResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Status and headers of a call whose body is consumed as a stream.
pub struct StreamedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: crate::ByteStream,
}

/// Generic HTTP(S) transport the executor drives. Implementations must
/// honor the cancellation token for in-flight calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, call: WireCall, cancel: &CancellationToken) -> Result<WireResponse>;

    /// Stream the response body instead of buffering it, for requests
    /// flagged streaming or binary. The default buffers through [`send`];
    /// transports with true streaming override it.
    ///
    /// [`send`]: Transport::send
    async fn send_streaming(
        &self,
        call: WireCall,
        cancel: &CancellationToken,
    ) -> Result<StreamedResponse> {
        let WireResponse {
            status,
            headers,
            body,
        } = self.send(call, cancel).await?;
        Ok(StreamedResponse {
            status,
            headers,
            body: Box::pin(futures::stream::once(async move { Ok(body) })),
        })
    }
}

/// Supplies bearer tokens per resource origin. Acquisition and caching are
/// the caller's concern.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, resource: &str) -> Result<String>;
}

/// Fixed-token provider for tests and pre-acquired credentials.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, _resource: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}
