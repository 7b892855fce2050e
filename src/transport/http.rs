//! Production HTTP transport on reqwest.

use super::{StreamedResponse, TokenProvider, Transport, WireCall, WireResponse};
use crate::error::{Error, Result};
use crate::model::request::HttpMethod;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

pub struct HttpTransport {
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpTransport {
    pub fn new(tokens: Arc<dyn TokenProvider>, timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()?;
        Ok(Self { client, tokens })
    }

    /// Token scope for a call: the URL origin, so per-site and tenant-wide
    /// endpoints each get the token minted for their resource.
    fn resource_for(url: &str) -> String {
        Url::parse(url)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|_| url.to_string())
    }

    fn method_for(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    fn header_map(response: &reqwest::Response) -> HashMap<String, String> {
        response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect()
    }

    async fn dispatch(&self, call: &WireCall, cancel: &CancellationToken) -> Result<reqwest::Response> {
        let token = self
            .tokens
            .access_token(&Self::resource_for(&call.url))
            .await?;

        let mut request = self
            .client
            .request(Self::method_for(call.method), &call.url)
            .bearer_auth(token);
        for (name, value) in &call.headers {
            request = request.header(name, value);
        }
        if !call.body.is_empty() {
            request = request.body(call.body.clone());
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            resp = request.send() => Ok(resp?),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, call: WireCall, cancel: &CancellationToken) -> Result<WireResponse> {
        let response = self.dispatch(&call, cancel).await?;
        let status = response.status().as_u16();
        let headers = Self::header_map(&response);

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            body = response.bytes() => body?,
        };

        Ok(WireResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_streaming(
        &self,
        call: WireCall,
        cancel: &CancellationToken,
    ) -> Result<StreamedResponse> {
        let response = self.dispatch(&call, cancel).await?;
        let status = response.status().as_u16();
        let headers = Self::header_map(&response);
        let body: crate::ByteStream =
            Box::pin(response.bytes_stream().map_err(Error::Transport));
        Ok(StreamedResponse {
            status,
            headers,
            body,
        })
    }
}
