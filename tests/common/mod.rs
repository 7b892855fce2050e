//! Shared test fixtures: a scripted transport and wire-shape builders.

#![allow(dead_code)]

use async_trait::async_trait;
use batchmux::{Result, Transport, WireCall, WireResponse};
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Transport whose behavior is a closure over (call, call index). Every
/// outbound physical call is recorded for assertions.
pub struct ScriptedTransport {
    handler: Box<dyn Fn(&WireCall, usize) -> WireResponse + Send + Sync>,
    calls: Mutex<Vec<WireCall>>,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&WireCall, usize) -> WireResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<WireCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, call: WireCall, _cancel: &CancellationToken) -> Result<WireResponse> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call.clone());
            calls.len() - 1
        };
        Ok((self.handler)(&call, index))
    }
}

pub fn json_response(status: u16, body: Value) -> WireResponse {
    WireResponse {
        status,
        headers: HashMap::from([(
            "content-type".to_string(),
            "application/json".to_string(),
        )]),
        body: Bytes::from(serde_json::to_vec(&body).unwrap()),
    }
}

pub fn text_response(status: u16, content_type: &str, body: &str) -> WireResponse {
    WireResponse {
        status,
        headers: HashMap::from([("content-type".to_string(), content_type.to_string())]),
        body: Bytes::from(body.to_string()),
    }
}

/// URLs of the sub-requests inside an outgoing REST multipart body, in
/// document order.
pub fn rest_sub_request_urls(call: &WireCall) -> Vec<String> {
    let body = String::from_utf8_lossy(&call.body);
    body.lines()
        .filter_map(|line| {
            let mut pieces = line.split_whitespace();
            let verb = pieces.next()?;
            if !matches!(verb, "GET" | "POST" | "PATCH" | "PUT" | "DELETE") {
                return None;
            }
            let url = pieces.next()?;
            (pieces.next() == Some("HTTP/1.1")).then(|| url.to_string())
        })
        .collect()
}

/// Multipart response echoing `{"url": <sub-request url>}` per part, so
/// positional attribution is observable from the payload.
pub fn rest_echo_response(call: &WireCall) -> WireResponse {
    let mut body = String::new();
    for url in rest_sub_request_urls(call) {
        body.push_str("--batchresponse_test\r\n");
        body.push_str("Content-Type: application/http\r\n\r\n");
        body.push_str("HTTP/1.1 200 OK\r\n");
        body.push_str("Content-Type: application/json\r\n\r\n");
        body.push_str(&json!({ "url": url }).to_string());
        body.push_str("\r\n");
    }
    body.push_str("--batchresponse_test--\r\n");
    text_response(200, "multipart/mixed; boundary=batchresponse_test", &body)
}

/// The `requests` array of an outgoing Graph batch body.
pub fn graph_sub_requests(call: &WireCall) -> Vec<Value> {
    let body: Value = serde_json::from_slice(&call.body).unwrap();
    body["requests"].as_array().cloned().unwrap_or_default()
}

/// Graph batch response echoing each request's url, with the responses
/// array deliberately reversed: correlation must come from ids, not
/// positions.
pub fn graph_echo_response(call: &WireCall) -> WireResponse {
    let mut responses: Vec<Value> = graph_sub_requests(call)
        .iter()
        .map(|request| {
            json!({
                "id": request["id"],
                "status": 200,
                "body": { "url": request["url"] },
            })
        })
        .collect();
    responses.reverse();
    json_response(200, json!({ "responses": responses }))
}
