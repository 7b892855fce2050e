//! OData `multipart/mixed` batch codec.
//!
//! Encoding emits one part per GET and wraps every mutating verb in its own
//! `changeset` envelope with an `If-Match: *` concurrency header. Decoding
//! walks the response parts in order: part N belongs to request N. REST
//! batches are not atomic: a failing part is recorded (or raised under
//! `throw_on_error`) while its siblings still resolve.

use crate::codec::EncodedCall;
use crate::error::{Error, Result, ServiceError};
use crate::model::batch::{BatchResult, SharedRequest};
use crate::model::descriptor::Protocol;
use crate::model::request::{HttpMethod, ResponseData};
use crate::transport::WireResponse;
use bytes::Bytes;
use std::collections::HashMap;
use uuid::Uuid;

/// Encode a physical REST sub-batch against one site into a single
/// `multipart/mixed` POST to that site's `$batch` endpoint.
pub fn encode(site_url: &str, requests: &[SharedRequest]) -> Result<EncodedCall> {
    let boundary = format!("batch_{}", Uuid::new_v4());
    let mut body = String::new();

    for request in requests {
        let request = request.read().expect("request lock poisoned");
        let url = request
            .descriptor()
            .target
            .url()
            .ok_or_else(|| Error::configuration("REST request without a URL target"))?
            .to_string();

        body.push_str(&format!("--{boundary}\r\n"));
        if request.method() == HttpMethod::Get {
            body.push_str("Content-Type: application/http\r\n");
            body.push_str("Content-Transfer-Encoding: binary\r\n\r\n");
            body.push_str(&format!("GET {url} HTTP/1.1\r\n"));
            body.push_str("Accept: application/json\r\n\r\n\r\n");
        } else {
            let changeset = format!("changeset_{}", Uuid::new_v4());
            body.push_str(&format!(
                "Content-Type: multipart/mixed; boundary={changeset}\r\n\r\n"
            ));
            body.push_str(&format!("--{changeset}\r\n"));
            body.push_str("Content-Type: application/http\r\n");
            body.push_str("Content-Transfer-Encoding: binary\r\n\r\n");
            body.push_str(&format!("{} {url} HTTP/1.1\r\n", request.method()));
            body.push_str("Accept: application/json\r\n");
            body.push_str("IF-MATCH: *\r\n");
            let payload = request
                .descriptor()
                .body
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?
                .unwrap_or_default();
            if !payload.is_empty() {
                body.push_str("Content-Type: application/json\r\n");
            }
            body.push_str(&format!("Content-Length: {}\r\n\r\n", payload.len()));
            body.push_str(&payload);
            body.push_str("\r\n\r\n");
            body.push_str(&format!("--{changeset}--\r\n"));
        }
    }
    body.push_str(&format!("--{boundary}--\r\n"));

    Ok(EncodedCall {
        url: format!("{}/_api/$batch", site_url.trim_end_matches('/')),
        method: HttpMethod::Post,
        headers: vec![
            (
                "Content-Type".to_string(),
                format!("multipart/mixed; boundary={boundary}"),
            ),
            ("Accept".to_string(), "application/json".to_string()),
        ],
        body: Bytes::from(body),
    })
}

/// One sub-response parsed out of the multipart body.
struct ResponsePart {
    status: u16,
    headers: HashMap<String, String>,
    body: String,
}

/// Scan the multipart payload for HTTP status blocks, in document order.
/// Changeset-wrapped responses nest inside the outer boundary; scanning for
/// status lines handles both shapes with one pass.
fn parse_parts(body: &str) -> Result<Vec<ResponsePart>> {
    let mut parts = Vec::new();
    let mut lines = body.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with("HTTP/") {
            continue;
        }
        let mut pieces = line.split_whitespace();
        let _version = pieces.next();
        let status: u16 = pieces
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::decode(Protocol::Rest, format!("bad status line: {line}")))?;

        let mut headers = HashMap::new();
        for header_line in lines.by_ref() {
            if header_line.trim().is_empty() {
                break;
            }
            if let Some((name, value)) = header_line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let mut part_body = String::new();
        while let Some(next) = lines.peek() {
            if next.trim_start().starts_with("--") {
                break;
            }
            let line = lines.next().expect("peeked");
            if !part_body.is_empty() {
                part_body.push('\n');
            }
            part_body.push_str(line);
        }

        parts.push(ResponsePart {
            status,
            headers,
            body: part_body.trim().to_string(),
        });
    }

    if parts.is_empty() {
        return Err(Error::decode(
            Protocol::Rest,
            "no HTTP sub-responses in multipart payload",
        ));
    }
    Ok(parts)
}

/// Decode a physical response and attribute each part to its request by
/// position. Under `throw_on_error` the first failing part aborts the
/// remainder of this sub-batch's processing.
pub fn decode(
    requests: &[SharedRequest],
    response: &WireResponse,
    throw_on_error: bool,
) -> Result<Vec<BatchResult>> {
    let text = String::from_utf8_lossy(&response.body);
    let parts = parse_parts(&text)?;

    if parts.len() != requests.len() {
        return Err(Error::decode(
            Protocol::Rest,
            format!(
                "expected {} sub-responses, found {}",
                requests.len(),
                parts.len()
            ),
        ));
    }

    let mut results = Vec::with_capacity(parts.len());
    for (part, shared) in parts.into_iter().zip(requests.iter()) {
        let mut request = shared.write().expect("request lock poisoned");
        let error = if (200..300).contains(&part.status) {
            None
        } else {
            let err = ServiceError::new(Protocol::Rest, part.status, part.body.clone());
            if throw_on_error {
                return Err(Error::Service(err));
            }
            Some(err)
        };

        // 204 parts have no body; an empty payload is the correct result.
        let payload = Bytes::from(part.body);
        request.set_response(ResponseData {
            status: part.status,
            headers: part.headers,
            body: payload.clone(),
        });

        results.push(BatchResult {
            request_id: request.id(),
            order: request.order(),
            protocol: Protocol::Rest,
            method: request.method(),
            url: request
                .descriptor()
                .target
                .url()
                .unwrap_or_default()
                .to_string(),
            request_body: request.descriptor().body.clone(),
            status: part.status,
            error,
            payload,
        });
    }
    Ok(results)
}
