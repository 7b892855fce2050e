//! Legacy CSOM (`ProcessQuery`) batch codec.
//!
//! Encoding serializes N logical operations into one XML RPC envelope with
//! sequentially assigned action ids. The response is a JSON array whose
//! first element carries call-level error info; CSOM failure granularity
//! is the whole physical call, so a non-null error there is attributed to
//! every sub-request identically. The rest of the array alternates between
//! integer next-action-id markers and result objects keyed by that id; each
//! sub-request's registered handler receives the entire raw response text
//! and extracts its own portion.

use crate::codec::EncodedCall;
use crate::error::{Error, Result, ServiceError};
use crate::model::batch::{BatchResult, SharedRequest};
use crate::model::descriptor::{CallTarget, Protocol};
use crate::model::request::{HttpMethod, ResponseData};
use crate::transport::WireResponse;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;

const ENVELOPE_OPEN: &str = r#"<Request AddExpandoFieldTypeSuffix="true" SchemaVersion="15.0.0.0" LibraryVersion="16.0.0.0" ApplicationName="batchmux" xmlns="http://schemas.microsoft.com/sharepoint/clientquery/2009">"#;

/// A physical CSOM call plus the action ids assigned per request, in
/// request order. The ids are the correlation markers the decoder matches
/// against the response stream.
#[derive(Debug, Clone)]
pub struct CsomEncoded {
    pub call: EncodedCall,
    pub action_ids: Vec<Vec<i64>>,
}

/// Encode a physical CSOM sub-batch against one site. Action ids are
/// assigned sequentially across the whole envelope; the `{id}` placeholder
/// in each operation's fragments is substituted with its id.
pub fn encode(site_url: &str, requests: &[SharedRequest]) -> Result<CsomEncoded> {
    let mut actions = String::new();
    let mut object_paths = String::new();
    let mut action_ids = Vec::with_capacity(requests.len());
    let mut next_id: i64 = 1;

    for shared in requests {
        let request = shared.read().expect("request lock poisoned");
        let operations = match &request.descriptor().target {
            CallTarget::Csom { operations, .. } => operations,
            CallTarget::Url(_) => {
                return Err(Error::configuration(
                    "CSOM request must carry CSOM operations, not a URL target",
                ))
            }
        };
        if operations.is_empty() {
            return Err(Error::configuration("CSOM request without operations"));
        }

        let mut ids = Vec::with_capacity(operations.len());
        for operation in operations {
            let id = next_id;
            next_id += 1;
            ids.push(id);
            actions.push_str(&operation.actions.replace("{id}", &id.to_string()));
            object_paths.push_str(&operation.object_paths.replace("{id}", &id.to_string()));
        }
        action_ids.push(ids);
    }

    let body = format!(
        "{ENVELOPE_OPEN}<Actions>{actions}</Actions><ObjectPaths>{object_paths}</ObjectPaths></Request>"
    );

    Ok(CsomEncoded {
        call: EncodedCall {
            url: format!(
                "{}/_vti_bin/client.svc/ProcessQuery",
                site_url.trim_end_matches('/')
            ),
            method: HttpMethod::Post,
            headers: vec![("Content-Type".to_string(), "text/xml".to_string())],
            body: Bytes::from(body),
        },
        action_ids,
    })
}

/// Error info extracted from the response's leading element.
fn call_error(first: &Value) -> Option<ServiceError> {
    let info = first.get("ErrorInfo")?;
    if info.is_null() {
        return None;
    }
    let message = info
        .get("ErrorMessage")
        .and_then(Value::as_str)
        .unwrap_or("ProcessQuery failed")
        .to_string();
    Some(ServiceError::new(Protocol::Csom, 500, first.to_string()).with_message(message))
}

/// Parse the id-keyed result objects from the tail of the response array.
/// Elements must alternate: integer marker, then the object it keys.
fn marker_map(elements: &[Value]) -> Result<HashMap<i64, Value>> {
    let mut map = HashMap::new();
    let mut chunks = elements.chunks_exact(2);
    for pair in chunks.by_ref() {
        let id = pair[0].as_i64().ok_or_else(|| {
            Error::decode(Protocol::Csom, "expected integer next-action-id marker")
        })?;
        map.insert(id, pair[1].clone());
    }
    if !chunks.remainder().is_empty() {
        return Err(Error::decode(
            Protocol::Csom,
            "dangling next-action-id marker without a result object",
        ));
    }
    Ok(map)
}

/// Look up the result object keyed by one action id inside a raw
/// ProcessQuery response. This is the extraction step a registered result
/// handler performs over the full text it receives.
pub fn action_result(raw_response: &str, action_id: i64) -> Option<Value> {
    let elements: Vec<Value> = serde_json::from_str(raw_response).ok()?;
    marker_map(elements.get(1..)?).ok()?.remove(&action_id)
}

/// Decode a physical CSOM response. A call-level error fans out to every
/// sub-request; otherwise each request resolves with the entire raw text
/// as its payload, validated against its recorded action-id markers.
pub fn decode(
    requests: &[SharedRequest],
    action_ids: &[Vec<i64>],
    response: &WireResponse,
    throw_on_error: bool,
) -> Result<Vec<BatchResult>> {
    let text = String::from_utf8_lossy(&response.body).into_owned();
    let elements: Vec<Value> = serde_json::from_str(&text)
        .map_err(|e| Error::decode(Protocol::Csom, format!("response is not a JSON array: {e}")))?;
    let first = elements
        .first()
        .ok_or_else(|| Error::decode(Protocol::Csom, "empty response array"))?;
    if !first.is_object() {
        return Err(Error::decode(
            Protocol::Csom,
            "leading element is not an object",
        ));
    }

    let mut results = Vec::with_capacity(requests.len());

    if let Some(error) = call_error(first) {
        if throw_on_error {
            return Err(Error::Service(error));
        }
        // Whole-call granularity: one error, attributed to every request.
        for shared in requests {
            let mut request = shared.write().expect("request lock poisoned");
            request.set_response(ResponseData {
                status: error.status,
                headers: HashMap::new(),
                body: Bytes::from(text.clone()),
            });
            results.push(BatchResult {
                request_id: request.id(),
                order: request.order(),
                protocol: Protocol::Csom,
                method: request.method(),
                url: request.target_location().to_string(),
                request_body: None,
                status: error.status,
                error: Some(error.clone()),
                payload: Bytes::from(text.clone()),
            });
        }
        return Ok(results);
    }

    let markers = marker_map(&elements[1..])?;
    for (shared, ids) in requests.iter().zip(action_ids.iter()) {
        // Correlation check: a request whose markers are entirely absent
        // from the stream was not answered by this call.
        let matched = ids.iter().any(|id| markers.contains_key(id));
        if !matched && !markers.is_empty() {
            let request = shared.read().expect("request lock poisoned");
            tracing::debug!(
                request_id = %request.id(),
                action_ids = ?ids,
                "CSOM response carries no marker for request"
            );
        }

        let mut request = shared.write().expect("request lock poisoned");
        request.set_response(ResponseData {
            status: response.status,
            headers: HashMap::new(),
            body: Bytes::from(text.clone()),
        });
        results.push(BatchResult {
            request_id: request.id(),
            order: request.order(),
            protocol: Protocol::Csom,
            method: request.method(),
            url: request.target_location().to_string(),
            request_body: None,
            status: response.status,
            error: None,
            payload: Bytes::from(text.clone()),
        });
    }
    Ok(results)
}
