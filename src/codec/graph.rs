//! Graph JSON batch codec.
//!
//! Encoding emits `{"requests":[...]}` with 1-based decimal string ids
//! equal to array position; decoding converts each response id back to an
//! index. A sub-response in the retryable status set does not finalize its
//! request; the physical sub-batch is flagged for the retry executor and
//! only still-pending requests are re-encoded on the next attempt.

use crate::codec::{DecodeOutcome, EncodedCall};
use crate::error::{Error, Result, ServiceError};
use crate::model::batch::{BatchResult, SharedRequest};
use crate::model::descriptor::Protocol;
use crate::model::request::{HttpMethod, ResponseData};
use crate::transport::WireResponse;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

/// Graph version segment for a physical sub-batch. A single beta request
/// promotes the whole call to the beta endpoint; v1.0 URLs remain valid
/// there, the reverse does not hold.
fn version_segment(requests: &[SharedRequest]) -> &'static str {
    let any_beta = requests.iter().any(|r| {
        r.read().expect("request lock poisoned").protocol() == Protocol::GraphBeta
    });
    if any_beta {
        "beta"
    } else {
        "v1.0"
    }
}

/// Normalize a descriptor target to a version-root-relative URL.
fn relative_url(target: &str) -> String {
    let mut rest = target;
    if let Some(stripped) = rest
        .strip_prefix("https://")
        .or_else(|| rest.strip_prefix("http://"))
    {
        // Absolute Graph URL: drop host and version segment.
        rest = stripped.split_once('/').map(|(_, path)| path).unwrap_or("");
        rest = rest
            .strip_prefix("v1.0/")
            .or_else(|| rest.strip_prefix("beta/"))
            .unwrap_or(rest);
    }
    let rest = rest.trim_start_matches('/');
    format!("/{rest}")
}

/// Encode still-pending requests into one physical Graph `$batch` POST.
pub fn encode(graph_endpoint: &str, requests: &[SharedRequest]) -> Result<EncodedCall> {
    let version = version_segment(requests);
    let mut entries = Vec::with_capacity(requests.len());

    for (position, shared) in requests.iter().enumerate() {
        let request = shared.read().expect("request lock poisoned");
        let url = request
            .descriptor()
            .target
            .url()
            .ok_or_else(|| Error::configuration("Graph request without a URL target"))?;

        let mut entry = json!({
            "id": (position + 1).to_string(),
            "method": request.method().as_str(),
            "url": relative_url(url),
        });
        if let Some(body) = &request.descriptor().body {
            entry["body"] = body.clone();
            entry["headers"] = json!({"Content-Type": "application/json"});
        }
        entries.push(entry);
    }

    Ok(EncodedCall {
        url: format!(
            "{}/{version}/$batch",
            graph_endpoint.trim_end_matches('/')
        ),
        method: HttpMethod::Post,
        headers: vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ],
        body: Bytes::from(serde_json::to_vec(&json!({ "requests": entries }))?),
    })
}

fn response_headers(element: &Value) -> HashMap<String, String> {
    element
        .get("headers")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| {
                    v.as_str()
                        .map(|s| (k.to_ascii_lowercase(), s.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decode a physical Graph response against the requests that were encoded
/// into it, in the same order. Returns the per-request results resolved so
/// far and whether the sub-batch needs another attempt.
pub fn decode(
    requests: &[SharedRequest],
    response: &WireResponse,
    throw_on_error: bool,
    retryable_statuses: &[u16],
) -> Result<(Vec<BatchResult>, DecodeOutcome)> {
    let envelope: Value = serde_json::from_slice(&response.body)
        .map_err(|e| Error::decode(Protocol::Graph, format!("invalid JSON envelope: {e}")))?;
    let responses = envelope
        .get("responses")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::decode(Protocol::Graph, "missing `responses` array"))?;

    let mut results = Vec::new();
    let mut outcome = DecodeOutcome::Complete;
    let mut seen: HashSet<usize> = HashSet::new();

    for element in responses {
        let id = element
            .get("id")
            .and_then(|id| {
                id.as_str()
                    .and_then(|s| s.parse::<usize>().ok())
                    .or_else(|| id.as_u64().map(|n| n as usize))
            })
            .ok_or_else(|| Error::decode(Protocol::Graph, "response without a numeric id"))?;
        let index = id
            .checked_sub(1)
            .filter(|i| *i < requests.len())
            .ok_or_else(|| {
                Error::decode(Protocol::Graph, format!("response id {id} out of range"))
            })?;
        if !seen.insert(index) {
            return Err(Error::decode(
                Protocol::Graph,
                format!("duplicate response id {id}"),
            ));
        }

        let status = element
            .get("status")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::decode(Protocol::Graph, "response without a status"))?
            as u16;

        if retryable_statuses.contains(&status) {
            // Leave the request flagged for execution; the retry executor
            // re-sends the physical sub-batch.
            outcome = DecodeOutcome::RetryNeeded;
            continue;
        }

        let payload = match element.get("body") {
            None | Some(Value::Null) => Bytes::new(),
            Some(Value::String(s)) => Bytes::from(s.clone()),
            Some(other) => Bytes::from(serde_json::to_vec(other)?),
        };

        let mut request = requests[index].write().expect("request lock poisoned");
        let error = if (200..300).contains(&status) {
            None
        } else {
            let err = ServiceError::new(
                Protocol::Graph,
                status,
                String::from_utf8_lossy(&payload).into_owned(),
            );
            if throw_on_error {
                return Err(Error::Service(err));
            }
            Some(err)
        };

        request.set_response(ResponseData {
            status,
            headers: response_headers(element),
            body: payload.clone(),
        });
        results.push(BatchResult {
            request_id: request.id(),
            order: request.order(),
            protocol: request.protocol(),
            method: request.method(),
            url: request
                .descriptor()
                .target
                .url()
                .unwrap_or_default()
                .to_string(),
            request_body: request.descriptor().body.clone(),
            status,
            error,
            payload,
        });
    }

    if outcome == DecodeOutcome::Complete {
        for (index, shared) in requests.iter().enumerate() {
            if !seen.contains(&index) {
                let request = shared.read().expect("request lock poisoned");
                return Err(Error::decode(
                    Protocol::Graph,
                    format!(
                        "no response for request {} (id {})",
                        request.id(),
                        index + 1
                    ),
                ));
            }
        }
    }

    Ok((results, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::descriptor::WireCallDescriptor;
    use crate::model::request::BatchRequest;
    use std::sync::{Arc, RwLock};

    fn shared(protocol: Protocol, method: HttpMethod, url: &str) -> SharedRequest {
        Arc::new(RwLock::new(BatchRequest::new(
            method,
            WireCallDescriptor::new(protocol, url),
        )))
    }

    fn wire(body: Value) -> WireResponse {
        WireResponse {
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from(serde_json::to_vec(&body).unwrap()),
        }
    }

    const RETRYABLE: &[u16] = &[429, 503];

    #[test]
    fn encode_assigns_positional_one_based_ids() {
        let requests = vec![
            shared(Protocol::Graph, HttpMethod::Get, "/sites/root"),
            shared(Protocol::Graph, HttpMethod::Get, "https://graph.microsoft.com/v1.0/me/drives"),
        ];
        let call = encode("https://graph.microsoft.com", &requests).unwrap();
        assert_eq!(call.url, "https://graph.microsoft.com/v1.0/$batch");

        let body: Value = serde_json::from_slice(&call.body).unwrap();
        let entries = body["requests"].as_array().unwrap();
        assert_eq!(entries[0]["id"], "1");
        assert_eq!(entries[0]["url"], "/sites/root");
        assert_eq!(entries[1]["id"], "2");
        assert_eq!(entries[1]["url"], "/me/drives");
    }

    #[test]
    fn any_beta_request_promotes_the_call_to_beta() {
        let requests = vec![
            shared(Protocol::Graph, HttpMethod::Get, "/sites/root"),
            shared(Protocol::GraphBeta, HttpMethod::Get, "/teams/x"),
        ];
        let call = encode("https://graph.microsoft.com", &requests).unwrap();
        assert_eq!(call.url, "https://graph.microsoft.com/beta/$batch");
    }

    #[test]
    fn decode_recovers_order_from_ids_even_out_of_order() {
        let requests = vec![
            shared(Protocol::Graph, HttpMethod::Get, "/sites/root"),
            shared(Protocol::Graph, HttpMethod::Get, "/me"),
        ];
        let response = wire(json!({"responses": [
            {"id": "2", "status": 200, "body": {"displayName": "Mo"}},
            {"id": "1", "status": 200, "body": {"name": "root"}},
        ]}));
        let (results, outcome) = decode(&requests, &response, false, RETRYABLE).unwrap();

        assert_eq!(outcome, DecodeOutcome::Complete);
        assert_eq!(results.len(), 2);
        let by_order: Vec<_> = {
            let mut sorted = results.clone();
            sorted.sort_by_key(|r| r.order);
            sorted
        };
        assert!(by_order[0].payload_text().contains("root"));
        assert!(by_order[1].payload_text().contains("Mo"));
    }

    #[test]
    fn retryable_status_leaves_request_pending() {
        let requests = vec![
            shared(Protocol::Graph, HttpMethod::Get, "/sites/root"),
            shared(Protocol::Graph, HttpMethod::Get, "/me"),
        ];
        let response = wire(json!({"responses": [
            {"id": "1", "status": 200, "body": {}},
            {"id": "2", "status": 429, "body": null},
        ]}));
        let (results, outcome) = decode(&requests, &response, false, RETRYABLE).unwrap();

        assert_eq!(outcome, DecodeOutcome::RetryNeeded);
        assert_eq!(results.len(), 1);
        assert!(!requests[0].read().unwrap().execution_needed());
        assert!(requests[1].read().unwrap().execution_needed());
    }

    #[test]
    fn non_retryable_failure_is_recorded_or_raised() {
        let requests = vec![shared(Protocol::Graph, HttpMethod::Get, "/sites/gone")];
        let body = json!({"responses": [
            {"id": "1", "status": 404,
             "body": {"error": {"code": "itemNotFound", "message": "gone"}}},
        ]});

        let (results, outcome) = decode(&requests, &wire(body.clone()), false, RETRYABLE).unwrap();
        assert_eq!(outcome, DecodeOutcome::Complete);
        assert_eq!(results[0].error.as_ref().unwrap().status, 404);

        let requests = vec![shared(Protocol::Graph, HttpMethod::Get, "/sites/gone")];
        let err = decode(&requests, &wire(body), true, RETRYABLE).unwrap_err();
        assert!(matches!(err, Error::Service(ref e) if e.status == 404));
    }

    #[test]
    fn missing_response_is_a_decode_error_when_complete() {
        let requests = vec![
            shared(Protocol::Graph, HttpMethod::Get, "/sites/root"),
            shared(Protocol::Graph, HttpMethod::Get, "/me"),
        ];
        let response = wire(json!({"responses": [
            {"id": "1", "status": 200, "body": {}},
        ]}));
        let err = decode(&requests, &response, false, RETRYABLE).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
