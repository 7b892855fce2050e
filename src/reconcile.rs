//! Result reconciliation.
//!
//! Runs after a round of physical calls resolved: merges duplicate
//! fetches of the same entity, propagates deletions out of parent
//! collections, and synthesizes follow-up requests for server-side paging.

use crate::model::batch::{BatchResult, SharedRequest};
use crate::model::entity::NEXT_PAGE_LINK;
use crate::model::request::{BatchRequest, HttpMethod};
use crate::model::descriptor::WireCallDescriptor;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Reconcile one executed round. Returns the follow-up requests the next
/// pagination round must carry; empty when the batch has quiesced.
pub fn run(requests: &[SharedRequest], results: &[BatchResult]) -> Vec<BatchRequest> {
    let by_request: HashMap<Uuid, &BatchResult> =
        results.iter().map(|r| (r.request_id, r)).collect();

    merge_duplicates(requests, &by_request);
    propagate_deletions(requests, &by_request);
    paging_follow_ups(requests, &by_request)
}

/// Group successful GETs by (entity type, key value); the earliest-ordered
/// request's entity is canonical. Later duplicates merge their state into
/// it and are detached from any parent collection.
fn merge_duplicates(requests: &[SharedRequest], results: &HashMap<Uuid, &BatchResult>) {
    let mut canonical: HashMap<(String, String), crate::model::entity::EntityHandle> =
        HashMap::new();

    for shared in requests {
        let request = shared.read().expect("request lock poisoned");
        if request.method() != HttpMethod::Get {
            continue;
        }
        let succeeded = results
            .get(&request.id())
            .map(|r| r.is_success())
            .unwrap_or(false);
        if !succeeded {
            continue;
        }
        let Some(entity) = request.entity() else {
            continue;
        };
        let Some(key) = entity.read().key_value() else {
            continue;
        };
        let group = (entity.read().type_name().to_string(), key);

        if let Some(first) = canonical.get(&group) {
            if !first.ptr_eq(entity) {
                {
                    let duplicate = entity.read();
                    first.write().merge_from(&duplicate);
                }
                entity.detach();
                debug!(
                    entity_type = group.0.as_str(),
                    key = group.1.as_str(),
                    "merged duplicate fetch into canonical entity"
                );
            }
        } else {
            canonical.insert(group, entity.clone());
        }
    }
}

/// DELETE requests, and requests flagged remove-from-model, detach their
/// target entity from its parent collection once resolved successfully.
fn propagate_deletions(requests: &[SharedRequest], results: &HashMap<Uuid, &BatchResult>) {
    for shared in requests {
        let request = shared.read().expect("request lock poisoned");
        let removes = request.method() == HttpMethod::Delete
            || request.descriptor().flags.remove_from_model;
        if !removes {
            continue;
        }
        let succeeded = results
            .get(&request.id())
            .map(|r| r.is_success())
            .unwrap_or(false);
        if !succeeded {
            continue;
        }
        if let Some(entity) = request.entity() {
            entity.detach();
        }
    }
}

/// Next-page link carried by a result payload, wherever this backend
/// family puts it.
fn next_link_in_payload(payload: &[u8]) -> Option<String> {
    let json: Value = serde_json::from_slice(payload).ok()?;
    for path in ["@odata.nextLink", "odata.nextLink", "__next"] {
        if let Some(link) = json.get(path).and_then(Value::as_str) {
            return Some(link.to_string());
        }
    }
    json.pointer("/d/__next")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// For every paged request whose result exposes a next-page token: clear
/// the token from the entity's tracked metadata and queue a follow-up GET.
fn paging_follow_ups(
    requests: &[SharedRequest],
    results: &HashMap<Uuid, &BatchResult>,
) -> Vec<BatchRequest> {
    let mut follow_ups = Vec::new();

    for shared in requests {
        let request = shared.read().expect("request lock poisoned");
        if !request.descriptor().flags.paged {
            continue;
        }
        let Some(result) = results.get(&request.id()).filter(|r| r.is_success()) else {
            continue;
        };

        let from_metadata = request
            .entity()
            .and_then(|e| e.write().clear_metadata(NEXT_PAGE_LINK));
        let next_link = from_metadata.or_else(|| next_link_in_payload(&result.payload));
        let Some(next_link) = next_link else {
            continue;
        };

        debug!(next_link = next_link.as_str(), "queueing next page fetch");
        // Follow-up pages append to the already-loaded collection.
        let mut flags = request.descriptor().flags;
        flags.skip_collection_clear = true;
        let descriptor =
            WireCallDescriptor::new(request.protocol(), next_link).with_flags(flags);
        let mut follow_up = BatchRequest::new(HttpMethod::Get, descriptor);
        if let Some(entity) = request.entity() {
            follow_up = follow_up.with_entity(entity.clone());
        }
        if let Some(callback) = request.callback() {
            follow_up = follow_up.with_callback(callback.clone());
        }
        follow_ups.push(follow_up);
    }
    follow_ups
}
