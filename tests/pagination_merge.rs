//! Reconciliation end-to-end: pagination rounds and duplicate-fetch merge
//! through the default materializer.

mod common;

use batchmux::{
    BatchExecutor, BatchRequest, CallFlags, EngineConfig, Entity, EntityCollection,
    EntityDescriptor, EntityHandle, Protocol, WireCallDescriptor,
};
use common::*;
use serde_json::json;
use std::sync::Arc;

const SITE: &str = "https://contoso.sharepoint.com/sites/a";

fn list_descriptor() -> Arc<EntityDescriptor> {
    Arc::new(
        EntityDescriptor::new("List")
            .with_key_field("id")
            .with_field("id", "Id")
            .with_field("title", "Title")
            .with_field("itemCount", "ItemCount"),
    )
}

fn multipart_single(status: u16, body: &str) -> String {
    format!(
        "--batchresponse_test\r\nContent-Type: application/http\r\n\r\nHTTP/1.1 {status} OK\r\nContent-Type: application/json\r\n\r\n{body}\r\n--batchresponse_test--\r\n"
    )
}

#[tokio::test]
async fn paged_request_drives_follow_up_rounds_until_quiescence() {
    let transport = Arc::new(ScriptedTransport::new(move |_, index| {
        let body = if index == 0 {
            json!({
                "value": [{"Id": "1", "Title": "A"}],
                "@odata.nextLink": format!("{SITE}/_api/web/lists?$skiptoken=p2"),
            })
        } else {
            json!({"value": [{"Id": "2", "Title": "B"}]})
        };
        text_response(
            200,
            "multipart/mixed; boundary=batchresponse_test",
            &multipart_single(200, &body.to_string()),
        )
    }));
    let executor = BatchExecutor::new(transport.clone(), EngineConfig::default());

    let entity = EntityHandle::new(Entity::new(list_descriptor()));
    let batch = executor.new_batch();
    batch.add(
        BatchRequest::get(
            WireCallDescriptor::new(Protocol::Rest, format!("{SITE}/_api/web/lists"))
                .with_flags(CallFlags::new().paged()),
        )
        .with_entity(entity.clone()),
    );

    let results = executor.execute(&batch).await.unwrap();

    // Two rounds: the original page, then the synthesized follow-up.
    assert_eq!(transport.call_count(), 2);
    let second_round = rest_sub_request_urls(&transport.calls()[1]);
    assert_eq!(second_round, vec![format!("{SITE}/_api/web/lists?$skiptoken=p2")]);

    // One result per request, including the synthesized one, in order.
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].order, 0);
    assert_eq!(results[1].order, 1);

    // The second page appended instead of clearing the first.
    let children = entity.read().children().cloned().expect("loaded collection");
    assert_eq!(children.len(), 2);
}

#[tokio::test]
async fn duplicate_fetches_merge_into_the_earliest_entity() {
    let transport = Arc::new(ScriptedTransport::new(|call, _| {
        let urls = rest_sub_request_urls(call);
        let mut body = String::new();
        for url in urls {
            let payload = if url.contains("$select=ItemCount") {
                json!({"Id": "a1", "ItemCount": 42})
            } else {
                json!({"Id": "a1", "Title": "Documents"})
            };
            body.push_str("--batchresponse_test\r\n");
            body.push_str("Content-Type: application/http\r\n\r\n");
            body.push_str("HTTP/1.1 200 OK\r\n\r\n");
            body.push_str(&payload.to_string());
            body.push_str("\r\n");
        }
        body.push_str("--batchresponse_test--\r\n");
        text_response(200, "multipart/mixed; boundary=batchresponse_test", &body)
    }));
    let executor = BatchExecutor::new(transport, EngineConfig::default());

    let collection = EntityCollection::new();
    let first = EntityHandle::new(Entity::new(list_descriptor()));
    let second = EntityHandle::new(Entity::new(list_descriptor()));
    collection.attach(&first);
    collection.attach(&second);

    let batch = executor.new_batch();
    batch.add(
        BatchRequest::get(WireCallDescriptor::new(
            Protocol::Rest,
            format!("{SITE}/_api/web/lists('a1')"),
        ))
        .with_entity(first.clone()),
    );
    batch.add(
        BatchRequest::get(WireCallDescriptor::new(
            Protocol::Rest,
            format!("{SITE}/_api/web/lists('a1')?$select=ItemCount"),
        ))
        .with_entity(second.clone()),
    );

    let results = executor.execute(&batch).await.unwrap();
    assert_eq!(results.len(), 2);

    // One surviving entity holding the union of both requests' fields.
    let survivor = first.read();
    assert_eq!(survivor.field("title"), Some(&json!("Documents")));
    assert_eq!(survivor.field("itemCount"), Some(&json!(42)));
    drop(survivor);
    assert_eq!(collection.len(), 1);
    assert!(collection.contains(&first));
    assert!(!collection.contains(&second));
}

#[tokio::test]
async fn delete_detaches_its_entity_after_success() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| {
        text_response(
            200,
            "multipart/mixed; boundary=batchresponse_test",
            &multipart_single(204, ""),
        )
    }));
    let executor = BatchExecutor::new(transport, EngineConfig::default());

    let collection = EntityCollection::new();
    let entity = EntityHandle::new(Entity::new(list_descriptor()));
    collection.attach(&entity);

    let batch = executor.new_batch();
    batch.add(
        BatchRequest::new(
            batchmux::HttpMethod::Delete,
            WireCallDescriptor::new(Protocol::Rest, format!("{SITE}/_api/web/lists('a1')")),
        )
        .with_entity(entity.clone()),
    );

    let results = executor.execute(&batch).await.unwrap();
    assert_eq!(results[0].status, 204);
    assert!(collection.is_empty());
    // A successful mutation also marks its entity committed.
    assert!(entity.read().is_committed());
}

#[tokio::test]
async fn raw_batches_skip_reconciliation_and_materialization() {
    let transport = Arc::new(ScriptedTransport::new(|_, index| {
        assert_eq!(index, 0, "raw mode must not trigger pagination rounds");
        let body = json!({
            "value": [{"Id": "1"}],
            "@odata.nextLink": format!("{SITE}/_api/web/lists?$skiptoken=p2"),
        });
        text_response(
            200,
            "multipart/mixed; boundary=batchresponse_test",
            &multipart_single(200, &body.to_string()),
        )
    }));
    let executor = BatchExecutor::new(transport.clone(), EngineConfig::default());

    let entity = EntityHandle::new(Entity::new(list_descriptor()));
    let batch = executor.new_batch();
    batch.set_raw(true);
    batch.add(
        BatchRequest::get(
            WireCallDescriptor::new(Protocol::Rest, format!("{SITE}/_api/web/lists"))
                .with_flags(CallFlags::new().paged()),
        )
        .with_entity(entity.clone()),
    );

    let results = executor.execute(&batch).await.unwrap();
    assert_eq!(transport.call_count(), 1);
    assert_eq!(results.len(), 1);
    assert!(results[0].payload_text().contains("nextLink"));
    // Raw mode leaves the entity untouched.
    assert!(entity.read().children().is_none());
}
