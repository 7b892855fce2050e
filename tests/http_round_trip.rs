//! Full HTTP round-trips through the reqwest transport against a mock
//! server.

use anyhow::Result;
use batchmux::{
    BatchExecutor, BatchRequest, EngineConfig, HttpTransport, Protocol, StaticTokenProvider,
    WireCallDescriptor,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn executor_for(server_url: &str) -> Result<BatchExecutor> {
    let config = EngineConfig::default()
        .with_graph_endpoint(server_url)
        .with_http_timeout(Duration::from_secs(5));
    let transport = Arc::new(HttpTransport::new(
        Arc::new(StaticTokenProvider::new("test-token")),
        config.http_timeout,
        &config.user_agent,
    )?);
    Ok(BatchExecutor::new(transport, config))
}

#[tokio::test]
async fn graph_batch_round_trip_carries_bearer_auth() -> Result<()> {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1.0/$batch")
        .match_header("authorization", "Bearer test-token")
        .match_header("content-type", "application/json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"responses": [
                {"id": "1", "status": 200, "body": {"id": "root", "displayName": "Root"}},
            ]})
            .to_string(),
        )
        .create_async()
        .await;

    let executor = executor_for(&server.url())?;
    let batch = executor.new_batch();
    batch.add(BatchRequest::get(WireCallDescriptor::new(
        Protocol::Graph,
        "/sites/root",
    )));

    let results = executor.execute(&batch).await?;
    mock.assert_async().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert!(results[0].payload_text().contains("Root"));
    Ok(())
}

#[tokio::test]
async fn rest_batch_round_trip_posts_multipart_to_the_site_endpoint() -> Result<()> {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    let body = "--batchresponse_xyz\r\n\
        Content-Type: application/http\r\n\r\n\
        HTTP/1.1 200 OK\r\n\
        Content-Type: application/json\r\n\r\n\
        {\"Title\":\"HR\"}\r\n\
        --batchresponse_xyz--\r\n";
    let mock = server
        .mock("POST", "/sites/hr/_api/$batch")
        .match_header(
            "content-type",
            mockito::Matcher::Regex("multipart/mixed; boundary=batch_.*".to_string()),
        )
        .with_status(200)
        .with_header(
            "content-type",
            "multipart/mixed; boundary=batchresponse_xyz",
        )
        .with_body(body)
        .create_async()
        .await;

    let executor = executor_for(&server.url())?;
    let site = format!("{}/sites/hr", server.url());
    let batch = executor.new_batch();
    batch.add(BatchRequest::get(WireCallDescriptor::new(
        Protocol::Rest,
        format!("{site}/_api/web"),
    )));

    let results = executor.execute(&batch).await?;
    mock.assert_async().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].payload_text().contains("HR"));
    Ok(())
}

#[tokio::test]
async fn graph_service_failure_is_recorded_per_request() -> Result<()> {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1.0/$batch")
        .with_status(403)
        .with_header("content-type", "application/json")
        .with_body(json!({"error": {"message": "Forbidden"}}).to_string())
        .create_async()
        .await;

    let executor = executor_for(&server.url())?;
    let batch = executor.new_batch();
    batch.add(BatchRequest::get(WireCallDescriptor::new(
        Protocol::Graph,
        "/sites/root",
    )));
    batch.add(BatchRequest::get(WireCallDescriptor::new(
        Protocol::Graph,
        "/me",
    )));

    let results = executor.execute(&batch).await?;
    mock.assert_async().await;
    assert_eq!(results.len(), 2);
    for result in &results {
        let error = result.error.as_ref().expect("whole-call failure recorded");
        assert_eq!(error.status, 403);
        assert_eq!(error.message, "Forbidden");
    }
    Ok(())
}
