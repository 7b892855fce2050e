//! Batch orchestrator.
//!
//! Drives one logical batch to completion: validates targets, collapses
//! mixed-protocol batches onto the REST path when fallbacks allow it,
//! partitions into physical sub-batches (protocol, site, size), dispatches
//! each through its codec, retries throttled Graph sub-batches, reconciles
//! results, and loops pagination follow-ups until the batch quiesces.
//! Transient sub-batches are never exposed; every result is flattened back
//! into the original batch in request order.

pub mod registry;
pub mod retry;

use crate::codec::{self, DecodeOutcome, EncodedCall};
use crate::config::EngineConfig;
use crate::error::{Error, Result, ServiceError};
use crate::materialize::{FieldMapMaterializer, Materializer};
use crate::model::batch::{Batch, BatchResult, SharedRequest};
use crate::model::descriptor::{CallTarget, Protocol, ProtocolFamily};
use crate::model::request::ResponseData;
use crate::reconcile;
use crate::splitter::{split_by_protocol, split_by_site, split_by_size};
use crate::transport::{Transport, WireCall, WireResponse};
use bytes::Bytes;
use registry::BatchRegistry;
use retry::RetryPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct BatchExecutor {
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    registry: BatchRegistry,
    materializer: Option<Arc<dyn Materializer>>,
    retry: RetryPolicy,
}

impl BatchExecutor {
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            transport,
            config,
            registry: BatchRegistry::new(),
            materializer: Some(Arc::new(FieldMapMaterializer::new())),
            retry,
        }
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn Materializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    /// Skip materialization entirely; results stay raw.
    pub fn without_materializer(mut self) -> Self {
        self.materializer = None;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    /// Create a batch tracked in the outstanding-batch registry.
    pub fn new_batch(&self) -> Batch {
        let batch = Batch::new();
        self.registry.track(&batch);
        batch
    }

    pub async fn execute(&self, batch: &Batch) -> Result<Vec<BatchResult>> {
        self.execute_with_cancel(batch, &CancellationToken::new())
            .await
    }

    /// Execute a logical batch to completion. Results written back before
    /// a cancellation or failure remain on their requests.
    pub async fn execute_with_cancel(
        &self,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult>> {
        let throw_on_error = batch.throw_on_error();
        let raw = batch.raw();
        let mut all_results: Vec<BatchResult> = Vec::new();
        let mut round: Vec<SharedRequest> = batch.requests();

        let outcome = self
            .drive_rounds(batch, &mut round, &mut all_results, throw_on_error, raw, cancel)
            .await;

        // The batch was driven; it leaves the outstanding registry whether
        // or not every request resolved.
        batch.mark_executed();
        self.registry.prune_executed();
        outcome?;

        all_results.sort_by_key(|r| r.order);
        batch.store_results(all_results.clone());
        Ok(all_results)
    }

    async fn drive_rounds(
        &self,
        batch: &Batch,
        round: &mut Vec<SharedRequest>,
        all_results: &mut Vec<BatchResult>,
        throw_on_error: bool,
        raw: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        while !round.is_empty() {
            let results = self.execute_round(round, throw_on_error, cancel).await?;
            self.post_process(round, &results, raw)?;
            let follow_ups = if raw {
                Vec::new()
            } else {
                reconcile::run(round, &results)
            };
            all_results.extend(results);
            *round = follow_ups
                .into_iter()
                .map(|request| batch.add(request))
                .collect();
            if !round.is_empty() {
                debug!(pages = round.len(), "pagination round queued");
            }
        }
        Ok(())
    }

    /// One execution round: preflight, interactive bypass, mixed-protocol
    /// handling, per-protocol dispatch.
    async fn execute_round(
        &self,
        requests: &[SharedRequest],
        throw_on_error: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult>> {
        // Fail fast before any network call when a target still carries
        // unresolved placeholder tokens.
        for shared in requests {
            let request = shared.read().expect("request lock poisoned");
            if request.descriptor().has_unresolved_tokens() {
                return Err(Error::TokenResolution {
                    target: request.target_location().to_string(),
                });
            }
        }

        let interactive = requests
            .iter()
            .filter(|r| {
                r.read()
                    .expect("request lock poisoned")
                    .descriptor()
                    .flags
                    .interactive
            })
            .count();
        if interactive > 0 {
            if requests.len() > 1 {
                return Err(Error::configuration(
                    "an interactive request cannot be combined with other requests",
                ));
            }
            return self
                .execute_interactive(&requests[0], throw_on_error, cancel)
                .await;
        }

        let families = split_by_protocol(requests);
        if families.len() > 1 {
            let all_rest_capable = requests.iter().all(|shared| {
                let request = shared.read().expect("request lock poisoned");
                request.protocol() == Protocol::Rest || request.has_usable_rest_fallback()
            });
            if all_rest_capable {
                // Collapse: rewrite non-REST descriptors to their fallback
                // and dispatch the whole round as one REST batch.
                for shared in requests {
                    let mut request = shared.write().expect("request lock poisoned");
                    if request.protocol() != Protocol::Rest {
                        request.apply_rest_fallback();
                    }
                }
                info!(
                    size = requests.len(),
                    "mixed batch collapsed onto REST fallbacks"
                );
                return self.execute_rest(requests, throw_on_error, cancel).await;
            }

            let mut results = Vec::new();
            for (family, bucket) in families {
                results.extend(
                    self.execute_family(family, &bucket, throw_on_error, cancel)
                        .await?,
                );
            }
            return Ok(results);
        }

        let (family, bucket) = families.into_iter().next().expect("round is non-empty");
        self.execute_family(family, &bucket, throw_on_error, cancel)
            .await
    }

    async fn execute_family(
        &self,
        family: ProtocolFamily,
        requests: &[SharedRequest],
        throw_on_error: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult>> {
        match family {
            ProtocolFamily::Rest => self.execute_rest(requests, throw_on_error, cancel).await,
            ProtocolFamily::Graph => self.execute_graph(requests, throw_on_error, cancel).await,
            ProtocolFamily::Csom => self.execute_csom(requests, throw_on_error, cancel).await,
        }
    }

    async fn execute_rest(
        &self,
        requests: &[SharedRequest],
        throw_on_error: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult>> {
        let mut results = Vec::new();
        for (site, site_requests) in split_by_site(requests) {
            for chunk in split_by_size(&site_requests, self.config.rest_batch_size) {
                let call = codec::rest::encode(&site, &chunk)?;
                let response = self.send(call, cancel).await?;
                self.log_physical_call(Protocol::Rest, Some(&site), chunk.len(), &response);

                if !response.is_success() {
                    let error = ServiceError::new(
                        Protocol::Rest,
                        response.status,
                        String::from_utf8_lossy(&response.body).into_owned(),
                    );
                    if throw_on_error {
                        return Err(Error::Service(error));
                    }
                    results.extend(Self::record_call_failure(&chunk, &error));
                    continue;
                }
                results.extend(codec::rest::decode(&chunk, &response, throw_on_error)?);
            }
        }
        Ok(results)
    }

    async fn execute_graph(
        &self,
        requests: &[SharedRequest],
        throw_on_error: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult>> {
        let mut results = Vec::new();
        for chunk in split_by_size(requests, self.config.graph_batch_size) {
            results.extend(
                self.graph_call_with_retry(&chunk, throw_on_error, cancel)
                    .await?,
            );
        }
        Ok(results)
    }

    /// Drive one physical Graph sub-batch through the retry budget. Each
    /// attempt re-encodes only the requests still flagged for execution.
    async fn graph_call_with_retry(
        &self,
        chunk: &[SharedRequest],
        throw_on_error: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult>> {
        let mut results = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            let pending: Vec<SharedRequest> = chunk
                .iter()
                .filter(|r| r.read().expect("request lock poisoned").execution_needed())
                .cloned()
                .collect();
            if pending.is_empty() {
                break;
            }

            let call = codec::graph::encode(&self.config.graph_endpoint, &pending)?;
            let response = self.send(call, cancel).await?;
            self.log_physical_call(Protocol::Graph, None, pending.len(), &response);

            let retry_needed = if !response.is_success() {
                if self.config.is_retryable_status(response.status) {
                    true
                } else {
                    let error = ServiceError::new(
                        Protocol::Graph,
                        response.status,
                        String::from_utf8_lossy(&response.body).into_owned(),
                    );
                    if throw_on_error {
                        return Err(Error::Service(error));
                    }
                    results.extend(Self::record_call_failure(&pending, &error));
                    break;
                }
            } else {
                let (resolved, outcome) = codec::graph::decode(
                    &pending,
                    &response,
                    throw_on_error,
                    &self.config.retryable_statuses,
                )?;
                results.extend(resolved);
                outcome == DecodeOutcome::RetryNeeded
            };

            if !retry_needed {
                break;
            }
            if !self.retry.allows_retry(attempt) {
                let request_count = chunk
                    .iter()
                    .filter(|r| r.read().expect("request lock poisoned").execution_needed())
                    .count();
                return Err(Error::RetryBudgetExceeded {
                    protocol: Protocol::Graph,
                    attempts: attempt + 1,
                    request_count,
                });
            }
            warn!(
                attempt,
                delay_ms = self.retry.delay_for(attempt).as_millis() as u64,
                "graph sub-batch throttled, backing off"
            );
            self.retry.wait(attempt, cancel).await?;
            attempt += 1;
        }
        Ok(results)
    }

    async fn execute_csom(
        &self,
        requests: &[SharedRequest],
        throw_on_error: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult>> {
        let mut results = Vec::new();
        for (site, site_requests) in split_by_site(requests) {
            for chunk in split_by_size(&site_requests, self.config.csom_batch_size) {
                let encoded = codec::csom::encode(&site, &chunk)?;
                let response = self.send(encoded.call, cancel).await?;
                self.log_physical_call(Protocol::Csom, Some(&site), chunk.len(), &response);

                if !response.is_success() {
                    let error = ServiceError::new(
                        Protocol::Csom,
                        response.status,
                        String::from_utf8_lossy(&response.body).into_owned(),
                    );
                    if throw_on_error {
                        return Err(Error::Service(error));
                    }
                    results.extend(Self::record_call_failure(&chunk, &error));
                    continue;
                }
                results.extend(codec::csom::decode(
                    &chunk,
                    &encoded.action_ids,
                    &response,
                    throw_on_error,
                )?);
            }
        }
        Ok(results)
    }

    /// Single direct call for an interactive request, bypassing batch
    /// envelopes entirely.
    async fn execute_interactive(
        &self,
        shared: &SharedRequest,
        throw_on_error: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult>> {
        let csom_site = {
            let request = shared.read().expect("request lock poisoned");
            match &request.descriptor().target {
                CallTarget::Csom { site_url, .. } => Some(site_url.clone()),
                CallTarget::Url(_) => None,
            }
        };

        // A lone interactive CSOM operation still travels as a (single
        // element) ProcessQuery envelope.
        if let Some(site) = csom_site {
            let encoded = codec::csom::encode(&site, std::slice::from_ref(shared))?;
            let response = self.send(encoded.call, cancel).await?;
            self.log_physical_call(Protocol::Csom, Some(&site), 1, &response);
            if !response.is_success() {
                let error = ServiceError::new(
                    Protocol::Csom,
                    response.status,
                    String::from_utf8_lossy(&response.body).into_owned(),
                );
                if throw_on_error {
                    return Err(Error::Service(error));
                }
                return Ok(Self::record_call_failure(
                    std::slice::from_ref(shared),
                    &error,
                ));
            }
            return codec::csom::decode(
                std::slice::from_ref(shared),
                &encoded.action_ids,
                &response,
                throw_on_error,
            );
        }

        let call = {
            let request = shared.read().expect("request lock poisoned");
            let url = request
                .descriptor()
                .target
                .url()
                .expect("non-CSOM target is a URL");
            let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
            let body = match &request.descriptor().body {
                Some(body) => {
                    headers.push(("Content-Type".to_string(), "application/json".to_string()));
                    Bytes::from(serde_json::to_vec(body)?)
                }
                None => Bytes::new(),
            };
            EncodedCall {
                url: self.absolute_url(request.protocol(), url),
                method: request.method(),
                headers,
                body,
            }
        };

        let protocol = shared.read().expect("request lock poisoned").protocol();
        let response = self.send(call, cancel).await?;
        self.log_physical_call(protocol, None, 1, &response);

        let mut request = shared.write().expect("request lock poisoned");
        let error = if response.is_success() {
            None
        } else {
            let error = ServiceError::new(
                protocol,
                response.status,
                String::from_utf8_lossy(&response.body).into_owned(),
            );
            if throw_on_error {
                return Err(Error::Service(error));
            }
            Some(error)
        };
        request.set_response(ResponseData {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
        });
        Ok(vec![BatchResult {
            request_id: request.id(),
            order: request.order(),
            protocol,
            method: request.method(),
            url: request.target_location().to_string(),
            request_body: request.descriptor().body.clone(),
            status: response.status,
            error,
            payload: response.body,
        }])
    }

    /// Absolute form of a direct-call URL; Graph targets are stored
    /// relative to their version root.
    fn absolute_url(&self, protocol: Protocol, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        let version = match protocol {
            Protocol::GraphBeta => "beta",
            _ => "v1.0",
        };
        format!(
            "{}/{version}/{}",
            self.config.graph_endpoint.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }

    async fn send(&self, call: EncodedCall, cancel: &CancellationToken) -> Result<WireResponse> {
        self.transport
            .send(
                WireCall {
                    url: call.url,
                    method: call.method,
                    headers: call.headers,
                    body: call.body,
                },
                cancel,
            )
            .await
    }

    fn log_physical_call(
        &self,
        protocol: Protocol,
        site: Option<&str>,
        size: usize,
        response: &WireResponse,
    ) {
        info!(
            protocol = %protocol,
            site = site.unwrap_or(""),
            size,
            http_status = response.status,
            "physical batch call completed"
        );
    }

    /// A whole physical call failed: attribute the same error to every
    /// request it carried.
    fn record_call_failure(requests: &[SharedRequest], error: &ServiceError) -> Vec<BatchResult> {
        requests
            .iter()
            .map(|shared| {
                let mut request = shared.write().expect("request lock poisoned");
                request.set_response(ResponseData {
                    status: error.status,
                    headers: HashMap::new(),
                    body: Bytes::from(error.payload.clone()),
                });
                BatchResult {
                    request_id: request.id(),
                    order: request.order(),
                    protocol: error.protocol,
                    method: request.method(),
                    url: request.target_location().to_string(),
                    request_body: request.descriptor().body.clone(),
                    status: error.status,
                    error: Some(error.clone()),
                    payload: Bytes::from(error.payload.clone()),
                }
            })
            .collect()
    }

    /// Post-decode bookkeeping: commit marking, materialization, and the
    /// per-request callbacks.
    fn post_process(
        &self,
        requests: &[SharedRequest],
        results: &[BatchResult],
        raw: bool,
    ) -> Result<()> {
        let by_id: HashMap<Uuid, &SharedRequest> = requests
            .iter()
            .map(|shared| {
                (
                    shared.read().expect("request lock poisoned").id(),
                    shared,
                )
            })
            .collect();

        for result in results {
            let Some(shared) = by_id.get(&result.request_id) else {
                continue;
            };
            let request = shared.read().expect("request lock poisoned");

            if result.is_success() {
                let flags = request.descriptor().flags;
                if flags.commit_on_success || request.method().is_mutating() {
                    if let Some(entity) = request.entity() {
                        entity.write().mark_committed();
                    }
                }
                if !raw {
                    if let Some(materializer) = &self.materializer {
                        materializer.materialize(&request, result)?;
                    }
                }
            }
            if let Some(callback) = request.callback() {
                callback(result);
            }
        }
        Ok(())
    }
}
