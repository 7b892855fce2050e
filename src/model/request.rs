//! Logical batch requests.

use crate::model::batch::BatchResult;
use crate::model::descriptor::{CallTarget, Protocol, WireCallDescriptor};
use crate::model::entity::EntityHandle;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Post-processing callback invoked with the request's resolved result.
/// CSOM handlers receive the entire raw response text through the result
/// payload and extract their own portion.
pub type ResultCallback = Arc<dyn Fn(&BatchResult) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw response attributed to a request once its physical call resolved.
#[derive(Debug, Clone)]
pub struct ResponseData {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// One logical operation inside a [`crate::model::batch::Batch`].
pub struct BatchRequest {
    id: Uuid,
    order: usize,
    entity: Option<EntityHandle>,
    method: HttpMethod,
    descriptor: WireCallDescriptor,
    fallback: Option<WireCallDescriptor>,
    response: Option<ResponseData>,
    execution_needed: bool,
    on_result: Option<ResultCallback>,
}

impl std::fmt::Debug for BatchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRequest")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("method", &self.method)
            .field("protocol", &self.descriptor.protocol)
            .field("execution_needed", &self.execution_needed)
            .finish()
    }
}

impl BatchRequest {
    pub fn new(method: HttpMethod, descriptor: WireCallDescriptor) -> Self {
        Self {
            id: Uuid::new_v4(),
            order: 0,
            entity: None,
            method,
            descriptor,
            fallback: None,
            response: None,
            execution_needed: true,
            on_result: None,
        }
    }

    pub fn get(descriptor: WireCallDescriptor) -> Self {
        Self::new(HttpMethod::Get, descriptor)
    }

    pub fn with_entity(mut self, entity: EntityHandle) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_fallback(mut self, fallback: WireCallDescriptor) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_callback(mut self, callback: ResultCallback) -> Self {
        self.on_result = Some(callback);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub(crate) fn set_order(&mut self, order: usize) {
        self.order = order;
    }

    pub fn entity(&self) -> Option<&EntityHandle> {
        self.entity.as_ref()
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn descriptor(&self) -> &WireCallDescriptor {
        &self.descriptor
    }

    pub fn fallback(&self) -> Option<&WireCallDescriptor> {
        self.fallback.as_ref()
    }

    pub fn protocol(&self) -> Protocol {
        self.descriptor.protocol
    }

    /// Target URL of the primary descriptor (site URL for CSOM).
    pub fn target_location(&self) -> &str {
        self.descriptor.target.location()
    }

    pub fn execution_needed(&self) -> bool {
        self.execution_needed
    }

    pub(crate) fn set_execution_needed(&mut self, needed: bool) {
        self.execution_needed = needed;
    }

    pub fn response(&self) -> Option<&ResponseData> {
        self.response.as_ref()
    }

    pub(crate) fn set_response(&mut self, response: ResponseData) {
        self.response = Some(response);
        self.execution_needed = false;
    }

    pub fn callback(&self) -> Option<&ResultCallback> {
        self.on_result.as_ref()
    }

    /// Whether the fallback descriptor can stand in for the primary one on
    /// the REST path: present, REST, URL-targeted, fully resolved.
    pub fn has_usable_rest_fallback(&self) -> bool {
        match &self.fallback {
            Some(fb) => {
                fb.protocol == Protocol::Rest
                    && matches!(fb.target, CallTarget::Url(_))
                    && !fb.has_unresolved_tokens()
            }
            None => false,
        }
    }

    /// Rewrite the primary descriptor to the REST fallback. Returns false
    /// when no usable fallback exists; the request is left untouched.
    pub(crate) fn apply_rest_fallback(&mut self) -> bool {
        if !self.has_usable_rest_fallback() {
            return false;
        }
        // The fallback keeps the primary descriptor's behavioral flags.
        let flags = self.descriptor.flags;
        let mut fallback = self.fallback.take().expect("checked above");
        fallback.flags = flags;
        self.descriptor = fallback;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::descriptor::CallFlags;

    #[test]
    fn usable_fallback_requires_resolved_rest_url() {
        let graph = WireCallDescriptor::new(Protocol::Graph, "/sites/root");
        let rest_fb = WireCallDescriptor::new(
            Protocol::Rest,
            "https://contoso.sharepoint.com/_api/site",
        );
        let req = BatchRequest::get(graph.clone()).with_fallback(rest_fb);
        assert!(req.has_usable_rest_fallback());

        let unresolved = WireCallDescriptor::new(
            Protocol::Rest,
            "https://contoso.sharepoint.com/_api/web/lists/{List.Id}",
        );
        let req = BatchRequest::get(graph.clone()).with_fallback(unresolved);
        assert!(!req.has_usable_rest_fallback());

        let req = BatchRequest::get(graph);
        assert!(!req.has_usable_rest_fallback());
    }

    #[test]
    fn applying_fallback_rewrites_descriptor_and_keeps_flags() {
        let graph = WireCallDescriptor::new(Protocol::Graph, "/sites/root/lists")
            .with_flags(CallFlags::new().paged());
        let rest_fb = WireCallDescriptor::new(
            Protocol::Rest,
            "https://contoso.sharepoint.com/_api/web/lists",
        );
        let mut req = BatchRequest::get(graph).with_fallback(rest_fb);
        assert!(req.apply_rest_fallback());
        assert_eq!(req.protocol(), Protocol::Rest);
        assert!(req.descriptor().flags.paged);
        assert!(req.fallback().is_none());
    }
}
