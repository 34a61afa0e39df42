//! Per-call invocation state.

use std::sync::Arc;

use restbind_types::{HeaderMap, WireResponse};
use serde_json::Value;
use url::Url;

use crate::descriptor::MethodDescriptor;

/// Mutable state owned by exactly one in-flight invocation.
///
/// Request filters receive `&mut InvocationContext` and may rewrite the
/// target URI, headers, or entity, or short-circuit the call entirely with
/// [`InvocationContext::abort_with`]. Response filters and exception mappers
/// see the context read-only for introspection of the invoked method.
#[derive(Debug)]
pub struct InvocationContext {
    method: Arc<MethodDescriptor>,
    uri: Url,
    headers: HeaderMap,
    entity: Option<Value>,
    aborted: Option<WireResponse>,
}

impl InvocationContext {
    pub(crate) fn new(method: Arc<MethodDescriptor>, uri: Url, headers: HeaderMap, entity: Option<Value>) -> Self {
        Self {
            method,
            uri,
            headers,
            entity,
            aborted: None,
        }
    }

    /// Descriptor of the method being invoked, for provider introspection.
    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: Url) {
        self.uri = uri;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn entity(&self) -> Option<&Value> {
        self.entity.as_ref()
    }

    pub fn set_entity(&mut self, entity: Option<Value>) {
        self.entity = entity;
    }

    /// Short-circuit the invocation with a synthetic response. Remaining
    /// request filters and the transport call are skipped.
    pub fn abort_with(&mut self, response: WireResponse) {
        self.aborted = Some(response);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub(crate) fn take_abort(&mut self) -> Option<WireResponse> {
        self.aborted.take()
    }
}
