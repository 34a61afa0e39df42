//! The invocation pipeline: one method call, end to end.
//!
//! Steps, strictly ordered: build the target URI, resolve headers, run
//! ascending-priority request filters (any of which may short-circuit with a
//! synthetic response), perform the transport exchange with bounded redirect
//! following, run response filters in reversed order, evaluate the
//! exception-mapper chain, and hand the buffered response to the caller for
//! decoding.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use restbind_transport::{Transport, TransportOptions};
use restbind_types::{ArgumentError, ClientError, MediaType, ProcessingError, WireRequest, WireResponse};
use serde_json::Value;
use tracing::{debug, warn};

use crate::args::{Args, value_to_string, value_to_strings};
use crate::codec::CodecRegistry;
use crate::context::InvocationContext;
use crate::declare::BindingKind;
use crate::descriptor::{InterfaceDescriptor, MethodDescriptor};
use crate::headers;
use crate::mapper::{self, DefaultStatusMapper};
use crate::provider::{ExceptionMapper, ProviderRegistry};
use crate::uri;

/// Maximum transparent redirect hops when redirect-following is enabled.
pub const REDIRECT_HOP_LIMIT: u32 = 5;

/// A completed exchange: status, headers, and the buffered body, plus the
/// codec registry needed to decode the entity on demand.
pub struct ClientResponse {
    response: WireResponse,
    codecs: Arc<CodecRegistry>,
    declared_media: Option<MediaType>,
}

impl fmt::Debug for ClientResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientResponse")
            .field("status", &self.response.status)
            .field("headers", &self.response.headers)
            .field("body_len", &self.response.body.len())
            .field("declared_media", &self.declared_media)
            .finish_non_exhaustive()
    }
}

impl ClientResponse {
    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn headers(&self) -> &restbind_types::HeaderMap {
        &self.response.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.response.body
    }

    pub fn body_text(&self) -> String {
        self.response.body_text()
    }

    /// Decode the body into the declared return shape. The media type comes
    /// from the response `Content-Type`, falling back to the method's
    /// declared `produces`, then JSON.
    pub fn entity(&self) -> Result<Value, ClientError> {
        let media = self
            .response
            .content_type()
            .or_else(|| self.declared_media.clone())
            .unwrap_or_else(MediaType::json);
        Ok(self.codecs.read(&self.response.body, &media)?)
    }
}

/// Orchestrates invocations for one client handle. Immutable once built;
/// shared across concurrent calls without locking.
pub(crate) struct InvocationPipeline {
    pub descriptor: Arc<InterfaceDescriptor>,
    pub providers: Arc<ProviderRegistry>,
    pub codecs: Arc<CodecRegistry>,
    pub transport: Arc<dyn Transport>,
    pub options: TransportOptions,
    pub follow_redirects: bool,
    /// Full mapper chain: user mappers in ascending priority, then the
    /// built-in status mapper when enabled.
    mappers: Vec<Arc<dyn ExceptionMapper>>,
}

impl InvocationPipeline {
    pub(crate) fn new(
        descriptor: Arc<InterfaceDescriptor>,
        providers: Arc<ProviderRegistry>,
        codecs: Arc<CodecRegistry>,
        transport: Arc<dyn Transport>,
        options: TransportOptions,
        follow_redirects: bool,
        default_status_mapping: bool,
    ) -> Self {
        let mut mappers: Vec<Arc<dyn ExceptionMapper>> = providers.exception_mappers().to_vec();
        if default_status_mapping {
            // Rank u32::MAX: evaluated last, after any user mapper.
            mappers.push(Arc::new(DefaultStatusMapper));
        }
        Self {
            descriptor,
            providers,
            codecs,
            transport,
            options,
            follow_redirects,
            mappers,
        }
    }

    pub(crate) async fn invoke(&self, method: &Arc<MethodDescriptor>, args: &Args) -> Result<ClientResponse, ClientError> {
        let started = Instant::now();

        // 1. Target URI.
        let mut path_variables = IndexMap::new();
        for param in method.params.iter().filter(|param| param.kind == BindingKind::Path) {
            let value = args.get(&param.name).filter(|value| !value.is_null()).ok_or_else(|| {
                ArgumentError::MissingArgument {
                    method: method.name.clone(),
                    parameter: param.name.clone(),
                }
            })?;
            path_variables.insert(param.target.clone(), value_to_string(value));
        }
        let mut query_pairs: Vec<(String, Vec<String>)> = Vec::new();
        for param in method.params.iter().filter(|param| param.kind == BindingKind::Query) {
            if let Some(value) = args.get(&param.name).filter(|value| !value.is_null()) {
                query_pairs.push((param.target.clone(), value_to_strings(value)));
            }
        }
        let target = uri::build_target(
            &self.descriptor.base_uri,
            &self.descriptor.base_path,
            &method.path,
            &path_variables,
            &query_pairs,
            self.descriptor.query_style,
        )?;

        // 2. Headers and content negotiation.
        let mut headers = headers::resolve(&self.descriptor.header_rules, method, args)?;
        if !method.produces.is_empty() && !headers.contains("accept") {
            let accept: Vec<&str> = method.produces.iter().map(MediaType::as_str).collect();
            headers.set("Accept", accept.join(", "));
        }
        let entity = method
            .params
            .iter()
            .find(|param| param.kind == BindingKind::Body)
            .and_then(|param| args.get(&param.name))
            .filter(|value| !value.is_null())
            .cloned();
        let content_type = method.consumes.first().cloned().unwrap_or_else(MediaType::json);
        if entity.is_some() && !headers.contains("content-type") {
            headers.set("Content-Type", content_type.as_str());
        }

        debug!(
            interface = %self.descriptor.name,
            method = %method.name,
            verb = %method.verb,
            uri = %target,
            "invocation started"
        );
        let mut context = InvocationContext::new(Arc::clone(method), target, headers, entity);

        // 3. Request filters, ascending priority; any may short-circuit.
        for filter in self.providers.request_filters() {
            filter.filter(&mut context)?;
            if context.is_aborted() {
                debug!(method = %method.name, "request filter short-circuited the invocation");
                break;
            }
        }

        // 4–5. Transport exchange with bounded redirect following, unless a
        // filter already supplied a synthetic response.
        let mut response = match context.take_abort() {
            Some(synthetic) => synthetic,
            None => self.exchange(&context, &content_type).await?,
        };

        // 6. Response filters in reversed effective order.
        for filter in self.providers.response_filters() {
            filter.filter(&context, &mut response)?;
        }

        // 7. Exception-mapper chain.
        if let Some(domain) = mapper::evaluate(&self.mappers, &response) {
            warn!(
                interface = %self.descriptor.name,
                method = %method.name,
                status = response.status,
                duration_ms = started.elapsed().as_millis(),
                "invocation mapped to domain error"
            );
            return Err(domain.into());
        }

        debug!(
            interface = %self.descriptor.name,
            method = %method.name,
            status = response.status,
            duration_ms = started.elapsed().as_millis(),
            "invocation completed"
        );

        // 8. Decoding happens lazily against the buffered body.
        Ok(ClientResponse {
            response,
            codecs: Arc::clone(&self.codecs),
            declared_media: method.produces.first().cloned(),
        })
    }

    async fn exchange(&self, context: &InvocationContext, content_type: &MediaType) -> Result<WireResponse, ClientError> {
        let body = match context.entity() {
            Some(value) => Some(self.codecs.write(value, content_type)?),
            None => None,
        };

        let mut target = context.uri().clone();
        let mut hops = 0u32;
        loop {
            let request = WireRequest {
                verb: context.method().verb,
                uri: target.to_string(),
                headers: context.headers().clone(),
                body: body.clone(),
            };
            let response = self.transport.send(request, &self.options).await?;

            if !self.follow_redirects || !response.is_redirect() {
                return Ok(response);
            }
            let Some(location) = response.location() else {
                return Ok(response);
            };
            hops += 1;
            if hops > REDIRECT_HOP_LIMIT {
                return Err(ProcessingError::RedirectLoop { hops: REDIRECT_HOP_LIMIT }.into());
            }
            debug!(
                method = %context.method().name,
                status = response.status,
                location = %location,
                hop = hops,
                "following redirect"
            );
            target = uri::resolve_location(&target, location)?;
        }
    }
}
