//! Client builder and invocation handle.
//!
//! [`ClientBuilder`] collects base URI, transport settings, providers,
//! resolvers, and the async-boundary setup, validating each input as it is
//! supplied. [`ClientBuilder::build`] compiles the interface description into
//! a cached descriptor, merges declared and builder providers, and hands out
//! an immutable [`ClientHandle`]. Handles are cheap to clone and safe to
//! share; [`ClientHandle::close`] is idempotent and rejects every later
//! invocation before any transport work happens.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use restbind_transport::{ReqwestTransport, TlsOptions, Transport, TransportOptions};
use restbind_types::{ArgumentError, ClientError, DefinitionError, LifecycleError, QueryStyle, ReturnShape};
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::args::Args;
use crate::boundary::{self, ContextInterceptor, Executor, PendingInvocation, block_on_future};
use crate::codec::CodecRegistry;
use crate::config::{self, ConfigSource};
use crate::declare::{InterfaceDef, ResolverFn};
use crate::descriptor::{DescriptorCache, InterfaceDescriptor, MethodDescriptor};
use crate::pipeline::{ClientResponse, InvocationPipeline};
use crate::provider::{ProviderRegistration, ProviderRegistry};

fn parse_base_uri(uri: &str) -> Result<Url, ClientError> {
    if uri.trim().is_empty() {
        return Err(ArgumentError::EmptyBaseUri.into());
    }
    Url::parse(uri).map_err(|error| {
        ArgumentError::MalformedBaseUri {
            uri: uri.to_string(),
            reason: error.to_string(),
        }
        .into()
    })
}

/// Assembles a [`ClientHandle`] for one interface description.
///
/// Setters that can receive invalid input validate eagerly and return
/// `Result`, so a bad base URI or a zero timeout surfaces at the call that
/// supplied it rather than at build time.
#[derive(Default)]
pub struct ClientBuilder {
    base_uri: Option<Url>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    follow_redirects: bool,
    proxy: Option<String>,
    tls: TlsOptions,
    providers: Vec<ProviderRegistration>,
    named_providers: IndexMap<String, ProviderRegistration>,
    resolvers: IndexMap<String, ResolverFn>,
    interceptors: Vec<Arc<dyn ContextInterceptor>>,
    executor: Executor,
    transport: Option<Arc<dyn Transport>>,
    config_source: Option<Arc<dyn ConfigSource>>,
    alias: Option<String>,
    query_style: Option<QueryStyle>,
    default_status_mapping: bool,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_uri", &self.base_uri)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("follow_redirects", &self.follow_redirects)
            .field("proxy", &self.proxy)
            .field("provider_count", &self.providers.len())
            .field("named_provider_count", &self.named_providers.len())
            .field("resolver_count", &self.resolvers.len())
            .field("interceptor_count", &self.interceptors.len())
            .field("alias", &self.alias)
            .field("query_style", &self.query_style)
            .field("default_status_mapping", &self.default_status_mapping)
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            default_status_mapping: true,
            ..Self::default()
        }
    }

    /// Set the base URI every method path resolves against.
    pub fn base_uri(mut self, uri: impl AsRef<str>) -> Result<Self, ClientError> {
        self.base_uri = Some(parse_base_uri(uri.as_ref())?);
        Ok(self)
    }

    /// Route all requests through an HTTP proxy.
    pub fn proxy(mut self, host: &str, port: u32) -> Result<Self, ClientError> {
        if host.trim().is_empty() || host.contains('/') || host.contains(char::is_whitespace) {
            return Err(ArgumentError::MalformedProxyAddress {
                address: host.to_string(),
            }
            .into());
        }
        if port == 0 || port > u16::MAX as u32 {
            return Err(ArgumentError::PortOutOfRange { port }.into());
        }
        self.proxy = Some(format!("http://{host}:{port}"));
        Ok(self)
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Result<Self, ClientError> {
        if timeout.is_zero() {
            return Err(ArgumentError::ZeroTimeout { which: "connect".into() }.into());
        }
        self.connect_timeout = Some(timeout);
        Ok(self)
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Result<Self, ClientError> {
        if timeout.is_zero() {
            return Err(ArgumentError::ZeroTimeout { which: "read".into() }.into());
        }
        self.read_timeout = Some(timeout);
        Ok(self)
    }

    /// Follow 3xx redirects transparently, up to the hop limit. Off by
    /// default.
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Skip TLS certificate verification. Test environments only.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.tls.accept_invalid_certs = accept;
        self
    }

    /// Trust an additional PEM-encoded root certificate.
    pub fn root_certificate_pem(mut self, pem: Vec<u8>) -> Self {
        self.tls.extra_root_ca_pem = Some(pem);
        self
    }

    /// Register a provider instance. Instance registrations are final: they
    /// override declared providers with the same identity and are never
    /// replaced themselves.
    pub fn register(mut self, registration: ProviderRegistration) -> Self {
        self.providers.push(registration);
        self
    }

    /// Register a provider under a configuration-selectable name. It only
    /// becomes active when per-interface configuration lists that name.
    pub fn register_named(mut self, name: impl Into<String>, registration: ProviderRegistration) -> Self {
        self.named_providers.insert(name.into(), registration.builder_class());
        self
    }

    /// Register an external header resolver, reachable from computed header
    /// rules on any interface built through this builder.
    pub fn resolver(mut self, name: impl Into<String>, resolver: ResolverFn) -> Self {
        self.resolvers.insert(name.into(), resolver);
        self
    }

    /// Register a context interceptor for the async boundary.
    pub fn interceptor<I: ContextInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Executor for asynchronous invocations. Defaults to the ambient Tokio
    /// runtime at submit time.
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    /// Replace the production transport, e.g. with a recording double.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config_source = Some(source);
        self
    }

    /// Alias key looked up in the configuration source, below the stable
    /// interface identifier in precedence.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn query_style(mut self, style: QueryStyle) -> Self {
        self.query_style = Some(style);
        self
    }

    /// Turn off the built-in status ≥ 400 exception mapper.
    pub fn disable_default_mapper(mut self) -> Self {
        self.default_status_mapping = false;
        self
    }

    /// Compile the interface description and assemble a handle.
    ///
    /// Configuration precedence: overrides under the interface identifier
    /// beat overrides under the alias, which beat builder settings.
    pub fn build(self, def: &InterfaceDef) -> Result<ClientHandle, ClientError> {
        let overrides = config::resolve_overrides(self.config_source.as_ref(), &def.name, self.alias.as_deref());

        let base_uri = match &overrides.base_uri {
            Some(uri) => parse_base_uri(uri)?,
            None => self.base_uri.clone().ok_or(ArgumentError::EmptyBaseUri)?,
        };
        let query_style = overrides
            .query_style
            .or(def.query_style)
            .or(self.query_style)
            .unwrap_or_default();

        let mut options = TransportOptions {
            tls: self.tls.clone(),
            proxy: self.proxy.clone(),
            ..TransportOptions::default()
        };
        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout = timeout;
        }
        if let Some(timeout) = self.read_timeout {
            options.read_timeout = timeout;
        }
        if let Some(millis) = overrides.connect_timeout_ms {
            options.connect_timeout = Duration::from_millis(millis);
        }
        if let Some(millis) = overrides.read_timeout_ms {
            options.read_timeout = Duration::from_millis(millis);
        }
        if let Some(accept) = overrides.accept_invalid_certs {
            options.tls.accept_invalid_certs = accept;
        }
        let follow_redirects = overrides.follow_redirects.unwrap_or(self.follow_redirects);
        let default_status_mapping = overrides.default_status_mapping.unwrap_or(self.default_status_mapping);

        // Configuration-selected named providers join the builder set.
        let mut builder_providers = self.providers.clone();
        if let Some(names) = &overrides.providers {
            for name in names {
                let registration = self.named_providers.get(name).ok_or_else(|| {
                    DefinitionError::UnknownConfiguredProvider { name: name.clone() }
                })?;
                builder_providers.push(registration.clone());
            }
        }

        let descriptor = DescriptorCache::global().get_or_build(
            def,
            &base_uri,
            query_style,
            &self.resolvers,
            overrides.fingerprint(),
        )?;
        let providers = Arc::new(ProviderRegistry::merge(&descriptor.declared_providers, &builder_providers));

        let mut codecs = CodecRegistry::with_defaults();
        for codec in providers.body_codecs().iter().rev() {
            codecs.push_front(Arc::clone(codec));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&options)?),
        };

        let mut interceptors = self.interceptors;
        interceptors.sort_by_key(|interceptor| interceptor.priority());

        let pipeline = InvocationPipeline::new(
            Arc::clone(&descriptor),
            providers,
            Arc::new(codecs),
            transport,
            options,
            follow_redirects,
            default_status_mapping,
        );

        info!(
            interface = %descriptor.name,
            base_uri = %descriptor.base_uri,
            method_count = descriptor.method_names().count(),
            "client handle built"
        );
        Ok(ClientHandle {
            inner: Arc::new(HandleInner {
                descriptor,
                pipeline,
                interceptors,
                executor: self.executor,
            }),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

struct HandleInner {
    descriptor: Arc<InterfaceDescriptor>,
    pipeline: InvocationPipeline,
    interceptors: Vec<Arc<dyn ContextInterceptor>>,
    executor: Executor,
}

/// Shareable handle for invoking one interface. Clones share the closed flag,
/// so closing any clone closes them all.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<HandleInner>,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("interface", &self.inner.descriptor.name)
            .field("base_uri", &self.inner.descriptor.base_uri.as_str())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ClientHandle {
    pub fn interface(&self) -> &str {
        &self.inner.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<InterfaceDescriptor> {
        &self.inner.descriptor
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LifecycleError::closed(&self.inner.descriptor.name).into());
        }
        Ok(())
    }

    fn lookup(&self, method: &str) -> Result<Arc<MethodDescriptor>, ClientError> {
        self.inner
            .descriptor
            .method(method)
            .map(Arc::clone)
            .ok_or_else(|| {
                ArgumentError::UnknownMethod {
                    method: method.to_string(),
                }
                .into()
            })
    }

    fn check_shape(descriptor: &MethodDescriptor, expected: ReturnShape, requested: &str) -> Result<(), ClientError> {
        if descriptor.return_shape != expected {
            return Err(ArgumentError::ReturnShapeMismatch {
                method: descriptor.name.clone(),
                declared: descriptor.return_shape.as_str().to_string(),
                requested: requested.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Invoke a value-shaped method and decode its entity.
    pub async fn invoke(&self, method: &str, args: &Args) -> Result<Value, ClientError> {
        self.ensure_open()?;
        let descriptor = self.lookup(method)?;
        Self::check_shape(&descriptor, ReturnShape::Value, "invoke")?;
        let response = self.inner.pipeline.invoke(&descriptor, args).await?;
        response.entity()
    }

    /// Invoke a response-shaped method, returning status, headers, and body.
    pub async fn invoke_response(&self, method: &str, args: &Args) -> Result<ClientResponse, ClientError> {
        self.ensure_open()?;
        let descriptor = self.lookup(method)?;
        Self::check_shape(&descriptor, ReturnShape::Response, "invoke_response")?;
        self.inner.pipeline.invoke(&descriptor, args).await
    }

    /// Synchronous form of [`invoke`](Self::invoke), driving the pipeline on
    /// the current thread or the ambient runtime.
    pub fn invoke_blocking(&self, method: &str, args: &Args) -> Result<Value, ClientError> {
        block_on_future(self.invoke(method, args))
    }

    /// Dispatch an async-shaped method onto the executor.
    ///
    /// Interceptor `prepare` phases complete on the calling thread before
    /// this returns; the pipeline itself runs on a worker task.
    pub fn submit(&self, method: &str, args: Args) -> Result<PendingInvocation<Value>, ClientError> {
        self.ensure_open()?;
        let descriptor = self.lookup(method)?;
        Self::check_shape(&descriptor, ReturnShape::Async, "submit")?;
        let inner = Arc::clone(&self.inner);
        boundary::dispatch(&self.inner.interceptors, &self.inner.executor, async move {
            let response = inner.pipeline.invoke(&descriptor, &args).await?;
            response.entity()
        })
    }

    /// Close the handle. Safe to call repeatedly; only the first call logs.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(interface = %self.inner.descriptor.name, "client handle closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
