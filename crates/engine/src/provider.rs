//! Provider contracts and the merged provider registry.
//!
//! A provider implements one of the pluggable contracts — request filter,
//! response filter, exception mapper, or body codec — and is registered
//! either declaratively on the interface or programmatically on the client
//! builder. [`ProviderRegistry::merge`] combines both origins under the
//! override rules and produces priority-ordered chains:
//!
//! - request-side contracts run in ascending priority order, ties broken by
//!   registration order (stable);
//! - response-side contracts run in the exact reverse of the request-side
//!   order.

use std::sync::Arc;

use restbind_types::{ClientError, DomainError, HeaderMap, WireResponse};
use tracing::debug;

use crate::codec::BodyCodec;
use crate::context::InvocationContext;

/// Priority assumed when neither the registration nor the provider supplies
/// one.
pub const DEFAULT_PROVIDER_PRIORITY: u32 = 5000;

/// Intercepts the outgoing request; may mutate the context or short-circuit
/// via [`InvocationContext::abort_with`].
pub trait RequestFilter: Send + Sync {
    fn priority(&self) -> u32 {
        DEFAULT_PROVIDER_PRIORITY
    }

    fn filter(&self, context: &mut InvocationContext) -> Result<(), ClientError>;
}

/// Intercepts the received response before exception mapping and decoding.
pub trait ResponseFilter: Send + Sync {
    fn priority(&self) -> u32 {
        DEFAULT_PROVIDER_PRIORITY
    }

    fn filter(&self, context: &InvocationContext, response: &mut WireResponse) -> Result<(), ClientError>;
}

/// Converts failed responses into domain errors.
///
/// For every evaluated response, `handles` is invoked on *all* registered
/// mappers; only the first match's `to_error` result is propagated.
pub trait ExceptionMapper: Send + Sync {
    fn priority(&self) -> u32 {
        DEFAULT_PROVIDER_PRIORITY
    }

    fn handles(&self, status: u16, headers: &HeaderMap) -> bool;

    fn to_error(&self, response: &WireResponse) -> DomainError;
}

/// The contract a registration targets.
#[derive(Clone)]
pub enum ProviderContract {
    RequestFilter(Arc<dyn RequestFilter>),
    ResponseFilter(Arc<dyn ResponseFilter>),
    ExceptionMapper(Arc<dyn ExceptionMapper>),
    BodyCodec(Arc<dyn BodyCodec>),
}

impl ProviderContract {
    fn kind(&self) -> &'static str {
        match self {
            Self::RequestFilter(_) => "request-filter",
            Self::ResponseFilter(_) => "response-filter",
            Self::ExceptionMapper(_) => "exception-mapper",
            Self::BodyCodec(_) => "body-codec",
        }
    }

    fn default_priority(&self) -> u32 {
        match self {
            Self::RequestFilter(f) => f.priority(),
            Self::ResponseFilter(f) => f.priority(),
            Self::ExceptionMapper(m) => m.priority(),
            Self::BodyCodec(c) => c.priority(),
        }
    }
}

/// Where a registration came from. Builder registrations are authoritative
/// for the same identity; a builder *instance* registration is never
/// replaced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegistrationOrigin {
    Declared,
    BuilderClass,
    BuilderInstance,
}

/// One provider registration: contract, identity, priority, origin.
#[derive(Clone)]
pub struct ProviderRegistration {
    /// Identity used for the override rules, defaulting to the provider's
    /// type name.
    pub identity: String,
    /// Explicit registration-time priority; when `None` the provider's own
    /// default applies.
    pub priority: Option<u32>,
    pub origin: RegistrationOrigin,
    pub contract: ProviderContract,
}

impl std::fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("identity", &self.identity)
            .field("priority", &self.priority)
            .field("origin", &self.origin)
            .field("contract", &self.contract.kind())
            .finish()
    }
}

impl ProviderRegistration {
    fn new(identity: String, contract: ProviderContract) -> Self {
        Self {
            identity,
            priority: None,
            origin: RegistrationOrigin::BuilderInstance,
            contract,
        }
    }

    pub fn request_filter<T: RequestFilter + 'static>(filter: T) -> Self {
        Self::new(
            std::any::type_name::<T>().to_string(),
            ProviderContract::RequestFilter(Arc::new(filter)),
        )
    }

    pub fn response_filter<T: ResponseFilter + 'static>(filter: T) -> Self {
        Self::new(
            std::any::type_name::<T>().to_string(),
            ProviderContract::ResponseFilter(Arc::new(filter)),
        )
    }

    pub fn exception_mapper<T: ExceptionMapper + 'static>(mapper: T) -> Self {
        Self::new(
            std::any::type_name::<T>().to_string(),
            ProviderContract::ExceptionMapper(Arc::new(mapper)),
        )
    }

    pub fn body_codec<T: BodyCodec + 'static>(codec: T) -> Self {
        Self::new(std::any::type_name::<T>().to_string(), ProviderContract::BodyCodec(Arc::new(codec)))
    }

    /// Register an already-shared exception mapper instance.
    pub fn shared_exception_mapper(identity: impl Into<String>, mapper: Arc<dyn ExceptionMapper>) -> Self {
        Self::new(identity.into(), ProviderContract::ExceptionMapper(mapper))
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Override the identity used for override matching.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub(crate) fn declared(mut self) -> Self {
        self.origin = RegistrationOrigin::Declared;
        self
    }

    pub(crate) fn builder_class(mut self) -> Self {
        self.origin = RegistrationOrigin::BuilderClass;
        self
    }

    fn effective_priority(&self) -> u32 {
        self.priority.unwrap_or_else(|| self.contract.default_priority())
    }
}

/// Immutable, priority-ordered provider chains for one client handle.
pub struct ProviderRegistry {
    request_filters: Vec<Arc<dyn RequestFilter>>,
    response_filters: Vec<Arc<dyn ResponseFilter>>,
    exception_mappers: Vec<Arc<dyn ExceptionMapper>>,
    body_codecs: Vec<Arc<dyn BodyCodec>>,
}

impl ProviderRegistry {
    /// Merge declared and builder registrations into ordered chains.
    ///
    /// A builder registration replaces any declared registration with the
    /// same identity. A builder-instance registration is final: later
    /// declared or class registrations of the same identity are dropped.
    pub fn merge(declared: &[ProviderRegistration], builder: &[ProviderRegistration]) -> Self {
        let mut combined: Vec<&ProviderRegistration> = Vec::with_capacity(declared.len() + builder.len());
        for registration in declared {
            let overridden = builder.iter().any(|candidate| candidate.identity == registration.identity);
            if overridden {
                debug!(
                    identity = %registration.identity,
                    contract = registration.contract.kind(),
                    "declared provider overridden by builder registration"
                );
                continue;
            }
            combined.push(registration);
        }
        let mut seen_instances: Vec<&str> = Vec::new();
        for registration in builder {
            if registration.origin != RegistrationOrigin::BuilderInstance
                && seen_instances.contains(&registration.identity.as_str())
            {
                debug!(
                    identity = %registration.identity,
                    contract = registration.contract.kind(),
                    "class registration ignored; instance already registered"
                );
                continue;
            }
            if registration.origin == RegistrationOrigin::BuilderInstance {
                seen_instances.push(registration.identity.as_str());
            }
            combined.push(registration);
        }

        let request_filters = ordered_chain(&combined, |contract| match contract {
            ProviderContract::RequestFilter(filter) => Some(Arc::clone(filter)),
            _ => None,
        });
        let mut response_filters = ordered_chain(&combined, |contract| match contract {
            ProviderContract::ResponseFilter(filter) => Some(Arc::clone(filter)),
            _ => None,
        });
        // Response-side contracts run in the reverse of request-path order.
        response_filters.reverse();
        let exception_mappers = ordered_chain(&combined, |contract| match contract {
            ProviderContract::ExceptionMapper(mapper) => Some(Arc::clone(mapper)),
            _ => None,
        });
        let body_codecs = ordered_chain(&combined, |contract| match contract {
            ProviderContract::BodyCodec(codec) => Some(Arc::clone(codec)),
            _ => None,
        });

        Self {
            request_filters,
            response_filters,
            exception_mappers,
            body_codecs,
        }
    }

    pub fn request_filters(&self) -> &[Arc<dyn RequestFilter>] {
        &self.request_filters
    }

    pub fn response_filters(&self) -> &[Arc<dyn ResponseFilter>] {
        &self.response_filters
    }

    /// Exception mappers in ascending priority order.
    pub fn exception_mappers(&self) -> &[Arc<dyn ExceptionMapper>] {
        &self.exception_mappers
    }

    pub fn body_codecs(&self) -> &[Arc<dyn BodyCodec>] {
        &self.body_codecs
    }
}

/// Stable ascending-priority sort over one contract's registrations.
fn ordered_chain<T>(combined: &[&ProviderRegistration], select: impl Fn(&ProviderContract) -> Option<T>) -> Vec<T> {
    let mut selected: Vec<(u32, T)> = combined
        .iter()
        .filter_map(|registration| select(&registration.contract).map(|item| (registration.effective_priority(), item)))
        .collect();
    selected.sort_by_key(|(priority, _)| *priority);
    selected.into_iter().map(|(_, item)| item).collect()
}
