//! Error taxonomy for the restbind client engine.
//!
//! Errors are split into five classes so callers can branch on *where* a
//! failure happened:
//!
//! - [`DefinitionError`]: the interface description failed build-time
//!   validation. Raised once at descriptor construction, never per call.
//! - [`ArgumentError`]: invalid builder or invocation input, raised
//!   synchronously at the offending call.
//! - [`ProcessingError`]: the call could not be completed (transport failure,
//!   timeout, redirect overflow, codec failure).
//! - [`DomainError`]: the target service answered and the response was mapped
//!   to an error by the exception-mapper chain.
//! - [`LifecycleError`]: the client handle was closed; no transport attempt
//!   was made.

use thiserror::Error;

/// Unified error type returned by the engine.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ClientError {
    /// True when the call reached the server and the response was mapped to
    /// an error, as opposed to a transport-level failure.
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Domain(_))
    }

    /// HTTP status carried by a domain error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Domain(domain) => Some(domain.status),
            _ => None,
        }
    }
}

/// Build-time validation failure for an interface description.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("method '{method}' on interface '{interface}' declares no HTTP verb")]
    MissingVerb { interface: String, method: String },

    #[error("method '{method}' on interface '{interface}' declares conflicting HTTP verbs {first} and {second}")]
    ConflictingVerbs {
        interface: String,
        method: String,
        first: String,
        second: String,
    },

    #[error("path template variable '{variable}' in method '{method}' has no bound parameter")]
    UnboundTemplateVariable { method: String, variable: String },

    #[error("path parameter '{parameter}' in method '{method}' matches no template variable")]
    UnmatchedPathParameter { method: String, parameter: String },

    #[error("header rule '{header}' references unknown resolver '{resolver}'")]
    UnknownResolver { header: String, resolver: String },

    #[error("resolver '{resolver}' for header '{header}' is reachable through more than one registration")]
    AmbiguousResolver { header: String, resolver: String },

    #[error("duplicate header rule '{name}' in {scope} scope")]
    DuplicateHeaderRule { scope: String, name: String },

    #[error("header rule '{name}' declares no literal values")]
    EmptyHeaderRule { name: String },

    #[error("interface '{interface}' declares no methods")]
    NoMethods { interface: String },

    #[error("configured provider '{name}' is not registered on the builder")]
    UnknownConfiguredProvider { name: String },
}

/// Invalid input to the client builder or to an invocation.
#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("base URI must not be empty")]
    EmptyBaseUri,

    #[error("malformed base URI '{uri}': {reason}")]
    MalformedBaseUri { uri: String, reason: String },

    #[error("malformed proxy address '{address}'")]
    MalformedProxyAddress { address: String },

    #[error("proxy port {port} is out of range")]
    PortOutOfRange { port: u32 },

    #[error("{which} timeout must be greater than zero")]
    ZeroTimeout { which: String },

    #[error("interface declares no method named '{method}'")]
    UnknownMethod { method: String },

    #[error("method '{method}' is missing a value for parameter '{parameter}'")]
    MissingArgument { method: String, parameter: String },

    #[error("method '{method}' is declared with return shape {declared}, not callable through {requested}")]
    ReturnShapeMismatch {
        method: String,
        declared: String,
        requested: String,
    },
}

/// Per-call failure before or during the transport exchange.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("connect timeout after {millis}ms contacting {uri}")]
    ConnectTimeout { uri: String, millis: u64 },

    #[error("read timeout after {millis}ms waiting on {uri}")]
    ReadTimeout { uri: String, millis: u64 },

    #[error("connection to {uri} failed: {message}")]
    Connection { uri: String, message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("redirect chain exceeded {hops} hops")]
    RedirectLoop { hops: u32 },

    #[error("required header '{header}' could not be resolved: {message}")]
    HeaderResolution { header: String, message: String },

    #[error("no codec can read media type '{media_type}'")]
    NoReader { media_type: String },

    #[error("no codec can write media type '{media_type}'")]
    NoWriter { media_type: String },

    #[error("failed to decode '{media_type}' body: {message}")]
    Decode { media_type: String, message: String },

    #[error("failed to encode '{media_type}' body: {message}")]
    Encode { media_type: String, message: String },

    #[error("executor failure: {message}")]
    Executor { message: String },
}

impl ProcessingError {
    /// Create a generic transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Create a decode error for a media type.
    pub fn decode(media_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            media_type: media_type.into(),
            message: message.into(),
        }
    }

    /// Create an encode error for a media type.
    pub fn encode(media_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            media_type: media_type.into(),
            message: message.into(),
        }
    }
}

/// Error synthesized from a received HTTP response by the exception-mapper
/// chain. Carries the original status and body when available.
#[derive(Debug, Error)]
#[error("http fault: status {status}: {message}")]
pub struct DomainError {
    pub status: u16,
    pub message: String,
    pub body: Option<Vec<u8>>,
}

impl DomainError {
    /// Create a domain error from a status and message, without a body.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            body: None,
        }
    }

    /// Attach the response body to this error.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Response body as UTF-8 text, lossily converted.
    pub fn body_text(&self) -> Option<String> {
        self.body.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

/// The client handle was closed before the invocation started.
#[derive(Debug, Error)]
#[error("client handle for interface '{interface}' is closed")]
pub struct LifecycleError {
    pub interface: String,
}

impl LifecycleError {
    pub fn closed(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }
}
