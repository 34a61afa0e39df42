//! Shared value types for the restbind client engine.
//!
//! This crate holds the vocabulary exchanged between the invocation engine,
//! transports, and codecs:
//!
//! - [`HttpVerb`], [`MediaType`], [`QueryStyle`], [`ReturnShape`]
//! - the ordered multi-valued [`HeaderMap`]
//! - the wire-level [`WireRequest`] / [`WireResponse`] pair
//! - the five-class error taxonomy under [`ClientError`]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod error;
pub mod headers;

pub use error::{ArgumentError, ClientError, DefinitionError, DomainError, LifecycleError, ProcessingError};
pub use headers::HeaderMap;

/// HTTP request verb understood by the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum HttpVerb {
    Get,
    Put,
    Post,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpVerb {
    /// Canonical uppercase wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Verbs that conventionally carry no request body.
    pub fn is_bodyless(&self) -> bool {
        matches!(self, Self::Get | Self::Delete | Self::Head | Self::Options)
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an [`HttpVerb`] from text.
#[derive(Debug, Error)]
#[error("unknown HTTP verb '{0}'")]
pub struct ParseHttpVerbError(pub String);

impl FromStr for HttpVerb {
    type Err = ParseHttpVerbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "PUT" => Ok(Self::Put),
            "POST" => Ok(Self::Post),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            other => Err(ParseHttpVerbError(other.to_string())),
        }
    }
}

/// Media type, stored as the full string including parameters.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaType(String);

impl MediaType {
    pub const JSON: &'static str = "application/json";
    pub const TEXT: &'static str = "text/plain";
    pub const OCTET_STREAM: &'static str = "application/octet-stream";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn json() -> Self {
        Self(Self::JSON.to_string())
    }

    pub fn text() -> Self {
        Self(Self::TEXT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `type/subtype` with parameters stripped, lowercased.
    pub fn essence(&self) -> String {
        self.0
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    /// Compare by essence, ignoring parameters and case.
    pub fn matches(&self, other: &MediaType) -> bool {
        self.essence() == other.essence()
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MediaType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// How multi-valued query parameters are rendered on the target URI.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryStyle {
    /// `?p=foo&p=bar&p=baz`
    #[default]
    Repeated,
    /// `?p=foo,bar,baz`
    CommaJoined,
    /// `?p[]=foo&p[]=bar&p[]=baz`
    BracketedRepeated,
}

/// Declared shape of a method's return value.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReturnShape {
    /// The decoded entity itself.
    #[default]
    Value,
    /// The full response (status, headers, body). The exception-mapper
    /// chain still applies; a mapped status surfaces as an error, not as a
    /// response value.
    Response,
    /// The pipeline runs on a worker task; the caller receives a pending
    /// invocation to await.
    Async,
}

impl ReturnShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Response => "response",
            Self::Async => "async",
        }
    }
}

/// Outbound request handed to a transport.
#[derive(Clone, Debug)]
pub struct WireRequest {
    pub verb: HttpVerb,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl WireRequest {
    pub fn new(verb: HttpVerb, uri: impl Into<String>) -> Self {
        Self {
            verb,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// Inbound response returned by a transport. The body is fully buffered so
/// exception mappers and codecs can each read it without stream rewinding.
#[derive(Clone, Debug)]
pub struct WireResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Redirect statuses the engine will transparently follow when enabled.
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    /// `Location` header target for redirect responses.
    pub fn location(&self) -> Option<&str> {
        self.headers.get("location")
    }

    /// Body as UTF-8 text, lossily converted.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// `Content-Type` header as a media type, if present.
    pub fn content_type(&self) -> Option<MediaType> {
        self.headers.get("content-type").map(MediaType::from)
    }
}
