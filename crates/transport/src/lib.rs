//! Transport seam for the restbind invocation engine.
//!
//! The engine performs HTTP exchanges through the narrow [`Transport`] trait;
//! everything below that trait (connection pooling, TLS handshakes, proxies)
//! belongs to the transport implementation. This crate provides:
//!
//! - [`ReqwestTransport`], the production implementation backed by a
//!   preconfigured `reqwest::Client` with automatic redirects disabled — the
//!   engine owns redirect policy;
//! - [`RecordingTransport`], a scriptable test double that counts calls and
//!   captures outgoing requests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Certificate, Client, Method, Proxy};
use restbind_types::{HeaderMap, ProcessingError, WireRequest, WireResponse};
use tracing::debug;

/// TLS material applied to outbound connections.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// Disable certificate verification. Test environments only.
    pub accept_invalid_certs: bool,
    /// Additional trusted root certificate, PEM-encoded.
    pub extra_root_ca_pem: Option<Vec<u8>>,
}

/// Per-client transport configuration.
#[derive(Clone, Debug)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub tls: TlsOptions,
    /// Proxy URL such as `http://proxy.internal:3128`.
    pub proxy: Option<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            tls: TlsOptions::default(),
            proxy: None,
        }
    }
}

/// One HTTP exchange. Implementations must not follow redirects themselves.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: WireRequest, options: &TransportOptions) -> Result<WireResponse, ProcessingError>;
}

/// Production transport backed by `reqwest`.
///
/// The client is built once from [`TransportOptions`]; the read timeout is
/// applied per request so a single client serves every invocation of a
/// handle.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client honoring connect timeout, TLS material, and proxy.
    pub fn new(options: &TransportOptions) -> Result<Self, ProcessingError> {
        let mut builder = Client::builder()
            .connect_timeout(options.connect_timeout)
            .redirect(Policy::none());

        if options.tls.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(pem) = &options.tls.extra_root_ca_pem {
            let certificate = Certificate::from_pem(pem)
                .map_err(|error| ProcessingError::transport(format!("invalid root certificate: {error}")))?;
            builder = builder.add_root_certificate(certificate);
        }
        if let Some(proxy_url) = &options.proxy {
            let proxy = Proxy::all(proxy_url)
                .map_err(|error| ProcessingError::transport(format!("invalid proxy '{proxy_url}': {error}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|error| ProcessingError::transport(format!("could not build HTTP client: {error}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: WireRequest, options: &TransportOptions) -> Result<WireResponse, ProcessingError> {
        let uri = request.uri.clone();
        let method = Method::from_bytes(request.verb.as_str().as_bytes())
            .map_err(|error| ProcessingError::transport(error.to_string()))?;

        let mut builder = self
            .client
            .request(method, &uri)
            .timeout(options.read_timeout)
            .headers(to_reqwest_headers(&request.headers)?);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        debug!(verb = %request.verb, uri = %uri, "transport send");
        let response = builder.send().await.map_err(|error| classify_send_error(&uri, options, error))?;

        let status = response.status().as_u16();
        let headers = from_reqwest_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|error| classify_send_error(&uri, options, error))?
            .to_vec();

        debug!(uri = %uri, status, body_len = body.len(), "transport received");
        Ok(WireResponse { status, headers, body })
    }
}

fn to_reqwest_headers(headers: &HeaderMap) -> Result<reqwest::header::HeaderMap, ProcessingError> {
    let mut wire = reqwest::header::HeaderMap::new();
    for (name, values) in headers.iter() {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|error| ProcessingError::transport(format!("invalid header name '{name}': {error}")))?;
        for value in values {
            let header_value = HeaderValue::from_str(value)
                .map_err(|error| ProcessingError::transport(format!("invalid value for header '{name}': {error}")))?;
            wire.append(header_name.clone(), header_value);
        }
    }
    Ok(wire)
}

fn from_reqwest_headers(wire: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in wire.iter() {
        headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    headers
}

fn classify_send_error(uri: &str, options: &TransportOptions, error: reqwest::Error) -> ProcessingError {
    if error.is_timeout() {
        if error.is_connect() {
            return ProcessingError::ConnectTimeout {
                uri: uri.to_string(),
                millis: options.connect_timeout.as_millis() as u64,
            };
        }
        return ProcessingError::ReadTimeout {
            uri: uri.to_string(),
            millis: options.read_timeout.as_millis() as u64,
        };
    }
    if error.is_connect() {
        return ProcessingError::Connection {
            uri: uri.to_string(),
            message: error.to_string(),
        };
    }
    ProcessingError::transport(error.to_string())
}

/// Scriptable in-memory transport for tests and previews.
///
/// Responses are served from a FIFO script; when the script is empty an empty
/// `200` is returned. Every call increments a counter and records the
/// outgoing request, so tests can assert "zero transport calls" or inspect
/// the exact wire request the engine produced.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: AtomicUsize,
    seen: Mutex<Vec<WireRequest>>,
    script: Mutex<VecDeque<WireResponse>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response to serve.
    pub fn enqueue(&self, response: WireResponse) {
        self.script.lock().expect("script lock").push_back(response);
    }

    /// Number of `send` calls performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Copies of every request sent through this transport.
    pub fn requests(&self) -> Vec<WireRequest> {
        self.seen.lock().expect("seen lock").clone()
    }

    /// The most recent request, if any.
    pub fn last_request(&self) -> Option<WireRequest> {
        self.seen.lock().expect("seen lock").last().cloned()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: WireRequest, _options: &TransportOptions) -> Result<WireResponse, ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().expect("seen lock").push(request);
        let scripted = self.script.lock().expect("script lock").pop_front();
        Ok(scripted.unwrap_or_else(|| WireResponse::new(200)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restbind_types::HttpVerb;

    #[tokio::test]
    async fn recording_transport_counts_calls_and_serves_script_in_order() {
        let transport = RecordingTransport::new();
        transport.enqueue(WireResponse::new(201));
        transport.enqueue(WireResponse::new(404));

        let options = TransportOptions::default();
        let first = transport
            .send(WireRequest::new(HttpVerb::Get, "http://localhost/a"), &options)
            .await
            .unwrap();
        let second = transport
            .send(WireRequest::new(HttpVerb::Get, "http://localhost/b"), &options)
            .await
            .unwrap();
        let third = transport
            .send(WireRequest::new(HttpVerb::Get, "http://localhost/c"), &options)
            .await
            .unwrap();

        assert_eq!(first.status, 201);
        assert_eq!(second.status, 404);
        assert_eq!(third.status, 200, "empty script falls back to 200");
        assert_eq!(transport.calls(), 3);
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(transport.last_request().unwrap().uri, "http://localhost/c");
    }

    #[test]
    fn header_conversion_preserves_multiple_values() {
        let mut headers = HeaderMap::new();
        headers.append("X-Tag", "foo");
        headers.append("X-Tag", "bar");
        headers.append("Accept", "application/json");

        let wire = to_reqwest_headers(&headers).unwrap();
        let tags: Vec<&str> = wire.get_all("x-tag").iter().map(|v| v.to_str().unwrap()).collect();
        assert_eq!(tags, ["foo", "bar"]);

        let back = from_reqwest_headers(&wire);
        assert_eq!(back.get_all("x-tag"), ["foo", "bar"]);
        assert_eq!(back.get("accept"), Some("application/json"));
    }

    #[test]
    fn invalid_proxy_is_rejected_at_construction() {
        let options = TransportOptions {
            proxy: Some("not a url".to_string()),
            ..TransportOptions::default()
        };
        let result = ReqwestTransport::new(&options);
        assert!(result.is_err());
    }
}
