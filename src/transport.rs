/*!
 * Transport abstraction
 *
 * The protected operation is an opaque async `send`. Tripwire ships a
 * reqwest implementation; anything else that can turn a `RequestConfig`
 * into a `Response` plugs in through the `Transport` trait.
 */

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub use reqwest::Method;

/// Header map with lowercase keys
pub type Headers = BTreeMap<String, String>;

/// Outgoing call parameters, rewritten by request interceptors
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_ascii_lowercase())
    }
}

/// Successful reply from the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body)
            .map_err(|e| TransportError::decode(format!("invalid JSON body: {}", e)))
    }
}

/// Broad cause of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not reach the dependency
    Connect,
    /// The dependency did not answer in time
    Timeout,
    /// The dependency answered with a non-success status
    Status,
    /// The reply could not be decoded
    Decode,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Status => write!(f, "status"),
            TransportErrorKind::Decode => write!(f, "decode"),
            TransportErrorKind::Other => write!(f, "transport"),
        }
    }
}

/// Failure reported by a transport
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    /// HTTP status, when the dependency answered
    pub status: Option<u16>,
    pub headers: Headers,
    pub message: String,
    /// Server-requested wait, filled in by the retry-after interceptor
    pub retry_after: Option<Duration>,
}

impl TransportError {
    fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            headers: Headers::new(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Decode, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    /// Non-success HTTP reply
    pub fn status(status: u16, headers: Headers, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            headers,
            ..Self::new(TransportErrorKind::Status, message)
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 4xx other than 429: the caller sent something wrong, the dependency is fine
    pub fn is_client_error(&self) -> bool {
        matches!(self.status, Some(code) if (400..500).contains(&code) && code != 429)
    }

    /// Connect failures, timeouts and 5xx replies
    pub fn is_server_error(&self) -> bool {
        match self.kind {
            TransportErrorKind::Connect | TransportErrorKind::Timeout => true,
            TransportErrorKind::Status => matches!(self.status, Some(code) if code >= 500),
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == Some(429)
    }

    /// Whether this failure says something about the dependency's health
    pub fn counts_against_dependency(&self) -> bool {
        !self.is_client_error()
    }
}

/// The operation a breaker protects
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RequestConfig) -> Result<Response, TransportError>;
}

/// Adapts an async closure into a [`Transport`]
pub struct FnTransport<F> {
    send: F,
}

impl<F> FnTransport<F> {
    pub fn new(send: F) -> Self {
        Self { send }
    }
}

#[async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(RequestConfig) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, TransportError>> + Send,
{
    async fn send(&self, request: RequestConfig) -> Result<Response, TransportError> {
        (self.send)(request).await
    }
}

/// HTTP transport backed by reqwest
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn collect_headers(map: &reqwest::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::connect(err.to_string())
    } else if err.is_decode() {
        TransportError::decode(err.to_string())
    } else {
        TransportError::other(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: RequestConfig) -> Result<Response, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let reply = builder.send().await.map_err(map_reqwest_error)?;
        let status = reply.status();
        let headers = collect_headers(reply.headers());
        let body = reply.text().await.map_err(map_reqwest_error)?;

        if status.is_success() {
            Ok(Response {
                status: status.as_u16(),
                headers,
                body,
            })
        } else {
            let reason = status.canonical_reason().unwrap_or("unknown status");
            Err(TransportError::status(
                status.as_u16(),
                headers,
                format!("HTTP {} {}", status.as_u16(), reason),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let request = RequestConfig::get("http://svc/items").with_header("X-Request-Id", "abc");
        assert_eq!(request.header("x-request-id"), Some("abc"));
        assert!(request.has_header("X-REQUEST-ID"));
    }

    #[test]
    fn test_error_classification() {
        let bad_request = TransportError::status(400, Headers::new(), "HTTP 400 Bad Request");
        assert!(bad_request.is_client_error());
        assert!(!bad_request.is_server_error());
        assert!(!bad_request.counts_against_dependency());

        let throttled = TransportError::status(429, Headers::new(), "HTTP 429 Too Many Requests");
        assert!(!throttled.is_client_error());
        assert!(throttled.is_rate_limited());
        assert!(throttled.counts_against_dependency());

        let unavailable = TransportError::status(503, Headers::new(), "HTTP 503");
        assert!(unavailable.is_server_error());

        assert!(TransportError::connect("refused").is_server_error());
        assert!(TransportError::timeout("slow").counts_against_dependency());
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::status(502, Headers::new(), "HTTP 502 Bad Gateway");
        assert_eq!(err.to_string(), "status error: HTTP 502 Bad Gateway");
    }

    #[test]
    fn test_response_json() {
        #[derive(Debug, serde::Deserialize)]
        struct Item {
            id: u32,
        }

        let response = Response::new(200, r#"{"id": 7}"#);
        assert_eq!(response.json::<Item>().unwrap().id, 7);

        let broken = Response::new(200, "not json");
        assert_eq!(
            broken.json::<Item>().unwrap_err().kind,
            TransportErrorKind::Decode
        );
    }

    #[tokio::test]
    async fn test_fn_transport() {
        let transport = FnTransport::new(|request: RequestConfig| async move {
            Ok::<_, TransportError>(Response::new(200, request.url))
        });

        let response = transport.send(RequestConfig::get("http://svc/ping")).await.unwrap();
        assert_eq!(response.body, "http://svc/ping");
    }
}
