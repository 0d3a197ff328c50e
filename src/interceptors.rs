/*!
 * Built-in interceptor stages
 *
 * Each constructor returns a plain closure ready for
 * `InterceptorPipeline::add_request`, `add_response` or `add_error`. Stages
 * only hold their own parameters; nothing is shared between calls.
 */

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

use crate::client::ClientError;
use crate::transport::{RequestConfig, Response};

pub const AUTHORIZATION: &str = "authorization";
pub const CONTENT_TYPE: &str = "content-type";
pub const REQUEST_ID: &str = "x-request-id";
pub const REQUEST_TIMESTAMP: &str = "x-request-timestamp";
pub const RETRY_AFTER: &str = "retry-after";

/// Set `Authorization: Bearer <token>` unless the request already carries one
pub fn auth_header(token: impl Into<String>) -> impl Fn(RequestConfig) -> RequestConfig + Send + Sync {
    let value = format!("Bearer {}", token.into());
    move |mut request| {
        if !request.has_header(AUTHORIZATION) {
            request.set_header(AUTHORIZATION, value.clone());
        }
        request
    }
}

/// Tag the request with a fresh `X-Request-Id` unless one is set
pub fn request_id() -> impl Fn(RequestConfig) -> RequestConfig + Send + Sync {
    |mut request| {
        if !request.has_header(REQUEST_ID) {
            request.set_header(REQUEST_ID, uuid::Uuid::new_v4().to_string());
        }
        request
    }
}

/// Stamp the request with the send time in RFC 3339
pub fn timestamp() -> impl Fn(RequestConfig) -> RequestConfig + Send + Sync {
    |mut request| {
        request.set_header(
            REQUEST_TIMESTAMP,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        request
    }
}

/// Set `Content-Type` on requests with a body and no explicit type
pub fn default_content_type(value: impl Into<String>) -> impl Fn(RequestConfig) -> RequestConfig + Send + Sync {
    let value = value.into();
    move |mut request| {
        if request.body.is_some() && !request.has_header(CONTENT_TYPE) {
            request.set_header(CONTENT_TYPE, value.clone());
        }
        request
    }
}

/// Apply `timeout` to requests that do not set their own
pub fn default_timeout(timeout: Duration) -> impl Fn(RequestConfig) -> RequestConfig + Send + Sync {
    move |mut request| {
        request.timeout.get_or_insert(timeout);
        request
    }
}

pub fn log_request() -> impl Fn(RequestConfig) -> RequestConfig + Send + Sync {
    |request| {
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            request_id = request.header(REQUEST_ID).unwrap_or("-"),
            "sending request"
        );
        request
    }
}

pub fn log_response() -> impl Fn(Response) -> Response + Send + Sync {
    |response| {
        tracing::debug!(
            status = response.status,
            bytes = response.body.len(),
            "received response"
        );
        response
    }
}

pub fn log_error() -> impl Fn(ClientError) -> ClientError + Send + Sync {
    |error| {
        match &error {
            ClientError::CircuitOpen(open) => {
                tracing::warn!(breaker = %open.name, "request short-circuited")
            }
            other => tracing::warn!(
                status = other.transport().and_then(|t| t.status),
                error = %other,
                "request failed"
            ),
        }
        error
    }
}

/// Fill `retry_after` on HTTP 429 errors from the `Retry-After` header
pub fn parse_retry_after() -> impl Fn(ClientError) -> ClientError + Send + Sync {
    |mut error| {
        if let Some(transport) = error.transport_mut() {
            if transport.is_rate_limited() && transport.retry_after.is_none() {
                transport.retry_after = transport
                    .header(RETRY_AFTER)
                    .and_then(|value| retry_after_from_header(value, Utc::now()));
            }
        }
        error
    }
}

/// Interpret a `Retry-After` value given as delta-seconds or an HTTP date
///
/// Dates in the past yield a zero wait.
pub fn retry_after_from_header(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
