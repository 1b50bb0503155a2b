//! HTTP carrier glue for the filament tracing agent.
//!
//! Provides [`Injector`]/[`Extractor`] implementations over
//! [`http::HeaderMap`], the [`HttpClient`] abstraction used by exporters,
//! and [`inject_trace_headers`], the header-injection routine that applies
//! the signed-request safety rule.

#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]

use std::fmt::Debug;

use async_trait::async_trait;
#[doc(no_inline)]
pub use bytes::Bytes;
use filament::propagation::{Extractor, Injector, TextMapPropagator};
use filament::Context;
#[doc(no_inline)]
pub use http::{Request, Response};

/// Value prefix of a provider request-signing `Authorization` header.
///
/// Requests carrying such a credential are covered by an upstream
/// cryptographic signature over their headers; adding tracing headers would
/// invalidate that signature on retry.
const SIGNED_AUTHORIZATION_PREFIX: &str = "AWS";

/// Injects headers into an [`http::HeaderMap`].
///
/// Keys or values that are not valid header material are silently skipped;
/// propagation must never break the request it piggybacks on.
#[derive(Debug)]
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = http::header::HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}

/// Extracts headers from an [`http::HeaderMap`].
#[derive(Debug)]
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    /// Gets a value for a key. Returns `None` for non-ASCII values.
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Encodes the trace context of `cx` into the request headers, unless the
/// request must not be touched.
///
/// Returns whether headers were injected. Injection is refused when the
/// request already carries a signature-bearing `Authorization` credential
/// (an AWS-style signing token): modifying a signed request would make the
/// receiving service reject it on retry, so the codec skips it rather than
/// guess.
pub fn inject_trace_headers(
    propagator: &dyn TextMapPropagator,
    cx: &Context,
    headers: &mut http::HeaderMap,
) -> bool {
    let signed = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(SIGNED_AUTHORIZATION_PREFIX));
    if signed {
        return false;
    }
    propagator.inject_context(cx, &mut HeaderInjector(headers));
    true
}

/// Errors returned by [`HttpClient`] implementations.
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A minimal interface for sending HTTP requests.
///
/// Exporters transmit telemetry through this trait so users can bring the
/// HTTP client that matches their runtime.
#[async_trait]
pub trait HttpClient: Debug + Send + Sync {
    /// Sends the request and returns the full response.
    ///
    /// Errors when the server cannot be reached or the request does not
    /// complete.
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError>;
}

#[cfg(feature = "reqwest")]
mod reqwest {
    use super::{async_trait, Bytes, HttpClient, HttpError, Request, Response};
    use filament::fil_debug;

    #[async_trait]
    impl HttpClient for reqwest::Client {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            fil_debug!(name: "ReqwestClient.Send");
            let request = request.try_into()?;
            let mut response = self.execute(request).await?;
            let headers = std::mem::take(response.headers_mut());
            let mut http_response = Response::builder()
                .status(response.status())
                .body(response.bytes().await?)?;
            *http_response.headers_mut() = headers;

            Ok(http_response)
        }
    }

    #[async_trait]
    impl HttpClient for reqwest::blocking::Client {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            fil_debug!(name: "ReqwestBlockingClient.Send");
            let request = request.try_into()?;
            let mut response = self.execute(request)?;
            let headers = std::mem::take(response.headers_mut());
            let mut http_response = Response::builder()
                .status(response.status())
                .body(response.bytes()?)?;
            *http_response.headers_mut() = headers;

            Ok(http_response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filament::trace::{TraceContext, TraceContextExt, TraceState};
    use filament::{SpanId, TraceId};
    use filament_sdk::propagation::AgentPropagator;

    fn traced_context() -> Context {
        Context::new().with_remote_trace_context(TraceContext::new(
            TraceId::from(0xabcu128),
            SpanId::from(0xdefu64),
            false,
            TraceState::NONE,
        ))
    }

    #[test]
    fn header_injector_sets_and_extractor_reads() {
        let mut headers = http::HeaderMap::new();
        HeaderInjector(&mut headers).set("x-filament-t", "0abc".to_string());

        let extractor = HeaderExtractor(&headers);
        assert_eq!(extractor.get("x-filament-t"), Some("0abc"));
        assert_eq!(extractor.get("X-Filament-T"), Some("0abc"));
        assert!(extractor.keys().contains(&"x-filament-t"));
    }

    #[test]
    fn invalid_header_material_is_skipped() {
        let mut headers = http::HeaderMap::new();
        HeaderInjector(&mut headers).set("bad header name", "value".to_string());
        HeaderInjector(&mut headers).set("x-ok", "bad\nvalue".to_string());
        assert!(headers.is_empty());
    }

    #[test]
    fn injects_into_unsigned_requests() {
        let propagator = AgentPropagator::new();
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_static("Bearer some-token"),
        );

        assert!(inject_trace_headers(&propagator, &traced_context(), &mut headers));
        assert!(headers.contains_key("x-filament-t"));
        assert!(headers.contains_key("traceparent"));
    }

    #[test]
    fn signed_requests_are_left_untouched() {
        let propagator = AgentPropagator::new();
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_static(
                "AWS4-HMAC-SHA256 Credential=AKID/20190101/us-east-1/s3/aws4_request",
            ),
        );
        let before = headers.clone();

        assert!(!inject_trace_headers(&propagator, &traced_context(), &mut headers));
        assert_eq!(headers, before);
    }

    #[test]
    fn no_context_still_counts_as_injected() {
        let propagator = AgentPropagator::new();
        let mut headers = http::HeaderMap::new();
        // Nothing to encode: the injection itself is a no-op, but the
        // request was safe to touch.
        assert!(inject_trace_headers(&propagator, &Context::new(), &mut headers));
        assert!(headers.is_empty());
    }
}
