//! Response headers and client capability checks

use crate::compression::Encoding;
use http::header::{self, HeaderMap, HeaderValue};
use http::Version;

const NO_CACHE: &str = "no-cache, no-store, must-revalidate, proxy-revalidate";

/// CORS headers: the request origin is echoed back, and an opaque
/// `null` origin is widened to `*`. An empty origin is treated as absent.
pub(crate) fn cors_headers(request: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(origin) = request.get(header::ORIGIN).filter(|o| !o.is_empty()) {
        let allow = if origin == "null" {
            HeaderValue::from_static("*")
        } else {
            origin.clone()
        };
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow);
    }
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers
}

/// Everything a stream response (or its preflight) carries.
pub(crate) fn stream_headers(request: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    headers.extend(cors_headers(request));
    headers
}

/// Mark a response as compressed with `encoding`.
pub(crate) fn apply_encoding(headers: &mut HeaderMap, encoding: Encoding) {
    if encoding == Encoding::Identity {
        return;
    }
    headers.insert(
        header::CONTENT_ENCODING,
        HeaderValue::from_static(encoding.content_encoding()),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
}

/// Chunked transfer with per-chunk flushing needs HTTP/1.1 or later.
pub(crate) fn supports_streaming(version: Version) -> bool {
    version >= Version::HTTP_11
}

pub(crate) fn user_agent(request: &HeaderMap) -> &str {
    request
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

pub(crate) fn accepted_encoding(request: &HeaderMap) -> Encoding {
    request
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(Encoding::from_accept_encoding)
        .unwrap_or(Encoding::Identity)
}
