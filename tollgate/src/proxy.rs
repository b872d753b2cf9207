//! Streaming HTTP relay to the upstream service.
//!
//! Admitted requests are piped to the upstream byte-for-byte: the body is
//! never buffered or re-serialized, so what the caller sent is exactly what
//! the upstream receives. The credential header is stripped before the
//! request leaves the gateway, the caller's network address is appended to
//! `x-forwarded-for`, and the response carries an identity header naming the
//! resolved user.
//!
//! Upstream-generated HTTP error statuses are relayed verbatim (they are a
//! successful forward of an error response). Connection-level failures
//! (refused, reset, timed out) collapse to a single opaque bad-gateway
//! error; upstream internals are never leaked to the caller.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, Uri},
    response::Response,
};
use reqwest::Client;
use std::net::SocketAddr;
use tracing::{error, instrument};
use url::Url;

use crate::config::UpstreamConfig;
use crate::errors::Error;
use crate::types::UserId;

/// Header callers present their API key in. Stripped before forwarding.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Response header carrying the resolved user id back to the caller.
pub const IDENTITY_HEADER: &str = "x-tollgate-user";

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Connection-scoped headers that must not be relayed in either direction.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Build the HTTP client used for upstream calls.
///
/// The total timeout covers the full round trip including the response body,
/// so a stalled upstream aborts the relay instead of hanging the caller.
pub fn build_http_client(upstream: &UpstreamConfig) -> Result<Client, Error> {
    Client::builder()
        .timeout(upstream.timeout)
        .connect_timeout(upstream.connect_timeout)
        .build()
        .map_err(|e| Error::Internal {
            operation: format!("build upstream HTTP client: {e}"),
        })
}

/// Relay an admitted request to the upstream and stream the response back.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path(), user_id = %user_id))]
pub async fn forward(
    client: &Client,
    upstream: &UpstreamConfig,
    user_id: UserId,
    client_addr: Option<SocketAddr>,
    request: Request,
) -> Result<Response, Error> {
    let (parts, body) = request.into_parts();

    let url = upstream_url(&upstream.url, &parts.uri);
    let headers = build_forward_headers(&parts.headers, client_addr);

    let upstream_response = client
        .request(parts.method, url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await
        .map_err(|e| {
            error!(error = %e, "upstream request failed");
            Error::Upstream
        })?;

    let status = upstream_response.status();
    let mut response_headers = HeaderMap::with_capacity(upstream_response.headers().len() + 1);
    for (name, value) in upstream_response.headers() {
        if is_hop_by_hop(name) {
            continue;
        }
        response_headers.append(name.clone(), value.clone());
    }
    response_headers.insert(
        HeaderName::from_static(IDENTITY_HEADER),
        HeaderValue::from_str(&user_id.to_string()).map_err(|e| Error::Internal {
            operation: format!("build identity header: {e}"),
        })?,
    );

    let mut response = Response::builder()
        .status(status)
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|e| Error::Internal {
            operation: format!("build relayed response: {e}"),
        })?;
    *response.headers_mut() = response_headers;

    Ok(response)
}

/// Join the request path and query onto the upstream base URL, keeping any
/// path prefix the base carries.
fn upstream_url(base: &Url, uri: &Uri) -> Url {
    let mut url = base.clone();
    let path = format!("{}{}", url.path().trim_end_matches('/'), uri.path());
    url.set_path(&path);
    url.set_query(uri.query());
    url
}

/// Copy request headers for forwarding.
///
/// Drops the credential header, `host` (reqwest derives it from the target
/// URL), and hop-by-hop headers. When the caller's address is known it is
/// appended to the `x-forwarded-for` chain.
fn build_forward_headers(headers: &HeaderMap, client_addr: Option<SocketAddr>) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if should_strip_request_header(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    if let Some(addr) = client_addr {
        let mut chain: Vec<String> = headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        chain.push(addr.ip().to_string());
        if let Ok(value) = HeaderValue::from_str(&chain.join(", ")) {
            out.insert(X_FORWARDED_FOR, value);
        }
    }

    out
}

fn should_strip_request_header(name: &HeaderName) -> bool {
    // expect is dropped as well: the body has already been received in full,
    // so a forwarded 100-continue handshake would only stall the upstream call.
    name == API_KEY_HEADER || name == "host" || name == "expect" || is_hop_by_hop(name)
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}
