//! Request forwarding to a matched route's upstream.
//!
//! Bodies are streamed both ways. The inbound payload is pumped into a
//! bounded channel by a local task (actix payloads are not `Send`, reqwest
//! bodies must be), and the upstream response is relayed chunk by chunk.

use std::time::{Duration, Instant};

use actix_web::http::header::{self as actix_header, HeaderMap};
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header as upstream_header;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use x402::{SettleResponse, PAYMENT_RESPONSE_HEADER};

use crate::error::ProxyError;
use crate::metrics::PROXY_LATENCY;
use crate::route::Route;

/// Connection-scoped headers, never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers the proxy consumes itself. `host` is rewritten from the
/// target URL; payment headers are for the gate, not the upstream.
const REQUEST_HEADERS_TO_STRIP: &[&str] = &["host", "x-payment", "payment-signature"];

/// Chunks buffered between the inbound payload and the upstream request.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Remove the route prefix once. An empty rest becomes `/`, and a rest that
/// does not start at a segment boundary gets a leading slash (`/api2` on
/// `/api` gives `/2`).
pub fn strip_route_prefix(route_path: &str, request_path: &str) -> String {
    let rest = request_path
        .strip_prefix(route_path)
        .unwrap_or(request_path);
    if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

/// True if any segment of `rest` is `.` or `..`, literally or
/// percent-encoded. A backslash counts as a separator, as it does for http URLs.
fn has_dot_segment(rest: &str) -> bool {
    rest.split(['/', '\\']).any(|segment| {
        let decoded = urlencoding::decode(segment)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| segment.to_string());
        decoded == "." || decoded == ".."
    })
}

/// Join `rest` onto the target's own path and carry the query over.
///
/// The result always stays under the target's base path: a rest with dot
/// segments is rejected.
pub fn upstream_url(target_url: &str, rest: &str, query: &str) -> Result<url::Url, ProxyError> {
    let mut url = url::Url::parse(target_url)
        .map_err(|e| ProxyError::Internal(format!("invalid target URL {target_url}: {e}")))?;
    if has_dot_segment(rest) {
        return Err(ProxyError::InvalidInput(
            "Request path must not contain dot segments".to_string(),
        ));
    }
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}{rest}"));
    let joined = url.path();
    if !(joined == base || joined.starts_with(&format!("{base}/"))) {
        return Err(ProxyError::InvalidInput(
            "Request path escapes the route target".to_string(),
        ));
    }
    if !query.is_empty() {
        url.set_query(Some(query));
    }
    Ok(url)
}

/// Header names listed in `Connection`, which are hop-by-hop for this hop.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(actix_header::CONNECTION)
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// End-to-end request headers for the upstream, with `Authorization`
/// replaced when the route carries its own credential.
pub fn upstream_request_headers(
    inbound: &HeaderMap,
    auth_header: Option<&str>,
) -> Result<upstream_header::HeaderMap, ProxyError> {
    let extra_hop = connection_tokens(inbound);
    let mut headers = upstream_header::HeaderMap::new();

    for (name, value) in inbound.iter() {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower)
            || REQUEST_HEADERS_TO_STRIP.contains(&lower)
            || extra_hop.iter().any(|t| t == lower)
            || (auth_header.is_some() && lower == "authorization")
        {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            upstream_header::HeaderName::from_bytes(name.as_str().as_bytes()),
            upstream_header::HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            continue;
        };
        headers.append(name, value);
    }

    if let Some(auth) = auth_header {
        let value = upstream_header::HeaderValue::from_str(auth).map_err(|_| {
            ProxyError::Internal("route auth_header is not a valid header value".to_string())
        })?;
        headers.insert(upstream_header::AUTHORIZATION, value);
    }
    Ok(headers)
}

fn has_body(headers: &HeaderMap) -> bool {
    headers.contains_key(actix_header::TRANSFER_ENCODING)
        || headers
            .get(actix_header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .is_some_and(|len| len > 0)
}

/// Feed the inbound payload into a channel the upstream request can own.
fn pump_payload(mut payload: web::Payload) -> ReceiverStream<Result<Bytes, std::io::Error>> {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
    actix_web::rt::spawn(async move {
        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(|e| std::io::Error::other(e.to_string()));
            let failed = chunk.is_err();
            // Receiver gone: the upstream request was dropped.
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}

/// Forward `req` to `route`'s upstream and relay the response.
///
/// One attempt, redirects passed through to the client. `timeout` bounds the
/// wait for response headers; the body is streamed without a deadline.
pub async fn forward(
    client: &reqwest::Client,
    req: &HttpRequest,
    payload: web::Payload,
    route: &Route,
    settlement: Option<&SettleResponse>,
    timeout: Duration,
) -> Result<HttpResponse, ProxyError> {
    let rest = strip_route_prefix(&route.path, req.path());
    let url = upstream_url(&route.target_url, &rest, req.query_string())?;

    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|e| ProxyError::Internal(format!("unsupported method: {e}")))?;
    let headers = upstream_request_headers(req.headers(), route.auth_header.as_deref())?;

    let mut request = client.request(method, url.clone()).headers(headers);
    if has_body(req.headers()) {
        request = request.body(reqwest::Body::wrap_stream(pump_payload(payload)));
    }

    tracing::debug!(route = %route.path, upstream = %url, "forwarding request");
    let started = Instant::now();
    let response = match tokio::time::timeout(timeout, request.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(ProxyError::UpstreamUnavailable(e.to_string())),
        Err(_) => {
            return Err(ProxyError::UpstreamUnavailable(format!(
                "no response headers within {timeout:?}"
            )))
        }
    };
    PROXY_LATENCY.observe(started.elapsed().as_secs_f64());

    relay(response, settlement)
}

fn relay(
    response: reqwest::Response,
    settlement: Option<&SettleResponse>,
) -> Result<HttpResponse, ProxyError> {
    let status = StatusCode::from_u16(response.status().as_u16())
        .map_err(|e| ProxyError::Internal(format!("upstream status: {e}")))?;
    let mut builder = HttpResponse::build(status);

    let upstream_headers = response.headers();
    let extra_hop: Vec<String> = upstream_headers
        .get_all(upstream_header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect();

    for (name, value) in upstream_headers.iter() {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower)
            || lower == "content-length"
            || extra_hop.iter().any(|t| t == lower)
        {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            actix_header::HeaderName::from_bytes(name.as_str().as_bytes()),
            actix_header::HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            continue;
        };
        builder.append_header((name, value));
    }

    if let Some(settlement) = settlement {
        builder.insert_header((PAYMENT_RESPONSE_HEADER, settlement.to_header()));
    }

    let content_length = upstream_headers
        .get(upstream_header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = content_length {
        builder.no_chunking(len);
    }

    Ok(builder.streaming(response.bytes_stream()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_strip_route_prefix() {
        assert_eq!(strip_route_prefix("/api", "/api/users/5"), "/users/5");
        assert_eq!(strip_route_prefix("/api", "/api"), "/");
        assert_eq!(strip_route_prefix("/api", "/api/"), "/");
        assert_eq!(strip_route_prefix("/api", "/api2"), "/2");
        assert_eq!(strip_route_prefix("/", "/users"), "/users");
        // Only the leading occurrence goes.
        assert_eq!(strip_route_prefix("/api", "/api/api/x"), "/api/x");
    }

    #[test]
    fn test_upstream_url() {
        assert_eq!(
            upstream_url("http://b", "/orders", "").unwrap().as_str(),
            "http://b/orders"
        );
        assert_eq!(
            upstream_url("http://b/v1/", "/orders", "page=2&sort=asc")
                .unwrap()
                .as_str(),
            "http://b/v1/orders?page=2&sort=asc"
        );
        assert_eq!(
            upstream_url("http://b:8080/base", "/", "").unwrap().as_str(),
            "http://b:8080/base/"
        );
        assert!(matches!(
            upstream_url("not a url", "/", ""),
            Err(ProxyError::Internal(_))
        ));
    }

    #[test]
    fn test_upstream_url_stays_under_target_path() {
        for request_path in [
            "/api/../../admin",
            "/api/../admin",
            "/api/%2e%2e/admin",
            "/api/%2E%2e/%2e%2e/admin",
            "/api/./x",
            "/api/x/..",
            "/api/..\\admin",
        ] {
            let rest = strip_route_prefix("/api", request_path);
            assert!(
                matches!(
                    upstream_url("http://b/v1", &rest, ""),
                    Err(ProxyError::InvalidInput(_))
                ),
                "{request_path} was not rejected"
            );
        }

        // Dots inside a segment are ordinary characters.
        assert_eq!(
            upstream_url("http://b/v1", "/files/a..b/.env", "")
                .unwrap()
                .as_str(),
            "http://b/v1/files/a..b/.env"
        );
    }

    #[test]
    fn test_request_headers_filtered() {
        let req = TestRequest::default()
            .insert_header(("Host", "proxy.local"))
            .insert_header(("Connection", "keep-alive, X-Internal"))
            .insert_header(("X-Internal", "1"))
            .insert_header(("X-PAYMENT", "abc"))
            .insert_header(("Content-Type", "application/json"))
            .insert_header(("Authorization", "Bearer client"))
            .to_http_request();

        let headers = upstream_request_headers(req.headers(), None).unwrap();
        assert!(headers.get("host").is_none());
        assert!(headers.get("connection").is_none());
        assert!(headers.get("x-internal").is_none());
        assert!(headers.get("x-payment").is_none());
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["authorization"], "Bearer client");
    }

    #[test]
    fn test_route_credential_overrides_client() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer client"))
            .to_http_request();
        let headers = upstream_request_headers(req.headers(), Some("Bearer upstream")).unwrap();
        assert_eq!(headers.get_all("authorization").iter().count(), 1);
        assert_eq!(headers["authorization"], "Bearer upstream");

        assert!(upstream_request_headers(req.headers(), Some("bad\nvalue")).is_err());
    }

    #[test]
    fn test_has_body() {
        let with_len = TestRequest::default()
            .insert_header(("Content-Length", "12"))
            .to_http_request();
        let zero = TestRequest::default()
            .insert_header(("Content-Length", "0"))
            .to_http_request();
        let chunked = TestRequest::default()
            .insert_header(("Transfer-Encoding", "chunked"))
            .to_http_request();
        assert!(has_body(with_len.headers()));
        assert!(!has_body(zero.headers()));
        assert!(has_body(chunked.headers()));
        assert!(!has_body(TestRequest::default().to_http_request().headers()));
    }
}
