//! Reverse proxy to managed containers.
//!
//! Forwards a request to the container's published loopback port over a
//! fresh HTTP/1.1 connection. Bodies stream through in both directions
//! without buffering, and redirects are relayed to the caller untouched.

use crate::error::{ApiError, Result};
use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, Request, Response, Uri};
use dockapi_core::Upstream;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;

/// Path prefix under which containers are proxied.
pub const PROXY_PREFIX: &str = "/proxy/";

/// Methods relayed to upstreams.
pub const FORWARDED_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// Headers scoped to a single connection.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

/// Rejects methods the proxy does not relay.
///
/// # Errors
///
/// Returns [`ApiError::BadRequest`] for a method outside [`FORWARDED_METHODS`].
pub fn ensure_forwardable(method: &Method) -> Result<()> {
    if FORWARDED_METHODS.contains(method) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "method {method} is not supported by the proxy"
        )))
    }
}

/// Removes hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| HeaderName::from_bytes(name.as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    for name in listed {
        headers.remove(name);
    }
}

/// Splits `/proxy/<id>/<rest>?<query>` into the container reference and the
/// upstream path and query.
///
/// Works on the raw request URI: nothing is percent-decoded and `..`
/// segments are passed through literally. Returns `None` when there is no
/// slash after the ID.
#[must_use]
pub fn split_proxy_uri(uri: &Uri) -> Option<(&str, String)> {
    let rest = uri.path().strip_prefix(PROXY_PREFIX)?;
    let (id, sub_path) = rest.split_once('/')?;
    if id.is_empty() {
        return None;
    }
    let mut path_and_query = format!("/{sub_path}");
    if let Some(query) = uri.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }
    Some((id, path_and_query))
}

/// Forwards requests to container upstreams.
#[derive(Debug, Clone)]
pub struct Forwarder {
    connect_timeout: Duration,
}

impl Forwarder {
    /// Creates a forwarder with the given TCP connect timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Sends `request` to `upstream` at `path_and_query` and relays the
    /// response.
    ///
    /// # Errors
    ///
    /// - [`ApiError::BadRequest`] for a method outside [`FORWARDED_METHODS`].
    /// - [`ApiError::BadGateway`] if the upstream cannot be reached or fails
    ///   before sending a response head.
    pub async fn forward(
        &self,
        upstream: &Upstream,
        path_and_query: &str,
        request: Request<Body>,
    ) -> Result<Response<Body>> {
        ensure_forwardable(request.method())?;

        let address = upstream.address;
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                ApiError::BadGateway(format!(
                    "connecting to {address} timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| ApiError::BadGateway(format!("connecting to {address} failed: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(upstream = %address, "set_nodelay failed: {}", e);
        }

        let (mut sender, conn) = http1::Builder::new()
            .handshake::<_, Body>(TokioIo::new(stream))
            .await
            .map_err(|e| ApiError::BadGateway(format!("handshake with {address} failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                let msg = e.to_string().to_lowercase();
                if !msg.contains("canceled") && !msg.contains("incomplete") {
                    tracing::debug!(upstream = %address, "upstream connection ended: {}", e);
                }
            }
        });

        let (parts, body) = request.into_parts();
        let mut upstream_req = hyper::Request::builder()
            .method(parts.method)
            .uri(path_and_query)
            .body(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid upstream request: {e}")))?;

        let headers = upstream_req.headers_mut();
        *headers = parts.headers;
        strip_hop_by_hop(headers);
        let host = HeaderValue::from_str(&address.to_string())
            .map_err(|e| ApiError::BadGateway(format!("invalid upstream host: {e}")))?;
        headers.insert(header::HOST, host);

        tracing::debug!(
            container_id = %upstream.container.id,
            upstream = %address,
            method = %upstream_req.method(),
            path = path_and_query,
            "forwarding"
        );

        let response = sender
            .send_request(upstream_req)
            .await
            .map_err(|e| ApiError::BadGateway(format!("request to {address} failed: {e}")))?;

        let (mut parts, incoming) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(incoming)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fixed_and_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, X-Session-Hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic x"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert("x-session-hop", HeaderValue::from_static("1"));
        headers.insert("x-end-to-end", HeaderValue::from_static("kept"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);
        let once = headers.clone();
        strip_hop_by_hop(&mut headers);

        assert_eq!(headers, once);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["x-end-to-end"], "kept");
        assert_eq!(headers["content-type"], "text/plain");
    }

    #[test]
    fn method_allowlist() {
        for method in FORWARDED_METHODS {
            assert!(ensure_forwardable(&method).is_ok());
        }
        for method in [Method::HEAD, Method::CONNECT, Method::TRACE] {
            assert!(matches!(
                ensure_forwardable(&method),
                Err(ApiError::BadRequest(_))
            ));
        }
    }

    #[test]
    fn splits_raw_uri() {
        let uri: Uri = "/proxy/abc123/api/v1/items?limit=5&q=a%20b".parse().unwrap();
        let (id, path) = split_proxy_uri(&uri).unwrap();
        assert_eq!(id, "abc123");
        assert_eq!(path, "/api/v1/items?limit=5&q=a%20b");
    }

    #[test]
    fn keeps_dot_segments_and_encoding() {
        let uri: Uri = "/proxy/web/static/../%2e%2e/secret".parse().unwrap();
        let (_, path) = split_proxy_uri(&uri).unwrap();
        assert_eq!(path, "/static/../%2e%2e/secret");
    }

    #[test]
    fn root_and_missing_slash() {
        let uri: Uri = "/proxy/web/".parse().unwrap();
        assert_eq!(split_proxy_uri(&uri), Some(("web", "/".to_string())));

        let uri: Uri = "/proxy/web".parse().unwrap();
        assert_eq!(split_proxy_uri(&uri), None);

        let uri: Uri = "/containers/web".parse().unwrap();
        assert_eq!(split_proxy_uri(&uri), None);
    }
}
