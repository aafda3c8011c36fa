//! Upstream forwarding.
//!
//! The engine talks to the upstream only through [`Forwarder`], so tests can
//! substitute a scripted upstream without opening sockets.

mod client;
mod tls;

use crate::response::ProxyBody;
use async_trait::async_trait;
use hyper::header::{HeaderMap, HeaderName, CONNECTION};
use hyper::{Request, Response};

pub use client::{create_http_client, HttpClient, HyperForwarder};
pub use tls::SkipServerVerification;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Invalid upstream uri {uri}: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: hyper::http::uri::InvalidUri,
    },
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
    #[error("Failed to load native root certificates: {0}")]
    RootCertificates(#[source] std::io::Error),
}

/// Sends a request to the upstream and returns its response head and
/// streaming body.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, ForwardError>;
}

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

/// Remove connection-scoped headers, including any named by `Connection`.
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn test_strip_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, X-Trace"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-trace", HeaderValue::from_static("abc"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("host", HeaderValue::from_static("example.com"));

        strip_hop_by_hop_headers(&mut headers);

        assert!(headers.get("connection").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert!(headers.get("x-trace").is_none());
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
        assert_eq!(headers.get("host").unwrap(), "example.com");
    }

    #[test]
    fn test_strip_ignores_garbage_connection_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("close, , bad header"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_hop_by_hop_headers(&mut headers);

        assert!(headers.get("connection").is_none());
        assert_eq!(headers.get("accept").unwrap(), "*/*");
    }
}
