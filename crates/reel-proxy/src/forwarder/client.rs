//! HTTP client creation and the hyper-backed forwarder.

use super::tls::SkipServerVerification;
use super::{strip_hop_by_hop_headers, ForwardError, Forwarder};
use crate::config::{ConnectionPoolConfig, TargetUrl};
use crate::response::ProxyBody;
use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper::{Request, Response, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, ProxyBody>;

/// Create a shared HTTP/1.1 client with connection pooling.
pub fn create_http_client(
    pool: &ConnectionPoolConfig,
    skip_tls_verify: bool,
) -> Result<HttpClient, ForwardError> {
    // Both ring and aws-lc-rs are compiled in; pick one for the process.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
    http_connector.enforce_http(false);

    let https_connector = if skip_tls_verify {
        warn!("TLS certificate verification DISABLED for the upstream (development/testing only)");
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(
                rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(SkipServerVerification::new())
                    .with_no_client_auth(),
            )
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    } else {
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(ForwardError::RootCertificates)?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    };

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(https_connector);

    info!(
        "Connection pool configured (HTTP/1.1): max_idle={}, idle_timeout={}s, keepalive={}s",
        pool.max_idle_per_host, pool.idle_timeout_secs, pool.keepalive_timeout_secs
    );

    Ok(http_client)
}

/// Forwards requests to a fixed upstream base URL.
///
/// The inbound path and query are appended to the target's base path. The
/// request's Host header is sent as-is; the client only fills it in when
/// absent.
pub struct HyperForwarder {
    target: TargetUrl,
    client: HttpClient,
}

impl HyperForwarder {
    pub fn new(target: TargetUrl, client: HttpClient) -> Self {
        Self { target, client }
    }

    pub fn from_config(
        target: TargetUrl,
        pool: &ConnectionPoolConfig,
        skip_tls_verify: bool,
    ) -> Result<Self, ForwardError> {
        Ok(Self::new(target, create_http_client(pool, skip_tls_verify)?))
    }

    fn upstream_uri(&self, inbound: &Uri) -> Result<Uri, ForwardError> {
        let path_and_query = inbound
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = self.target.join(path_and_query);
        uri.parse()
            .map_err(|source| ForwardError::InvalidUri { uri, source })
    }
}

#[async_trait]
impl Forwarder for HyperForwarder {
    async fn forward(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, ForwardError> {
        let (mut parts, body) = req.into_parts();
        parts.uri = self.upstream_uri(&parts.uri)?;
        parts.version = Version::HTTP_11;
        strip_hop_by_hop_headers(&mut parts.headers);

        debug!("Forwarding {} {}", parts.method, parts.uri);
        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop_headers(&mut parts.headers);
        Ok(Response::from_parts(parts, body.boxed()))
    }
}
