//! ProxyServer and its accept loop.
//!
//! Every request passes through the same stages: the control endpoint
//! intercepts its reserved path, the Host header is rewritten, and the
//! record/replay engine handles the rest.

use crate::cassette::CassetteStore;
use crate::config::ProxyConfig;
use crate::control::{handle_control, is_control_request};
use crate::engine::RecordReplayEngine;
use crate::forwarder::{Forwarder, HyperForwarder};
use crate::response::ProxyBody;
use crate::rewrite::rewrite_host;
use crate::state::SharedState;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct ProxyServer {
    config: ProxyConfig,
    state: Arc<SharedState>,
    engine: RecordReplayEngine,
}

impl ProxyServer {
    /// Build a server forwarding to `config.target_url` over HTTP(S).
    pub fn new(config: ProxyConfig) -> Result<Self, anyhow::Error> {
        let target = config.target()?;
        let forwarder =
            HyperForwarder::from_config(target, &config.connection_pool, config.tls_skip_verify)?;
        Self::with_forwarder(config, Arc::new(forwarder))
    }

    /// Build a server around an arbitrary forwarder.
    pub fn with_forwarder(
        config: ProxyConfig,
        forwarder: Arc<dyn Forwarder>,
    ) -> Result<Self, anyhow::Error> {
        config.validate()?;
        let state = Arc::new(SharedState::new(
            config.target()?,
            CassetteStore::new(config.cassette_directory.clone()),
            config.initial.clone(),
        ));
        let engine = RecordReplayEngine::new(Arc::clone(&state), forwarder);
        Ok(Self {
            config,
            state,
            engine,
        })
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Run one request through the control, rewrite and engine stages.
    pub async fn handle_request(&self, mut req: Request<ProxyBody>) -> Response<ProxyBody> {
        if is_control_request(&req) {
            debug!("Control request {} {}", req.method(), req.uri());
            return handle_control(req, &self.state).await;
        }
        rewrite_host(&self.state, &mut req);
        self.engine.handle(req).await
    }

    async fn handle_incoming(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<ProxyBody>, Infallible> {
        Ok(self.handle_request(req.map(|body| body.boxed())).await)
    }

    /// Bind the listen address and start accepting connections in the background.
    pub async fn serve(self) -> Result<ProxyHandle, anyhow::Error> {
        let addr = self.config.listen_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("bind {addr}: {e}"))?;
        let listen_addr = listener.local_addr()?;

        info!("Listening on http://{}", listen_addr);
        info!("Proxying to {}", self.state.target());
        info!(
            "Cassette directory: {}",
            self.state.store().dir().display()
        );
        let settings = self.state.settings();
        if !settings.is_pass_through() {
            info!(
                "Active cassette '{}' ({} episodes)",
                settings.cassette,
                self.state.episode_count()
            );
        }

        let server = Arc::new(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accept = listener.accept() => {
                        let (stream, remote_addr) = match accept {
                            Ok(conn) => conn,
                            Err(err) => {
                                error!("Failed to accept connection: {}", err);
                                continue;
                            }
                        };
                        let server = Arc::clone(&server);
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let server = Arc::clone(&server);
                                async move { server.handle_incoming(req).await }
                            });

                            if let Err(err) = http1::Builder::new().serve_connection(io, service).await
                            {
                                error!(
                                    "Error serving HTTP connection from {}: {}",
                                    remote_addr, err
                                );
                            }
                        });
                    }
                }
            }
        });

        Ok(ProxyHandle {
            listen_addr,
            shutdown_tx,
            join,
        })
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let handle = self.serve().await?;
        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        handle.shutdown().await;
        Ok(())
    }
}

/// A running server; dropping it leaves the accept loop running.
#[derive(Debug)]
pub struct ProxyHandle {
    pub listen_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl ProxyHandle {
    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}
