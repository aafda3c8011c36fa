use anyhow::Context;
use clap::Parser;
use reel_proxy::{ProxyConfig, ProxyServer};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "reel", version, about)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "REEL_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Upstream URL requests are proxied to
    #[arg(short, long, env = "REEL_TARGET_URL")]
    target_url: Option<String>,

    /// Directory where cassettes are written
    #[arg(short = 'd', long, env = "REEL_CASSETTE_DIR")]
    cassette_directory: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip TLS certificate verification for the upstream
    #[arg(long)]
    tls_skip_verify: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ProxyConfig::default(),
        };
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(bind) = self.bind {
            config.listen.host = bind;
        }
        if let Some(target_url) = self.target_url {
            config.target_url = target_url;
        }
        if let Some(dir) = self.cassette_directory {
            config.cassette_directory = dir;
        }
        if self.tls_skip_verify {
            config.tls_skip_verify = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config()?;
    config.validate()?;

    info!("Starting reel v{}", env!("CARGO_PKG_VERSION"));
    ProxyServer::new(config)?.run().await
}
