//! Configuration types for the reel proxy.
//!
//! Startup configuration comes from an optional YAML file with command-line
//! overrides applied on top. Only [`RuntimeSettings`] can change afterwards,
//! through the control endpoint.

mod runtime;
mod upstream;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cassette::is_valid_cassette_name;

pub use runtime::RuntimeSettings;
pub use upstream::{ConnectionPoolConfig, TargetUrl};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No target url given")]
    MissingTarget,
    #[error("Invalid target url: {0}")]
    InvalidTarget(String),
    #[error("Unsupported target scheme '{0}'. Currently supported: http, https")]
    UnsupportedScheme(String),
    #[error("Invalid listen address: {0}")]
    InvalidListen(String),
    #[error("Invalid cassette name '{0}'")]
    InvalidCassette(String),
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_listen_port(),
        }
    }
}

fn default_cassette_directory() -> PathBuf {
    PathBuf::from("./cassettes")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub listen: ListenConfig,

    /// Upstream base URL every request is forwarded to.
    #[serde(default)]
    pub target_url: String,

    /// Directory holding `<cassette>.json` files.
    #[serde(default = "default_cassette_directory")]
    pub cassette_directory: PathBuf,

    /// Skip TLS certificate verification for the upstream (self-signed certs in dev/test).
    #[serde(default)]
    pub tls_skip_verify: bool,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,

    /// Behavior in effect at startup.
    #[serde(default)]
    pub initial: RuntimeSettings,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            target_url: String::new(),
            cassette_directory: default_cassette_directory(),
            tls_skip_verify: false,
            connection_pool: ConnectionPoolConfig::default(),
            initial: RuntimeSettings::default(),
        }
    }
}

impl ProxyConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target()?;
        self.listen_addr()?;
        let cassette = &self.initial.cassette;
        if !cassette.is_empty() && !is_valid_cassette_name(cassette) {
            return Err(ConfigError::InvalidCassette(cassette.clone()));
        }
        Ok(())
    }

    pub fn target(&self) -> Result<TargetUrl, ConfigError> {
        TargetUrl::parse(&self.target_url)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.listen.host, self.listen.port)
            .parse()
            .map_err(|e| ConfigError::InvalidListen(format!("{}: {e}", self.listen.host)))
    }
}
