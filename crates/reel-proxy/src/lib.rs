//! Reel: an HTTP reverse proxy that records upstream exchanges into
//! cassettes and replays them.

pub mod capture;
pub mod cassette;
pub mod config;
pub mod control;
pub mod engine;
pub mod forwarder;
pub mod matcher;
pub mod response;
pub mod rewrite;
pub mod server;
pub mod state;

pub use config::{ProxyConfig, RuntimeSettings};
pub use server::{ProxyHandle, ProxyServer};
