//! Host header rewriting ahead of the engine.

use crate::state::SharedState;
use hyper::header::{HeaderValue, HOST};
use hyper::Request;
use tracing::warn;

/// Point the Host header at the upstream when `rewrite_host_header` is set.
///
/// Otherwise the inbound Host header is left as the client sent it.
pub fn rewrite_host<B>(state: &SharedState, req: &mut Request<B>) {
    if !state.lock().settings.rewrite_host_header {
        return;
    }
    match HeaderValue::from_str(state.target().authority()) {
        Ok(host) => {
            req.headers_mut().insert(HOST, host);
        }
        Err(e) => warn!("Cannot use upstream authority as Host header: {}", e),
    }
}
