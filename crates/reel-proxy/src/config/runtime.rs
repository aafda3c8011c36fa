//! Runtime behavior settings exposed through the control endpoint.

use serde::{Deserialize, Serialize};

/// The mutable, caller-visible part of the proxy configuration.
///
/// This is what the control endpoint reports on GET and what an initial
/// `initial:` block in the config file seeds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuntimeSettings {
    /// Active cassette; empty means pass-through (no matching, no recording).
    #[serde(default)]
    pub cassette: String,

    /// When false, matching episodes are not replayed: every request is
    /// forwarded and appended to the cassette again.
    #[serde(default = "default_true")]
    pub record_new_episodes: bool,

    /// Answer 403 instead of forwarding requests that would be recorded.
    #[serde(default)]
    pub deny_unrecorded_requests: bool,

    /// Overwrite the outbound Host header with the upstream's host.
    #[serde(default = "default_true")]
    pub rewrite_host_header: bool,

    /// Header names whose values take part in matching.
    #[serde(default)]
    pub match_headers: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            cassette: String::new(),
            record_new_episodes: true,
            deny_unrecorded_requests: false,
            rewrite_host_header: true,
            match_headers: Vec::new(),
        }
    }
}

impl RuntimeSettings {
    pub fn is_pass_through(&self) -> bool {
        self.cassette.is_empty()
    }
}
