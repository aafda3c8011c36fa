//! Cassettes: named, persisted sequences of recorded episodes.
//!
//! # Module Structure
//!
//! - `types` - Episode, recorded request and response
//! - `headers` - Ordered multi-valued header mapping
//! - `url` - Path/query/fragment of a recorded request
//! - `body` - Text-or-base64 body encoding
//! - `store` - File-backed load/save

mod body;
mod headers;
mod store;
mod types;
mod url;

pub use body::{is_text, StoredBody};
pub use headers::{canonical_header_name, HeaderMapping};
pub use store::{from_json, is_valid_cassette_name, to_json, CassetteError, CassetteStore};
pub use types::{Episode, FormFields, RecordedRequest, RecordedResponse};
pub use url::RecordedUrl;
