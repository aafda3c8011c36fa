//! Content-type-aware body encoding for cassette files.
//!
//! Bodies of text-like messages are stored as readable strings, everything
//! else as standard base64. The choice is always made from the owning
//! message's own `Content-Type` header, on save and on load alike.

use super::headers::HeaderMapping;
use super::store::CassetteError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static TEXT_CONTENT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(text/)|(json)").expect("text content-type pattern is valid"));

/// Whether a message with these headers stores its body as plain text.
///
/// Only the first `Content-Type` value is inspected; the comparison is case-sensitive.
pub fn is_text(headers: &HeaderMapping) -> bool {
    headers
        .first("Content-Type")
        .is_some_and(|content_type| TEXT_CONTENT_TYPE.is_match(content_type))
}

/// A body as it appears in a cassette file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredBody {
    Text(String),
    Binary(Vec<u8>),
}

impl StoredBody {
    pub fn encode(body: &[u8], headers: &HeaderMapping) -> Self {
        if !is_text(headers) {
            return StoredBody::Binary(body.to_vec());
        }
        match std::str::from_utf8(body) {
            Ok(text) => StoredBody::Text(text.to_string()),
            Err(_) => {
                warn!(
                    "Body declared as {:?} is not valid UTF-8; storing it lossily",
                    headers.first("Content-Type")
                );
                StoredBody::Text(String::from_utf8_lossy(body).into_owned())
            }
        }
    }

    /// Interpret a stored string according to the message's headers.
    pub fn decode(stored: String, headers: &HeaderMapping) -> Result<Self, CassetteError> {
        if is_text(headers) {
            Ok(StoredBody::Text(stored))
        } else {
            STANDARD
                .decode(stored.as_bytes())
                .map(StoredBody::Binary)
                .map_err(|e| CassetteError::Parse(format!("invalid base64 body: {e}")))
        }
    }

    /// The string written into the cassette's `Body` field.
    pub fn to_stored_string(&self) -> String {
        match self {
            StoredBody::Text(text) => text.clone(),
            StoredBody::Binary(bytes) => STANDARD.encode(bytes),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            StoredBody::Text(text) => text.into_bytes(),
            StoredBody::Binary(bytes) => bytes,
        }
    }
}
