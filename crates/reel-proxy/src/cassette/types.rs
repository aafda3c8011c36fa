//! In-memory episode model.

use super::headers::HeaderMapping;
use super::url::RecordedUrl;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Decoded form fields: name -> values in submission order.
pub type FormFields = BTreeMap<String, Vec<String>>;

/// One recorded request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub request: RecordedRequest,
    pub response: RecordedResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub url: RecordedUrl,
    pub headers: HeaderMapping,
    pub body: Bytes,
    /// Present when the body was form-encoded.
    pub form: Option<FormFields>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResponse {
    pub status: u16,
    pub headers: HeaderMapping,
    pub body: Bytes,
}

impl Default for RecordedResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderMapping::new(),
            body: Bytes::new(),
        }
    }
}
