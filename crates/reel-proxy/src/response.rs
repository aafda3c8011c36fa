//! Response body type and small constructors shared by the handlers.

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::convert::Infallible;

/// Body type of every response the proxy returns.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    BoxBody::new(Full::new(bytes.into()).map_err(|never: Infallible| match never {}))
}

/// A response with the given status and no body.
pub fn empty_response(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(BoxBody::new(
        Empty::<Bytes>::new().map_err(|never: Infallible| match never {}),
    ));
    *response.status_mut() = status;
    response
}

/// A JSON response from an already-serialized body.
pub fn json_response(status: StatusCode, body: Vec<u8>) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// JSON error body in the form `{"error": "..."}`.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = serde_json::json!({ "error": message });
    json_response(status, body.to_string().into_bytes())
}
