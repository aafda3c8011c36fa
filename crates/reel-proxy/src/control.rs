//! Control endpoint for inspecting and changing runtime settings.
//!
//! `GET /__reel__/config` reports the current [`RuntimeSettings`];
//! `POST /__reel__/config` applies whichever keys the JSON body carries and
//! reports the result. Each key is read on its own: a key with the wrong
//! type is logged and skipped while the others still apply. A body that is
//! not a JSON object changes nothing. A cassette name that would escape the
//! cassette directory is refused with 400.

use crate::cassette::is_valid_cassette_name;
use crate::config::RuntimeSettings;
use crate::response::{error_response, json_response, ProxyBody};
use crate::state::SharedState;
use http_body_util::BodyExt;
use hyper::header::{HeaderValue, ALLOW};
use hyper::{Method, Request, Response, StatusCode};
use serde::de::{DeserializeOwned, Error as _};
use serde_json::{Map, Value};
use tracing::{info, warn};

pub const CONTROL_PATH: &str = "/__reel__/config";

/// Partial update of [`RuntimeSettings`]; absent keys are left unchanged.
#[derive(Debug, Default, PartialEq)]
pub struct ControlUpdate {
    pub cassette: Option<String>,
    pub record_new_episodes: Option<bool>,
    pub deny_unrecorded_requests: Option<bool>,
    pub rewrite_host_header: Option<bool>,
    pub match_headers: Option<Vec<String>>,
}

impl ControlUpdate {
    /// Parse a control body. Only a body that is not a JSON object fails;
    /// null or mistyped keys are left out of the update.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let Value::Object(mut fields) = serde_json::from_slice::<Value>(body)? else {
            return Err(serde_json::Error::custom("control body must be a JSON object"));
        };
        Ok(Self {
            cassette: take_field(&mut fields, "cassette"),
            record_new_episodes: take_field(&mut fields, "record_new_episodes"),
            deny_unrecorded_requests: take_field(&mut fields, "deny_unrecorded_requests"),
            rewrite_host_header: take_field(&mut fields, "rewrite_host_header"),
            match_headers: take_field(&mut fields, "match_headers"),
        })
    }

    pub fn apply(self, settings: &mut RuntimeSettings) {
        if let Some(cassette) = self.cassette {
            settings.cassette = cassette;
        }
        if let Some(value) = self.record_new_episodes {
            settings.record_new_episodes = value;
        }
        if let Some(value) = self.deny_unrecorded_requests {
            settings.deny_unrecorded_requests = value;
        }
        if let Some(value) = self.rewrite_host_header {
            settings.rewrite_host_header = value;
        }
        if let Some(headers) = self.match_headers {
            settings.match_headers = headers;
        }
    }
}

fn take_field<T: DeserializeOwned>(fields: &mut Map<String, Value>, key: &str) -> Option<T> {
    match fields.remove(key)? {
        Value::Null => None,
        value => match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring control key '{}': {}", key, e);
                None
            }
        },
    }
}

pub fn is_control_request<B>(req: &Request<B>) -> bool {
    req.uri().path() == CONTROL_PATH
}

pub async fn handle_control(req: Request<ProxyBody>, state: &SharedState) -> Response<ProxyBody> {
    let method = req.method().clone();
    match method {
        Method::GET => settings_response(&state.settings()),
        Method::POST => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!("Failed to read control request body: {}", e);
                    return settings_response(&state.settings());
                }
            };
            match ControlUpdate::from_json(&body) {
                Ok(ControlUpdate {
                    cassette: Some(name),
                    ..
                }) if !name.is_empty() && !is_valid_cassette_name(&name) => {
                    warn!("Refusing control update with invalid cassette name '{}'", name);
                    error_response(
                        StatusCode::BAD_REQUEST,
                        &format!("Invalid cassette name '{name}'"),
                    )
                }
                Ok(update) => {
                    let settings = state.update(|s| update.apply(s));
                    info!(
                        "Control update applied: cassette='{}' record_new_episodes={} deny_unrecorded_requests={}",
                        settings.cassette,
                        settings.record_new_episodes,
                        settings.deny_unrecorded_requests
                    );
                    settings_response(&settings)
                }
                Err(e) => {
                    warn!("Ignoring malformed control request: {}", e);
                    settings_response(&state.settings())
                }
            }
        }
        _ => {
            let mut response =
                error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, POST"));
            response
        }
    }
}

fn settings_response(settings: &RuntimeSettings) -> Response<ProxyBody> {
    match serde_json::to_vec(settings) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to serialize settings: {e}"),
        ),
    }
}
