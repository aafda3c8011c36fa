//! Record/replay engine.
//!
//! For every non-control request the engine decides, under the state lock,
//! between four outcomes:
//!
//! - no active cassette: forward and stream back, record nothing;
//! - a matching episode and `record_new_episodes`: replay it verbatim;
//! - `deny_unrecorded_requests`: 403 with an empty body;
//! - otherwise: forward, stream the response back through the capture
//!   adapter and append the exchange to the cassette once it completes.
//!
//! The lock is released before any upstream I/O.

use crate::capture::capture_response;
use crate::cassette::{Episode, RecordedRequest, RecordedResponse};
use crate::forwarder::Forwarder;
use crate::matcher::{find_first_match, LiveRequest};
use crate::response::{empty_response, error_response, full_body, ProxyBody};
use crate::state::{ProxyState, RecordOutcome, RecordTicket, SharedState};
use http_body_util::combinators::BoxBody;
use hyper::header::{HeaderValue, CONTENT_LENGTH};
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What to do with a live request.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    PassThrough,
    Replay(RecordedResponse),
    Deny,
    Record(RecordTicket),
}

pub fn decide(state: &ProxyState, live: &LiveRequest) -> Decision {
    let settings = &state.settings;
    if settings.is_pass_through() {
        return Decision::PassThrough;
    }

    if settings.record_new_episodes {
        if let Some(episode) = find_first_match(&state.episodes, live, &settings.match_headers) {
            return Decision::Replay(episode.response.clone());
        }
    }

    if settings.deny_unrecorded_requests {
        return Decision::Deny;
    }

    Decision::Record(RecordTicket {
        cassette: settings.cassette.clone(),
    })
}

/// Build the response for a recorded exchange answering a `method` request.
pub fn replay_response(recorded: RecordedResponse, method: &Method) -> Response<ProxyBody> {
    let status = StatusCode::from_u16(recorded.status).unwrap_or_else(|_| {
        warn!("Recorded status {} is invalid; replaying as 200", recorded.status);
        StatusCode::OK
    });
    let mut headers = recorded.headers.to_header_map();

    // A hand-edited cassette may disagree with its own body. Bodiless
    // responses (HEAD, 204, 304) legitimately declare the entity's length.
    let bodiless = *method == Method::HEAD
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());
    if !bodiless && declared.is_some_and(|len| len != recorded.body.len()) {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(recorded.body.len()));
    }

    let mut response = Response::new(full_body(recorded.body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

pub struct RecordReplayEngine {
    state: Arc<SharedState>,
    forwarder: Arc<dyn Forwarder>,
}

impl RecordReplayEngine {
    pub fn new(state: Arc<SharedState>, forwarder: Arc<dyn Forwarder>) -> Self {
        Self { state, forwarder }
    }

    pub async fn handle(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        // Transparent mode streams the request body without buffering it.
        if self.state.lock().settings.is_pass_through() {
            debug!("Pass-through {} {}", req.method(), req.uri());
            return self.pass_through(req).await;
        }

        let live = match LiveRequest::from_request(req).await {
            Ok(live) => live,
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                return error_response(StatusCode::BAD_REQUEST, "Failed to read request body");
            }
        };

        let decision = {
            let state = self.state.lock();
            decide(&state, &live)
        };

        match decision {
            Decision::PassThrough => self.pass_through(live.into_request()).await,
            Decision::Replay(recorded) => {
                debug!("Replaying {} {}", live.method, live.uri);
                replay_response(recorded, &live.method)
            }
            Decision::Deny => {
                debug!("Denying unrecorded {} {}", live.method, live.uri);
                empty_response(StatusCode::FORBIDDEN)
            }
            Decision::Record(ticket) => self.record(live, ticket).await,
        }
    }

    async fn pass_through(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        match self.forwarder.forward(req).await {
            Ok(response) => response,
            Err(e) => {
                error!("Upstream request failed: {}", e);
                error_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        }
    }

    async fn record(&self, live: LiveRequest, ticket: RecordTicket) -> Response<ProxyBody> {
        debug!(
            "Recording {} {} into '{}'",
            live.method, live.uri, ticket.cassette
        );
        let request = live.to_recorded();
        let response = match self.forwarder.forward(live.into_request()).await {
            Ok(response) => response,
            Err(e) => {
                error!("Upstream request failed, not recording: {}", e);
                return error_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
            }
        };

        let state = Arc::clone(&self.state);
        capture_response(response, move |captured| {
            persist(&state, &ticket, request, captured.into_recorded());
        })
        .map(BoxBody::new)
    }
}

fn persist(
    state: &SharedState,
    ticket: &RecordTicket,
    request: RecordedRequest,
    response: RecordedResponse,
) {
    let episode = Episode { request, response };
    match state.record(ticket, episode) {
        Ok(RecordOutcome::Active(count)) | Ok(RecordOutcome::Detached(count)) => {
            info!(
                "Recorded episode #{} into cassette '{}'",
                count, ticket.cassette
            );
        }
        Err(e) => warn!(
            "Failed to persist cassette '{}': {}",
            ticket.cassette, e
        ),
    }
}
