//! Episode matching: decides whether a live request corresponds to a recorded one.
//!
//! A request matches when, in order:
//! 1. the methods are byte-equal,
//! 2. path, raw query and fragment are equal (scheme and host are ignored),
//! 3. every configured match header carries the same value sequence,
//! 4. the bodies are equal - as decoded form fields for form-encoded
//!    requests, as raw bytes otherwise.

use crate::cassette::{Episode, FormFields, HeaderMapping, RecordedRequest, RecordedUrl};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::CONTENT_TYPE;
use hyper::{HeaderMap, Method, Request, Uri};
use std::convert::Infallible;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// A live request with its body buffered.
///
/// Matching reads the buffered bytes, and `into_request` hands the same bytes
/// on to the forwarder, so inspecting the body never consumes it.
#[derive(Debug, Clone)]
pub struct LiveRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl LiveRequest {
    /// Buffer the body of `req`.
    pub async fn from_request<B>(req: Request<B>) -> Result<Self, B::Error>
    where
        B: Body,
    {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        })
    }

    pub fn url(&self) -> RecordedUrl {
        RecordedUrl::from_uri(&self.uri)
    }

    pub fn is_form(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(is_form_content_type)
    }

    /// Decoded form fields, when the body is form-encoded.
    pub fn form(&self) -> Option<FormFields> {
        self.is_form().then(|| parse_form(&self.body))
    }

    /// Snapshot of this request as it will be written into a cassette.
    pub fn to_recorded(&self) -> RecordedRequest {
        RecordedRequest {
            method: self.method.as_str().to_string(),
            url: self.url(),
            headers: HeaderMapping::from_header_map(&self.headers),
            body: self.body.clone(),
            form: self.form(),
        }
    }

    /// Rebuild a request carrying the buffered body.
    pub fn into_request(self) -> Request<BoxBody<Bytes, hyper::Error>> {
        let mut req = Request::new(BoxBody::new(
            Full::new(self.body).map_err(|never: Infallible| match never {}),
        ));
        *req.method_mut() = self.method;
        *req.uri_mut() = self.uri;
        *req.headers_mut() = self.headers;
        req
    }
}

fn is_form_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(FORM_URLENCODED))
}

/// Decode an `application/x-www-form-urlencoded` body.
pub fn parse_form(body: &[u8]) -> FormFields {
    let mut fields = FormFields::new();
    let body = String::from_utf8_lossy(body);
    for pair in body.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        fields
            .entry(decode_form_component(key))
            .or_default()
            .push(decode_form_component(value));
    }
    fields
}

fn decode_form_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Whether `live` corresponds to `recorded` under the given match headers.
pub fn matches(recorded: &RecordedRequest, live: &LiveRequest, match_headers: &[String]) -> bool {
    if recorded.method != live.method.as_str() {
        return false;
    }

    let live_url = live.url();
    if recorded.url.path != live_url.path
        || recorded.url.raw_query != live_url.raw_query
        || recorded.url.fragment != live_url.fragment
    {
        return false;
    }

    if !same_headers(&recorded.headers, &live.headers, match_headers) {
        return false;
    }

    match live.form() {
        Some(live_form) => {
            let recorded_form = recorded
                .form
                .clone()
                .unwrap_or_else(|| parse_form(&recorded.body));
            recorded_form == live_form
        }
        None => recorded.body == live.body,
    }
}

fn same_headers(recorded: &HeaderMapping, live: &HeaderMap, match_headers: &[String]) -> bool {
    match_headers.iter().all(|name| {
        let recorded_values = recorded.values(name);
        let live_values: Vec<String> = live
            .get_all(name.as_str())
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        recorded_values == live_values.as_slice()
    })
}

/// The earliest recorded episode matching `live`.
pub fn find_first_match<'a>(
    episodes: &'a [Episode],
    live: &LiveRequest,
    match_headers: &[String],
) -> Option<&'a Episode> {
    episodes
        .iter()
        .find(|episode| matches(&episode.request, live, match_headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::RecordedResponse;

    fn live(method: Method, uri: &str, headers: &[(&str, &str)], body: &str) -> LiveRequest {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            header_map.append(
                hyper::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        LiveRequest {
            method,
            uri: uri.parse().unwrap(),
            headers: header_map,
            body: Bytes::from(body.to_string()),
        }
    }

    fn episode_for(req: &LiveRequest, body: &str) -> Episode {
        Episode {
            request: req.to_recorded(),
            response: RecordedResponse {
                body: Bytes::from(body.to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_identical_request_matches() {
        let req = live(Method::GET, "/things?id=1", &[], "");
        assert!(matches(&req.to_recorded(), &req, &[]));
    }

    #[test]
    fn test_method_must_match() {
        let get = live(Method::GET, "/things", &[], "");
        let post = live(Method::POST, "/things", &[], "");
        assert!(!matches(&get.to_recorded(), &post, &[]));
    }

    #[test]
    fn test_url_ignores_scheme_and_host() {
        let recorded = live(Method::GET, "http://old-host:1111/a?b=c", &[], "").to_recorded();
        let now = live(Method::GET, "http://new-host:2222/a?b=c", &[], "");
        assert!(matches(&recorded, &now, &[]));
    }

    #[test]
    fn test_query_must_match_exactly() {
        let recorded = live(Method::GET, "/a?x=1&y=2", &[], "").to_recorded();
        assert!(!matches(&recorded, &live(Method::GET, "/a?y=2&x=1", &[], ""), &[]));
        assert!(!matches(&recorded, &live(Method::GET, "/a", &[], ""), &[]));
        assert!(!matches(&recorded, &live(Method::GET, "/b?x=1&y=2", &[], ""), &[]));
    }

    #[test]
    fn test_headers_ignored_unless_configured() {
        let recorded = live(Method::GET, "/", &[("x-trace", "one")], "").to_recorded();
        let now = live(Method::GET, "/", &[("x-trace", "two")], "");
        assert!(matches(&recorded, &now, &[]));
        assert!(!matches(&recorded, &now, &["X-Trace".to_string()]));
    }

    #[test]
    fn test_configured_header_compares_full_sequence() {
        let names = ["Accept".to_string()];
        let recorded = live(
            Method::GET,
            "/",
            &[("accept", "text/html"), ("accept", "application/json")],
            "",
        )
        .to_recorded();

        let same = live(
            Method::GET,
            "/",
            &[("accept", "text/html"), ("accept", "application/json")],
            "",
        );
        let reordered = live(
            Method::GET,
            "/",
            &[("accept", "application/json"), ("accept", "text/html")],
            "",
        );
        let shorter = live(Method::GET, "/", &[("accept", "text/html")], "");
        let missing = live(Method::GET, "/", &[], "");

        assert!(matches(&recorded, &same, &names));
        assert!(!matches(&recorded, &reordered, &names));
        assert!(!matches(&recorded, &shorter, &names));
        assert!(!matches(&recorded, &missing, &names));
    }

    #[test]
    fn test_raw_body_must_match() {
        let recorded = live(Method::POST, "/", &[("content-type", "text/plain")], "abc").to_recorded();
        assert!(matches(
            &recorded,
            &live(Method::POST, "/", &[("content-type", "text/plain")], "abc"),
            &[]
        ));
        assert!(!matches(
            &recorded,
            &live(Method::POST, "/", &[("content-type", "text/plain")], "abd"),
            &[]
        ));
    }

    #[test]
    fn test_form_bodies_compare_fields() {
        let ct = [("content-type", "application/x-www-form-urlencoded")];
        let recorded = live(Method::POST, "/form", &ct, "Foo=Bar&Baz=Quux").to_recorded();

        assert!(matches(&recorded, &live(Method::POST, "/form", &ct, "Baz=Quux&Foo=Bar"), &[]));
        assert!(!matches(&recorded, &live(Method::POST, "/form", &ct, "Foo=Bar"), &[]));
    }

    #[test]
    fn test_form_values_are_order_sensitive_within_key() {
        let ct = [("content-type", "application/x-www-form-urlencoded; charset=utf-8")];
        let recorded = live(Method::POST, "/", &ct, "tag=a&tag=b").to_recorded();
        assert!(matches(&recorded, &live(Method::POST, "/", &ct, "tag=a&tag=b"), &[]));
        assert!(!matches(&recorded, &live(Method::POST, "/", &ct, "tag=b&tag=a"), &[]));
    }

    #[test]
    fn test_parse_form_decodes_components() {
        let form = parse_form(b"name=John+Smith&city=S%C3%A3o%20Paulo&flag");
        assert_eq!(form["name"], ["John Smith"]);
        assert_eq!(form["city"], ["S\u{e3}o Paulo"]);
        assert_eq!(form["flag"], [""]);
    }

    #[test]
    fn test_recorded_form_only_for_form_bodies() {
        let form = live(
            Method::POST,
            "/",
            &[("content-type", "application/x-www-form-urlencoded")],
            "a=1",
        );
        let json = live(Method::POST, "/", &[("content-type", "application/json")], "{}");
        assert!(form.to_recorded().form.is_some());
        assert!(json.to_recorded().form.is_none());
    }

    #[test]
    fn test_first_recorded_match_wins() {
        let req = live(Method::GET, "/count", &[], "");
        let episodes = vec![
            episode_for(&live(Method::GET, "/other", &[], ""), "other"),
            episode_for(&req, "first"),
            episode_for(&req, "second"),
        ];
        let found = find_first_match(&episodes, &req, &[]).unwrap();
        assert_eq!(found.response.body, Bytes::from("first"));
        assert!(find_first_match(&episodes, &live(Method::GET, "/none", &[], ""), &[]).is_none());
    }

    #[tokio::test]
    async fn test_buffered_body_survives_matching() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .body(Full::new(Bytes::from("payload")))
            .unwrap();
        let live = LiveRequest::from_request(req).await.unwrap();
        assert!(matches(&live.to_recorded(), &live, &[]));

        let forwarded = live.into_request();
        let body = forwarded.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from("payload"));
    }
}
