//! The URL portion of a recorded request.
//!
//! Only the path, raw query and fragment are kept. Scheme and host are left
//! out so one cassette can be replayed against upstreams on different hosts
//! and ports.

use hyper::Uri;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedUrl {
    pub path: String,
    /// Raw query string without the leading `?`; empty when absent.
    pub raw_query: String,
    pub fragment: String,
}

impl RecordedUrl {
    pub fn from_uri(uri: &Uri) -> Self {
        Self {
            path: uri.path().to_string(),
            raw_query: uri.query().unwrap_or_default().to_string(),
            fragment: String::new(),
        }
    }

    /// Parse `path[?query][#fragment]`. A leading `scheme://authority` is dropped.
    pub fn parse(raw: &str) -> Self {
        let (rest, fragment) = match raw.split_once('#') {
            Some((rest, fragment)) => (rest, fragment),
            None => (raw, ""),
        };
        let (path, raw_query) = match rest.split_once('?') {
            Some((path, query)) => (path, query),
            None => (rest, ""),
        };
        let path = match path.split_once("://") {
            Some((_, after_scheme)) => match after_scheme.find('/') {
                Some(idx) => &after_scheme[idx..],
                None => "",
            },
            None => path,
        };
        Self {
            path: path.to_string(),
            raw_query: raw_query.to_string(),
            fragment: fragment.to_string(),
        }
    }
}

impl fmt::Display for RecordedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if !self.raw_query.is_empty() {
            write!(f, "?{}", self.raw_query)?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

impl Serialize for RecordedUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Older cassettes spell the URL out as an object of its components.
#[derive(Deserialize)]
#[serde(untagged)]
enum UrlRepr {
    Text(String),
    Parts {
        #[serde(rename = "Path", default)]
        path: String,
        #[serde(rename = "RawQuery", default)]
        raw_query: String,
        #[serde(rename = "Fragment", default)]
        fragment: String,
    },
}

impl<'de> Deserialize<'de> for RecordedUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match UrlRepr::deserialize(deserializer)? {
            UrlRepr::Text(raw) => RecordedUrl::parse(&raw),
            UrlRepr::Parts {
                path,
                raw_query,
                fragment,
            } => RecordedUrl {
                path,
                raw_query,
                fragment,
            },
        })
    }
}
