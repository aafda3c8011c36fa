//! File-backed cassette store.
//!
//! Each cassette is one JSON file, `<dir>/<name>.json`, holding an array of
//! episodes. Saves go through a sibling temporary file and a rename, so a
//! crash mid-write leaves the previous file intact.

use super::body::StoredBody;
use super::headers::HeaderMapping;
use super::types::{Episode, FormFields, RecordedRequest, RecordedResponse};
use super::url::RecordedUrl;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CassetteError {
    #[error("Invalid cassette name: {0:?}")]
    InvalidName(String),
    #[error("Cassette I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize cassette: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Failed to parse cassette: {0}")]
    Parse(String),
}

// On-disk shapes. Field names are shared with existing cassette files.

#[derive(Serialize, Deserialize)]
struct StoredEpisode {
    #[serde(rename = "Request")]
    request: StoredRequest,
    #[serde(rename = "Response")]
    response: StoredResponse,
}

#[derive(Serialize, Deserialize)]
struct StoredRequest {
    #[serde(rename = "Method", default)]
    method: String,
    #[serde(rename = "URL", default)]
    url: Option<RecordedUrl>,
    #[serde(rename = "Header", default)]
    header: HeaderMapping,
    #[serde(rename = "Body", default)]
    body: Option<String>,
    #[serde(rename = "Form", default)]
    form: Option<FormFields>,
}

#[derive(Serialize, Deserialize)]
struct StoredResponse {
    #[serde(rename = "StatusCode", default = "default_status")]
    status_code: u16,
    #[serde(rename = "Body", default)]
    body: Option<String>,
    #[serde(rename = "Header", default)]
    header: HeaderMapping,
}

fn default_status() -> u16 {
    200
}

impl From<&Episode> for StoredEpisode {
    fn from(episode: &Episode) -> Self {
        let request = &episode.request;
        let response = &episode.response;
        StoredEpisode {
            request: StoredRequest {
                method: request.method.clone(),
                url: Some(request.url.clone()),
                header: request.headers.clone(),
                body: Some(StoredBody::encode(&request.body, &request.headers).to_stored_string()),
                form: request.form.clone(),
            },
            response: StoredResponse {
                status_code: response.status,
                body: Some(
                    StoredBody::encode(&response.body, &response.headers).to_stored_string(),
                ),
                header: response.headers.clone(),
            },
        }
    }
}

impl TryFrom<StoredEpisode> for Episode {
    type Error = CassetteError;

    fn try_from(stored: StoredEpisode) -> Result<Self, Self::Error> {
        let StoredEpisode { request, response } = stored;

        let request_body = decode_body(request.body, &request.header)?;
        let response_body = decode_body(response.body, &response.header)?;

        Ok(Episode {
            request: RecordedRequest {
                method: request.method,
                url: request.url.unwrap_or_default(),
                headers: request.header,
                body: request_body,
                form: request.form,
            },
            response: RecordedResponse {
                status: response.status_code,
                headers: response.header,
                body: response_body,
            },
        })
    }
}

fn decode_body(stored: Option<String>, headers: &HeaderMapping) -> Result<Bytes, CassetteError> {
    match stored {
        Some(stored) => Ok(Bytes::from(StoredBody::decode(stored, headers)?.into_bytes())),
        None => Ok(Bytes::new()),
    }
}

/// Render episodes as a pretty-printed cassette document.
pub fn to_json(episodes: &[Episode]) -> Result<Vec<u8>, CassetteError> {
    let stored: Vec<StoredEpisode> = episodes.iter().map(StoredEpisode::from).collect();
    serde_json::to_vec_pretty(&stored).map_err(CassetteError::Serialize)
}

/// Parse a cassette document.
pub fn from_json(data: &[u8]) -> Result<Vec<Episode>, CassetteError> {
    let stored: Option<Vec<StoredEpisode>> =
        serde_json::from_slice(data).map_err(|e| CassetteError::Parse(e.to_string()))?;
    stored
        .unwrap_or_default()
        .into_iter()
        .map(Episode::try_from)
        .collect()
}

/// Loads and saves cassettes under one directory.
#[derive(Debug, Clone)]
pub struct CassetteStore {
    dir: PathBuf,
}

/// Whether `name` maps to a single file inside the cassette directory.
///
/// Dots are allowed anywhere except as the whole name, so `v1..2` is fine.
pub fn is_valid_cassette_name(name: &str) -> bool {
    !(name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']))
}

impl CassetteStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `name`.
    ///
    /// Names that could escape the cassette directory are rejected.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, CassetteError> {
        if !is_valid_cassette_name(name) {
            return Err(CassetteError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Load a cassette. A missing file is an empty cassette, not an error.
    pub fn load(&self, name: &str) -> Result<Vec<Episode>, CassetteError> {
        let path = self.path_for(name)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Cassette file {:?} does not exist, starting fresh", path);
                return Ok(Vec::new());
            }
            Err(source) => return Err(CassetteError::Io { path, source }),
        };

        let episodes = from_json(&data)?;
        info!("Loaded {} episodes from {:?}", episodes.len(), path);
        Ok(episodes)
    }

    /// Load a cassette, treating any failure as an empty cassette.
    pub fn load_or_empty(&self, name: &str) -> Vec<Episode> {
        self.load(name).unwrap_or_else(|e| {
            warn!("Could not load cassette '{}', starting empty: {}", name, e);
            Vec::new()
        })
    }

    /// Write the full episode sequence for `name`, creating the directory if needed.
    pub fn save(&self, name: &str, episodes: &[Episode]) -> Result<(), CassetteError> {
        let path = self.path_for(name)?;
        let json = to_json(episodes)?;

        fs::create_dir_all(&self.dir).map_err(|source| CassetteError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let tmp_path = self.dir.join(format!(".{name}.json.tmp"));
        fs::write(&tmp_path, &json).map_err(|source| CassetteError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| CassetteError::Io {
            path: path.clone(),
            source,
        })?;

        debug!("Saved {} episodes to {:?}", episodes.len(), path);
        Ok(())
    }

    /// Append one episode to the cassette on disk. Returns the new episode count.
    ///
    /// A cassette that exists but cannot be parsed is left untouched.
    pub fn append(&self, name: &str, episode: Episode) -> Result<usize, CassetteError> {
        let mut episodes = self.load(name)?;
        episodes.push(episode);
        self.save(name, &episodes)?;
        Ok(episodes.len())
    }
}
