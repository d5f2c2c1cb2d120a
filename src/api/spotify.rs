//! Spotify Web API client
//!
//! Polls `/v1/me/player` with a bearer token read from the credentials file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{PlaybackSource, SourceError};
use crate::playback::PlaybackSnapshot;

const PLAYER_PATH: &str = "/v1/me/player";

/// Ask for episodes too, otherwise podcasts report an empty item
const ADDITIONAL_TYPES: &str = "episode";

#[derive(Debug, Deserialize)]
struct Credentials {
    access_token: String,
}

/// Read the access token from the credentials file
///
/// The file is re-read on every request so an external refresher can
/// rotate the token while the daemon runs.
fn load_access_token(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read credentials file {:?}", path))?;
    let credentials: Credentials =
        serde_json::from_str(&content).context("Credentials file is not valid JSON")?;
    if credentials.access_token.is_empty() {
        return Err(anyhow!("access_token is empty"));
    }
    Ok(credentials.access_token)
}

#[derive(Clone)]
pub struct SpotifyClient {
    client: Client,
    base_url: String,
    credentials_path: PathBuf,
}

impl std::fmt::Debug for SpotifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyClient")
            .field("client", &"<HttpClient>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl SpotifyClient {
    pub fn new(base_url: &str, credentials_path: PathBuf, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials_path,
        })
    }

    fn player_url(&self) -> String {
        format!(
            "{}{}?additional_types={}",
            self.base_url, PLAYER_PATH, ADDITIONAL_TYPES
        )
    }
}

impl PlaybackSource for SpotifyClient {
    async fn current_playback(&self) -> Result<Option<PlaybackSnapshot>, SourceError> {
        let token = load_access_token(&self.credentials_path)
            .map_err(|e| SourceError::Auth(format!("{:#}", e)))?;

        let response = self
            .client
            .get(self.player_url())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            debug!("No active playback");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::Http(format!("status {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;
        parse_snapshot(&body)
    }
}

/// Parse a player response body
///
/// An empty body is treated like `204 No Content`.
fn parse_snapshot(body: &[u8]) -> Result<Option<PlaybackSnapshot>, SourceError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| SourceError::Parse(e.to_string()))
}
