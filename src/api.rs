//! Playback source
//!
//! Anything that can report the current playback snapshot.

mod spotify;

pub use spotify::SpotifyClient;

use crate::playback::PlaybackSnapshot;

/// Reports what is currently playing
///
/// `Ok(None)` means the player has nothing active.
pub trait PlaybackSource {
    async fn current_playback(&self) -> Result<Option<PlaybackSnapshot>, SourceError>;
}

/// Failure to obtain a snapshot
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Credentials could not be read
    Auth(String),
    /// Transport failure or non-success status
    Http(String),
    /// Body was not a playback snapshot
    Parse(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Auth(e) => write!(f, "Credentials error: {}", e),
            SourceError::Http(e) => write!(f, "HTTP error: {}", e),
            SourceError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}
