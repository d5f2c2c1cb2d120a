//! Playback snapshots and what to show for them
//!
//! A [`PlaybackSnapshot`] is the structured form of the "currently playing"
//! response. [`classify`] turns it into a [`PresentationIntent`], the single
//! decision the rest of a poll cycle acts on.

use serde::Deserialize;
use tracing::debug;

// ============================================================================
// Snapshot
// ============================================================================

/// What kind of item the player reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayingType {
    Track,
    Episode,
    Ad,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Point-in-time report of the player state
///
/// Every field the upstream may omit is optional here; presence is checked
/// by [`classify`], not assumed.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlaybackSnapshot {
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub currently_playing_type: Option<PlayingType>,
    #[serde(default)]
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub item: Option<PlaybackItem>,
}

/// The track or episode being played
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlaybackItem {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Episode artwork
    #[serde(default)]
    pub images: Option<Vec<ImageRef>>,
    /// Tracks carry their artwork on the album
    #[serde(default)]
    pub album: Option<Album>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Album {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<ImageRef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageRef {
    pub url: String,
}

// ============================================================================
// Presentation Intent
// ============================================================================

/// Discriminant of a [`PresentationIntent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    Nothing,
    Song,
    Podcast,
}

impl IntentKind {
    /// Cache subdirectory for this kind, `None` for [`IntentKind::Nothing`]
    pub fn cache_subdir(&self) -> Option<&'static str> {
        match self {
            IntentKind::Nothing => None,
            IntentKind::Song => Some("songs"),
            IntentKind::Podcast => Some("podcasts"),
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentKind::Nothing => write!(f, "nothing"),
            IntentKind::Song => write!(f, "song"),
            IntentKind::Podcast => write!(f, "podcast"),
        }
    }
}

/// What the panel should show for one poll cycle
///
/// Built fresh from every snapshot and never mutated. Title and artwork URL
/// exist exactly when there is something to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationIntent {
    Nothing,
    /// Album artwork; `title` is the album name
    Song { title: String, artwork_url: String },
    /// Episode artwork; `title` is the episode name
    Podcast { title: String, artwork_url: String },
}

impl PresentationIntent {
    pub fn kind(&self) -> IntentKind {
        match self {
            PresentationIntent::Nothing => IntentKind::Nothing,
            PresentationIntent::Song { .. } => IntentKind::Song,
            PresentationIntent::Podcast { .. } => IntentKind::Podcast,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            PresentationIntent::Nothing => None,
            PresentationIntent::Song { title, .. } | PresentationIntent::Podcast { title, .. } => {
                Some(title)
            }
        }
    }

    pub fn artwork_url(&self) -> Option<&str> {
        match self {
            PresentationIntent::Nothing => None,
            PresentationIntent::Song { artwork_url, .. }
            | PresentationIntent::Podcast { artwork_url, .. } => Some(artwork_url),
        }
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// A snapshot that claims to be playing but lacks the fields to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// Field path that was absent or empty, e.g. `item.album.images`
    MissingField(&'static str),
}

impl std::fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifyError::MissingField(path) => {
                write!(f, "Snapshot is missing required field '{}'", path)
            }
        }
    }
}

impl std::error::Error for ClassifyError {}

/// Decide what to show for a snapshot
///
/// - no snapshot, or not playing: [`PresentationIntent::Nothing`]
/// - episode / track with `progress_ms >= duration_ms`: `Nothing` (the player
///   sometimes keeps reporting a finished item as playing)
/// - episode: episode name and its first image
/// - track: album name and the album's first image
/// - any other item type (ads, unknown): `Nothing`
pub fn classify(snapshot: Option<&PlaybackSnapshot>) -> Result<PresentationIntent, ClassifyError> {
    let Some(snapshot) = snapshot else {
        return Ok(PresentationIntent::Nothing);
    };

    if !snapshot.is_playing {
        return Ok(PresentationIntent::Nothing);
    }

    match snapshot.currently_playing_type.unwrap_or_default() {
        PlayingType::Episode => {
            let item = required(snapshot.item.as_ref(), "item")?;
            if is_finished(snapshot, item)? {
                return Ok(PresentationIntent::Nothing);
            }
            Ok(PresentationIntent::Podcast {
                title: non_empty(item.name.as_deref(), "item.name")?,
                artwork_url: first_image(item.images.as_deref(), "item.images")?,
            })
        }
        PlayingType::Track => {
            let item = required(snapshot.item.as_ref(), "item")?;
            if is_finished(snapshot, item)? {
                return Ok(PresentationIntent::Nothing);
            }
            let album = required(item.album.as_ref(), "item.album")?;
            Ok(PresentationIntent::Song {
                title: non_empty(album.name.as_deref(), "item.album.name")?,
                artwork_url: first_image(album.images.as_deref(), "item.album.images")?,
            })
        }
        other => {
            debug!("Nothing to show for playing type {:?}", other);
            Ok(PresentationIntent::Nothing)
        }
    }
}

fn is_finished(snapshot: &PlaybackSnapshot, item: &PlaybackItem) -> Result<bool, ClassifyError> {
    let progress = required(snapshot.progress_ms.as_ref(), "progress_ms")?;
    let duration = required(item.duration_ms.as_ref(), "item.duration_ms")?;
    Ok(progress >= duration)
}

fn required<'a, T>(value: Option<&'a T>, path: &'static str) -> Result<&'a T, ClassifyError> {
    value.ok_or(ClassifyError::MissingField(path))
}

fn non_empty(value: Option<&str>, path: &'static str) -> Result<String, ClassifyError> {
    match value {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(ClassifyError::MissingField(path)),
    }
}

fn first_image(images: Option<&[ImageRef]>, path: &'static str) -> Result<String, ClassifyError> {
    let url = images.and_then(|images| images.first()).map(|image| image.url.as_str());
    non_empty(url, path)
}
