//! Artwork cache
//!
//! Resolves a [`PresentationIntent`] to a decoded image, reading from
//! `<root>/<songs|podcasts>/<sanitized title>.jpg` when present and
//! downloading, re-encoding and persisting it otherwise.
//!
//! Entries are never updated or evicted. Writes go through a `.tmp` file and
//! a rename, so an interrupted download never leaves a truncated entry.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use parking_lot::Mutex;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::playback::{IntentKind, PresentationIntent};
use crate::sanitize::sanitize_name;
use crate::utils::{FALLBACK_DIR, write_atomic};

const JPEG_QUALITY: u8 = 90;

// ============================================================================
// Fetching
// ============================================================================

/// Downloads raw artwork bytes
pub trait ArtworkFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Plain HTTP GET fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("client", &"<HttpClient>")
            .finish()
    }
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl ArtworkFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("GET {} returned {}", url, response.status()));
        }
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Shared handle on a per-entry lock
///
/// Dropping the last lease removes the entry from the map, including when
/// a resolve is cancelled while waiting.
struct KeyLockLease<'a> {
    locks: &'a Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    path: PathBuf,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for KeyLockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // One reference in the map plus ours means nobody else waits
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.path);
        }
    }
}

pub struct ArtworkCache<F> {
    root: PathBuf,
    fetcher: F,
    fetch_timeout: Duration,
    /// One lock per entry path so the same key is never fetched twice at once
    key_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl<F: ArtworkFetcher> ArtworkCache<F> {
    pub fn new(root: PathBuf, fetcher: F, fetch_timeout: Duration) -> Self {
        Self {
            root,
            fetcher,
            fetch_timeout,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the kind subdirectories and the fallback directory
    pub fn ensure_layout(&self) -> Result<(), CacheError> {
        for dir in self.cache_directories() {
            fs::create_dir_all(&dir).map_err(|e| CacheError::Io(format!("{:?}: {}", dir, e)))?;
        }
        fs::create_dir_all(self.root.join(FALLBACK_DIR))
            .map_err(|e| CacheError::Io(e.to_string()))?;
        Ok(())
    }

    /// Path of the entry for a kind and title, `None` for [`IntentKind::Nothing`]
    pub fn entry_path(&self, kind: IntentKind, title: &str) -> Option<PathBuf> {
        let subdir = kind.cache_subdir()?;
        let file_name = format!("{}.jpg", sanitize_name(title));
        Some(self.root.join(subdir).join(file_name))
    }

    /// Resolve the artwork for an intent
    ///
    /// Returns `Ok(None)` only for [`PresentationIntent::Nothing`]. A hit
    /// touches no network. A miss downloads at most once per entry; the
    /// download is bounded by the fetch timeout and dropping the returned
    /// future cancels it without writing anything.
    pub async fn resolve(
        &self,
        intent: &PresentationIntent,
    ) -> Result<Option<DynamicImage>, CacheError> {
        let (Some(title), Some(url)) = (intent.title(), intent.artwork_url()) else {
            return Ok(None);
        };
        let Some(path) = self.entry_path(intent.kind(), title) else {
            return Ok(None);
        };

        // The lease outlives the guard, so the map entry goes once both drop
        let lease = self.key_lock(&path);
        let _guard = lease.lock.lock().await;

        if path.is_file() {
            debug!("Artwork cache hit: {:?}", path);
            let image = image::open(&path).map_err(|e| CacheError::Decode(e.to_string()))?;
            return Ok(Some(image));
        }

        debug!("Artwork cache miss: {:?}, fetching {}", path, url);
        let bytes = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url)).await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(CacheError::Fetch(format!("{:#}", e))),
            Err(_) => return Err(CacheError::Timeout(self.fetch_timeout)),
        };

        let jpeg = reencode_as_jpeg(&bytes)?;
        write_atomic(&path, &jpeg).map_err(|e| CacheError::Io(format!("{:?}: {}", path, e)))?;
        info!("Cached artwork {:?} ({} bytes)", path, jpeg.len());

        // Decode what was persisted so a later hit yields the same pixels
        let image = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .map_err(|e| CacheError::Decode(e.to_string()))?;
        Ok(Some(image))
    }

    fn key_lock(&self, path: &Path) -> KeyLockLease<'_> {
        let lock = self
            .key_locks
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone();
        KeyLockLease {
            locks: &self.key_locks,
            path: path.to_path_buf(),
            lock,
        }
    }

    fn cache_directories(&self) -> Vec<PathBuf> {
        [IntentKind::Song, IntentKind::Podcast]
            .iter()
            .filter_map(|kind| kind.cache_subdir())
            .map(|subdir| self.root.join(subdir))
            .collect()
    }

    /// Calculate cache statistics
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();

        for entry in collect_entries(&self.root.join("songs")) {
            stats.songs_bytes += entry.size;
            stats.songs_count += 1;
        }

        for entry in collect_entries(&self.root.join("podcasts")) {
            stats.podcasts_bytes += entry.size;
            stats.podcasts_count += 1;
        }

        stats
    }

    /// Clean up orphan .tmp files from incomplete writes
    ///
    /// Called at startup, before the first cycle.
    pub fn cleanup_temp_files(&self) -> ClearResult {
        let mut result = ClearResult::default();

        let mut dirs = self.cache_directories();
        dirs.push(self.root.join(FALLBACK_DIR));

        for dir in dirs {
            for entry in collect_entries(&dir) {
                if entry.path.extension().map(|e| e == "tmp").unwrap_or(false) {
                    match fs::remove_file(&entry.path) {
                        Ok(_) => {
                            info!("Cleaned up orphan temp file: {:?}", entry.path);
                            result.files_deleted += 1;
                            result.bytes_freed += entry.size;
                        }
                        Err(e) => {
                            warn!("Failed to delete temp file {:?}: {}", entry.path, e);
                            result.errors += 1;
                        }
                    }
                }
            }
        }

        result
    }
}

/// Decode any supported image and encode it as RGB JPEG
fn reencode_as_jpeg(bytes: &[u8]) -> Result<Vec<u8>, CacheError> {
    let image = image::load_from_memory(bytes).map_err(|e| CacheError::Decode(e.to_string()))?;
    let rgb = image.to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| CacheError::Encode(e.to_string()))?;
    Ok(jpeg)
}

// ============================================================================
// Stats
// ============================================================================

/// Information about a cached file
#[derive(Debug)]
struct CacheEntry {
    path: PathBuf,
    size: u64,
}

/// Collect all file entries from a directory
fn collect_entries(dir: &Path) -> Vec<CacheEntry> {
    let mut entries = Vec::new();

    if !dir.exists() {
        return entries;
    }

    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            warn!("Failed to read cache directory {:?}: {}", dir, e);
            return entries;
        }
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        entries.push(CacheEntry { path, size });
    }

    entries
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub songs_count: usize,
    pub songs_bytes: u64,
    pub podcasts_count: usize,
    pub podcasts_bytes: u64,
}

impl CacheStats {
    pub fn file_count(&self) -> usize {
        self.songs_count + self.podcasts_count
    }

    /// Get total size in megabytes
    pub fn total_mb(&self) -> u64 {
        (self.songs_bytes + self.podcasts_bytes) / (1024 * 1024)
    }
}

/// Result of a cleanup pass
#[derive(Debug, Clone, Default)]
pub struct ClearResult {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub errors: usize,
}

/// Cache resolution errors
#[derive(Debug, Clone)]
pub enum CacheError {
    Io(String),
    Fetch(String),
    Timeout(Duration),
    Decode(String),
    Encode(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "Cache IO error: {}", e),
            CacheError::Fetch(e) => write!(f, "Artwork download failed: {}", e),
            CacheError::Timeout(t) => write!(f, "Artwork download timed out after {:?}", t),
            CacheError::Decode(e) => write!(f, "Artwork decode failed: {}", e),
            CacheError::Encode(e) => write!(f, "Artwork encode failed: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}
