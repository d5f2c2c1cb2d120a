//! Utility functions

use std::path::{Path, PathBuf};

// ============================================================================
// Directories
// ============================================================================

/// Application directory name used under the platform config/cache roots
pub const APP_DIR: &str = "nowplaying-matrix";

/// Subdirectory holding the static fallback image
pub const FALLBACK_DIR: &str = "black_image";

/// File name of the static fallback image
pub const FALLBACK_FILE: &str = "black.jpg";

/// Get the base config directory
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Get the default artwork cache root
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Path of the fallback image below a cache root
pub fn fallback_image_path(cache_root: &Path) -> PathBuf {
    cache_root.join(FALLBACK_DIR).join(FALLBACK_FILE)
}

// ============================================================================
// Temp Files
// ============================================================================

/// Sibling path used while a file is being written
///
/// `songs/Abbey Road.jpg` becomes `songs/Abbey Road.jpg.tmp`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `path` through a temp file and a rename
///
/// Readers never observe a half-written file. The temp file is removed if
/// any step fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);
    let result = std::fs::write(&temp_path, bytes).and_then(|_| std::fs::rename(&temp_path, path));

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}
