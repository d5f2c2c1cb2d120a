//! Daemon settings persistence
//!
//! Handles loading the configuration file and writing a template on first start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::{config_dir, default_cache_root};

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the artwork cache (`songs/`, `podcasts/`, `black_image/`)
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
    /// Delay between two poll cycles
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Network settings
    #[serde(default)]
    pub network: NetworkSettings,
    /// LED panel settings
    #[serde(default)]
    pub display: DisplaySettings,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Upper bound for a single artwork download
    pub fetch_timeout_secs: u64,
    /// Base URL of the Web API
    pub api_base_url: String,
    /// JSON file holding `access_token`
    pub credentials_path: PathBuf,
}

/// Fixed LED matrix configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub hardware_mapping: String,
    pub rows: u32,
    pub cols: u32,
    pub chain_length: u32,
    pub parallel: u32,
    pub pwm_bits: u8,
    /// Brightness in percent (1 to 100)
    pub brightness: u8,
    pub pwm_lsb_nanoseconds: u32,
    /// Color order of the LEDs, e.g. `RGB` or `BGR`; checked at display init
    pub led_rgb_sequence: String,
    pub gpio_slowdown: u32,
    pub disable_hardware_pulsing: bool,
    /// Where the file-backed panel writes the current frame
    pub output_path: PathBuf,
}

impl DisplaySettings {
    /// Total width in pixels across the chain, `None` on overflow
    pub fn width(&self) -> Option<u32> {
        self.cols.checked_mul(self.chain_length)
    }

    /// Total height in pixels across parallel chains, `None` on overflow
    pub fn height(&self) -> Option<u32> {
        self.rows.checked_mul(self.parallel)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            poll_interval_ms: default_poll_interval_ms(),
            network: NetworkSettings::default(),
            display: DisplaySettings::default(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 10,
            api_base_url: "https://api.spotify.com".to_string(),
            credentials_path: config_dir().join("spotify_tokens.json"),
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            hardware_mapping: "adafruit-hat-pwm".to_string(),
            rows: 64,
            cols: 64,
            chain_length: 1,
            parallel: 1,
            pwm_bits: 11,
            brightness: 100,
            pwm_lsb_nanoseconds: 130,
            led_rgb_sequence: "RGB".to_string(),
            gpio_slowdown: 1,
            disable_hardware_pulsing: true,
            output_path: default_cache_root().join("frame.png"),
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn file_path() -> PathBuf {
        config_dir().join("settings.json")
    }

    /// Load settings from the default file
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_or_init(&Self::file_path())
    }

    /// Load settings from `path`, or return defaults if it does not exist
    ///
    /// Defaults are written back so the next start has a template to edit.
    /// A file that exists but cannot be read or parsed is an error, never
    /// silently replaced by defaults.
    pub fn load_or_init(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            let settings = Self::load_from_file(path)?;
            tracing::info!("Loaded settings from {:?}", path);
            return Ok(settings);
        }

        tracing::warn!("No settings at {:?}, using defaults", path);
        let settings = Self::default();
        if let Err(e) = settings.save_to_file(path) {
            tracing::warn!("Failed to write settings template: {}", e);
        }
        Ok(settings)
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Save settings to a specific file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SettingsError::Io(e.to_string()))?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.network.fetch_timeout_secs)
    }
}

/// Errors that can occur with settings
#[derive(Debug, Clone)]
pub enum SettingsError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {}
