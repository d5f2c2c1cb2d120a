//! nowplaying-matrix - shows the artwork of what is playing on an LED matrix
//!
//! Polls the Spotify Web API, caches album and episode art on disk and
//! renders it to a fixed-resolution panel.

mod api;
mod cache;
mod playback;
mod poll;
mod render;
mod sanitize;
mod settings;
mod utils;

use anyhow::{Context, Result};
use tracing::info;

use api::SpotifyClient;
use cache::{ArtworkCache, HttpFetcher};
use poll::{PollLoop, TokioClock, load_or_create_fallback};
use render::{FilePanel, Panel};
use settings::Settings;
use utils::fallback_image_path;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    let settings = Settings::load().context("Failed to load settings")?;

    // No display means nothing to show on; this is the one fatal failure
    let panel = FilePanel::init(&settings.display).context("Failed to initialize display")?;

    let fetcher = HttpFetcher::new(settings.fetch_timeout())?;
    let cache = ArtworkCache::new(settings.cache_root.clone(), fetcher, settings.fetch_timeout());
    cache.ensure_layout()?;

    let cleaned = cache.cleanup_temp_files();
    if cleaned.files_deleted > 0 || cleaned.errors > 0 {
        info!(
            "Temp file cleanup: {} files deleted, {} bytes freed, {} errors",
            cleaned.files_deleted, cleaned.bytes_freed, cleaned.errors
        );
    }

    let stats = cache.stats();
    info!(
        "Artwork cache at {:?}: {} songs, {} podcasts, {} files ({} MB)",
        cache.root(),
        stats.songs_count,
        stats.podcasts_count,
        stats.file_count(),
        stats.total_mb()
    );

    let fallback = load_or_create_fallback(
        &fallback_image_path(&settings.cache_root),
        panel.width(),
        panel.height(),
    )
    .context("Failed to load fallback image")?;

    let source = SpotifyClient::new(
        &settings.network.api_base_url,
        settings.network.credentials_path.clone(),
        settings.fetch_timeout(),
    )?;

    let mut poll_loop = PollLoop::new(
        source,
        cache,
        panel,
        TokioClock,
        fallback,
        settings.poll_interval(),
    );
    poll_loop.run().await;

    Ok(())
}
