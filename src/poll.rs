//! Poll loop
//!
//! Each cycle obtains a snapshot, classifies it, resolves the artwork and
//! renders it. Every steady-state failure degrades that one cycle to the
//! fallback image; the loop itself never stops.

use std::path::Path;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::{debug, info, warn};

use crate::api::PlaybackSource;
use crate::cache::{ArtworkCache, ArtworkFetcher};
use crate::playback::{IntentKind, classify};
use crate::render::{Panel, render};
use crate::utils::write_atomic;

/// Source of delays between cycles
pub trait Clock {
    async fn sleep(&self, duration: Duration);
}

/// Real time
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Why a cycle showed the fallback image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Nothing is playing (or it finished, or it is an ad)
    NothingPlaying,
    /// The playback source failed
    SourceError,
    /// The snapshot lacked required fields
    ClassifyError,
    /// The artwork could not be fetched, decoded or stored
    CacheError,
}

/// What a single cycle ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Artwork for a song or podcast was rendered
    Artwork(IntentKind),
    /// The fallback image was rendered
    Fallback(FallbackReason),
    /// Nothing was rendered this cycle
    Skipped,
}

pub struct PollLoop<S, F, P, C> {
    source: S,
    cache: ArtworkCache<F>,
    panel: P,
    clock: C,
    fallback: DynamicImage,
    interval: Duration,
}

impl<S, F, P, C> PollLoop<S, F, P, C>
where
    S: PlaybackSource,
    F: ArtworkFetcher,
    P: Panel,
    C: Clock,
{
    pub fn new(
        source: S,
        cache: ArtworkCache<F>,
        panel: P,
        clock: C,
        fallback: DynamicImage,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            panel,
            clock,
            fallback,
            interval,
        }
    }

    /// Run cycles forever, sleeping `interval` between them
    pub async fn run(&mut self) {
        info!("Polling every {:?}", self.interval);
        loop {
            let outcome = self.run_cycle().await;
            debug!("Cycle finished: {:?}", outcome);
            self.clock.sleep(self.interval).await;
        }
    }

    /// One obtain, classify, resolve, render pass
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let snapshot = match self.source.current_playback().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Playback source failed: {}", e);
                return self.show_fallback(FallbackReason::SourceError);
            }
        };

        let intent = match classify(snapshot.as_ref()) {
            Ok(intent) => intent,
            Err(e) => {
                warn!("Unusable playback snapshot: {}", e);
                return self.show_fallback(FallbackReason::ClassifyError);
            }
        };

        let kind = intent.kind();
        match self.cache.resolve(&intent).await {
            Ok(Some(artwork)) => match render(&mut self.panel, &artwork) {
                Ok(()) => CycleOutcome::Artwork(kind),
                Err(e) => {
                    warn!("Skipping render of {} artwork: {}", kind, e);
                    CycleOutcome::Skipped
                }
            },
            Ok(None) => self.show_fallback(FallbackReason::NothingPlaying),
            Err(e) => {
                warn!("Artwork unavailable for {}: {}", kind, e);
                self.show_fallback(FallbackReason::CacheError)
            }
        }
    }

    fn show_fallback(&mut self, reason: FallbackReason) -> CycleOutcome {
        match render(&mut self.panel, &self.fallback) {
            Ok(()) => CycleOutcome::Fallback(reason),
            Err(e) => {
                warn!("Skipping render of fallback image: {}", e);
                CycleOutcome::Skipped
            }
        }
    }
}

/// Load the fallback image, creating a black one if it does not exist yet
pub fn load_or_create_fallback(
    path: &Path,
    width: u32,
    height: u32,
) -> anyhow::Result<DynamicImage> {
    if path.is_file() {
        return Ok(image::open(path)?);
    }

    warn!("Fallback image {:?} missing, creating a black one", path);
    let black = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    let mut jpeg = Vec::new();
    black.write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;
    write_atomic(path, &jpeg)?;
    Ok(DynamicImage::ImageRgb8(black))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SourceError;
    use crate::playback::PlaybackSnapshot;
    use crate::render::RenderError;
    use anyhow::anyhow;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static SCRATCH_ID: AtomicUsize = AtomicUsize::new(0);

    fn scratch_dir(name: &str) -> PathBuf {
        let id = SCRATCH_ID.fetch_add(1, Ordering::Relaxed);
        let dir =
            std::env::temp_dir().join(format!("npm-poll-{}-{}-{}", name, std::process::id(), id));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    /// Replays queued responses, then reports nothing playing
    struct ScriptedSource {
        replies: RefCell<VecDeque<Result<Option<PlaybackSnapshot>, SourceError>>>,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Result<Option<PlaybackSnapshot>, SourceError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
            }
        }
    }

    impl PlaybackSource for ScriptedSource {
        async fn current_playback(&self) -> Result<Option<PlaybackSnapshot>, SourceError> {
            self.replies.borrow_mut().pop_front().unwrap_or(Ok(None))
        }
    }

    struct CountingFetcher {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ArtworkFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("network unreachable"));
            }
            let art = RgbImage::from_pixel(128, 128, Rgb([200, 10, 10]));
            let mut bytes = Vec::new();
            art.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
            Ok(bytes)
        }
    }

    #[derive(Default)]
    struct RecordingPanel {
        frames: Vec<RgbImage>,
    }

    impl Panel for RecordingPanel {
        fn width(&self) -> u32 {
            64
        }

        fn height(&self) -> u32 {
            64
        }

        fn set_image(&mut self, frame: &RgbImage) -> Result<(), RenderError> {
            self.frames.push(frame.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingClock {
        sleeps: RefCell<Vec<Duration>>,
    }

    impl Clock for RecordingClock {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
        }
    }

    type TestLoop = PollLoop<ScriptedSource, CountingFetcher, RecordingPanel, RecordingClock>;

    fn poll_loop(
        name: &str,
        replies: Vec<Result<Option<PlaybackSnapshot>, SourceError>>,
        fail: bool,
    ) -> (TestLoop, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ArtworkCache::new(
            scratch_dir(name),
            CountingFetcher {
                calls: calls.clone(),
                fail,
            },
            Duration::from_secs(1),
        );
        cache.ensure_layout().unwrap();
        let fallback = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([0, 0, 0])));
        let poll = PollLoop::new(
            ScriptedSource::new(replies),
            cache,
            RecordingPanel::default(),
            RecordingClock::default(),
            fallback,
            Duration::from_millis(1500),
        );
        (poll, calls)
    }

    fn snapshot(value: serde_json::Value) -> PlaybackSnapshot {
        serde_json::from_value(value).unwrap()
    }

    fn playing_track() -> PlaybackSnapshot {
        snapshot(json!({
            "is_playing": true,
            "currently_playing_type": "track",
            "progress_ms": 1000,
            "item": {
                "duration_ms": 200000,
                "album": { "name": "Test#Album", "images": [{ "url": "http://x/1.jpg" }] }
            }
        }))
    }

    /// Same body as `run`, bounded
    async fn run_cycles(poll: &mut TestLoop, count: usize) -> Vec<CycleOutcome> {
        let mut outcomes = Vec::with_capacity(count);
        for _ in 0..count {
            outcomes.push(poll.run_cycle().await);
            poll.clock.sleep(poll.interval).await;
        }
        outcomes
    }

    fn is_black(frame: &RgbImage) -> bool {
        frame.pixels().all(|p| p == &Rgb([0, 0, 0]))
    }

    #[tokio::test]
    async fn test_track_renders_artwork_and_caches_it() {
        let (mut poll, calls) = poll_loop("track", vec![Ok(Some(playing_track()))], false);

        let outcome = poll.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Artwork(IntentKind::Song));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(poll.cache.root().join("songs").join("Test Album.jpg").is_file());
        let frame = &poll.panel.frames[0];
        assert_eq!(frame.dimensions(), (64, 64));
        assert!(!is_black(frame));
        let _ = std::fs::remove_dir_all(poll.cache.root());
    }

    #[tokio::test]
    async fn test_finished_episode_renders_fallback_without_fetch() {
        let episode = snapshot(json!({
            "is_playing": true,
            "currently_playing_type": "episode",
            "progress_ms": 50000,
            "item": { "name": "Ep", "duration_ms": 50000, "images": [{ "url": "http://x/e.jpg" }] }
        }));
        let (mut poll, calls) = poll_loop("finished", vec![Ok(Some(episode))], false);

        let outcome = poll.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Fallback(FallbackReason::NothingPlaying));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(is_black(&poll.panel.frames[0]));
        let _ = std::fs::remove_dir_all(poll.cache.root());
    }

    #[tokio::test]
    async fn test_absent_snapshot_renders_fallback() {
        let (mut poll, _calls) = poll_loop("absent", vec![Ok(None)], false);
        let outcome = poll.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Fallback(FallbackReason::NothingPlaying));
        assert_eq!(poll.panel.frames.len(), 1);
        let _ = std::fs::remove_dir_all(poll.cache.root());
    }

    #[tokio::test]
    async fn test_failures_degrade_and_loop_continues() {
        let broken = snapshot(json!({
            "is_playing": true,
            "currently_playing_type": "track",
            "progress_ms": 10
        }));
        let (mut poll, _calls) = poll_loop(
            "degrade",
            vec![
                Err(SourceError::Http("status 503".to_string())),
                Ok(Some(broken)),
                Ok(Some(playing_track())),
            ],
            true,
        );

        let outcomes = run_cycles(&mut poll, 3).await;

        assert_eq!(
            outcomes,
            vec![
                CycleOutcome::Fallback(FallbackReason::SourceError),
                CycleOutcome::Fallback(FallbackReason::ClassifyError),
                CycleOutcome::Fallback(FallbackReason::CacheError),
            ]
        );
        assert_eq!(poll.panel.frames.len(), 3);
        assert!(!poll.cache.root().join("songs").join("Test Album.jpg").exists());
        let _ = std::fs::remove_dir_all(poll.cache.root());
    }

    #[tokio::test]
    async fn test_repeated_track_fetches_once_and_sleeps_between_cycles() {
        let (mut poll, calls) = poll_loop(
            "repeat",
            vec![Ok(Some(playing_track())), Ok(Some(playing_track()))],
            false,
        );

        let outcomes = run_cycles(&mut poll, 2).await;

        assert_eq!(outcomes, vec![CycleOutcome::Artwork(IntentKind::Song); 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(poll.panel.frames[0], poll.panel.frames[1]);
        assert_eq!(
            *poll.clock.sleeps.borrow(),
            vec![Duration::from_millis(1500); 2]
        );
        let _ = std::fs::remove_dir_all(poll.cache.root());
    }

    #[tokio::test]
    async fn test_invalid_fallback_is_skipped() {
        let (mut poll, _calls) = poll_loop("skip", vec![Ok(None)], false);
        poll.fallback = DynamicImage::ImageRgb8(RgbImage::new(0, 0));

        assert_eq!(poll.run_cycle().await, CycleOutcome::Skipped);
        assert!(poll.panel.frames.is_empty());
        let _ = std::fs::remove_dir_all(poll.cache.root());
    }

    #[test]
    fn test_missing_fallback_is_created() {
        let dir = scratch_dir("fallback");
        let path = dir.join("black_image").join("black.jpg");

        let created = load_or_create_fallback(&path, 64, 32).unwrap();
        assert_eq!((created.width(), created.height()), (64, 32));
        assert!(path.is_file());

        let loaded = load_or_create_fallback(&path, 8, 8).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (64, 32));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
