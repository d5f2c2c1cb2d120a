//! Render driver adapter
//!
//! Fits a decoded image to the panel resolution and submits it.

use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::{debug, info};

use crate::settings::DisplaySettings;
use crate::utils::write_atomic;

/// A fixed-resolution RGB display
pub trait Panel {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Show a frame of exactly `width() x height()` pixels
    fn set_image(&mut self, frame: &RgbImage) -> Result<(), RenderError>;
}

/// Shrink an image to fit `width x height`, keeping its aspect ratio
///
/// Images that already fit are left at their size. Output is 8-bit RGB.
pub fn fit_to_panel(
    image: &DynamicImage,
    width: u32,
    height: u32,
) -> Result<RgbImage, RenderError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(RenderError::InvalidImage(format!(
            "{}x{} image",
            image.width(),
            image.height()
        )));
    }
    if width == 0 || height == 0 {
        return Err(RenderError::InvalidImage(format!(
            "{}x{} target",
            width, height
        )));
    }

    if image.width() <= width && image.height() <= height {
        return Ok(image.to_rgb8());
    }
    Ok(image.resize(width, height, FilterType::Lanczos3).to_rgb8())
}

/// Place a fitted image at the top-left of a black panel-sized frame
fn compose_frame(fitted: &RgbImage, width: u32, height: u32) -> RgbImage {
    if fitted.width() == width && fitted.height() == height {
        return fitted.clone();
    }
    let mut frame = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    imageops::replace(&mut frame, fitted, 0, 0);
    frame
}

/// Fit, frame and submit an image
pub fn render<P: Panel>(panel: &mut P, image: &DynamicImage) -> Result<(), RenderError> {
    let fitted = fit_to_panel(image, panel.width(), panel.height())?;
    debug!(
        "Rendering {}x{} image as {}x{}",
        image.width(),
        image.height(),
        fitted.width(),
        fitted.height()
    );
    let frame = compose_frame(&fitted, panel.width(), panel.height());
    panel.set_image(&frame)
}

// ============================================================================
// File-backed panel
// ============================================================================

/// Panel that writes every frame to a PNG file
///
/// Stands in for the LED matrix driver; the configuration is validated the
/// same way so a bad config fails at startup.
#[derive(Debug)]
pub struct FilePanel {
    width: u32,
    height: u32,
    output_path: PathBuf,
    frames_written: u64,
}

impl FilePanel {
    pub fn init(settings: &DisplaySettings) -> Result<Self, RenderError> {
        let (width, height) = validate(settings)?;

        let mut panel = Self {
            width,
            height,
            output_path: settings.output_path.clone(),
            frames_written: 0,
        };

        // Blank the panel; this also proves the output location is writable
        let blank = RgbImage::from_pixel(panel.width, panel.height, Rgb([0, 0, 0]));
        panel
            .set_image(&blank)
            .map_err(|e| RenderError::Init(e.to_string()))?;

        info!(
            "Panel initialized: {}x{} ({}, {} rows x {} cols, chain={}, parallel={}, \
             pwm_bits={}, pwm_lsb_ns={}, brightness={}, sequence={}, gpio_slowdown={}, \
             hardware_pulsing={}) -> {:?}",
            panel.width,
            panel.height,
            settings.hardware_mapping,
            settings.rows,
            settings.cols,
            settings.chain_length,
            settings.parallel,
            settings.pwm_bits,
            settings.pwm_lsb_nanoseconds,
            settings.brightness,
            settings.led_rgb_sequence,
            settings.gpio_slowdown,
            !settings.disable_hardware_pulsing,
            panel.output_path
        );
        Ok(panel)
    }

    #[cfg(test)]
    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Panel for FilePanel {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn set_image(&mut self, frame: &RgbImage) -> Result<(), RenderError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(RenderError::InvalidImage(format!(
                "frame is {}x{}, panel is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let mut png = Vec::new();
        frame
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| RenderError::Submit(e.to_string()))?;
        write_atomic(&self.output_path, &png).map_err(|e| RenderError::Submit(e.to_string()))?;

        self.frames_written += 1;
        debug!("Frame {} written to {:?}", self.frames_written, self.output_path);
        Ok(())
    }
}

/// Color orders the matrix driver understands
const RGB_SEQUENCES: &[&str] = &["RGB", "RBG", "GRB", "GBR", "BRG", "BGR"];

/// Reject configurations the matrix driver would refuse
///
/// Returns the total panel size in pixels.
fn validate(settings: &DisplaySettings) -> Result<(u32, u32), RenderError> {
    let (Some(width), Some(height)) = (settings.width(), settings.height()) else {
        return Err(RenderError::Init(format!(
            "panel size overflows: {} cols x {} chained, {} rows x {} parallel",
            settings.cols, settings.chain_length, settings.rows, settings.parallel
        )));
    };
    if width == 0 || height == 0 {
        return Err(RenderError::Init(format!(
            "panel size {}x{} is empty",
            width, height
        )));
    }
    if !(1..=11).contains(&settings.pwm_bits) {
        return Err(RenderError::Init(format!(
            "pwm_bits must be 1..=11, got {}",
            settings.pwm_bits
        )));
    }
    if !(1..=100).contains(&settings.brightness) {
        return Err(RenderError::Init(format!(
            "brightness must be 1..=100, got {}",
            settings.brightness
        )));
    }
    if settings.hardware_mapping.is_empty() {
        return Err(RenderError::Init("hardware_mapping is empty".to_string()));
    }
    let sequence = settings.led_rgb_sequence.to_ascii_uppercase();
    if !RGB_SEQUENCES.contains(&sequence.as_str()) {
        return Err(RenderError::Init(format!(
            "unknown led_rgb_sequence '{}', expected one of {:?}",
            settings.led_rgb_sequence, RGB_SEQUENCES
        )));
    }
    Ok((width, height))
}

/// Render errors
#[derive(Debug, Clone)]
pub enum RenderError {
    /// The panel could not be brought up
    Init(String),
    /// The image cannot be drawn (upstream contract breach)
    InvalidImage(String),
    /// The panel rejected the frame
    Submit(String),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Init(e) => write!(f, "Display init failed: {}", e),
            RenderError::InvalidImage(e) => write!(f, "Invalid image: {}", e),
            RenderError::Submit(e) => write!(f, "Frame submit failed: {}", e),
        }
    }
}

impl std::error::Error for RenderError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 200])
        }))
    }

    fn panel_settings(name: &str) -> DisplaySettings {
        DisplaySettings {
            output_path: std::env::temp_dir()
                .join(format!("npm-render-{}-{}", name, std::process::id()))
                .join("frame.png"),
            ..Default::default()
        }
    }

    #[test]
    fn test_square_art_fills_panel() {
        let fitted = fit_to_panel(&gradient(640, 640), 64, 64).unwrap();
        assert_eq!(fitted.dimensions(), (64, 64));
    }

    #[test]
    fn test_wide_art_keeps_aspect() {
        let fitted = fit_to_panel(&gradient(300, 150), 64, 64).unwrap();
        assert_eq!(fitted.dimensions(), (64, 32));
    }

    #[test]
    fn test_small_art_is_not_upscaled() {
        let fitted = fit_to_panel(&gradient(20, 10), 64, 64).unwrap();
        assert_eq!(fitted.dimensions(), (20, 10));
    }

    #[test]
    fn test_alpha_is_dropped() {
        let rgba = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            8,
            8,
            image::Rgba([10, 20, 30, 128]),
        ));
        let fitted = fit_to_panel(&rgba, 64, 64).unwrap();
        assert_eq!(fitted.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_empty_image_is_invalid() {
        let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(
            fit_to_panel(&empty, 64, 64),
            Err(RenderError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_compose_pads_with_black() {
        let fitted = RgbImage::from_pixel(4, 2, Rgb([255, 255, 255]));
        let frame = compose_frame(&fitted, 4, 4);
        assert_eq!(frame.dimensions(), (4, 4));
        assert_eq!(frame.get_pixel(3, 1), &Rgb([255, 255, 255]));
        assert_eq!(frame.get_pixel(3, 3), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_file_panel_writes_frames() {
        let settings = panel_settings("write");
        let mut panel = FilePanel::init(&settings).unwrap();
        assert_eq!(panel.frames_written(), 1);

        render(&mut panel, &gradient(128, 128)).unwrap();

        assert_eq!(panel.frames_written(), 2);
        let written = image::open(&settings.output_path).unwrap();
        assert_eq!((written.width(), written.height()), (64, 64));
        let _ = std::fs::remove_dir_all(settings.output_path.parent().unwrap());
    }

    #[test]
    fn test_file_panel_rejects_wrong_frame_size() {
        let settings = panel_settings("size");
        let mut panel = FilePanel::init(&settings).unwrap();
        let result = panel.set_image(&RgbImage::new(10, 10));
        assert!(matches!(result, Err(RenderError::InvalidImage(_))));
        let _ = std::fs::remove_dir_all(settings.output_path.parent().unwrap());
    }

    #[test]
    fn test_bad_config_fails_init() {
        let cases = [
            DisplaySettings { rows: 0, ..panel_settings("rows") },
            DisplaySettings { pwm_bits: 12, ..panel_settings("pwm") },
            DisplaySettings { brightness: 0, ..panel_settings("brightness") },
            DisplaySettings { hardware_mapping: String::new(), ..panel_settings("mapping") },
            DisplaySettings { led_rgb_sequence: "XYZ".to_string(), ..panel_settings("sequence") },
            DisplaySettings { cols: u32::MAX, chain_length: 2, ..panel_settings("overflow") },
            DisplaySettings { rows: 65536, parallel: 65536, ..panel_settings("overflow_rows") },
        ];
        for settings in cases {
            assert!(matches!(
                FilePanel::init(&settings),
                Err(RenderError::Init(_))
            ));
        }
    }

    #[test]
    fn test_lowercase_rgb_sequence_is_accepted() {
        let settings = DisplaySettings {
            led_rgb_sequence: "bgr".to_string(),
            ..panel_settings("lowercase")
        };
        assert!(FilePanel::init(&settings).is_ok());
        let _ = std::fs::remove_dir_all(settings.output_path.parent().unwrap());
    }

    #[test]
    fn test_unwritable_output_fails_init() {
        let dir = std::env::temp_dir().join(format!("npm-render-blocked-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        // The output's parent is a regular file, so no directory can be created
        let blocker = dir.join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();
        let settings = DisplaySettings {
            output_path: blocker.join("frame.png"),
            ..Default::default()
        };

        assert!(matches!(
            FilePanel::init(&settings),
            Err(RenderError::Init(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
