//! Screen capture module
//! Uses `xcap` to grab the game window's monitor and cuts each frame into the
//! two regions the OCR service reads: the castle banner and the score list.
//! Unchanged frames are detected with an RMSE comparison and skipped.
//! Debug: set `DEBUG_CAPTURE=1` to save every crop to the debug directory.

use anyhow::{Context, Result, bail};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage};
use imageproc::stats::root_mean_squared_error;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;
use xcap::Monitor;

/// Castle banner: this fraction of the width and height, from the top-left.
const CASTLE_NAME_WIDTH: f64 = 0.10;
const CASTLE_NAME_HEIGHT: f64 = 0.05;

/// Frames are compared at this size.
const THUMB_WIDTH: u32 = 160;
const THUMB_HEIGHT: u32 = 90;

/// Captures the full frame of monitor `index` (0 = first reported).
/// Permissions note: on macOS, grant "Screen & System Audio Recording" to the
/// terminal in System Settings > Privacy & Security.
pub fn capture_monitor(index: usize) -> Result<DynamicImage> {
    let start = Instant::now();

    let monitors = Monitor::all().context("Failed to enumerate monitors")?;
    let count = monitors.len();
    let monitor = monitors
        .into_iter()
        .nth(index)
        .with_context(|| format!("Monitor {index} not found ({count} available)"))?;

    let raw = monitor
        .capture_image()
        .context("Failed to capture image. On macOS, ensure the terminal has Screen Recording permission")?;

    let frame = DynamicImage::ImageRgba8(raw);
    if frame.dimensions() == (0, 0) {
        bail!("Captured empty screenshot - possible permission issue or no display");
    }

    debug!(latency = ?start.elapsed(), width = frame.width(), height = frame.height(), "frame captured");
    Ok(frame)
}

/// Loads a still screenshot from disk.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let image = image::open(path).with_context(|| format!("Failed to read image: {}", path.display()))?;
    if image.dimensions() == (0, 0) {
        bail!("Image {} is empty", path.display());
    }
    Ok(image)
}

/// The crops sent to the OCR service.
pub struct Regions {
    pub castle_name: DynamicImage,
    pub players: DynamicImage,
}

/// Castle banner from the top-left corner, player list from the right half.
pub fn crop_regions(frame: &DynamicImage) -> Result<Regions> {
    let (w, h) = frame.dimensions();
    let banner_w = (w as f64 * CASTLE_NAME_WIDTH) as u32;
    let banner_h = (h as f64 * CASTLE_NAME_HEIGHT) as u32;
    let half = w / 2;
    if banner_w == 0 || banner_h == 0 || half == 0 {
        bail!("Frame {w}x{h} is too small to crop");
    }

    Ok(Regions {
        castle_name: frame.crop_imm(0, 0, banner_w, banner_h),
        players: frame.crop_imm(half, 0, w - half, h),
    })
}

/// Saves the crops when `DEBUG_CAPTURE` is set. Returns the files written.
pub fn save_debug(regions: &Regions, dir: &Path) -> Result<Vec<PathBuf>> {
    if env::var_os("DEBUG_CAPTURE").is_none() {
        return Ok(Vec::new());
    }
    write_regions(regions, dir)
}

fn write_regions(regions: &Regions, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let castle = dir.join("debug_castle_name.png");
    let players = dir.join("debug_players.png");
    regions
        .castle_name
        .save(&castle)
        .with_context(|| format!("Failed to save {}", castle.display()))?;
    regions
        .players
        .save(&players)
        .with_context(|| format!("Failed to save {}", players.display()))?;
    Ok(vec![castle, players])
}

/// Remembers the last frame and reports whether a new one differs from it.
pub struct ChangeDetector {
    threshold: f64,
    last: Option<GrayImage>,
}

impl ChangeDetector {
    /// `threshold` is the RMSE (0-255 scale) a frame must exceed to count as new.
    pub fn new(threshold: f64) -> Self {
        Self { threshold, last: None }
    }

    /// True for the first frame and for any frame that moved past the threshold.
    pub fn changed(&mut self, frame: &DynamicImage) -> bool {
        let thumb = imageops::resize(&frame.to_luma8(), THUMB_WIDTH, THUMB_HEIGHT, FilterType::Triangle);
        let changed = match &self.last {
            None => true,
            Some(prev) => {
                let rmse = root_mean_squared_error(prev, &thumb);
                debug!(rmse, "frame difference");
                rmse > self.threshold
            }
        };
        if changed {
            self.last = Some(thumb);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([v, v, v])))
    }

    #[test]
    fn test_crop_regions_sizes() {
        let regions = crop_regions(&solid(1920, 1080, 0)).unwrap();
        assert_eq!(regions.castle_name.dimensions(), (192, 54));
        assert_eq!(regions.players.dimensions(), (960, 1080));

        let odd = crop_regions(&solid(101, 40, 0)).unwrap();
        assert_eq!(odd.players.dimensions(), (51, 40));
    }

    #[test]
    fn test_crop_regions_rejects_tiny_frames() {
        assert!(crop_regions(&solid(5, 5, 0)).is_err());
    }

    #[test]
    fn test_change_detector() {
        let mut detector = ChangeDetector::new(1.0);
        assert!(detector.changed(&solid(320, 180, 10)));
        assert!(!detector.changed(&solid(320, 180, 10)));
        assert!(detector.changed(&solid(320, 180, 200)));
        assert!(!detector.changed(&solid(640, 360, 200)));
    }

    #[test]
    fn test_write_regions() {
        let dir = tempfile::tempdir().unwrap();
        let regions = crop_regions(&solid(200, 100, 50)).unwrap();
        let files = write_regions(&regions, dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.exists()));
    }

    #[test]
    #[ignore = "requires graphical display and screen recording permissions"]
    fn test_capture_dimensions() {
        let img = capture_monitor(0).expect("capture_monitor failed");
        let (w, h) = img.dimensions();
        assert!(w > 0 && h > 0, "captured image has invalid dimensions {}x{}", w, h);
    }
}
