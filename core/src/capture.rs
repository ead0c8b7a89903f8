//! Screenshot capture.
//!
//! Screenshots are taken on the emulation thread right after a frame finishes, saved as
//! numbered PNGs (`screenshot.000.png`, `screenshot.001.png`, ...) and reported to the
//! controller with a `ScreenshotTaken` reply. Failures are reported, never propagated across
//! threads.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::video::VideoFrame;

/// Errors writing a screenshot
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to create screenshot directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode PNG: {0}")]
    Encode(#[from] png::EncodingError),

    #[error("frame has no pixels")]
    EmptyFrame,
}

/// Writes numbered screenshots into one directory
#[derive(Debug, Clone)]
pub struct ScreenshotWriter {
    dir: PathBuf,
}

impl ScreenshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save `frame` under the next free number
    ///
    /// The number is returned even on failure so the reply can name the attempt.
    pub fn save(&self, frame: &VideoFrame) -> (u32, Result<PathBuf, CaptureError>) {
        let num = next_screenshot_number(&self.dir);
        let result = self.write_png(num, frame);
        match &result {
            Ok(path) => info!("Screenshot saved: {}", path.display()),
            Err(e) => warn!("Screenshot {} failed: {}", num, e),
        }
        (num, result)
    }

    fn write_png(&self, num: u32, frame: &VideoFrame) -> Result<PathBuf, CaptureError> {
        let desc = frame.desc();
        if desc.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }
        std::fs::create_dir_all(&self.dir).map_err(|source| CaptureError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = screenshot_path(&self.dir, num);
        let file = File::create(&path).map_err(|source| CaptureError::Io {
            path: path.clone(),
            source,
        })?;

        let mut encoder = png::Encoder::new(BufWriter::new(file), desc.width, desc.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&frame.to_rgba8())?;
        writer.finish()?;

        Ok(path)
    }
}

/// `<dir>/screenshot.NNN.png`
pub fn screenshot_path(dir: &Path, num: u32) -> PathBuf {
    dir.join(format!("screenshot.{num:03}.png"))
}

/// One past the highest existing screenshot number in `dir`, 0 if there are none
pub fn next_screenshot_number(dir: &Path) -> u32 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| parse_screenshot_number(&entry.file_name().to_string_lossy()))
        .max()
        .map_or(0, |n| n.saturating_add(1))
}

fn parse_screenshot_number(name: &str) -> Option<u32> {
    name.strip_prefix("screenshot.")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

/// Platform default screenshot directory (`<data dir>/screenshots`)
pub fn default_screenshots_dir() -> Option<PathBuf> {
    crate::config::data_dir().map(|dir| dir.join("screenshots"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{PixelFormat, PixmapDesc};

    #[test]
    fn test_screenshot_numbering() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_screenshot_number(dir.path()), 0);
        std::fs::write(dir.path().join("screenshot.004.png"), b"").unwrap();
        std::fs::write(dir.path().join("screenshot.001.png"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        assert_eq!(next_screenshot_number(dir.path()), 5);
        assert_eq!(
            screenshot_path(dir.path(), 7),
            dir.path().join("screenshot.007.png")
        );
    }

    #[test]
    fn test_missing_dir_starts_at_zero() {
        assert_eq!(next_screenshot_number(Path::new("/nonexistent/framestep")), 0);
    }

    #[test]
    fn test_save_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ScreenshotWriter::new(dir.path().join("shots"));
        let frame = VideoFrame::new(PixmapDesc::new(4, 3, PixelFormat::Rgb565));

        let (num, result) = writer.save(&frame);
        assert_eq!(num, 0);
        let path = result.unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");

        let (num, result) = writer.save(&frame);
        assert_eq!(num, 1);
        assert!(result.is_ok());
    }

    #[test]
    fn test_empty_frame_fails() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ScreenshotWriter::new(dir.path());
        let (num, result) = writer.save(&VideoFrame::new(PixmapDesc::default()));
        assert_eq!(num, 0);
        assert!(matches!(result, Err(CaptureError::EmptyFrame)));
    }
}
