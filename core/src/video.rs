//! Video frame buffer shared between the emulation and presentation threads
//!
//! - [`EmuVideo`] - the frame buffer plus its current [`PixmapDesc`]. Cloned into both threads.
//! - [`VideoOutput`] - the emulation thread's view during one `RunFrame`. Format changes go
//!   through the reply port and wait for the presentation thread to acknowledge them.
//! - [`FrameWriter`] - guard handed to the simulation while it writes pixels. While it exists
//!   the frame counts as "in progress"; dropping it finishes the frame.
//!
//! The buffer sits behind a mutex, but the frame protocol keeps it uncontended: the
//! emulation thread only writes between `start_frame` and the end of the [`FrameWriter`], and
//! the presentation thread reads after `wait_for_finished_frame`.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::frame::FrameTracker;
use crate::pacing::FrameTime;
use crate::reply::ReplySender;

/// Pixel layouts the emulated machines produce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 16-bit little-endian 5:6:5
    #[default]
    Rgb565,
    Rgba8888,
    Bgra8888,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb565 => 2,
            Self::Rgba8888 | Self::Bgra8888 => 4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Rgb565 => "RGB565",
            Self::Rgba8888 => "RGBA8888",
            Self::Bgra8888 => "BGRA8888",
        }
    }

    /// Convert one pixel to opaque 8-bit RGBA
    ///
    /// `pixel` must hold exactly [`bytes_per_pixel`](Self::bytes_per_pixel) bytes.
    pub fn to_rgba8(self, pixel: &[u8]) -> [u8; 4] {
        match self {
            Self::Rgb565 => {
                let v = u16::from_le_bytes([pixel[0], pixel[1]]);
                let r = ((v >> 11) & 0x1f) as u8;
                let g = ((v >> 5) & 0x3f) as u8;
                let b = (v & 0x1f) as u8;
                [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 0xff]
            }
            Self::Rgba8888 => [pixel[0], pixel[1], pixel[2], 0xff],
            Self::Bgra8888 => [pixel[2], pixel[1], pixel[0], 0xff],
        }
    }

    /// Encode an 8-bit RGB color into `out`, which must hold one pixel
    pub fn write_rgb8(self, [r, g, b]: [u8; 3], out: &mut [u8]) {
        match self {
            Self::Rgb565 => {
                let v = (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
                out[..2].copy_from_slice(&v.to_le_bytes());
            }
            Self::Rgba8888 => out[..4].copy_from_slice(&[r, g, b, 0xff]),
            Self::Bgra8888 => out[..4].copy_from_slice(&[b, g, r, 0xff]),
        }
    }
}

/// Geometry and pixel format of a video frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PixmapDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl PixmapDesc {
    pub const fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Bytes per row, no padding
    pub const fn pitch_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub const fn byte_len(&self) -> usize {
        self.pitch_bytes() * self.height as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for PixmapDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format.name())
    }
}

/// One video frame's pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    desc: PixmapDesc,
    pixels: Vec<u8>,
    timestamp: FrameTime,
}

impl VideoFrame {
    pub fn new(desc: PixmapDesc) -> Self {
        Self {
            desc,
            pixels: vec![0; desc.byte_len()],
            timestamp: FrameTime::ZERO,
        }
    }

    pub fn desc(&self) -> PixmapDesc {
        self.desc
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Timestamp of the `RunFrame` that produced this frame
    pub fn timestamp(&self) -> FrameTime {
        self.timestamp
    }

    /// Bytes of row `y`
    ///
    /// # Panics
    ///
    /// Panics if `y` is not below the frame height.
    pub fn row(&self, y: u32) -> &[u8] {
        let pitch = self.desc.pitch_bytes();
        let start = y as usize * pitch;
        &self.pixels[start..start + pitch]
    }

    /// Mutable bytes of row `y`
    ///
    /// # Panics
    ///
    /// Panics if `y` is not below the frame height.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let pitch = self.desc.pitch_bytes();
        let start = y as usize * pitch;
        &mut self.pixels[start..start + pitch]
    }

    /// Convert the whole frame to tightly packed opaque RGBA8
    pub fn to_rgba8(&self) -> Vec<u8> {
        let bpp = self.desc.format.bytes_per_pixel();
        let mut rgba = Vec::with_capacity(self.desc.width as usize * self.desc.height as usize * 4);
        for pixel in self.pixels.chunks_exact(bpp) {
            rgba.extend_from_slice(&self.desc.format.to_rgba8(pixel));
        }
        rgba
    }

    fn reallocate(&mut self, desc: PixmapDesc) {
        self.desc = desc;
        self.pixels.clear();
        self.pixels.resize(desc.byte_len(), 0);
    }
}

struct VideoShared {
    frame: Mutex<VideoFrame>,
    screenshot_requested: AtomicBool,
}

/// Frame buffer handle shared by the emulation and presentation threads
#[derive(Clone)]
pub struct EmuVideo {
    inner: Arc<VideoShared>,
}

impl std::fmt::Debug for EmuVideo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmuVideo").field("desc", &self.desc()).finish()
    }
}

impl EmuVideo {
    pub fn new(desc: PixmapDesc) -> Self {
        Self {
            inner: Arc::new(VideoShared {
                frame: Mutex::new(VideoFrame::new(desc)),
                screenshot_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn desc(&self) -> PixmapDesc {
        self.lock().desc
    }

    /// Reallocate the frame buffer for a new format
    ///
    /// Called by the presentation thread when it handles `VideoFormatChanged`. Setting the
    /// current format again is a no-op.
    pub fn set_format(&self, desc: PixmapDesc) {
        let mut frame = self.lock();
        if frame.desc != desc {
            debug!("Video format {} -> {}", frame.desc, desc);
            frame.reallocate(desc);
        }
    }

    /// Read the most recently finished frame
    pub fn with_frame<R>(&self, f: impl FnOnce(&VideoFrame) -> R) -> R {
        f(&self.lock())
    }

    /// Copy of the current frame
    pub fn snapshot(&self) -> VideoFrame {
        self.lock().clone()
    }

    /// Ask the emulation thread to save the next finished frame as a screenshot
    pub fn request_screenshot(&self) {
        self.inner.screenshot_requested.store(true, Ordering::Release);
    }

    pub fn screenshot_requested(&self) -> bool {
        self.inner.screenshot_requested.load(Ordering::Acquire)
    }

    pub(crate) fn take_screenshot_request(&self) -> bool {
        self.inner.screenshot_requested.swap(false, Ordering::AcqRel)
    }

    fn lock(&self) -> MutexGuard<'_, VideoFrame> {
        self.inner.frame.lock().unwrap_or_else(|e| {
            warn!("Video frame mutex poisoned; continuing");
            e.into_inner()
        })
    }
}

/// The emulation thread's video output for a single `RunFrame`
pub struct VideoOutput<'a> {
    video: &'a EmuVideo,
    tracker: &'a FrameTracker,
    replies: &'a ReplySender,
    timestamp: FrameTime,
    produced: bool,
}

impl<'a> VideoOutput<'a> {
    pub(crate) fn new(
        video: &'a EmuVideo,
        tracker: &'a FrameTracker,
        replies: &'a ReplySender,
        timestamp: FrameTime,
    ) -> Self {
        Self {
            video,
            tracker,
            replies,
            timestamp,
            produced: false,
        }
    }

    pub fn desc(&self) -> PixmapDesc {
        self.video.desc()
    }

    /// Switch the frame buffer to a new geometry or pixel format
    ///
    /// Posts `VideoFormatChanged` and blocks until the presentation thread has reallocated its
    /// render target. Cannot be called while a [`FrameWriter`] is alive. Returns `false` if the
    /// format was already current.
    pub fn set_format(&mut self, desc: PixmapDesc) -> bool {
        if self.video.desc() == desc {
            return false;
        }
        if let Err(e) = self.replies.send_video_format_changed_and_wait(desc) {
            warn!("Video format change to {} not acknowledged: {}", desc, e);
        }
        // Frame writes must always fit the buffer, whatever the presentation side did
        if self.video.desc() != desc {
            debug!("Presentation thread left buffer unsized; reallocating for {}", desc);
            self.video.set_format(desc);
        }
        true
    }

    /// Begin writing this step's frame
    ///
    /// Returns `None` if a frame was already produced during this `RunFrame`.
    pub fn start_frame(&mut self) -> Option<FrameWriter<'_>> {
        if self.produced {
            return None;
        }
        self.produced = true;
        self.tracker.start_video_frame();
        let mut frame = self.video.lock();
        frame.timestamp = self.timestamp;
        Some(FrameWriter {
            frame: Some(frame),
            tracker: self.tracker,
        })
    }

    /// Whether a frame was written during this step
    pub fn produced(&self) -> bool {
        self.produced
    }
}

/// Write access to the frame buffer for the duration of one frame
///
/// Dropping the writer releases the buffer and then finishes the frame, waking a presentation
/// thread blocked in `wait_for_finished_frame`.
pub struct FrameWriter<'a> {
    frame: Option<MutexGuard<'a, VideoFrame>>,
    tracker: &'a FrameTracker,
}

impl FrameWriter<'_> {
    /// Finish the frame explicitly
    pub fn finish(self) {}
}

impl Deref for FrameWriter<'_> {
    type Target = VideoFrame;

    fn deref(&self) -> &VideoFrame {
        self.frame.as_deref().expect("frame guard present until drop")
    }
}

impl DerefMut for FrameWriter<'_> {
    fn deref_mut(&mut self) -> &mut VideoFrame {
        self.frame.as_deref_mut().expect("frame guard present until drop")
    }
}

impl Drop for FrameWriter<'_> {
    fn drop(&mut self) {
        // Release the buffer before the presentation thread is woken
        drop(self.frame.take());
        self.tracker.finish_video_frame();
    }
}
