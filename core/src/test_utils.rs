//! Shared test utilities for integration and unit tests

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::audio::{AudioBackpressure, AudioFormat, AudioReader, audio_stream};
use crate::pacing::{FramePacer, FrameTime};
use crate::system::{EmuSystem, FrameContext};
use crate::task::TaskResources;
use crate::video::{EmuVideo, PixelFormat, PixmapDesc};

/// Geometry the test machines start with
pub const TEST_DESC: PixmapDesc = PixmapDesc::new(8, 4, PixelFormat::Rgba8888);

/// Upper bound for anything a test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Machine
// ============================================================================

/// What the test machine observed during one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRecord {
    pub index: u64,
    pub timestamp: FrameTime,
    pub delta: Duration,
    pub fast_forward: bool,
    pub produced_video: bool,
}

pub type RunLog = Arc<Mutex<Vec<FrameRecord>>>;

/// Deterministic machine: state depends only on how many frames ran
pub struct CounterSystem {
    pub frames: u64,
    pub state: u64,
    log: RunLog,
    resizes: Vec<(u64, PixmapDesc)>,
    skip_video_every: Option<u64>,
    frame_delay: Duration,
}

impl CounterSystem {
    pub fn new() -> Self {
        Self {
            frames: 0,
            state: 0x9e37_79b9_7f4a_7c15,
            log: Arc::default(),
            resizes: Vec::new(),
            skip_video_every: None,
            frame_delay: Duration::ZERO,
        }
    }

    /// Switch to `desc` at the start of frame number `frame` (1-based)
    ///
    /// May be chained to switch modes several times.
    pub fn resizing_at(mut self, frame: u64, desc: PixmapDesc) -> Self {
        self.resizes.push((frame, desc));
        self
    }

    /// Produce no video on every `n`th frame
    pub fn skipping_video_every(mut self, n: u64) -> Self {
        self.skip_video_every = Some(n.max(1));
        self
    }

    /// Spend `delay` inside every frame while holding the frame buffer
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn log(&self) -> RunLog {
        self.log.clone()
    }

    fn pixel(&self, i: usize) -> u8 {
        (self.state as u8).wrapping_add(i as u8)
    }
}

impl Default for CounterSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl EmuSystem for CounterSystem {
    fn run_frame(&mut self, frame: &mut FrameContext<'_>) {
        self.frames += 1;
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(self.frames);

        let frames = self.frames;
        if let Some(&(_, desc)) = self.resizes.iter().find(|(at, _)| *at == frames) {
            frame.video().set_format(desc);
        }

        let skip = self
            .skip_video_every
            .is_some_and(|n| self.frames % n == 0);
        if !skip {
            if let Some(mut writer) = frame.video().start_frame() {
                let len = writer.pixels().len();
                for i in 0..len {
                    writer.pixels_mut()[i] = self.pixel(i);
                }
                if !self.frame_delay.is_zero() {
                    std::thread::sleep(self.frame_delay);
                }
            }
        }

        let samples = [(self.state & 0xff) as f32 / 255.0; 16];
        frame.write_audio(&samples);

        let record = FrameRecord {
            index: self.frames,
            timestamp: frame.timestamp(),
            delta: frame.delta(),
            fast_forward: frame.fast_forward(),
            produced_video: frame.video().produced(),
        };
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

// ============================================================================
// Harness helpers
// ============================================================================

/// Resources for a task without pacing or capture
///
/// Returns the video handle and audio reader the controller side keeps.
pub fn test_resources(
    backpressure: Arc<AudioBackpressure>,
) -> (TaskResources, EmuVideo, AudioReader) {
    let video = EmuVideo::new(TEST_DESC);
    let (writer, reader) = audio_stream(AudioFormat::default(), 64, backpressure, true, false);
    let resources = TaskResources::new(video.clone(), writer, FramePacer::unpaced(60.0));
    (resources, video, reader)
}

pub fn test_backpressure() -> Arc<AudioBackpressure> {
    Arc::new(AudioBackpressure::new(3, 8, true))
}

/// Timestamp `n` nominal 60 Hz frames after the origin
pub fn frame_ts(n: u64) -> FrameTime {
    FrameTime::from_nanos(n * 16_666_667)
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Run `f` on a helper thread, failing the test if it has not returned within `timeout`
pub fn run_with_timeout<R: Send + 'static>(
    timeout: Duration,
    f: impl FnOnce() -> R + Send + 'static,
) -> R {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
            panic!("operation did not finish within {timeout:?}")
        }
        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => panic!("operation panicked"),
    }
}
