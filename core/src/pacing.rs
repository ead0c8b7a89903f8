//! Frame timestamps and real-time pacing
//!
//! The presentation thread stamps every `RunFrame` with a [`FrameTime`] taken from a monotonic
//! clock. The emulation thread derives the elapsed time between frames from those stamps and,
//! unless fast-forward is active, uses [`FramePacer`] to avoid running frames faster than the
//! emulated machine's frame rate.

use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

/// Frame rate used when none (or an invalid one) is configured
pub const DEFAULT_FRAME_RATE: f64 = 60.0;

/// Monotonic frame timestamp, measured from an arbitrary per-session origin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameTime(Duration);

impl FrameTime {
    pub const ZERO: Self = Self(Duration::ZERO);

    pub const fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(Duration::from_nanos(nanos))
    }

    /// Timestamp for "now" relative to `origin`
    pub fn since(origin: Instant) -> Self {
        Self(origin.elapsed())
    }

    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// Time elapsed since `earlier`, zero if the clock appears to have gone backwards
    pub fn saturating_elapsed(self, earlier: FrameTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

/// Duration of one frame at `frame_rate` Hz, falling back to [`DEFAULT_FRAME_RATE`]
pub fn frame_duration(frame_rate: f64) -> Duration {
    let rate = if frame_rate.is_finite() && frame_rate > 0.0 {
        frame_rate
    } else {
        DEFAULT_FRAME_RATE
    };
    Duration::from_secs_f64(1.0 / rate)
}

/// Number of whole emulated frames covered by `delta`, at least one
///
/// Variable frame-length machines use this to catch up after a late timestamp.
pub fn elapsed_frames(delta: Duration, frame_duration: Duration) -> u32 {
    if frame_duration.is_zero() || delta <= frame_duration {
        return 1;
    }
    let frames = (delta.as_secs_f64() / frame_duration.as_secs_f64()).round();
    (frames as u32).max(1)
}

/// Real-time pacing for the emulation thread
///
/// Holds each frame back until one frame period has passed since the previous frame began.
/// A late frame is never followed by a burst of catch-up frames; the schedule restarts from
/// the late frame.
#[derive(Debug, Clone)]
pub struct FramePacer {
    frame_duration: Duration,
    enabled: bool,
    last_frame_start: Option<Instant>,
}

impl FramePacer {
    pub fn new(frame_rate: f64, enabled: bool) -> Self {
        Self {
            frame_duration: frame_duration(frame_rate),
            enabled,
            last_frame_start: None,
        }
    }

    /// Pacer that never delays (frame timing is left entirely to the caller)
    pub fn unpaced(frame_rate: f64) -> Self {
        Self::new(frame_rate, false)
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Wait for the next frame slot and mark the frame as started
    ///
    /// Skips the delay entirely while `fast_forward` is set. Returns how long it slept.
    pub fn pace(&mut self, fast_forward: bool) -> Duration {
        let mut slept = Duration::ZERO;
        if self.enabled && !fast_forward {
            if let Some(last) = self.last_frame_start {
                let target = last + self.frame_duration;
                let now = Instant::now();
                if target > now {
                    slept = target - now;
                    trace!("Pacing frame: sleeping {:?}", slept);
                    thread::sleep(slept);
                }
            }
        }
        self.last_frame_start = Some(Instant::now());
        slept
    }

    /// Forget the previous frame, e.g. after a pause
    pub fn reset(&mut self) {
        self.last_frame_start = None;
    }
}
