//! Frame completion tracking
//!
//! Lets the presentation thread find out whether the emulation thread is in the middle of
//! writing a video frame, and block until that frame is finished before it touches the frame
//! buffer or reallocates its render target.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::trace;

use crate::rendezvous::Rendezvous;

/// `doingVideoFrame` flag plus the rendezvous the emulation thread signals when a frame ends
///
/// Only one presentation-side wait may be outstanding at a time, matching the single frame
/// that can be in flight.
#[derive(Debug, Default)]
pub struct FrameTracker {
    doing_video_frame: AtomicBool,
    finished: Rendezvous,
    frames_completed: AtomicU64,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking check for a frame currently being written
    pub fn video_frame_is_in_progress(&self) -> bool {
        self.doing_video_frame.load(Ordering::Acquire)
    }

    /// Block until the frame in progress (if any) is finished
    pub fn wait_for_finished_frame(&self) {
        if !self.video_frame_is_in_progress() {
            return;
        }
        self.finished.wait();
    }

    /// Like [`wait_for_finished_frame`](Self::wait_for_finished_frame) with an upper bound.
    ///
    /// Returns `false` if the frame was still in progress when `timeout` ran out.
    pub fn wait_for_finished_frame_timeout(&self, timeout: Duration) -> bool {
        if !self.video_frame_is_in_progress() {
            return true;
        }
        self.finished.wait_timeout(timeout)
    }

    /// Emulation-thread side: video production for a new frame begins
    ///
    /// Clears any completion signal left over from frames nobody waited on, so a later wait
    /// cannot return early on a stale frame.
    pub(crate) fn start_video_frame(&self) {
        let was_doing = self.doing_video_frame.load(Ordering::Acquire);
        assert!(!was_doing, "video frame started while another frame is in progress");
        self.finished.reset();
        self.doing_video_frame.store(true, Ordering::Release);
    }

    /// Emulation-thread side: the current frame is complete and belongs to the presentation
    /// thread until the next `RunFrame`.
    pub fn finish_video_frame(&self) {
        self.doing_video_frame.store(false, Ordering::Release);
        let completed = self.frames_completed.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Video frame {} finished", completed);
        self.finished.signal();
    }

    /// Total frames finished since the tracker was created
    pub fn frames_completed(&self) -> u64 {
        self.frames_completed.load(Ordering::Acquire)
    }
}
