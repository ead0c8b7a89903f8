//! The seam between the scheduler and an emulated machine
//!
//! A machine implements [`EmuSystem`]; the emulation thread calls
//! [`run_frame`](EmuSystem::run_frame) once per `RunFrame` command with a [`FrameContext`]
//! describing the step and giving access to the video buffer, audio stream and reply port.

use std::time::Duration;

use crate::audio::{AudioFormat, AudioWriter};
use crate::pacing::{FrameTime, elapsed_frames};
use crate::reply::ReplySender;
use crate::video::VideoOutput;

/// An emulated machine driven one frame at a time
///
/// The simulation is owned by the emulation thread while frames run. The controller only
/// reaches it while the task is paused (see `EmuSystemTask::with_paused_system`).
pub trait EmuSystem: Send + 'static {
    /// Advance the machine by one step
    ///
    /// Video goes through [`FrameContext::video`]: call
    /// [`VideoOutput::start_frame`] at most once and write pixels through the returned guard.
    /// Steps that produce no picture still count as a completed frame.
    fn run_frame(&mut self, frame: &mut FrameContext<'_>);
}

impl<S: EmuSystem + ?Sized> EmuSystem for Box<S> {
    fn run_frame(&mut self, frame: &mut FrameContext<'_>) {
        (**self).run_frame(frame)
    }
}

/// Everything a machine sees during one step
pub struct FrameContext<'a> {
    timestamp: FrameTime,
    delta: Duration,
    frame_duration: Duration,
    fast_forward: bool,
    video: VideoOutput<'a>,
    audio: &'a mut AudioWriter,
    replies: &'a ReplySender,
}

impl<'a> FrameContext<'a> {
    pub(crate) fn new(
        timestamp: FrameTime,
        delta: Duration,
        frame_duration: Duration,
        fast_forward: bool,
        video: VideoOutput<'a>,
        audio: &'a mut AudioWriter,
        replies: &'a ReplySender,
    ) -> Self {
        Self {
            timestamp,
            delta,
            frame_duration,
            fast_forward,
            video,
            audio,
            replies,
        }
    }

    /// Timestamp the controller attached to this `RunFrame`
    pub fn timestamp(&self) -> FrameTime {
        self.timestamp
    }

    /// Real time since the previous frame; one nominal frame after start or a pause
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Whole emulated frames covered by [`delta`](Self::delta), at least one
    pub fn elapsed_frames(&self) -> u32 {
        elapsed_frames(self.delta, self.frame_duration)
    }

    pub fn fast_forward(&self) -> bool {
        self.fast_forward
    }

    pub fn video(&mut self) -> &mut VideoOutput<'a> {
        &mut self.video
    }

    pub fn audio_format(&self) -> AudioFormat {
        self.audio.format()
    }

    /// Queue interleaved samples for this step
    pub fn write_audio(&mut self, samples: &[f32]) -> usize {
        self.audio.write(samples, self.fast_forward)
    }

    pub fn replies(&self) -> &ReplySender {
        self.replies
    }

    pub fn send_screenshot_reply(&self, num: u32, success: bool) {
        self.replies.send_screenshot_reply(num, success);
    }
}
