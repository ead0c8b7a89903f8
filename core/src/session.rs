//! Per-run session context
//!
//! [`EmuSession`] bundles everything one emulation run needs: the task, the shared video
//! buffer, the audio stream and its backpressure counters, and the configuration they were
//! built from. It is the controller-side object a front end holds; replies from the emulation
//! thread are turned into [`SessionEvent`]s by [`process_replies`](EmuSession::process_replies).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::audio::{
    AudioBackpressure, AudioFormat, AudioReader, AudioStats, SUPPORTED_SAMPLE_RATES, audio_stream,
};
use crate::capture::ScreenshotWriter;
use crate::config::Config;
use crate::error::TaskError;
use crate::message::Reply;
use crate::pacing::{FramePacer, FrameTime};
use crate::rendezvous::CompletionWait;
use crate::system::EmuSystem;
use crate::task::{EmuSystemTask, TaskResources, TaskState};
use crate::video::{EmuVideo, PixmapDesc};

/// Something the emulation thread reported, after the session has handled it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The machine switched to this geometry; later events may supersede it
    VideoFormatChanged(PixmapDesc),
    ScreenshotTaken { num: u32, success: bool },
    FrameNotified(FrameTime),
}

/// One emulation run
pub struct EmuSession<S: EmuSystem> {
    config: Config,
    task: EmuSystemTask<S>,
    video: EmuVideo,
    backpressure: Arc<AudioBackpressure>,
    audio_reader: Option<AudioReader>,
    /// Worker-side resources, held until `start`
    resources: Option<TaskResources>,
    origin: Instant,
}

impl<S: EmuSystem> EmuSession<S> {
    /// Build a session for `system`, whose video starts out as `initial_desc`
    ///
    /// Assumes an audio device that plays every supported rate.
    pub fn new(config: Config, system: S, initial_desc: PixmapDesc) -> Self {
        let device_rate = SUPPORTED_SAMPLE_RATES[SUPPORTED_SAMPLE_RATES.len() - 1];
        Self::with_device_rate(config, system, initial_desc, device_rate)
    }

    /// Build a session whose audio device runs at `device_rate`
    ///
    /// Out-of-range configuration values are clamped, with a warning for each. A configured
    /// sample rate the device cannot play is lowered to one it can.
    pub fn with_device_rate(
        config: Config,
        system: S,
        initial_desc: PixmapDesc,
        device_rate: u32,
    ) -> Self {
        for warning in config.validate() {
            warn!("Config: {}", warning);
        }
        let mut config = config.sanitized();

        let video = EmuVideo::new(initial_desc);
        let backpressure = Arc::new(AudioBackpressure::from_config(&config.audio));
        let format =
            AudioFormat::for_device(config.audio.sample_rate, config.audio.channels, device_rate);
        config.audio.sample_rate = format.sample_rate;
        let (writer, reader) = audio_stream(
            format,
            format.frames_per_buffer(config.video.frame_rate),
            backpressure.clone(),
            config.audio.enabled,
            config.audio.sound_during_fast_forward,
        );
        let pacer = FramePacer::new(config.video.frame_rate, config.video.pacing);

        let mut resources = TaskResources::new(video.clone(), writer, pacer);
        match config.capture.resolved_directory() {
            Some(dir) => resources = resources.with_capture(ScreenshotWriter::new(dir)),
            None => warn!("No screenshot directory available; screenshots disabled"),
        }

        Self {
            config,
            task: EmuSystemTask::new(system),
            video,
            backpressure,
            audio_reader: Some(reader),
            resources: Some(resources),
            origin: Instant::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hand the audio-device end of the stream to the audio thread
    ///
    /// Returns `None` after the first call.
    pub fn take_audio_reader(&mut self) -> Option<AudioReader> {
        self.audio_reader.take()
    }

    /// Start the emulation thread
    ///
    /// # Panics
    ///
    /// Panics if the session was already started.
    pub fn start(&mut self) -> Result<(), TaskError> {
        let Some(resources) = self.resources.take() else {
            panic!("EmuSession::start called on a session that was already started");
        };
        self.origin = Instant::now();
        self.task.start(resources)?;
        info!(
            "Session started: {} at {} Hz",
            self.video.desc(),
            self.config.video.frame_rate
        );
        Ok(())
    }

    pub fn run_frame(&mut self, timestamp: FrameTime) -> Result<(), TaskError> {
        self.task.run_frame(timestamp)
    }

    /// Queue a frame stamped with the time since the session started
    pub fn run_frame_now(&mut self) -> Result<FrameTime, TaskError> {
        let timestamp = self.now();
        self.task.run_frame(timestamp)?;
        Ok(timestamp)
    }

    /// Time since the session started, on the clock `run_frame_now` uses
    pub fn now(&self) -> FrameTime {
        FrameTime::since(self.origin)
    }

    pub fn pause(&mut self) -> Result<(), TaskError> {
        self.task.pause()
    }

    pub fn stop(&mut self) -> Result<(), TaskError> {
        self.task.stop()
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    pub fn set_fast_forward_active(&self, active: bool) {
        self.task.set_fast_forward_active(active);
    }

    pub fn fast_forward_active(&self) -> bool {
        self.task.fast_forward_active()
    }

    pub fn video_frame_is_in_progress(&self) -> bool {
        self.task.video_frame_is_in_progress()
    }

    pub fn wait_for_finished_frame(&self) {
        self.task.wait_for_finished_frame();
    }

    pub fn wait_for_finished_frame_timeout(&self, timeout: Duration) -> bool {
        self.task.wait_for_finished_frame_timeout(timeout)
    }

    pub fn frames_completed(&self) -> u64 {
        self.task.frames_completed()
    }

    /// Handle every reply queued so far
    pub fn process_replies(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(reply) = self.task.poll_reply() {
            if let Some(event) = self.handle_reply(reply) {
                events.push(event);
            }
        }
        events
    }

    /// Wait up to `timeout` for one reply and handle it
    pub fn wait_event(&mut self, timeout: Duration) -> Option<SessionEvent> {
        let reply = self.task.wait_reply(timeout)?;
        self.handle_reply(reply)
    }

    fn handle_reply(&mut self, reply: Reply) -> Option<SessionEvent> {
        match reply {
            Reply::Unset => panic!("unset reply received from the emulation thread"),
            Reply::VideoFormatChanged { desc, ack, applied } => {
                if applied {
                    // The worker already sized the buffer and may be in a later mode
                    debug!("Video format change to {} was applied by the worker", desc);
                } else {
                    // Resize before releasing the worker so it never writes into the old buffer
                    self.video.set_format(desc);
                    debug!("Render target now {}", desc);
                }
                if let Some(ack) = ack {
                    ack.signal();
                }
                Some(SessionEvent::VideoFormatChanged(desc))
            }
            Reply::ScreenshotTaken { num, success } => {
                if success {
                    info!("Screenshot {} taken", num);
                } else {
                    warn!("Screenshot {} failed", num);
                }
                Some(SessionEvent::ScreenshotTaken { num, success })
            }
            Reply::FrameNotified { timestamp } => Some(SessionEvent::FrameNotified(timestamp)),
        }
    }

    pub fn video(&self) -> &EmuVideo {
        &self.video
    }

    /// Save the next finished frame as a screenshot
    pub fn request_screenshot(&self) {
        self.video.request_screenshot();
    }

    pub fn audio_backpressure(&self) -> &Arc<AudioBackpressure> {
        &self.backpressure
    }

    pub fn audio_stats(&self) -> AudioStats {
        self.backpressure.stats()
    }

    /// User change of the sound buffer count
    pub fn set_sound_buffers(&mut self, count: u32) -> u32 {
        let count = self.backpressure.set_buffer_count(count);
        self.config.audio.sound_buffers = count;
        count
    }

    /// Toggle growing the buffer count on underrun
    pub fn set_auto_increase_buffers(&mut self, enabled: bool) {
        self.backpressure.set_auto_increase(enabled);
        self.config.audio.add_buffers_on_underrun = enabled;
    }

    pub fn clear_audio_stats(&self) {
        self.backpressure.clear_stats();
    }

    pub fn notify_after_frame(&mut self) -> Result<CompletionWait, TaskError> {
        self.task.notify_after_frame()
    }

    /// Pause and run `f` with exclusive access to the machine
    pub fn with_paused_system<R>(&mut self, f: impl FnOnce(&mut S) -> R) -> Result<R, TaskError> {
        self.task.with_paused_system(f)
    }

    pub fn task(&self) -> &EmuSystemTask<S> {
        &self.task
    }
}
