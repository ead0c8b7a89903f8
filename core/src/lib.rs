//! Framestep Core - cross-thread frame scheduler for emulator front ends
//!
//! This crate runs an emulated machine one frame at a time on a dedicated worker thread and
//! keeps it in step with a presentation thread that owns the display and audio device.
//!
//! # Architecture
//!
//! - [`EmuSystem`] - Trait implemented by each emulated machine
//! - [`EmuSystemTask`] - The worker thread and its command/reply protocol
//! - [`EmuSession`] - Per-run context: task, video buffer, audio stream, configuration
//! - [`FrameTracker`] - Lets the presentation thread wait for the frame being written
//! - [`AudioBackpressure`] - Grows the audio buffer count on underrun, up to a ceiling

pub mod audio;
pub mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
#[cfg(test)]
mod integration;
pub mod message;
pub mod pacing;
pub mod rendezvous;
pub mod reply;
pub mod session;
pub mod system;
pub mod task;
#[cfg(test)]
pub mod test_utils;
pub mod video;

// Re-export the controller-facing API
pub use session::{EmuSession, SessionEvent};
pub use system::{EmuSystem, FrameContext};
pub use task::{EmuSystemTask, TaskResources, TaskState};

// Re-export protocol types
pub use channel::{PortClosed, PortReceiver, PortSender, message_port};
pub use frame::FrameTracker;
pub use message::{Command, CommandMessage, Reply};
pub use rendezvous::{Abandoned, CompletionSignal, CompletionWait, Rendezvous, completion};
pub use reply::ReplySender;

// Re-export video and audio types
pub use audio::{
    AudioBackpressure, AudioFormat, AudioReader, AudioStats, AudioWriter, MAX_SOUND_BUFFERS,
    MIN_SOUND_BUFFERS, SampleRateError, audio_stream,
};
pub use pacing::{FramePacer, FrameTime};
pub use video::{EmuVideo, FrameWriter, PixelFormat, PixmapDesc, VideoFrame, VideoOutput};

// Re-export configuration, capture and error types
pub use capture::{CaptureError, ScreenshotWriter};
pub use config::Config;
pub use error::{ConfigError, TaskError};
