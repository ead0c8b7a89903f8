//! Command and reply messages exchanged with the emulation thread
//!
//! Both sets are closed enums, so dispatch on either side is checked for exhaustiveness.
//! `Unset` is the default value of each and is never a valid message: delivering one is a
//! programming error.

use crate::pacing::FrameTime;
use crate::rendezvous::CompletionSignal;
use crate::video::PixmapDesc;

/// Operation requested of the emulation thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Command {
    #[default]
    Unset,
    /// Advance the simulation by one frame
    RunFrame { timestamp: FrameTime },
    /// Stop at a frame boundary so the controller can touch simulation state
    Pause,
    /// Post [`Reply::FrameNotified`] after the next completed frame
    NotifyAfterFrame,
    /// Release resources and leave the run loop
    Exit,
}

impl Command {
    pub fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unset => "Unset",
            Self::RunFrame { .. } => "RunFrame",
            Self::Pause => "Pause",
            Self::NotifyAfterFrame => "NotifyAfterFrame",
            Self::Exit => "Exit",
        }
    }
}

/// A command plus the completion its sender wants signaled once it has been handled
#[derive(Debug, Default)]
pub struct CommandMessage {
    pub command: Command,
    pub done: Option<CompletionSignal>,
}

impl CommandMessage {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            done: None,
        }
    }

    pub fn with_completion(command: Command, done: CompletionSignal) -> Self {
        Self {
            command,
            done: Some(done),
        }
    }

    pub fn run_frame(timestamp: FrameTime) -> Self {
        Self::new(Command::RunFrame { timestamp })
    }
}

/// Notification from the emulation thread to the controller
#[derive(Debug, Default)]
pub enum Reply {
    #[default]
    Unset,
    /// The machine switched video geometry or pixel format. When `ack` is present the
    /// emulation thread is blocked until it is signaled, which must happen only after the
    /// controller has reallocated its render target.
    ///
    /// `applied` is set on a change the controller acknowledged before handling it. The
    /// emulation thread has then resized the buffer itself and may have moved past `desc`.
    VideoFormatChanged {
        desc: PixmapDesc,
        ack: Option<CompletionSignal>,
        applied: bool,
    },
    /// A screenshot attempt finished
    ScreenshotTaken { num: u32, success: bool },
    /// A frame completed after a `NotifyAfterFrame` request
    FrameNotified { timestamp: FrameTime },
}

impl Reply {
    pub fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unset => "Unset",
            Self::VideoFormatChanged { .. } => "VideoFormatChanged",
            Self::ScreenshotTaken { .. } => "ScreenshotTaken",
            Self::FrameNotified { .. } => "FrameNotified",
        }
    }

    /// Release a blocked emulation thread without handling the reply's payload yet
    ///
    /// Used when the controller has to keep servicing replies while it is itself blocked;
    /// the returned reply carries no acknowledgement handle.
    pub(crate) fn acknowledge(self) -> Self {
        match self {
            Self::VideoFormatChanged { desc, ack, applied } => {
                let released = ack.is_some();
                if let Some(ack) = ack {
                    ack.signal();
                }
                Self::VideoFormatChanged {
                    desc,
                    ack: None,
                    applied: applied || released,
                }
            }
            other => other,
        }
    }
}
