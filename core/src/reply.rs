//! Reply delivery from the emulation thread
//!
//! The emulation thread owns the only [`ReplySender`]. The simulation reaches it through
//! `FrameContext`, which is how format changes and screenshot results reach the controller.
//!
//! Notifications never block the emulation thread. Ones that do not fit in the reply port
//! wait in a backlog and go out, in order, as the controller drains the port.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::mpsc::TrySendError;

use tracing::{debug, trace, warn};

use crate::channel::{PortClosed, PortSender};
use crate::error::TaskError;
use crate::message::Reply;
use crate::pacing::FrameTime;
use crate::rendezvous::{CompletionSignal, completion};
use crate::video::PixmapDesc;

/// Notifications held back while the reply port is full
const BACKLOG_LIMIT: usize = 64;

/// Emulation-thread side of the reply port
#[derive(Debug)]
pub struct ReplySender {
    port: PortSender<Reply>,
    backlog: RefCell<VecDeque<Reply>>,
}

impl ReplySender {
    pub(crate) fn new(port: PortSender<Reply>) -> Self {
        Self {
            port,
            backlog: RefCell::default(),
        }
    }

    /// Post `VideoFormatChanged`
    ///
    /// When `ack` is supplied the caller is expected to wait on its other half before writing
    /// the next frame. Blocks while the reply port is full.
    pub fn send_video_format_changed_reply(
        &self,
        desc: PixmapDesc,
        ack: Option<CompletionSignal>,
    ) -> Result<(), PortClosed> {
        debug!("Posting video format change to {}", desc);
        // Earlier notifications go first
        let backlog: Vec<Reply> = self.backlog.borrow_mut().drain(..).collect();
        for reply in backlog {
            self.port.send(reply)?;
        }
        self.port.send(Reply::VideoFormatChanged {
            desc,
            ack,
            applied: false,
        })
    }

    /// Post `VideoFormatChanged` and block until the controller acknowledges it
    pub fn send_video_format_changed_and_wait(&self, desc: PixmapDesc) -> Result<(), TaskError> {
        let (ack, wait) = completion();
        self.send_video_format_changed_reply(desc, Some(ack))?;
        wait.wait()?;
        trace!("Video format change to {} acknowledged", desc);
        Ok(())
    }

    /// Post `ScreenshotTaken`
    ///
    /// Fire-and-forget: if the controller has let the reply port fill up the notification is
    /// backlogged rather than stalling emulation.
    pub fn send_screenshot_reply(&self, num: u32, success: bool) {
        self.post(Reply::ScreenshotTaken { num, success });
    }

    pub(crate) fn send_frame_notified(&self, timestamp: FrameTime) {
        self.post(Reply::FrameNotified { timestamp });
    }

    /// Notifications waiting for room in the reply port
    pub fn backlog_len(&self) -> usize {
        self.backlog.borrow().len()
    }

    /// Move as much of the backlog into the reply port as fits
    ///
    /// Returns `true` once the backlog is empty.
    pub(crate) fn flush(&self) -> bool {
        let mut backlog = self.backlog.borrow_mut();
        while let Some(reply) = backlog.pop_front() {
            match self.port.try_send(reply) {
                Ok(()) => {}
                Err(TrySendError::Full(reply)) => {
                    backlog.push_front(reply);
                    return false;
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!(
                        "{} port closed, dropping {} backlogged replies",
                        self.port.name(),
                        backlog.len() + 1
                    );
                    backlog.clear();
                }
            }
        }
        true
    }

    fn post(&self, reply: Reply) {
        if !self.flush() {
            self.hold(reply);
            return;
        }
        match self.port.try_send(reply) {
            Ok(()) => {}
            Err(TrySendError::Full(reply)) => self.hold(reply),
            Err(TrySendError::Disconnected(reply)) => {
                debug!("{} port closed, dropping {} reply", self.port.name(), reply.name());
            }
        }
    }

    fn hold(&self, reply: Reply) {
        let mut backlog = self.backlog.borrow_mut();
        if backlog.len() >= BACKLOG_LIMIT {
            warn!("{} backlog full, dropping {} reply", self.port.name(), reply.name());
            return;
        }
        trace!("{} port full, holding {} reply", self.port.name(), reply.name());
        backlog.push_back(reply);
    }
}
