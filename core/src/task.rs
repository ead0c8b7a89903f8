//! Emulation task: the worker thread that advances the machine one frame per command
//!
//! [`EmuSystemTask`] is the controller's handle. It owns the command port into the worker, the
//! reply port out of it and the worker's join handle. The worker owns the per-frame
//! resources ([`TaskResources`]) and shares the machine itself behind a mutex so the controller
//! can reach it while the task is paused.
//!
//! Lifecycle: `Idle --start--> Running --pause--> Paused --run_frame--> Running`, and any
//! state `--stop--> Exited`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::TrySendError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::audio::AudioWriter;
use crate::capture::ScreenshotWriter;
use crate::channel::{PortClosed, PortReceiver, PortSender, message_port};
use crate::error::TaskError;
use crate::frame::FrameTracker;
use crate::message::{Command, CommandMessage, Reply};
use crate::pacing::{FramePacer, FrameTime};
use crate::rendezvous::{CompletionSignal, CompletionWait, completion};
use crate::reply::ReplySender;
use crate::system::{EmuSystem, FrameContext};
use crate::video::{EmuVideo, VideoOutput};


const COMMAND_PORT: &str = "EmuSystemTask Command";
const REPLY_PORT: &str = "EmuSystemTask Reply";

/// Commands queued ahead of the worker
const COMMAND_CAPACITY: usize = 4;

/// Replies queued ahead of the controller
const REPLY_CAPACITY: usize = 16;

/// How often a blocked controller services replies
const PUMP_INTERVAL: Duration = Duration::from_millis(1);

const THREAD_NAME: &str = "emu-system-task";

/// Controller-side view of the task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Paused,
    Exited,
}

/// State read by both threads without going through the ports
#[derive(Debug, Default)]
struct TaskShared {
    fast_forward: AtomicBool,
    frames: FrameTracker,
}

/// Everything the worker needs besides the machine, moved into the thread at `start`
pub struct TaskResources {
    video: EmuVideo,
    audio: AudioWriter,
    pacer: FramePacer,
    capture: Option<ScreenshotWriter>,
}

impl TaskResources {
    pub fn new(video: EmuVideo, audio: AudioWriter, pacer: FramePacer) -> Self {
        Self {
            video,
            audio,
            pacer,
            capture: None,
        }
    }

    /// Save requested screenshots with `writer`; without one every request fails
    pub fn with_capture(mut self, writer: ScreenshotWriter) -> Self {
        self.capture = Some(writer);
        self
    }
}

/// Handle to the emulation thread
///
/// Not `Clone`: exactly one controller drives each worker. Dropping the handle stops the
/// worker and joins it.
pub struct EmuSystemTask<S: EmuSystem> {
    system: Arc<Mutex<S>>,
    shared: Arc<TaskShared>,
    commands: Option<PortSender<CommandMessage>>,
    replies: Option<PortReceiver<Reply>>,
    /// Replies taken off the port while the controller was blocked
    deferred: VecDeque<Reply>,
    thread: Option<JoinHandle<()>>,
    state: TaskState,
}

impl<S: EmuSystem> EmuSystemTask<S> {
    pub fn new(system: S) -> Self {
        Self {
            system: Arc::new(Mutex::new(system)),
            shared: Arc::new(TaskShared::default()),
            commands: None,
            replies: None,
            deferred: VecDeque::new(),
            thread: None,
            state: TaskState::Idle,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Whether a worker thread is running
    pub fn is_started(&self) -> bool {
        matches!(self.state, TaskState::Running | TaskState::Paused)
    }

    /// Spawn the worker thread
    ///
    /// # Panics
    ///
    /// Panics unless the task is `Idle`.
    pub fn start(&mut self, resources: TaskResources) -> Result<(), TaskError> {
        assert_eq!(
            self.state,
            TaskState::Idle,
            "EmuSystemTask::start called on a task that was already started"
        );

        let (command_tx, command_rx) = message_port(COMMAND_PORT, COMMAND_CAPACITY);
        let (reply_tx, reply_rx) = message_port(REPLY_PORT, REPLY_CAPACITY);

        let worker = Worker {
            system: self.system.clone(),
            shared: self.shared.clone(),
            commands: command_rx,
            replies: ReplySender::new(reply_tx),
            resources,
            last_timestamp: None,
            paused: false,
            pending_notifications: Vec::new(),
        };

        let handle = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || worker.run())
            .map_err(TaskError::Spawn)?;

        self.commands = Some(command_tx);
        self.replies = Some(reply_rx);
        self.thread = Some(handle);
        self.state = TaskState::Running;
        info!("Emulation task started");
        Ok(())
    }

    /// Queue one frame of emulation
    ///
    /// Blocks only while the command port is full. Resumes a paused task.
    ///
    /// # Panics
    ///
    /// Panics if the task was never started or has been stopped.
    pub fn run_frame(&mut self, timestamp: FrameTime) -> Result<(), TaskError> {
        self.assert_running("RunFrame");
        self.send_command(CommandMessage::run_frame(timestamp))?;
        self.state = TaskState::Running;
        Ok(())
    }

    /// Stop the worker at the next frame boundary
    ///
    /// Returns once every previously queued frame has finished and the worker has
    /// acknowledged the pause. Does nothing unless the task is `Running`.
    pub fn pause(&mut self) -> Result<(), TaskError> {
        if self.state != TaskState::Running {
            debug!("Pause ignored in state {:?}", self.state);
            return Ok(());
        }
        let (done, wait) = completion();
        self.send_command(CommandMessage::with_completion(Command::Pause, done))?;
        self.wait_pumping(wait)?;
        self.state = TaskState::Paused;
        debug!("Emulation task paused");
        Ok(())
    }

    /// Ask for a `FrameNotified` reply after the next completed frame
    ///
    /// The returned handle also fires at that point. It reports `Abandoned` if the task stops
    /// before another frame runs.
    pub fn notify_after_frame(&mut self) -> Result<CompletionWait, TaskError> {
        self.assert_running("NotifyAfterFrame");
        let (done, wait) = completion();
        self.send_command(CommandMessage::with_completion(
            Command::NotifyAfterFrame,
            done,
        ))?;
        Ok(wait)
    }

    /// Stop the worker and join it
    ///
    /// Safe to call from any state and more than once. Pending replies stay readable through
    /// [`poll_reply`](Self::poll_reply).
    pub fn stop(&mut self) -> Result<(), TaskError> {
        match self.state {
            TaskState::Exited => return Ok(()),
            TaskState::Idle => {
                self.state = TaskState::Exited;
                return Ok(());
            }
            TaskState::Running | TaskState::Paused => {}
        }

        info!("Stopping emulation task");
        if let Err(e) = self.send_command(CommandMessage::new(Command::Exit)) {
            debug!("Exit not delivered: {}", e);
        }
        // A worker that missed Exit still sees the port close
        self.commands = None;

        let result = self.join_worker();
        self.state = TaskState::Exited;
        result
    }

    /// Toggle fast-forward; takes effect at the next frame boundary
    pub fn set_fast_forward_active(&self, active: bool) {
        let was = self.shared.fast_forward.swap(active, Ordering::Release);
        if was != active {
            debug!("Fast-forward {}", if active { "on" } else { "off" });
        }
    }

    pub fn fast_forward_active(&self) -> bool {
        self.shared.fast_forward.load(Ordering::Acquire)
    }

    pub fn video_frame_is_in_progress(&self) -> bool {
        self.shared.frames.video_frame_is_in_progress()
    }

    /// Block until the frame being written (if any) is finished
    pub fn wait_for_finished_frame(&self) {
        self.shared.frames.wait_for_finished_frame();
    }

    /// Returns `false` if the frame was still in progress after `timeout`
    pub fn wait_for_finished_frame_timeout(&self, timeout: Duration) -> bool {
        self.shared.frames.wait_for_finished_frame_timeout(timeout)
    }

    pub fn frames_completed(&self) -> u64 {
        self.shared.frames.frames_completed()
    }

    /// The tracker itself, for observers on other threads
    pub fn frame_tracker(&self) -> &FrameTracker {
        &self.shared.frames
    }

    /// Next reply, without blocking
    pub fn poll_reply(&mut self) -> Option<Reply> {
        if let Some(reply) = self.deferred.pop_front() {
            return Some(reply);
        }
        self.replies.as_ref()?.try_receive()
    }

    /// Next reply, waiting up to `timeout`
    pub fn wait_reply(&mut self, timeout: Duration) -> Option<Reply> {
        if let Some(reply) = self.deferred.pop_front() {
            return Some(reply);
        }
        self.replies.as_ref()?.receive_timeout(timeout)
    }

    /// Pause the task and run `f` with exclusive access to the machine
    ///
    /// The task stays paused afterwards; the next `run_frame` resumes it.
    pub fn with_paused_system<R>(&mut self, f: impl FnOnce(&mut S) -> R) -> Result<R, TaskError> {
        self.pause()?;
        let mut system = lock_system(&self.system);
        Ok(f(&mut system))
    }

    fn assert_running(&self, command: &str) {
        assert!(
            self.is_started(),
            "{} sent to an emulation task in state {:?}",
            command,
            self.state
        );
    }

    /// Deliver a command, servicing replies while the command port is full
    fn send_command(&mut self, msg: CommandMessage) -> Result<(), TaskError> {
        let Self {
            commands,
            replies,
            deferred,
            thread: worker,
            ..
        } = self;
        let Some(port) = commands.as_ref() else {
            return Err(PortClosed { port: COMMAND_PORT }.into());
        };

        trace!("Sending {}", msg.command.name());
        let mut msg = msg;
        loop {
            match port.try_send(msg) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) => {
                    msg = returned;
                    pump_replies(replies.as_ref(), deferred);
                    if worker.as_ref().is_none_or(|t| t.is_finished()) {
                        return Err(TaskError::WorkerGone);
                    }
                    thread::sleep(PUMP_INTERVAL);
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(PortClosed { port: port.name() }.into());
                }
            }
        }
    }

    /// Wait on a completion, servicing replies meanwhile
    fn wait_pumping(&mut self, wait: CompletionWait) -> Result<(), TaskError> {
        loop {
            if wait.wait_timeout(PUMP_INTERVAL)? {
                return Ok(());
            }
            pump_replies(self.replies.as_ref(), &mut self.deferred);
        }
    }

    fn join_worker(&mut self) -> Result<(), TaskError> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        while !handle.is_finished() {
            pump_replies(self.replies.as_ref(), &mut self.deferred);
            thread::sleep(PUMP_INTERVAL);
        }
        handle.join().map_err(|_| {
            warn!("Emulation thread panicked");
            TaskError::WorkerPanicked
        })?;
        debug!("Emulation thread joined");
        Ok(())
    }
}

impl<S: EmuSystem> Drop for EmuSystemTask<S> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Emulation task did not stop cleanly: {}", e);
        }
    }
}

/// Move queued replies aside, releasing a worker blocked on a format-change acknowledgement
fn pump_replies(replies: Option<&PortReceiver<Reply>>, deferred: &mut VecDeque<Reply>) {
    let Some(replies) = replies else {
        return;
    };
    while let Some(reply) = replies.try_receive() {
        trace!("Deferring {} reply", reply.name());
        deferred.push_back(reply.acknowledge());
    }
}

fn lock_system<S>(system: &Mutex<S>) -> MutexGuard<'_, S> {
    system.lock().unwrap_or_else(|e| {
        warn!("Emulated system mutex poisoned; continuing");
        e.into_inner()
    })
}

/// Worker-thread state
struct Worker<S: EmuSystem> {
    system: Arc<Mutex<S>>,
    shared: Arc<TaskShared>,
    commands: PortReceiver<CommandMessage>,
    replies: ReplySender,
    resources: TaskResources,
    last_timestamp: Option<FrameTime>,
    paused: bool,
    pending_notifications: Vec<Option<CompletionSignal>>,
}

impl<S: EmuSystem> Worker<S> {
    fn run(mut self) {
        debug!("Emulation thread started");

        loop {
            let next = if self.replies.flush() {
                self.commands.receive()
            } else {
                // Retry held notifications while the controller drains the reply port
                match self.commands.receive_timeout(PUMP_INTERVAL) {
                    Some(msg) => Some(msg),
                    None => continue,
                }
            };
            let Some(CommandMessage { command, done }) = next else {
                debug!("Command port closed");
                break;
            };
            trace!("Handling {}", command.name());

            match command {
                Command::Unset => panic!("unset command delivered to the emulation thread"),
                Command::RunFrame { timestamp } => {
                    self.run_frame(timestamp);
                    signal(done);
                }
                Command::Pause => {
                    self.pause();
                    signal(done);
                }
                Command::NotifyAfterFrame => self.pending_notifications.push(done),
                Command::Exit => {
                    signal(done);
                    break;
                }
            }
        }

        self.resources.audio.set_active(false);
        // The controller services replies while joining
        while !self.replies.flush() {
            thread::sleep(PUMP_INTERVAL);
        }
        if !self.pending_notifications.is_empty() {
            debug!(
                "Dropping {} frame notifications on exit",
                self.pending_notifications.len()
            );
        }
        debug!("Emulation thread exiting");
    }

    fn run_frame(&mut self, timestamp: FrameTime) {
        let fast_forward = self.shared.fast_forward.load(Ordering::Acquire);

        if self.paused {
            // Time spent paused is not emulated time
            self.paused = false;
            self.last_timestamp = None;
            self.resources.pacer.reset();
            debug!("Resuming after pause");
        }

        self.resources.pacer.pace(fast_forward);
        let frame_duration = self.resources.pacer.frame_duration();
        let delta = match self.last_timestamp {
            Some(previous) => timestamp.saturating_elapsed(previous),
            None => frame_duration,
        };
        self.last_timestamp = Some(timestamp);
        self.resources.audio.set_active(true);

        let produced = {
            let mut system = lock_system(&self.system);
            let video = VideoOutput::new(
                &self.resources.video,
                &self.shared.frames,
                &self.replies,
                timestamp,
            );
            let mut frame = FrameContext::new(
                timestamp,
                delta,
                frame_duration,
                fast_forward,
                video,
                &mut self.resources.audio,
                &self.replies,
            );
            system.run_frame(&mut frame);
            frame.video().produced()
        };

        if !produced {
            trace!("Frame at {:?} produced no video", timestamp);
            self.shared.frames.finish_video_frame();
        }

        if self.resources.video.take_screenshot_request() {
            self.take_screenshot();
        }

        if !self.pending_notifications.is_empty() {
            self.replies.send_frame_notified(timestamp);
            for done in self.pending_notifications.drain(..) {
                signal(done);
            }
        }
    }

    fn pause(&mut self) {
        self.paused = true;
        self.resources.audio.set_active(false);
        debug!("Emulation thread paused");
    }

    fn take_screenshot(&self) {
        let Some(writer) = &self.resources.capture else {
            warn!("Screenshot requested but no screenshot directory is configured");
            self.replies.send_screenshot_reply(0, false);
            return;
        };
        let frame = self.resources.video.snapshot();
        let (num, result) = writer.save(&frame);
        self.replies.send_screenshot_reply(num, result.is_ok());
    }
}

fn signal(done: Option<CompletionSignal>) {
    if let Some(done) = done {
        done.signal();
    }
}
