//! Blocking rendezvous primitives
//!
//! - [`Rendezvous`] - a binary gate of capacity one. One thread blocks in
//!   [`Rendezvous::wait`] until another thread calls [`Rendezvous::signal`].
//! - [`completion`] - a one-shot pair that travels inside a message. The sender keeps the
//!   [`CompletionWait`] half and moves the [`CompletionSignal`] half into the message; whoever
//!   handles the message signals it. Dropping an unsignaled [`CompletionSignal`] wakes the
//!   waiter with [`Abandoned`] instead of leaving it blocked forever.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::warn;

/// Binary wait/signal gate
///
/// Signalling an already signaled gate has no further effect: at most one permit is stored.
/// A successful wait consumes the permit.
#[derive(Debug, Default)]
pub struct Rendezvous {
    signaled: Mutex<bool>,
    cvar: Condvar,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the permit and wake one waiter
    pub fn signal(&self) {
        let mut signaled = self.lock();
        *signaled = true;
        self.cvar.notify_one();
    }

    /// Block until the gate is signaled, then consume the permit
    pub fn wait(&self) {
        let mut signaled = self.lock();
        while !*signaled {
            signaled = self.cvar.wait(signaled).unwrap_or_else(|e| {
                warn!("Rendezvous mutex poisoned during wait; continuing");
                e.into_inner()
            });
        }
        *signaled = false;
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `true` if the permit was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (mut signaled, _) = self
            .cvar
            .wait_timeout_while(guard, timeout, |signaled| !*signaled)
            .unwrap_or_else(|e| {
                warn!("Rendezvous mutex poisoned during wait; continuing");
                e.into_inner()
            });
        let consumed = *signaled;
        *signaled = false;
        consumed
    }

    /// Discard a stored permit without waking anyone
    pub fn reset(&self) {
        *self.lock() = false;
    }

    pub fn is_signaled(&self) -> bool {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.signaled.lock().unwrap_or_else(|e| {
            warn!("Rendezvous mutex poisoned; continuing");
            e.into_inner()
        })
    }
}

/// The waiting side gave up on a completion whose signal half was dropped unsignaled
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("completion handle dropped without being signaled")]
pub struct Abandoned;

/// Create a one-shot completion pair
pub fn completion() -> (CompletionSignal, CompletionWait) {
    let (tx, rx) = mpsc::sync_channel(1);
    (CompletionSignal { tx }, CompletionWait { rx })
}

/// Signal half of a one-shot completion, owned by whoever handles the request
#[derive(Debug)]
pub struct CompletionSignal {
    tx: SyncSender<()>,
}

impl CompletionSignal {
    /// Wake the waiting side. Consumes the handle so it can only fire once.
    pub fn signal(self) {
        // The waiter may already be gone; nothing is left to wake in that case
        let _ = self.tx.try_send(());
    }
}

/// Waiting half of a one-shot completion, kept by the requester
#[derive(Debug)]
pub struct CompletionWait {
    rx: Receiver<()>,
}

impl CompletionWait {
    /// Block until the request has been handled
    pub fn wait(self) -> Result<(), Abandoned> {
        self.rx.recv().map_err(|_| Abandoned)
    }

    /// Returns `Ok(true)` once signaled, `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, Abandoned> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(Abandoned),
        }
    }

    /// Non-blocking check
    pub fn try_wait(&self) -> Result<bool, Abandoned> {
        match self.rx.try_recv() {
            Ok(()) => Ok(true),
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => Err(Abandoned),
        }
    }
}
