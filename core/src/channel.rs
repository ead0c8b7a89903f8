//! Bounded message ports
//!
//! A message port connects exactly one sender role to one receiver role. Neither half is
//! `Clone`, so the single-sender/single-receiver discipline is enforced by ownership.
//! Sends block while the port is at capacity and receives block while it is empty.
//!
//! Ports have no shutdown state of their own. The emulation task shuts down through an
//! explicit `Exit` command; a dropped half only shows up here when the thread owning it is
//! already gone.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

/// The other half of the port no longer exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{port} port closed")]
pub struct PortClosed {
    pub port: &'static str,
}

/// Create a bounded port with room for `capacity` queued messages
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn message_port<T>(name: &'static str, capacity: usize) -> (PortSender<T>, PortReceiver<T>) {
    assert!(capacity > 0, "{name} port needs a non-zero capacity");
    let (tx, rx) = mpsc::sync_channel(capacity);
    (PortSender { name, tx }, PortReceiver { name, rx })
}

/// Sending half of a message port
#[derive(Debug)]
pub struct PortSender<T> {
    name: &'static str,
    tx: SyncSender<T>,
}

impl<T> PortSender<T> {
    /// Enqueue a message, blocking while the port is full
    pub fn send(&self, msg: T) -> Result<(), PortClosed> {
        self.tx.send(msg).map_err(|_| PortClosed { port: self.name })
    }

    /// Enqueue a message only if there is room right now
    pub fn try_send(&self, msg: T) -> Result<(), TrySendError<T>> {
        self.tx.try_send(msg)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Receiving half of a message port
#[derive(Debug)]
pub struct PortReceiver<T> {
    name: &'static str,
    rx: Receiver<T>,
}

impl<T> PortReceiver<T> {
    /// Block until a message arrives
    ///
    /// Returns `None` only if the sending half has been dropped and the queue is drained.
    pub fn receive(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Take a queued message without blocking
    pub fn try_receive(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Block for at most `timeout` waiting for a message
    pub fn receive_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = message_port::<u32>("test", 4);
        for i in 0..4 {
            tx.send(i).unwrap();
        }
        let received: Vec<u32> = (0..4).map(|_| rx.receive().unwrap()).collect();
        assert_eq!(received, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_send_blocks_when_full() {
        let (tx, rx) = message_port::<u32>("test", 1);
        tx.send(1).unwrap();
        assert!(matches!(tx.try_send(2), Err(TrySendError::Full(2))));

        let sent = Arc::new(AtomicBool::new(false));
        let sender = {
            let sent = sent.clone();
            thread::spawn(move || {
                tx.send(2).unwrap();
                sent.store(true, Ordering::Release);
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!sent.load(Ordering::Acquire), "send should block on a full port");

        assert_eq!(rx.receive(), Some(1));
        sender.join().unwrap();
        assert!(sent.load(Ordering::Acquire));
        assert_eq!(rx.receive(), Some(2));
    }

    #[test]
    fn test_receive_blocks_until_send() {
        let (tx, rx) = message_port::<&'static str>("test", 2);
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send("hello").unwrap();
            tx
        });
        assert_eq!(rx.receive_timeout(Duration::from_secs(5)), Some("hello"));
        drop(sender.join().unwrap());
    }

    #[test]
    fn test_try_receive_empty() {
        let (_tx, rx) = message_port::<u8>("test", 2);
        assert_eq!(rx.try_receive(), None);
        assert_eq!(rx.receive_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn test_dropped_sender_drains_then_ends() {
        let (tx, rx) = message_port::<u8>("test", 2);
        tx.send(7).unwrap();
        drop(tx);
        assert_eq!(rx.receive(), Some(7));
        assert_eq!(rx.receive(), None);
    }

    #[test]
    fn test_send_to_dropped_receiver_reports_port() {
        let (tx, rx) = message_port::<u8>("Reply", 2);
        drop(rx);
        assert_eq!(tx.send(1), Err(PortClosed { port: "Reply" }));
        assert_eq!(tx.name(), "Reply");
    }

    #[test]
    #[should_panic(expected = "non-zero capacity")]
    fn test_zero_capacity_rejected() {
        let _ = message_port::<u8>("test", 0);
    }
}
