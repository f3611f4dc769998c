//! Broadcast cancellation.
//!
//! A [`StopToken`] is shared by a controller and everything it starts. Calling
//! [`StopToken::stop`] drops the token's only sender, so every clone blocked in
//! `recv`, `recv_deadline` or a `select!` on [`StopToken::receiver`] wakes at
//! once with a disconnect.

use crate::clock;
use crate::lockfree::AtomicFlag;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    stopped: AtomicFlag,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

/// Cloneable cancellation handle.
#[derive(Clone)]
pub struct StopToken {
    inner: Arc<Inner>,
}

impl StopToken {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                stopped: AtomicFlag::new(false),
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn stop(&self) {
        self.inner.stopped.set(true);
        self.inner.sender.lock().take();
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    /// Channel that disconnects when the token is stopped. Never yields a value.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.receiver
    }

    /// Sleeps until the clock reaches `time`.
    ///
    /// Returns `false` if the token was stopped before the deadline.
    pub fn sleep_until(&self, time: f64) -> bool {
        if self.is_stopped() {
            return false;
        }
        if !time.is_finite() {
            let _ = self.inner.receiver.recv();
            return false;
        }
        match self.inner.receiver.recv_deadline(clock::instant_at(time)) {
            Err(RecvTimeoutError::Timeout) => !self.is_stopped(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Sleeps for `timeout`. Returns `false` if the token was stopped first.
    pub fn sleep(&self, timeout: Duration) -> bool {
        self.sleep_until(clock::now() + timeout.as_secs_f64())
    }

    /// Blocks until the token is stopped.
    pub fn wait(&self) {
        if !self.is_stopped() {
            let _ = self.inner.receiver.recv();
        }
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
