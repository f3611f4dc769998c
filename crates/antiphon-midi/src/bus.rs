//! Publish/wait primitive for incoming MIDI events.
//!
//! The [`SignalBus`] is the one piece of state shared by every session and
//! controller thread. Publishing is serialized, so every subscriber and waiter
//! observes events in the order they were published.

use crate::event::{MidiMessage, TimedEvent};
use crate::signal::MidiSignal;
use antiphon_core::{clock, StopToken};
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// How a blocking wait on the bus ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitOutcome {
    /// A matching event was published.
    Matched(TimedEvent),
    /// The wait was released by [`SignalBus::wake_signal_waiters`] or a stop token.
    Woken,
    /// The timeout elapsed first.
    TimedOut,
}

impl WaitOutcome {
    pub fn event(&self) -> Option<&TimedEvent> {
        match self {
            WaitOutcome::Matched(event) => Some(event),
            _ => None,
        }
    }
}

struct Waiter {
    id: u64,
    signal: MidiSignal,
    notify: Sender<WaitOutcome>,
}

struct Subscriber {
    id: u64,
    sender: Sender<TimedEvent>,
}

struct BusInner {
    // Held for the whole of a publish so fan-out order equals publish order.
    dispatch: Mutex<()>,
    waiters: Mutex<Vec<Waiter>>,
    subscribers: Mutex<Vec<Subscriber>>,
    controls: DashMap<u8, u8>,
    next_id: AtomicU64,
}

/// Shared event bus. Cloning is cheap and yields a handle to the same bus.
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<BusInner>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                dispatch: Mutex::new(()),
                waiters: Mutex::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
                controls: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Stamps `message` with the current clock time and publishes it.
    pub fn send(&self, message: MidiMessage) -> TimedEvent {
        let event = TimedEvent::new(clock::now(), message);
        self.publish(event);
        event
    }

    /// Publishes an already stamped event to control values, waiters and subscribers.
    pub fn publish(&self, event: TimedEvent) {
        let _order = self.inner.dispatch.lock();

        if let MidiMessage::ControlChange { control, value, .. } = event.message {
            let previous = self.inner.controls.insert(control, value);
            if previous != Some(value) {
                debug!(control, value, "Control change");
            }
        }

        {
            let mut waiters = self.inner.waiters.lock();
            waiters.retain(|waiter| {
                if waiter.signal.matches(&event.message) {
                    let _ = waiter.notify.try_send(WaitOutcome::Matched(event));
                    false
                } else {
                    true
                }
            });
        }

        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|sub| sub.sender.send(event).is_ok());
    }

    /// Most recent value seen for `control`, or `None` if it was never received.
    pub fn control_value(&self, control: u8) -> Option<u8> {
        self.inner.controls.get(&control).map(|v| *v)
    }

    fn register_waiter(&self, signal: MidiSignal) -> (u64, Receiver<WaitOutcome>) {
        let (notify, receiver) = bounded(1);
        let id = self.next_id();
        self.inner.waiters.lock().push(Waiter { id, signal, notify });
        (id, receiver)
    }

    fn remove_waiter(&self, id: u64) {
        self.inner.waiters.lock().retain(|w| w.id != id);
    }

    /// Blocks until an event matching `signal` is published or the waiter is
    /// woken. Callers that can be cancelled must re-check their stop flag
    /// after a [`WaitOutcome::Woken`].
    pub fn wait_for(&self, signal: &MidiSignal) -> WaitOutcome {
        let (_, receiver) = self.register_waiter(*signal);
        receiver.recv().unwrap_or(WaitOutcome::Woken)
    }

    /// Like [`wait_for`](Self::wait_for), giving up after `timeout`.
    pub fn wait_for_timeout(&self, signal: &MidiSignal, timeout: Duration) -> WaitOutcome {
        let (id, receiver) = self.register_waiter(*signal);
        match receiver.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                self.remove_waiter(id);
                // A publish may have raced the timeout.
                receiver.try_recv().unwrap_or(WaitOutcome::TimedOut)
            }
            Err(RecvTimeoutError::Disconnected) => WaitOutcome::Woken,
        }
    }

    /// Like [`wait_for`](Self::wait_for), also returning [`WaitOutcome::Woken`]
    /// as soon as `stop` is stopped.
    pub fn wait_for_until(&self, signal: &MidiSignal, stop: &StopToken) -> WaitOutcome {
        if stop.is_stopped() {
            return WaitOutcome::Woken;
        }
        let (id, receiver) = self.register_waiter(*signal);
        select! {
            recv(receiver) -> outcome => outcome.unwrap_or(WaitOutcome::Woken),
            recv(stop.receiver()) -> _ => {
                self.remove_waiter(id);
                WaitOutcome::Woken
            }
        }
    }

    /// Releases waiters blocked on `signal`, or every waiter when `None`.
    pub fn wake_signal_waiters(&self, signal: Option<&MidiSignal>) {
        let mut waiters = self.inner.waiters.lock();
        waiters.retain(|waiter| {
            let wake = signal.map_or(true, |s| *s == waiter.signal);
            if wake {
                let _ = waiter.notify.try_send(WaitOutcome::Woken);
            }
            !wake
        });
    }

    /// Number of blocked waiters.
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.lock().len()
    }

    /// Opens a stream of every event published from now on.
    pub fn subscribe(&self) -> BusSubscription {
        let (sender, receiver) = unbounded();
        let id = self.next_id();
        self.inner
            .subscribers
            .lock()
            .push(Subscriber { id, sender });
        BusSubscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of [`SignalBus::subscribe`]. Unsubscribes on drop.
pub struct BusSubscription {
    id: u64,
    receiver: Receiver<TimedEvent>,
    bus: Weak<BusInner>,
}

impl BusSubscription {
    pub fn receiver(&self) -> &Receiver<TimedEvent> {
        &self.receiver
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.lock().retain(|s| s.id != self.id);
        }
    }
}
