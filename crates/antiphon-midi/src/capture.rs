//! Live capture of incoming notes into a [`Phrase`].
//!
//! A [`CaptureSession`] subscribes to the [`SignalBus`] and compiles note
//! events into a phrase on its own thread. It can be stopped at a scheduled
//! time or by a signal, sampled on demand, sampled once per clock signal via
//! [`CaptureSession::iterate`], or observed through callbacks.

use crate::bus::{BusSubscription, SignalBus};
use crate::config::Texture;
use crate::error::{Error, Result};
use crate::event::{MidiMessage, TimedEvent};
use crate::signal::MidiSignal;
use antiphon_core::{clock, Note, Phrase, StopToken, DRUM_CHANNEL};
use crossbeam_channel::{never, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parameters for a new capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    pub qpm: f64,
    /// Events at or before this time are ignored. Moving the window later
    /// with [`CaptureSession::set_start_time`] only gates notes.
    pub start_time: f64,
    pub stop_time: Option<f64>,
    /// An event matching this signal ends the capture. It is not captured.
    pub stop_signal: Option<MidiSignal>,
    pub texture: Texture,
}

impl CaptureOptions {
    pub fn new(qpm: f64, start_time: f64) -> Self {
        Self {
            qpm,
            start_time,
            stop_time: None,
            stop_signal: None,
            texture: Texture::default(),
        }
    }

    pub fn stop_time(mut self, stop_time: f64) -> Self {
        self.stop_time = Some(stop_time);
        self
    }

    pub fn stop_signal(mut self, signal: MidiSignal) -> Self {
        self.stop_signal = Some(signal);
        self
    }

    pub fn texture(mut self, texture: Texture) -> Self {
        self.texture = texture;
        self
    }
}

/// Handle for cancelling a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type CaptureCallback = Box<dyn FnMut(&Phrase) + Send>;

struct Callback {
    id: CallbackId,
    signal: MidiSignal,
    f: CaptureCallback,
}

struct Iteration {
    // `None` for periodic iterators, which only watch for completion.
    signal: Option<MidiSignal>,
    sender: Sender<Phrase>,
}

struct CaptureState {
    // Open notes carry an infinite end time until they are closed.
    phrase: Phrase,
    open: SmallVec<[u8; 8]>,
    start_time: f64,
    stop_time: Option<f64>,
    final_phrase: Option<Phrase>,
    iterations: Vec<Iteration>,
}

impl CaptureState {
    fn snapshot_at(&self, end_time: f64) -> Phrase {
        let notes = self
            .phrase
            .notes
            .iter()
            .filter(|n| n.start_time < end_time)
            .map(|n| Note {
                end_time: n.end_time.min(end_time),
                ..n.clone()
            })
            .collect();
        Phrase {
            notes,
            total_time: end_time,
            qpm: self.phrase.qpm,
        }
    }

    fn close_note(&mut self, pitch: u8, time: f64) {
        if let Some(note) = self
            .phrase
            .notes
            .iter_mut()
            .rev()
            .find(|n| n.pitch == pitch && n.end_time.is_infinite())
        {
            note.end_time = time.max(note.start_time);
        }
        self.open.retain(|p| *p != pitch);
    }
}

struct CaptureInner {
    state: Mutex<CaptureState>,
    session_start: f64,
    // Lock order: callbacks before state.
    callbacks: Mutex<Vec<Callback>>,
    next_callback: AtomicU64,
    wake: Sender<()>,
    texture: Texture,
    stop_signal: Option<MidiSignal>,
}

impl CaptureInner {
    /// Returns the end time if this event ends the capture.
    fn handle(&self, event: TimedEvent) -> Option<f64> {
        if event.time <= self.session_start {
            return None;
        }
        if self
            .state
            .lock()
            .stop_time
            .is_some_and(|stop| event.time >= stop)
        {
            return None;
        }
        if self
            .stop_signal
            .is_some_and(|signal| signal.matches(&event.message))
        {
            return Some(event.time);
        }
        self.notify(&event);
        self.capture(&event);
        None
    }

    fn notify(&self, event: &TimedEvent) {
        {
            let mut state = self.state.lock();
            let matched = state
                .iterations
                .iter()
                .any(|it| it.signal.is_some_and(|s| s.matches(&event.message)));
            if matched {
                let snapshot = state.snapshot_at(event.time);
                state.iterations.retain(|it| match it.signal {
                    Some(signal) if signal.matches(&event.message) => {
                        it.sender.send(snapshot.clone()).is_ok()
                    }
                    _ => true,
                });
            }
        }

        let mut callbacks = self.callbacks.lock();
        if callbacks.iter().any(|cb| cb.signal.matches(&event.message)) {
            let snapshot = self.state.lock().snapshot_at(event.time);
            for cb in callbacks
                .iter_mut()
                .filter(|cb| cb.signal.matches(&event.message))
            {
                (cb.f)(&snapshot);
            }
        }
    }

    fn capture(&self, event: &TimedEvent) {
        let message = event.message;
        let Some(pitch) = message.note() else {
            return;
        };
        let mut state = self.state.lock();
        // Only notes are gated by the window start.
        if event.time <= state.start_time {
            return;
        }

        if message.is_note_start() {
            match self.texture {
                Texture::Monophonic => {
                    if let Some(&open) = state.open.first() {
                        if open == pitch {
                            return;
                        }
                        state.close_note(open, event.time);
                    }
                }
                Texture::Polyphonic => {
                    if state.open.contains(&pitch) {
                        return;
                    }
                }
            }
            let velocity = match message {
                MidiMessage::NoteOn { velocity, .. } => velocity,
                _ => 0,
            };
            state.phrase.notes.push(Note {
                pitch,
                velocity,
                start_time: event.time,
                end_time: f64::INFINITY,
                is_drum: message.channel() == Some(DRUM_CHANNEL),
                instrument: 0,
                program: 0,
            });
            state.open.push(pitch);
        } else if message.is_note_end() && state.open.contains(&pitch) {
            state.close_note(pitch, event.time);
        }
    }

    /// Handles events already queued before `stop_time`, then returns the end time.
    fn drain_pending(&self, events: &Receiver<TimedEvent>, stop_time: f64) -> f64 {
        while let Ok(event) = events.try_recv() {
            if event.time >= stop_time {
                break;
            }
            if let Some(end) = self.handle(event) {
                return end;
            }
        }
        stop_time
    }

    fn finish(&self, end_time: f64) {
        let mut state = self.state.lock();
        let final_phrase = state.snapshot_at(end_time);
        debug!(
            notes = final_phrase.notes.len(),
            end_time, "Capture finished"
        );
        state.final_phrase = Some(final_phrase);
        state.open.clear();
        // Dropping the senders tells every iterator to yield the final phrase.
        state.iterations.clear();
    }
}

fn run(inner: Arc<CaptureInner>, subscription: BusSubscription, wake: Receiver<()>) {
    let events = subscription.receiver();
    let end_time = loop {
        let stop_time = inner.state.lock().stop_time;
        let timeout = match stop_time {
            Some(stop) => {
                if stop <= clock::now() {
                    break inner.drain_pending(events, stop);
                }
                clock::duration_until(stop).min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };
        let ended = select! {
            recv(events) -> event => match event {
                Ok(event) => inner.handle(event),
                Err(_) => Some(stop_time.unwrap_or_else(clock::now)),
            },
            recv(wake) -> _ => None,
            default(timeout) => None,
        };
        if let Some(end) = ended {
            break end;
        }
    };
    inner.finish(end_time);
}

/// A running capture. Stops and joins its thread on drop.
pub struct CaptureSession {
    inner: Arc<CaptureInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureSession {
    pub fn start(bus: &SignalBus, options: CaptureOptions) -> Result<Self> {
        // Subscribe before spawning so nothing published after `start` returns is missed.
        let subscription = bus.subscribe();
        let (wake, wake_rx) = unbounded();
        let inner = Arc::new(CaptureInner {
            state: Mutex::new(CaptureState {
                phrase: Phrase::new(options.qpm),
                open: SmallVec::new(),
                start_time: options.start_time,
                stop_time: options.stop_time,
                final_phrase: None,
                iterations: Vec::new(),
            }),
            session_start: options.start_time,
            callbacks: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
            wake,
            texture: options.texture,
            stop_signal: options.stop_signal,
        });

        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("antiphon-capture".to_string())
            .spawn(move || run(thread_inner, subscription, wake_rx))
            .map_err(|source| Error::ThreadSpawn {
                name: "capture",
                source,
            })?;

        debug!(
            start_time = options.start_time,
            stop_time = ?options.stop_time,
            "Capture started"
        );

        Ok(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn qpm(&self) -> f64 {
        self.inner.state.lock().phrase.qpm
    }

    pub fn start_time(&self) -> f64 {
        self.inner.state.lock().start_time
    }

    /// Moves the capture window start, dropping notes that began before it.
    /// Iterations and callbacks keep firing for every event after the session start.
    pub fn set_start_time(&self, start_time: f64) {
        let mut state = self.inner.state.lock();
        state.start_time = start_time;
        state.phrase.notes.retain(|n| n.start_time >= start_time);
        state.open = state
            .phrase
            .notes
            .iter()
            .filter(|n| n.end_time.is_infinite())
            .map(|n| n.pitch)
            .collect();
        if let Some(final_phrase) = state.final_phrase.as_mut() {
            final_phrase.notes.retain(|n| n.start_time >= start_time);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().final_phrase.is_some()
    }

    /// Snapshot of the capture so far, with open notes closed at the current time.
    /// After the capture finishes this is the final phrase.
    pub fn captured_sequence(&self) -> Phrase {
        self.captured_sequence_at(clock::now())
    }

    /// Snapshot with open notes closed at, and later notes dropped from, `end_time`.
    /// After the capture finishes this is the final phrase regardless of `end_time`.
    pub fn captured_sequence_at(&self, end_time: f64) -> Phrase {
        let state = self.inner.state.lock();
        match &state.final_phrase {
            Some(final_phrase) => final_phrase.clone(),
            None => state.snapshot_at(end_time),
        }
    }

    /// Calls `f` on the capture thread with a snapshot each time an event
    /// matching `signal` arrives. `f` must not call back into this session.
    pub fn register_callback<F>(&self, signal: MidiSignal, f: F) -> CallbackId
    where
        F: FnMut(&Phrase) + Send + 'static,
    {
        let id = CallbackId(self.inner.next_callback.fetch_add(1, Ordering::Relaxed));
        self.inner.callbacks.lock().push(Callback {
            id,
            signal,
            f: Box::new(f),
        });
        id
    }

    /// Returns `false` if the callback was not registered.
    pub fn cancel_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.inner.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|cb| cb.id != id);
        callbacks.len() != before
    }

    /// One snapshot per event matching `signal`, then the final phrase once the
    /// capture ends.
    pub fn iterate(&self, signal: MidiSignal) -> CaptureIter {
        self.iteration(Some(signal), IterMode::Signal)
    }

    /// One snapshot every `period`, then the final phrase once the capture ends.
    pub fn iterate_every(&self, period: Duration) -> CaptureIter {
        let period = period.as_secs_f64();
        self.iteration(
            None,
            IterMode::Every {
                period,
                next_yield: clock::now() + period,
            },
        )
    }

    fn iteration(&self, signal: Option<MidiSignal>, mode: IterMode) -> CaptureIter {
        let (sender, receiver) = unbounded();
        let mut state = self.inner.state.lock();
        if state.final_phrase.is_none() {
            state.iterations.push(Iteration { signal, sender });
        }
        CaptureIter {
            inner: Arc::clone(&self.inner),
            receiver,
            stop: never(),
            mode,
            done: false,
        }
    }

    /// Schedules the capture to end at `stop_time` (now if `None`) without
    /// blocking. A later request can only bring the stop time earlier.
    pub fn schedule_stop(&self, stop_time: Option<f64>) {
        let requested = stop_time.unwrap_or_else(clock::now);
        {
            let mut state = self.inner.state.lock();
            if state.final_phrase.is_some() {
                return;
            }
            state.stop_time = Some(match state.stop_time {
                Some(existing) => existing.min(requested),
                None => requested,
            });
        }
        let _ = self.inner.wake.send(());
    }

    /// Schedules the stop and blocks until the capture thread has exited.
    /// Must not be called from a capture callback.
    pub fn stop(&self, stop_time: Option<f64>) {
        self.schedule_stop(stop_time);
        self.join();
    }

    /// Blocks until the capture thread has exited.
    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop(None);
    }
}

enum IterMode {
    Signal,
    Every { period: f64, next_yield: f64 },
}

enum Received {
    Snapshot(Phrase),
    Finished,
    Stopped,
}

/// Single-pass sequence of capture snapshots.
pub struct CaptureIter {
    inner: Arc<CaptureInner>,
    receiver: Receiver<Phrase>,
    stop: Receiver<()>,
    mode: IterMode,
    done: bool,
}

impl CaptureIter {
    /// Ends the sequence without a final phrase as soon as `stop` is stopped.
    pub fn until(mut self, stop: &StopToken) -> Self {
        self.stop = stop.receiver().clone();
        self
    }

    fn receive(&mut self) -> Received {
        match &mut self.mode {
            IterMode::Signal => select! {
                recv(self.receiver) -> snapshot => match snapshot {
                    Ok(snapshot) => Received::Snapshot(snapshot),
                    Err(_) => Received::Finished,
                },
                recv(self.stop) -> _ => Received::Stopped,
            },
            IterMode::Every { period, next_yield } => {
                let skipped = ((clock::now() - *next_yield) / *period).floor();
                if skipped > 0.0 {
                    warn!(
                        skipped = skipped as u64,
                        period = *period,
                        "Skipping iteration period(s) to catch up"
                    );
                    *next_yield += skipped * *period;
                }
                let end_time = *next_yield;
                *next_yield += *period;
                select! {
                    recv(self.receiver) -> _ => Received::Finished,
                    recv(self.stop) -> _ => Received::Stopped,
                    default(clock::duration_until(end_time)) => {
                        let state = self.inner.state.lock();
                        match &state.final_phrase {
                            Some(_) => Received::Finished,
                            None => Received::Snapshot(state.snapshot_at(end_time)),
                        }
                    }
                }
            }
        }
    }
}

impl Iterator for CaptureIter {
    type Item = Phrase;

    fn next(&mut self) -> Option<Phrase> {
        if self.done {
            return None;
        }
        match self.receive() {
            Received::Snapshot(snapshot) => Some(snapshot),
            Received::Finished => {
                self.done = true;
                self.inner.state.lock().final_phrase.clone()
            }
            Received::Stopped => {
                self.done = true;
                None
            }
        }
    }
}
