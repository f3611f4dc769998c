//! Timed playback of a [`Phrase`] with live replacement.
//!
//! The session thread emits each scheduled event onto the output channel when
//! it falls due. [`PlaybackSession::update_sequence`] swaps the schedule in
//! place; note-ons that were already emitted are never emitted again, and
//! notes left sounding by the old schedule are closed.

use crate::error::{Error, Result};
use crate::event::MidiMessage;
use crate::output::OutputProducer;
use antiphon_core::{clock, Phrase};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Parameters for a new playback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackOptions {
    /// Notes starting before this time are not played.
    pub start_time: f64,
    /// Keep the session alive for [`PlaybackSession::update_sequence`].
    pub allow_updates: bool,
    pub channel: u8,
    /// Seconds added to every event time.
    pub offset: f64,
}

impl PlaybackOptions {
    pub fn new(start_time: f64) -> Self {
        Self {
            start_time,
            allow_updates: false,
            channel: 0,
            offset: 0.0,
        }
    }

    pub fn allow_updates(mut self, allow: bool) -> Self {
        self.allow_updates = allow;
        self
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel.min(15);
        self
    }

    pub fn offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scheduled {
    time: f64,
    pitch: u8,
    // `None` for a note-off.
    velocity: Option<u8>,
}

impl Scheduled {
    fn on(time: f64, pitch: u8, velocity: u8) -> Self {
        Self {
            time,
            pitch,
            velocity: Some(velocity),
        }
    }

    fn off(time: f64, pitch: u8) -> Self {
        Self {
            time,
            pitch,
            velocity: None,
        }
    }
}

struct PlayerState {
    queue: VecDeque<Scheduled>,
    open: SmallVec<[u8; 16]>,
    allow_updates: bool,
    stopped: bool,
    finished: bool,
    // Time of the latest emitted note-on and the pitches emitted at exactly that time.
    horizon: f64,
    horizon_pitches: SmallVec<[u8; 8]>,
}

impl PlayerState {
    fn already_emitted(&self, time: f64, pitch: u8) -> bool {
        time < self.horizon || (time == self.horizon && self.horizon_pitches.contains(&pitch))
    }

    fn schedule(&mut self, phrase: &Phrase, start_time: f64, offset: f64) {
        let mut events: Vec<Scheduled> = Vec::with_capacity(phrase.notes.len() * 2);
        // Open pitches the new phrase closes itself.
        let mut closed: SmallVec<[u8; 16]> = SmallVec::new();

        for note in &phrase.notes {
            let on_time = note.start_time + offset;
            let off_time = note.end_time + offset;
            if note.start_time >= start_time && !self.already_emitted(on_time, note.pitch) {
                events.push(Scheduled::on(on_time, note.pitch, note.velocity));
                events.push(Scheduled::off(off_time, note.pitch));
            } else if note.end_time >= start_time && self.open.contains(&note.pitch) {
                events.push(Scheduled::off(off_time, note.pitch));
                closed.push(note.pitch);
            }
        }

        let to_close: SmallVec<[u8; 16]> = self
            .open
            .iter()
            .copied()
            .filter(|p| !closed.contains(p))
            .collect();
        if !to_close.is_empty() {
            let close_time = events
                .iter()
                .map(|e| e.time)
                .reduce(f64::min)
                .unwrap_or_else(clock::now);
            events.extend(to_close.into_iter().map(|p| Scheduled::off(close_time, p)));
        }

        // Note-offs before note-ons at the same instant so retriggers sound.
        events.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then(a.velocity.is_some().cmp(&b.velocity.is_some()))
                .then(a.pitch.cmp(&b.pitch))
        });
        self.queue = events.into();
    }
}

struct PlaybackInner {
    state: Mutex<PlayerState>,
    updated: Condvar,
    output: OutputProducer,
    channel: u8,
    offset: f64,
}

impl PlaybackInner {
    fn emit(&self, state: &mut PlayerState, event: Scheduled) {
        let message = match event.velocity {
            Some(velocity) => {
                if event.time > state.horizon {
                    state.horizon = event.time;
                    state.horizon_pitches.clear();
                }
                state.horizon_pitches.push(event.pitch);
                state.open.push(event.pitch);
                MidiMessage::note_on(self.channel, event.pitch, velocity)
            }
            None => {
                let Some(index) = state.open.iter().position(|p| *p == event.pitch) else {
                    return;
                };
                state.open.remove(index);
                MidiMessage::note_off(self.channel, event.pitch)
            }
        };
        self.output.push(event.time.max(clock::now()), message);
    }

    fn run(&self) {
        let mut state = self.state.lock();
        let now = clock::now();
        while state.queue.front().is_some_and(|e| e.time < now) {
            state.queue.pop_front();
        }

        loop {
            if let Some(next) = state.queue.front().copied() {
                if next.time > clock::now() {
                    let deadline = clock::instant_at(next.time);
                    self.updated.wait_until(&mut state, deadline);
                    continue;
                }
                state.queue.pop_front();
                self.emit(&mut state, next);
                continue;
            }
            if state.stopped || !state.allow_updates {
                break;
            }
            self.updated.wait(&mut state);
        }

        state.finished = true;
        self.updated.notify_all();
    }
}

/// A running playback. Stops and joins its thread on drop.
pub struct PlaybackSession {
    inner: Arc<PlaybackInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSession {
    pub fn start(phrase: &Phrase, output: OutputProducer, options: PlaybackOptions) -> Result<Self> {
        let mut state = PlayerState {
            queue: VecDeque::new(),
            open: SmallVec::new(),
            allow_updates: options.allow_updates,
            stopped: false,
            finished: false,
            horizon: f64::NEG_INFINITY,
            horizon_pitches: SmallVec::new(),
        };
        state.schedule(phrase, options.start_time, options.offset);
        let events = state.queue.len();

        let inner = Arc::new(PlaybackInner {
            state: Mutex::new(state),
            updated: Condvar::new(),
            output,
            channel: options.channel.min(15),
            offset: options.offset,
        });

        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("antiphon-playback".to_string())
            .spawn(move || thread_inner.run())
            .map_err(|source| Error::ThreadSpawn {
                name: "playback",
                source,
            })?;

        debug!(
            events,
            start_time = options.start_time,
            allow_updates = options.allow_updates,
            "Playback started"
        );

        Ok(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Replaces the in-flight phrase. Notes starting before `start_time`
    /// (default: now) are discarded from the new phrase.
    pub fn update_sequence(&self, phrase: &Phrase, start_time: Option<f64>) -> Result<()> {
        let start_time = start_time.unwrap_or_else(clock::now);
        let mut state = self.inner.state.lock();
        if !state.allow_updates || state.stopped {
            return Err(Error::UpdatesDisabled);
        }
        state.schedule(phrase, start_time, self.inner.offset);
        debug!(events = state.queue.len(), start_time, "Playback updated");
        self.inner.updated.notify_all();
        Ok(())
    }

    /// True once the session has emitted its last event and exited.
    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().finished
    }

    /// Scheduled events not yet emitted.
    pub fn pending_events(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Blocks until the session finishes or `timeout` elapses. Returns `true` if finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.finished {
            if self
                .inner
                .updated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.finished;
            }
        }
        true
    }

    /// Halts emission and releases every sounding note, then joins the thread.
    /// No events are emitted after this returns. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.stopped {
                state.stopped = true;
                state.allow_updates = false;
                state.queue.clear();
                let now = clock::now();
                let open = state.open.clone();
                state
                    .queue
                    .extend(open.into_iter().map(|p| Scheduled::off(now, p)));
                self.inner.updated.notify_all();
            }
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Playback thread panicked");
            }
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{output_channel, OutputConsumer};
    use antiphon_core::Note;

    fn phrase(notes: &[(u8, f64, f64)]) -> Phrase {
        let mut phrase = Phrase::new(120.0);
        for &(pitch, start, end) in notes {
            phrase.push(Note::new(pitch, 100, start, end));
        }
        phrase
    }

    fn note_ons(consumer: &OutputConsumer) -> Vec<u8> {
        consumer
            .drain_all()
            .into_iter()
            .filter(|e| e.message.is_note_start())
            .filter_map(|e| e.message.note())
            .collect()
    }

    #[test]
    fn test_plays_phrase_in_order() {
        let (producer, consumer) = output_channel();
        let t = clock::now() + 0.02;
        let p = phrase(&[(62, t + 0.02, t + 0.04), (60, t, t + 0.03)]);
        let session = PlaybackSession::start(&p, producer, PlaybackOptions::new(t)).unwrap();
        assert!(session.wait_timeout(Duration::from_secs(2)));

        let events = consumer.drain_all();
        let messages: Vec<_> = events.iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec![
                MidiMessage::note_on(0, 60, 100),
                MidiMessage::note_on(0, 62, 100),
                MidiMessage::note_off(0, 60),
                MidiMessage::note_off(0, 62),
            ]
        );
        assert!(events.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn test_stale_events_dropped() {
        let (producer, consumer) = output_channel();
        let now = clock::now();
        let p = phrase(&[(60, now - 1.0, now - 0.5), (61, now + 0.01, now + 0.02)]);
        let session =
            PlaybackSession::start(&p, producer, PlaybackOptions::new(now - 2.0)).unwrap();
        assert!(session.wait_timeout(Duration::from_secs(2)));
        assert_eq!(note_ons(&consumer), vec![61]);
    }

    #[test]
    fn test_update_disabled() {
        let (producer, _consumer) = output_channel();
        let session =
            PlaybackSession::start(&Phrase::new(120.0), producer, PlaybackOptions::new(0.0))
                .unwrap();
        assert!(matches!(
            session.update_sequence(&Phrase::new(120.0), None),
            Err(Error::UpdatesDisabled)
        ));
    }

    #[test]
    fn test_channel_and_offset() {
        let (producer, consumer) = output_channel();
        let t = clock::now();
        let p = phrase(&[(60, t + 0.05, t + 0.06)]);
        let options = PlaybackOptions::new(t).channel(5).offset(0.1);
        let session = PlaybackSession::start(&p, producer, options).unwrap();
        assert!(session.wait_timeout(Duration::from_secs(2)));

        let events = consumer.drain_all();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message.channel(), Some(5));
        assert!(events[0].time >= t + 0.15);
    }

    #[test]
    fn test_update_closes_abandoned_notes() {
        let (producer, consumer) = output_channel();
        let t = clock::now() + 0.02;
        let p = phrase(&[(60, t, t + 10.0)]);
        let session =
            PlaybackSession::start(&p, producer, PlaybackOptions::new(t).allow_updates(true))
                .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(note_ons(&consumer), vec![60]);

        let next = phrase(&[(64, t + 0.1, t + 0.11)]);
        session.update_sequence(&next, Some(t)).unwrap();
        thread::sleep(Duration::from_millis(200));

        let messages: Vec<_> = consumer.drain_all().into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec![
                MidiMessage::note_off(0, 60),
                MidiMessage::note_on(0, 64, 100),
                MidiMessage::note_off(0, 64),
            ]
        );
        assert!(!session.is_finished());
        session.stop();
        assert!(session.is_finished());
    }

    #[test]
    fn test_stop_releases_open_notes() {
        let (producer, consumer) = output_channel();
        let t = clock::now() + 0.02;
        let p = phrase(&[(60, t, t + 30.0), (67, t + 20.0, t + 31.0)]);
        let session = PlaybackSession::start(&p, producer, PlaybackOptions::new(t)).unwrap();
        thread::sleep(Duration::from_millis(50));
        session.stop();
        session.stop();

        let messages: Vec<_> = consumer.drain_all().into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec![MidiMessage::note_on(0, 60, 100), MidiMessage::note_off(0, 60)]
        );
        assert!(consumer.drain_all().is_empty());
    }
}
