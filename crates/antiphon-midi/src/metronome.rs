//! MIDI click track aligned to a beat grid.

use crate::config::MetronomeConfig;
use crate::error::{Error, Result};
use crate::event::MidiMessage;
use crate::output::OutputProducer;
use antiphon_core::clock;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

struct MetronomeState {
    // Seconds between clicks (a beat divided by `clicks_per_beat`).
    period: f64,
    start_time: f64,
    stop_time: Option<f64>,
    finished: bool,
}

impl MetronomeState {
    /// First grid point strictly after `now`, or `start_time` if that is later.
    fn next_click(&self, now: f64) -> f64 {
        let since_start = now - self.start_time;
        let next = now + self.period - since_start.rem_euclid(self.period);
        next.max(self.start_time)
    }

    fn click_index(&self, time: f64) -> i64 {
        ((time - self.start_time) / self.period).round() as i64
    }
}

struct MetronomeInner {
    state: Mutex<MetronomeState>,
    changed: Condvar,
    output: OutputProducer,
    config: MetronomeConfig,
}

impl MetronomeInner {
    fn click_message(&self, index: i64) -> MidiMessage {
        let config = &self.config;
        let clicks_per_beat = config.clicks_per_beat.max(1) as i64;
        let on_beat = index.rem_euclid(clicks_per_beat) == 0;
        let beat = index.div_euclid(clicks_per_beat);
        let accent =
            on_beat && config.accent_every > 0 && beat.rem_euclid(config.accent_every as i64) == 0;
        if accent {
            MidiMessage::note_on(config.channel, config.accent_pitch, config.accent_velocity)
        } else {
            MidiMessage::note_on(config.channel, config.pitch, config.velocity)
        }
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            let next = state.next_click(clock::now());
            if state.stop_time.is_some_and(|stop| stop <= next) {
                break;
            }
            if next > clock::now() {
                // Woken early by an update or stop: recompute.
                if !self
                    .changed
                    .wait_until(&mut state, clock::instant_at(next))
                    .timed_out()
                {
                    continue;
                }
                if state.stop_time.is_some_and(|stop| stop <= next) {
                    break;
                }
            }

            let click = self.click_message(state.click_index(next));
            let pitch = click.note().unwrap_or(self.config.pitch);
            self.output.push(clock::now(), click);

            let release = clock::now() + self.config.tick_duration;
            while clock::now() < release {
                self.changed
                    .wait_until(&mut state, clock::instant_at(release));
            }
            self.output
                .push(clock::now(), MidiMessage::note_off(self.config.channel, pitch));
        }
        state.finished = true;
    }
}

/// A running click track. Stops and joins its thread on drop.
pub struct Metronome {
    inner: Arc<MetronomeInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Metronome {
    pub fn start(
        qpm: f64,
        start_time: f64,
        config: MetronomeConfig,
        output: OutputProducer,
    ) -> Result<Self> {
        config.validate()?;
        let period = Self::period(qpm, &config)?;

        let inner = Arc::new(MetronomeInner {
            state: Mutex::new(MetronomeState {
                period,
                start_time,
                stop_time: None,
                finished: false,
            }),
            changed: Condvar::new(),
            output,
            config,
        });

        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("antiphon-metronome".to_string())
            .spawn(move || thread_inner.run())
            .map_err(|source| Error::ThreadSpawn {
                name: "metronome",
                source,
            })?;

        debug!(qpm, start_time, "Metronome started");

        Ok(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn period(qpm: f64, config: &MetronomeConfig) -> Result<f64> {
        if !(qpm.is_finite() && qpm > 0.0) {
            return Err(antiphon_core::Error::InvalidTempo(qpm).into());
        }
        Ok(60.0 / qpm / config.clicks_per_beat.max(1) as f64)
    }

    /// Re-aligns a running metronome to a new tempo and grid start, clearing
    /// any scheduled stop.
    pub fn update(&self, qpm: f64, start_time: f64) -> Result<()> {
        let period = Self::period(qpm, &self.inner.config)?;
        let mut state = self.inner.state.lock();
        state.period = period;
        state.start_time = start_time;
        state.stop_time = None;
        self.inner.changed.notify_all();
        Ok(())
    }

    /// Stops clicking at `stop_time` (now if `None`). With `block`, waits for
    /// the thread to exit; otherwise the stop is scheduled and this returns at once.
    pub fn stop(&self, stop_time: Option<f64>, block: bool) {
        {
            let mut state = self.inner.state.lock();
            state.stop_time = Some(stop_time.unwrap_or_else(clock::now));
            self.inner.changed.notify_all();
        }
        if block {
            self.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().finished
    }

    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Metronome thread panicked");
            }
        }
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        self.stop(None, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::output_channel;
    use std::time::Duration;

    #[test]
    fn test_next_click_alignment() {
        let state = MetronomeState {
            period: 0.5,
            start_time: 10.0,
            stop_time: None,
            finished: false,
        };
        assert_eq!(state.next_click(5.0), 10.0);
        assert_eq!(state.next_click(10.2), 10.5);
        assert_eq!(state.next_click(10.5), 11.0);
        assert_eq!(state.click_index(11.0), 2);
    }

    #[test]
    fn test_clicks_until_stop_time() {
        let (producer, consumer) = output_channel();
        let start = clock::now() + 0.01;
        // 600 qpm: a click every 100 ms.
        let metronome =
            Metronome::start(600.0, start, MetronomeConfig::default(), producer).unwrap();
        metronome.stop(Some(start + 0.35), true);
        assert!(metronome.is_finished());

        let events = consumer.drain_all();
        let clicks: Vec<_> = events
            .iter()
            .filter(|e| e.message.is_note_start())
            .collect();
        assert_eq!(clicks.len(), 4);
        assert!(clicks
            .iter()
            .all(|e| e.message == MidiMessage::note_on(0, 95, 64)));
        let offs = events.iter().filter(|e| e.message.is_note_end()).count();
        assert_eq!(offs, 4);
    }

    #[test]
    fn test_accent_every() {
        let config = MetronomeConfig {
            accent_every: 4,
            accent_pitch: 100,
            clicks_per_beat: 2,
            ..MetronomeConfig::default()
        };
        let (producer, _consumer) = output_channel();
        let metronome = Metronome::start(120.0, clock::now() + 60.0, config, producer).unwrap();

        assert_eq!(metronome.inner.click_message(0).note(), Some(100));
        assert_eq!(metronome.inner.click_message(1).note(), Some(95));
        assert_eq!(metronome.inner.click_message(2).note(), Some(95));
        assert_eq!(metronome.inner.click_message(8).note(), Some(100));
        metronome.stop(None, true);
    }

    #[test]
    fn test_nonblocking_stop() {
        let (producer, _consumer) = output_channel();
        let metronome = Metronome::start(
            600.0,
            clock::now(),
            MetronomeConfig::default(),
            producer,
        )
        .unwrap();
        metronome.stop(Some(clock::now() + 0.25), false);
        assert!(!metronome.is_finished());
        thread::sleep(Duration::from_millis(500));
        assert!(metronome.is_finished());
    }

    #[test]
    fn test_invalid_tempo() {
        let (producer, _consumer) = output_channel();
        assert!(Metronome::start(0.0, 0.0, MetronomeConfig::default(), producer).is_err());
    }
}
