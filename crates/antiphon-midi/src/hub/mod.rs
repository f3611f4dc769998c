//! The MIDI hub: one handle over the signal bus, output queue, passthrough,
//! captures, playbacks and the metronome.
//!
//! # Example
//!
//! ```
//! use antiphon_midi::{MidiHub, MidiMessage, Texture};
//!
//! let hub = MidiHub::builder()
//!     .texture(Texture::Monophonic)
//!     .passthrough(false)
//!     .build()
//!     .unwrap();
//!
//! hub.receive(MidiMessage::control_change(0, 7, 100));
//! assert_eq!(hub.control_value(7), Some(100));
//! ```

mod builder;
mod router;

pub use builder::MidiHubBuilder;
pub(crate) use router::InputRouter;

use crate::bus::{SignalBus, WaitOutcome};
use crate::capture::{CaptureOptions, CaptureSession};
use crate::config::HubConfig;
use crate::error::{Error, Result};
use crate::event::{MidiMessage, TimedEvent};
use crate::metronome::Metronome;
use crate::output::{OutputConsumer, OutputProducer};
use crate::playback::{PlaybackOptions, PlaybackSession};
use crate::signal::MidiSignal;
use antiphon_core::{clock, Phrase, StopToken};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "midi-io")]
use crate::io::{MidiInputDevice, MidiInputManager, MidiOutputDevice, MidiOutputManager};

/// Cheap to clone; every clone drives the same hub.
#[derive(Clone)]
pub struct MidiHub {
    inner: Arc<MidiHubInner>,
}

pub(crate) struct MidiHubInner {
    config: HubConfig,
    router: Arc<InputRouter>,
    bus: SignalBus,
    output: OutputProducer,
    consumer: OutputConsumer,
    metronome: Mutex<Option<Metronome>>,
    #[cfg(feature = "midi-io")]
    input_manager: Option<MidiInputManager>,
    #[cfg(feature = "midi-io")]
    output_manager: Option<MidiOutputManager>,
}

impl MidiHub {
    pub fn builder() -> MidiHubBuilder {
        MidiHubBuilder::default()
    }

    pub fn new(config: HubConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub(crate) fn from_inner(inner: MidiHubInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &SignalBus {
        &self.inner.bus
    }

    // ==================== Input ====================

    /// Feeds one incoming message through the hub as if it arrived from a
    /// device. Returns the stamped event, or `None` for filtered messages.
    pub fn receive(&self, message: MidiMessage) -> Option<TimedEvent> {
        self.inner.router.receive(message)
    }

    pub fn receive_bytes(&self, bytes: &[u8]) -> Result<Option<TimedEvent>> {
        Ok(self.receive(MidiMessage::from_bytes(bytes)?))
    }

    pub fn passthrough(&self) -> bool {
        self.inner.router.passthrough()
    }

    pub fn set_passthrough(&self, enabled: bool) {
        self.inner.router.set_passthrough(enabled);
    }

    /// Last value seen for a control number.
    pub fn control_value(&self, control: u8) -> Option<u8> {
        self.inner.bus.control_value(control)
    }

    pub fn wait_for_event(&self, signal: &MidiSignal) -> WaitOutcome {
        self.inner.bus.wait_for(signal)
    }

    pub fn wait_for_event_timeout(&self, signal: &MidiSignal, timeout: Duration) -> WaitOutcome {
        self.inner.bus.wait_for_timeout(signal, timeout)
    }

    /// Blocks until `signal` arrives, the waiter is woken, or `stop` fires.
    pub fn wait_for_event_until(&self, signal: &MidiSignal, stop: &StopToken) -> WaitOutcome {
        self.inner.bus.wait_for_until(signal, stop)
    }

    /// Releases waiters blocked on `signal`, or every waiter with `None`.
    pub fn wake_signal_waiters(&self, signal: Option<&MidiSignal>) {
        self.inner.bus.wake_signal_waiters(signal);
    }

    // ==================== Capture ====================

    /// Starts a capture that runs until stopped, using the hub's texture.
    pub fn start_capture(&self, qpm: f64, start_time: f64) -> Result<CaptureSession> {
        let options = CaptureOptions::new(qpm, start_time).texture(self.inner.config.texture);
        self.start_capture_with(options)
    }

    pub fn start_capture_with(&self, options: CaptureOptions) -> Result<CaptureSession> {
        CaptureSession::start(&self.inner.bus, options)
    }

    /// Blocking capture ending at `stop_time` or at `stop_signal`, whichever
    /// comes first. At least one must be given.
    pub fn capture_sequence(
        &self,
        qpm: f64,
        start_time: f64,
        stop_time: Option<f64>,
        stop_signal: Option<MidiSignal>,
    ) -> Result<Phrase> {
        if stop_time.is_none() && stop_signal.is_none() {
            return Err(Error::InvalidConfig(
                "capture_sequence needs a stop time or a stop signal".to_string(),
            ));
        }
        let mut options = CaptureOptions::new(qpm, start_time).texture(self.inner.config.texture);
        if let Some(signal) = stop_signal {
            options = options.stop_signal(signal);
        }
        if let Some(time) = stop_time {
            options = options.stop_time(time);
        }
        let session = self.start_capture_with(options)?;
        session.join();
        Ok(session.captured_sequence())
    }

    // ==================== Playback ====================

    /// Plays `phrase` on the hub's playback channel and offset. Events before
    /// `start_time` (default now) are skipped.
    pub fn start_playback(
        &self,
        phrase: &Phrase,
        start_time: Option<f64>,
        allow_updates: bool,
    ) -> Result<PlaybackSession> {
        let options = PlaybackOptions::new(start_time.unwrap_or_else(clock::now))
            .allow_updates(allow_updates)
            .channel(self.inner.config.playback_channel)
            .offset(self.inner.config.playback_offset);
        PlaybackSession::start(phrase, self.inner.output.clone(), options)
    }

    // ==================== Metronome ====================

    /// Starts the metronome, or re-aligns it if one is already running.
    pub fn start_metronome(&self, qpm: f64, start_time: f64) -> Result<()> {
        let mut slot = self.inner.metronome.lock();
        if let Some(metronome) = slot.as_ref().filter(|m| !m.is_finished()) {
            debug!(qpm, start_time, "Updating running metronome");
            return metronome.update(qpm, start_time);
        }
        let metronome = Metronome::start(
            qpm,
            start_time,
            self.inner.config.metronome.clone(),
            self.inner.output.clone(),
        )?;
        *slot = Some(metronome);
        Ok(())
    }

    /// Stops the metronome at `stop_time` (now if `None`). No-op when none is running.
    pub fn stop_metronome(&self, stop_time: Option<f64>, block: bool) {
        if block {
            let metronome = self.inner.metronome.lock().take();
            if let Some(metronome) = metronome {
                metronome.stop(stop_time, true);
            }
        } else if let Some(metronome) = self.inner.metronome.lock().as_ref() {
            metronome.stop(stop_time, false);
        }
    }

    pub fn metronome_running(&self) -> bool {
        self.inner
            .metronome
            .lock()
            .as_ref()
            .is_some_and(|m| !m.is_finished())
    }

    // ==================== Output ====================

    /// Sends a control change on the playback channel immediately.
    pub fn send_control_change(&self, control: u8, value: u8) {
        let message =
            MidiMessage::control_change(self.inner.config.playback_channel, control, value);
        self.inner.output.push(clock::now(), message);
    }

    /// The output queue. With device output attached, the device thread also
    /// drains this queue, so read it only when running headless.
    pub fn output(&self) -> OutputConsumer {
        self.inner.consumer.clone()
    }

    pub fn output_producer(&self) -> OutputProducer {
        self.inner.output.clone()
    }

    // ==================== Devices ====================

    #[cfg(feature = "midi-io")]
    pub fn list_input_devices(&self) -> Vec<MidiInputDevice> {
        MidiInputManager::list_devices()
    }

    #[cfg(feature = "midi-io")]
    pub fn list_output_devices(&self) -> Vec<MidiOutputDevice> {
        MidiOutputManager::list_devices()
    }

    #[cfg(feature = "midi-io")]
    pub fn input_manager(&self) -> Option<&MidiInputManager> {
        self.inner.input_manager.as_ref()
    }

    #[cfg(feature = "midi-io")]
    pub fn output_manager(&self) -> Option<&MidiOutputManager> {
        self.inner.output_manager.as_ref()
    }
}

impl std::fmt::Debug for MidiHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiHub")
            .field("config", &self.inner.config)
            .field("passthrough", &self.passthrough())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Texture;
    use antiphon_core::Note;
    use std::thread;

    fn headless() -> MidiHub {
        MidiHub::builder().passthrough(false).build().unwrap()
    }

    #[test]
    fn test_receive_publishes_and_passes_through() {
        let hub = MidiHub::builder().build().unwrap();
        let event = hub.receive(MidiMessage::note_on(0, 60, 90)).unwrap();
        let out = hub.output().drain_all();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message, MidiMessage::note_on(0, 60, 90));
        assert_eq!(out[0].time, event.time);
    }

    #[test]
    fn test_receive_bytes() {
        let hub = headless();
        let event = hub.receive_bytes(&[0xB0, 20, 64]).unwrap().unwrap();
        assert_eq!(event.message, MidiMessage::control_change(0, 20, 64));
        assert_eq!(hub.control_value(20), Some(64));
        assert!(hub.receive_bytes(&[0xF5]).is_err());
    }

    #[test]
    fn test_capture_sequence_requires_stop() {
        let hub = headless();
        assert!(matches!(
            hub.capture_sequence(120.0, 0.0, None, None),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_capture_sequence_by_signal() {
        let hub = headless();
        let feeder = hub.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            feeder.receive(MidiMessage::note_on(0, 60, 100));
            thread::sleep(Duration::from_millis(20));
            feeder.receive(MidiMessage::note_off(0, 60));
            feeder.receive(MidiMessage::control_change(0, 64, 127));
        });

        let phrase = hub
            .capture_sequence(
                120.0,
                clock::now(),
                None,
                Some(MidiSignal::control_change(64)),
            )
            .unwrap();
        worker.join().unwrap();

        assert_eq!(phrase.len(), 1);
        assert_eq!(phrase.notes[0].pitch, 60);
        assert!(phrase.notes[0].end_time > phrase.notes[0].start_time);
    }

    #[test]
    fn test_playback_uses_hub_channel() {
        let hub = MidiHub::builder()
            .passthrough(false)
            .playback_channel(3)
            .build()
            .unwrap();
        let t = clock::now() + 0.02;
        let mut phrase = Phrase::new(120.0);
        phrase.push(Note::new(64, 100, t, t + 0.02));

        let player = hub.start_playback(&phrase, Some(t - 0.01), false).unwrap();
        assert!(player.wait_timeout(Duration::from_secs(2)));

        let out = hub.output().drain_all();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|e| e.message.channel() == Some(3)));
    }

    #[test]
    fn test_metronome_start_twice_updates() {
        let hub = headless();
        hub.start_metronome(600.0, clock::now()).unwrap();
        hub.start_metronome(300.0, clock::now()).unwrap();
        assert!(hub.metronome_running());
        hub.stop_metronome(None, true);
        assert!(!hub.metronome_running());
        // Nothing to stop is fine.
        hub.stop_metronome(None, true);
    }

    #[test]
    fn test_send_control_change() {
        let hub = MidiHub::builder()
            .passthrough(false)
            .playback_channel(2)
            .build()
            .unwrap();
        hub.send_control_change(9, 1);
        let out = hub.output().drain_all();
        assert_eq!(out[0].message, MidiMessage::control_change(2, 9, 1));
    }

    #[test]
    fn test_wait_for_event_woken() {
        let hub = headless();
        let waker = hub.clone();
        let worker = thread::spawn(move || {
            while waker.bus().waiter_count() == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            waker.wake_signal_waiters(None);
        });
        let outcome = hub.wait_for_event(&MidiSignal::note_on());
        worker.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Woken);
    }

    #[test]
    fn test_monophonic_hub_texture_reaches_capture() {
        let hub = MidiHub::builder()
            .passthrough(false)
            .texture(Texture::Monophonic)
            .build()
            .unwrap();
        let capture = hub.start_capture(120.0, clock::now() - 1.0).unwrap();
        hub.receive(MidiMessage::note_on(0, 60, 100));
        hub.receive(MidiMessage::note_on(0, 62, 100));
        thread::sleep(Duration::from_millis(50));
        capture.stop(None);
        let phrase = capture.captured_sequence();
        assert_eq!(phrase.len(), 2);
        assert!(phrase.notes[0].end_time <= phrase.notes[1].start_time);
    }
}
