//! Incoming message handling: stamping, bus publication and passthrough.

use crate::bus::SignalBus;
use crate::config::Texture;
use crate::event::{MidiMessage, TimedEvent};
use crate::output::OutputProducer;
use antiphon_core::{clock, AtomicFlag};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

/// Shared by the hub and the device input thread.
pub(crate) struct InputRouter {
    bus: SignalBus,
    output: OutputProducer,
    texture: Texture,
    passthrough: AtomicFlag,
    // Pitches opened on the output by passthrough.
    open_notes: Mutex<SmallVec<[u8; 16]>>,
}

impl InputRouter {
    pub(crate) fn new(
        bus: SignalBus,
        output: OutputProducer,
        texture: Texture,
        passthrough: bool,
    ) -> Self {
        Self {
            bus,
            output,
            texture,
            passthrough: AtomicFlag::new(passthrough),
            open_notes: Mutex::new(SmallVec::new()),
        }
    }

    /// Program changes are dropped; everything else is stamped, published and
    /// optionally passed through.
    pub(crate) fn receive(&self, message: MidiMessage) -> Option<TimedEvent> {
        if matches!(message, MidiMessage::ProgramChange { .. }) {
            trace!(%message, "Ignoring program change");
            return None;
        }
        let event = TimedEvent::new(clock::now(), message);
        // Held across publish and passthrough so output order matches input order.
        let mut open = self.open_notes.lock();
        self.bus.publish(event);
        if self.passthrough.get() {
            self.pass_through(&mut open, event);
        }
        Some(event)
    }

    fn pass_through(&self, open: &mut SmallVec<[u8; 16]>, event: TimedEvent) {
        let message = event.message;
        let Some(pitch) = message.note() else {
            self.output.push(event.time, message);
            return;
        };
        match self.texture {
            Texture::Polyphonic => {
                if message.is_note_start() {
                    if !open.contains(&pitch) {
                        open.push(pitch);
                    }
                } else {
                    open.retain(|p| *p != pitch);
                }
                self.output.push(event.time, message);
            }
            Texture::Monophonic => {
                if message.is_note_start() {
                    for previous in open.drain(..) {
                        let channel = message.channel().unwrap_or(0);
                        self.output
                            .push(event.time, MidiMessage::note_off(channel, previous));
                    }
                    open.push(pitch);
                    self.output.push(event.time, message);
                } else if open.contains(&pitch) {
                    open.retain(|p| *p != pitch);
                    self.output.push(event.time, message);
                }
            }
        }
    }

    pub(crate) fn passthrough(&self) -> bool {
        self.passthrough.get()
    }

    /// Disabling passthrough releases every note it left sounding.
    pub(crate) fn set_passthrough(&self, enabled: bool) {
        let mut open = self.open_notes.lock();
        if self.passthrough.get() == enabled {
            return;
        }
        let now = clock::now();
        for pitch in open.drain(..) {
            self.output.push(now, MidiMessage::note_off(0, pitch));
        }
        self.passthrough.set(enabled);
    }
}
