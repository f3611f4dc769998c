//! MIDI plumbing for the call-and-response engine.
//!
//! Provides the signal bus, timed capture, scheduled playback with live
//! updates, the metronome, and the [`MidiHub`] facade that ties them together.
//!
//! Feature gates: `midi-io` (hardware devices via midir).

pub mod error;
pub use error::{Error, Result};

mod event;
pub use event::{MidiMessage, TimedEvent};

mod signal;
pub use signal::{MidiSignal, SignalKind};

mod bus;
pub use bus::{BusSubscription, SignalBus, WaitOutcome};

mod output;
pub use output::{output_channel, OutputConsumer, OutputProducer, ScheduledEvent};

mod config;
pub use config::{HubConfig, MetronomeConfig, Texture};

mod capture;
pub use capture::{CallbackId, CaptureIter, CaptureOptions, CaptureSession};

mod playback;
pub use playback::{PlaybackOptions, PlaybackSession};

mod metronome;
pub use metronome::Metronome;

mod hub;
pub use hub::{MidiHub, MidiHubBuilder};

#[cfg(feature = "midi-io")]
mod io;
#[cfg(feature = "midi-io")]
pub use io::{MidiInputDevice, MidiInputManager, MidiOutputDevice, MidiOutputManager};

pub mod prelude {
    pub use crate::{
        CaptureSession, HubConfig, MetronomeConfig, MidiHub, MidiMessage, MidiSignal,
        PlaybackSession, SignalBus, Texture, TimedEvent, WaitOutcome,
    };
}
