//! # Antiphon - Real-time MIDI Call and Response
//!
//! Listens to a player, hands each phrase to a sequence generator, and plays
//! the answer back in time.
//!
//! ## Architecture
//!
//! Antiphon is an umbrella crate that coordinates:
//! - **antiphon-core** - Clock, timebase, phrases, cancellation
//! - **antiphon-midi** - Signal bus, capture, playback, metronome, hub, device I/O
//! - **antiphon-interaction** - Generator contract and the call-and-response controllers
//!
//! ## Quick Start
//!
//! ```no_run
//! use antiphon::prelude::*;
//!
//! let engine = Antiphon::builder()
//!     .qpm(110.0)
//!     .call_response(CallResponseConfig::bars(2))
//!     .generator(RepeatGenerator::new().transpose(7))
//!     .build()?;
//!
//! engine.start()?;
//! // ... play ...
//! engine.stop()?;
//! # Ok::<(), antiphon::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Headless engine; MIDI is fed through [`MidiHub::receive`] and
//!   read from [`Antiphon::output`]
//! - `midi-io` - Hardware MIDI devices via midir

pub mod error;
pub use error::{Error, Result};

/// Re-export of antiphon-core for direct access
pub use antiphon_core as core;
pub use antiphon_core::{clock, Note, Phrase, StopToken, Timebase};

pub use antiphon_midi as midi;
pub use antiphon_midi::{
    HubConfig, MetronomeConfig, MidiHub, MidiHubBuilder, MidiMessage, MidiSignal, Texture,
};

pub use antiphon_interaction as interaction;
pub use antiphon_interaction::{
    CallResponseConfig, ControlMap, ExternalClockConfig, GenerationError, GeneratorOptions,
    GeneratorSet, Interaction, InteractionHandle, InteractionSettings, InteractionState,
    RepeatGenerator, SequenceGenerator, Strategy,
};

mod builder;
mod engine;

pub use builder::AntiphonBuilder;
pub use engine::Antiphon;

/// Convenience prelude for common imports
pub mod prelude {
    // Main engine
    pub use crate::{Antiphon, AntiphonBuilder};

    // Time and phrases
    pub use crate::core::{clock, Note, Phrase, StopToken};

    // MIDI
    pub use crate::midi::{HubConfig, MidiHub, MidiMessage, MidiSignal, Texture};

    // Interaction
    pub use crate::interaction::{
        CallResponseConfig, ControlMap, ExternalClockConfig, GenerationError, GeneratorOptions,
        InteractionSettings, RepeatGenerator, SequenceGenerator,
    };
}
