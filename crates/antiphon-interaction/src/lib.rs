//! Real-time call-and-response interaction between a MIDI hub and sequence
//! generators.
//!
//! Two strategies share one lifecycle:
//!
//! - [`Strategy::CallResponse`]: bar-counted calls on an internal tempo grid,
//!   with an adaptive generation lead ([`PredictaheadTuner`]).
//! - [`Strategy::ExternalClock`]: calls delimited by ticks of an external
//!   clock signal, driven by the [`ClockedCycle`] state machine.
//!
//! # Example
//!
//! ```no_run
//! use antiphon_interaction::{
//!     CallResponseConfig, GeneratorSet, Interaction, InteractionSettings, RepeatGenerator,
//! };
//! use antiphon_midi::MidiHub;
//!
//! let hub = MidiHub::builder().build().unwrap();
//! let interaction = Interaction::new(
//!     hub,
//!     GeneratorSet::single(RepeatGenerator::new().transpose(12)),
//!     InteractionSettings::default(),
//!     CallResponseConfig::bars(2),
//! )
//! .unwrap();
//!
//! let handle = interaction.start().unwrap();
//! // ... play ...
//! handle.stop().unwrap();
//! ```

pub mod error;
pub use error::{Error, Result};

mod generator;
pub use generator::{
    ArcSequenceGenerator, GenerationError, GeneratorArg, GeneratorDetails, GeneratorOptions,
    GeneratorSet, RepeatGenerator, SequenceGenerator, TimeSection, TEMPERATURE_ARG,
};

mod config;
pub use config::{CallResponseConfig, ControlMap, ExternalClockConfig, InteractionSettings};

mod controls;
pub use controls::{
    temperature_from_control_value, Controls, BASE_QPM, MAX_TEMPERATURE, MID_TEMPERATURE,
    MIN_TEMPERATURE,
};

mod state;
pub use state::InteractionState;

mod predictahead;
pub use predictahead::{Adjustment, PredictaheadTuner};

mod call_response;
pub use call_response::{call_steps_until_bar, fixed_call_steps, CyclePlan};

mod external_clock;
pub use external_clock::{ClockedCycle, ListenLimits, ResponsePlan, TickAction, TickOutcome};

mod interaction;
pub use interaction::{Interaction, InteractionHandle, Strategy};
