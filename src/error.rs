//! Centralized error type for the antiphon umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] antiphon_core::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] antiphon_midi::Error),

    #[error("Interaction: {0}")]
    Interaction(#[from] antiphon_interaction::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
