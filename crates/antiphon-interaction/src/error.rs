//! Error types for the interaction controller.

use crate::generator::GenerationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Midi(#[from] antiphon_midi::Error),

    #[error(transparent)]
    Core(#[from] antiphon_core::Error),

    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Interaction thread panicked")]
    ControllerPanicked,
}

pub type Result<T> = std::result::Result<T, Error>;
