//! Error types for antiphon-core.

use thiserror::Error;

/// Error type for antiphon-core operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid tempo: {0}. Must be a positive, finite QPM")]
    InvalidTempo(f64),

    #[error("Invalid timebase: steps_per_quarter={steps_per_quarter}, steps_per_bar={steps_per_bar}")]
    InvalidTimebase {
        steps_per_quarter: u32,
        steps_per_bar: u32,
    },

    #[error("Invalid time window: start={start}, end={end}")]
    InvalidWindow { start: f64, end: f64 },
}

pub type Result<T> = std::result::Result<T, Error>;
