//! Conversions between wall-clock seconds and musical steps.

use crate::clock;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tempo used when no tempo control has been received.
pub const DEFAULT_QPM: f64 = 120.0;

/// Seconds per step at the given tempo and resolution.
#[inline]
pub fn seconds_per_step(qpm: f64, steps_per_quarter: u32) -> f64 {
    60.0 / (qpm * steps_per_quarter as f64)
}

/// Tempo and grid resolution.
///
/// A `Timebase` is a value: changing tempo produces a new one, so a reading
/// taken with an old timebase is never rewritten by a later tempo change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timebase {
    qpm: f64,
    steps_per_quarter: u32,
    steps_per_bar: u32,
}

impl Timebase {
    pub fn new(qpm: f64, steps_per_quarter: u32, steps_per_bar: u32) -> Result<Self> {
        let timebase = Self {
            qpm,
            steps_per_quarter,
            steps_per_bar,
        };
        timebase.validate()?;
        Ok(timebase)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.qpm.is_finite() && self.qpm > 0.0) {
            return Err(Error::InvalidTempo(self.qpm));
        }
        if self.steps_per_quarter == 0 || self.steps_per_bar == 0 {
            return Err(Error::InvalidTimebase {
                steps_per_quarter: self.steps_per_quarter,
                steps_per_bar: self.steps_per_bar,
            });
        }
        Ok(())
    }

    /// Same grid at a different tempo.
    pub fn with_qpm(&self, qpm: f64) -> Result<Self> {
        Self::new(qpm, self.steps_per_quarter, self.steps_per_bar)
    }

    #[inline]
    pub fn qpm(&self) -> f64 {
        self.qpm
    }

    #[inline]
    pub fn steps_per_quarter(&self) -> u32 {
        self.steps_per_quarter
    }

    #[inline]
    pub fn steps_per_bar(&self) -> u32 {
        self.steps_per_bar
    }

    #[inline]
    pub fn seconds_per_step(&self) -> f64 {
        seconds_per_step(self.qpm, self.steps_per_quarter)
    }

    #[inline]
    pub fn steps_to_seconds(&self, steps: f64) -> f64 {
        steps * self.seconds_per_step()
    }

    #[inline]
    pub fn seconds_to_steps(&self, seconds: f64) -> f64 {
        seconds / self.seconds_per_step()
    }

    #[inline]
    pub fn bars_to_steps(&self, bars: u32) -> u64 {
        bars as u64 * self.steps_per_bar as u64
    }

    /// Current clock time in (fractional) steps since the clock epoch.
    pub fn now_in_steps(&self) -> f64 {
        self.seconds_to_steps(clock::now())
    }

    /// Whole step index containing `seconds`.
    #[inline]
    pub fn step_floor(&self, seconds: f64) -> f64 {
        self.seconds_to_steps(seconds).floor()
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self {
            qpm: DEFAULT_QPM,
            steps_per_quarter: 4,
            steps_per_bar: 16,
        }
    }
}
