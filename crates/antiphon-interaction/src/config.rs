//! Interaction configuration.

use crate::error::{Error, Result};
use antiphon_core::{Timebase, DEFAULT_QPM};
use antiphon_midi::MidiSignal;
use serde::{Deserialize, Serialize};

/// Optional control numbers for each tunable. Unmapped tunables use their defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlMap {
    pub generator_select: Option<u8>,
    pub tempo: Option<u8>,
    pub temperature: Option<u8>,
    pub min_listen_ticks: Option<u8>,
    pub max_listen_ticks: Option<u8>,
    pub response_ticks: Option<u8>,
    pub loop_toggle: Option<u8>,
    /// Receives 0, 1 or 2 when the clocked state changes.
    pub state: Option<u8>,
}

impl ControlMap {
    fn entries(&self) -> [(&'static str, Option<u8>); 8] {
        [
            ("generator_select", self.generator_select),
            ("tempo", self.tempo),
            ("temperature", self.temperature),
            ("min_listen_ticks", self.min_listen_ticks),
            ("max_listen_ticks", self.max_listen_ticks),
            ("response_ticks", self.response_ticks),
            ("loop_toggle", self.loop_toggle),
            ("state", self.state),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, control) in self.entries() {
            if let Some(control) = control.filter(|c| *c > 127) {
                return Err(Error::InvalidConfig(format!(
                    "{name} control number {control} out of range 0-127"
                )));
            }
        }
        Ok(())
    }
}

/// Settings shared by both interaction strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionSettings {
    /// Used until a tempo control value arrives.
    pub qpm: f64,
    pub steps_per_quarter: u32,
    pub steps_per_bar: u32,
    pub controls: ControlMap,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            qpm: DEFAULT_QPM,
            steps_per_quarter: 4,
            steps_per_bar: 16,
            controls: ControlMap::default(),
        }
    }
}

impl InteractionSettings {
    pub fn validate(&self) -> Result<()> {
        Timebase::new(self.qpm, self.steps_per_quarter, self.steps_per_bar)?;
        self.controls.validate()
    }
}

/// Bar-counted call and response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallResponseConfig {
    /// Fixed call length. When `None`, the call ends at the bar after `end_call_signal`.
    pub phrase_bars: Option<u32>,
    /// When set, each call waits for this signal before starting.
    pub start_call_signal: Option<MidiSignal>,
    pub end_call_signal: Option<MidiSignal>,
    /// Steps before the call ends at which capture stops and generation begins.
    pub initial_predictahead: u32,
    pub min_predictahead: u32,
    /// Seconds between `run` and the first call.
    pub lead_in: f64,
}

impl Default for CallResponseConfig {
    fn default() -> Self {
        Self {
            phrase_bars: None,
            start_call_signal: None,
            end_call_signal: None,
            initial_predictahead: 4,
            min_predictahead: 1,
            lead_in: 1.0,
        }
    }
}

impl CallResponseConfig {
    pub fn bars(phrase_bars: u32) -> Self {
        Self {
            phrase_bars: Some(phrase_bars),
            ..Self::default()
        }
    }

    pub fn until_signal(end_call_signal: MidiSignal) -> Self {
        Self {
            end_call_signal: Some(end_call_signal),
            ..Self::default()
        }
    }

    pub fn validate(&self, settings: &InteractionSettings) -> Result<()> {
        match (self.phrase_bars, &self.end_call_signal) {
            (None, None) => {
                return Err(Error::InvalidConfig(
                    "either phrase_bars or end_call_signal must be set".to_string(),
                ))
            }
            (Some(0), _) => {
                return Err(Error::InvalidConfig(
                    "phrase_bars must be positive".to_string(),
                ))
            }
            _ => {}
        }
        if self.min_predictahead == 0 {
            return Err(Error::InvalidConfig(
                "min_predictahead must be at least 1 step".to_string(),
            ));
        }
        if self.initial_predictahead < self.min_predictahead {
            return Err(Error::InvalidConfig(format!(
                "initial_predictahead {} below min_predictahead {}",
                self.initial_predictahead, self.min_predictahead
            )));
        }
        if let Some(bars) = self.phrase_bars {
            let call_steps = u64::from(bars) * u64::from(settings.steps_per_bar);
            if call_steps <= u64::from(self.initial_predictahead) {
                return Err(Error::InvalidConfig(format!(
                    "{bars} bar call leaves no capture time before a {} step predictahead",
                    self.initial_predictahead
                )));
            }
        }
        if !(self.lead_in.is_finite() && self.lead_in >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "lead_in {} must be a non-negative number of seconds",
                self.lead_in
            )));
        }
        Ok(())
    }
}

/// Call and response driven by an external clock signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalClockConfig {
    /// Each matching event is one tick.
    pub clock_signal: MidiSignal,
    /// Ends the current call at the next tick.
    pub end_call_signal: Option<MidiSignal>,
    /// Silences the current response at the next tick.
    pub panic_signal: Option<MidiSignal>,
    /// Keep listening while the response plays.
    pub allow_overlap: bool,
}

impl Default for ExternalClockConfig {
    fn default() -> Self {
        Self {
            clock_signal: MidiSignal::clock(),
            end_call_signal: None,
            panic_signal: None,
            allow_overlap: false,
        }
    }
}

impl ExternalClockConfig {
    pub fn new(clock_signal: MidiSignal) -> Self {
        Self {
            clock_signal,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let conflicts = [self.end_call_signal, self.panic_signal]
            .into_iter()
            .flatten()
            .any(|signal| signal == self.clock_signal);
        if conflicts {
            return Err(Error::InvalidConfig(format!(
                "clock signal {} is also used as a trigger",
                self.clock_signal
            )));
        }
        Ok(())
    }
}
