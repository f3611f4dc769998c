//! Reading tunables from the latest control-change values.

use crate::config::ControlMap;
use antiphon_midi::MidiHub;

/// Added to the tempo control value to get quarters per minute.
pub const BASE_QPM: f64 = 60.0;

pub const MIN_TEMPERATURE: f64 = 0.1;
pub const MID_TEMPERATURE: f64 = 1.0;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Maps a 7-bit control value onto a temperature.
///
/// 0 gives `min`, 63 and 64 give `mid`, 127 gives `max`; values in between are
/// linear on each side. An unset control gives `mid`.
pub fn temperature_from_control_value(value: Option<u8>, min: f64, mid: f64, max: f64) -> f64 {
    match value {
        None => mid,
        Some(v) if v > 64 => mid + f64::from(v - 64) * (max - mid) / 63.0,
        Some(v) if v < 63 => min + f64::from(v) * (mid - min) / 63.0,
        Some(_) => mid,
    }
}

/// Live view of the mapped controls. Every read reflects the latest value.
#[derive(Debug, Clone)]
pub struct Controls {
    hub: MidiHub,
    map: ControlMap,
    default_qpm: f64,
}

impl Controls {
    pub fn new(hub: MidiHub, map: ControlMap, default_qpm: f64) -> Self {
        Self {
            hub,
            map,
            default_qpm,
        }
    }

    fn value(&self, control: Option<u8>) -> Option<u8> {
        control.and_then(|c| self.hub.control_value(c))
    }

    pub fn map(&self) -> &ControlMap {
        &self.map
    }

    pub fn qpm(&self) -> f64 {
        self.value(self.map.tempo)
            .map_or(self.default_qpm, |v| f64::from(v) + BASE_QPM)
    }

    pub fn temperature(&self) -> f64 {
        temperature_from_control_value(
            self.value(self.map.temperature),
            MIN_TEMPERATURE,
            MID_TEMPERATURE,
            MAX_TEMPERATURE,
        )
    }

    /// Index into the generator set; wrap with the set size.
    pub fn generator_index(&self) -> usize {
        self.value(self.map.generator_select).map_or(0, usize::from)
    }

    pub fn min_listen_ticks(&self) -> u32 {
        self.value(self.map.min_listen_ticks).map_or(0, u32::from)
    }

    /// `None` means unbounded.
    pub fn max_listen_ticks(&self) -> Option<u32> {
        self.value(self.map.max_listen_ticks)
            .filter(|v| *v > 0)
            .map(u32::from)
    }

    /// `None` means the response matches the call length.
    pub fn response_ticks(&self) -> Option<u32> {
        self.value(self.map.response_ticks)
            .filter(|v| *v > 0)
            .map(u32::from)
    }

    pub fn should_loop(&self) -> bool {
        self.value(self.map.loop_toggle) == Some(127)
    }
}
