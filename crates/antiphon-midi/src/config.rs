//! Hub and metronome configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Musical texture assumed during capture, passthrough and playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Texture {
    /// At most one sounding note; a new note ends the previous one.
    Monophonic,
    #[default]
    Polyphonic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    pub channel: u8,
    pub pitch: u8,
    pub velocity: u8,
    pub accent_pitch: u8,
    pub accent_velocity: u8,
    /// Accent the first click of every N beats. 0 disables accents.
    pub accent_every: u32,
    /// Clicks per beat; values above 1 subdivide the beat.
    pub clicks_per_beat: u32,
    /// Seconds between a click's note-on and note-off.
    pub tick_duration: f64,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            pitch: 95,
            velocity: 64,
            accent_pitch: 95,
            accent_velocity: 64,
            accent_every: 0,
            clicks_per_beat: 1,
            tick_duration: 0.05,
        }
    }
}

impl MetronomeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel > 15 {
            return Err(Error::InvalidConfig(format!(
                "metronome channel {} out of range 0-15",
                self.channel
            )));
        }
        for (name, value) in [
            ("pitch", self.pitch),
            ("velocity", self.velocity),
            ("accent_pitch", self.accent_pitch),
            ("accent_velocity", self.accent_velocity),
        ] {
            if value > 127 {
                return Err(Error::InvalidConfig(format!(
                    "metronome {name} {value} out of range 0-127"
                )));
            }
        }
        if self.clicks_per_beat == 0 {
            return Err(Error::InvalidConfig(
                "metronome clicks_per_beat must be at least 1".to_string(),
            ));
        }
        if !(self.tick_duration.is_finite() && self.tick_duration >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "metronome tick_duration {} must be non-negative",
                self.tick_duration
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub texture: Texture,
    /// Forward incoming messages to the output, applying texture rules.
    pub passthrough: bool,
    /// Channel every played-back message is moved onto.
    pub playback_channel: u8,
    /// Seconds added to every played-back event time.
    pub playback_offset: f64,
    pub metronome: MetronomeConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            texture: Texture::Polyphonic,
            passthrough: true,
            playback_channel: 0,
            playback_offset: 0.0,
            metronome: MetronomeConfig::default(),
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> Result<()> {
        if self.playback_channel > 15 {
            return Err(Error::InvalidConfig(format!(
                "playback_channel {} out of range 0-15",
                self.playback_channel
            )));
        }
        if !self.playback_offset.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "playback_offset {} must be finite",
                self.playback_offset
            )));
        }
        self.metronome.validate()
    }
}
