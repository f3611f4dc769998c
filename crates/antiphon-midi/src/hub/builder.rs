//! MidiHub builder.

use std::sync::Arc;

use crate::bus::SignalBus;
use crate::config::{HubConfig, MetronomeConfig, Texture};
use crate::error::Result;
use crate::output::output_channel;
use parking_lot::Mutex;

#[cfg(feature = "midi-io")]
use crate::io::{MidiInputManager, MidiOutputManager};

use super::{InputRouter, MidiHub, MidiHubInner};

#[derive(Default)]
pub struct MidiHubBuilder {
    pub(super) config: HubConfig,
    #[cfg(feature = "midi-io")]
    pub(super) enable_io: bool,
    #[cfg(feature = "midi-io")]
    pub(super) input_port: Option<String>,
    #[cfg(feature = "midi-io")]
    pub(super) output_port: Option<String>,
}

impl MidiHubBuilder {
    /// Replaces every hub setting at once.
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    pub fn texture(mut self, texture: Texture) -> Self {
        self.config.texture = texture;
        self
    }

    pub fn passthrough(mut self, enabled: bool) -> Self {
        self.config.passthrough = enabled;
        self
    }

    pub fn playback_channel(mut self, channel: u8) -> Self {
        self.config.playback_channel = channel;
        self
    }

    pub fn playback_offset(mut self, offset: f64) -> Self {
        self.config.playback_offset = offset;
        self
    }

    pub fn metronome(mut self, metronome: MetronomeConfig) -> Self {
        self.config.metronome = metronome;
        self
    }

    /// Attaches hardware input and output threads.
    #[cfg(feature = "midi-io")]
    pub fn io(mut self) -> Self {
        self.enable_io = true;
        self
    }

    /// Connects input to the first device whose name contains `name`. Implies [`io`](Self::io).
    #[cfg(feature = "midi-io")]
    pub fn input_port(mut self, name: impl Into<String>) -> Self {
        self.enable_io = true;
        self.input_port = Some(name.into());
        self
    }

    /// Connects output to the first device whose name contains `name`. Implies [`io`](Self::io).
    #[cfg(feature = "midi-io")]
    pub fn output_port(mut self, name: impl Into<String>) -> Self {
        self.enable_io = true;
        self.output_port = Some(name.into());
        self
    }

    pub fn build(self) -> Result<MidiHub> {
        self.config.validate()?;

        let bus = SignalBus::new();
        let (output, consumer) = output_channel();
        let router = Arc::new(InputRouter::new(
            bus.clone(),
            output.clone(),
            self.config.texture,
            self.config.passthrough,
        ));

        #[cfg(feature = "midi-io")]
        let (input_manager, output_manager) = if self.enable_io {
            let input = MidiInputManager::new(Arc::clone(&router))?;
            let output = MidiOutputManager::new(consumer.clone())?;
            if let Some(name) = &self.input_port {
                input.connect_by_name(name)?;
            }
            if let Some(name) = &self.output_port {
                output.connect_by_name(name)?;
            }
            (Some(input), Some(output))
        } else {
            (None, None)
        };

        Ok(MidiHub::from_inner(MidiHubInner {
            config: self.config,
            router,
            bus,
            output,
            consumer,
            metronome: Mutex::new(None),
            #[cfg(feature = "midi-io")]
            input_manager,
            #[cfg(feature = "midi-io")]
            output_manager,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_default_build() {
        let hub = MidiHubBuilder::default().build().unwrap();
        assert!(hub.passthrough());
        assert_eq!(hub.config().texture, Texture::Polyphonic);
        assert!(!hub.metronome_running());
    }

    #[test]
    fn test_build_rejects_bad_channel() {
        let result = MidiHubBuilder::default().playback_channel(16).build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_config_then_override() {
        let hub = MidiHubBuilder::default()
            .config(HubConfig {
                playback_offset: 0.25,
                ..HubConfig::default()
            })
            .passthrough(false)
            .build()
            .unwrap();
        assert_eq!(hub.config().playback_offset, 0.25);
        assert!(!hub.passthrough());
    }
}
