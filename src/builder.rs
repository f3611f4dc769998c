//! Builder for configuring and constructing an [`Antiphon`] engine.

use crate::{Antiphon, Error, Result};
use antiphon_interaction::{
    CallResponseConfig, ControlMap, ExternalClockConfig, GeneratorSet, Interaction,
    InteractionSettings, SequenceGenerator, Strategy,
};
use antiphon_midi::{HubConfig, MidiHub};

/// A strategy and at least one generator are required.
///
/// # Example
///
/// ```
/// use antiphon::prelude::*;
///
/// let engine = Antiphon::builder()
///     .hub(HubConfig {
///         passthrough: false,
///         ..HubConfig::default()
///     })
///     .qpm(100.0)
///     .call_response(CallResponseConfig::bars(2))
///     .generator(RepeatGenerator::new().transpose(12))
///     .build()
///     .unwrap();
///
/// assert!(!engine.is_running());
/// ```
#[derive(Default)]
pub struct AntiphonBuilder {
    hub_config: HubConfig,
    hub: Option<MidiHub>,
    settings: InteractionSettings,
    strategy: Option<Strategy>,
    generators: GeneratorSet,

    #[cfg(feature = "midi-io")]
    enable_io: bool,
    #[cfg(feature = "midi-io")]
    input_port: Option<String>,
    #[cfg(feature = "midi-io")]
    output_port: Option<String>,
}

impl AntiphonBuilder {
    pub fn hub(mut self, config: HubConfig) -> Self {
        self.hub_config = config;
        self
    }

    /// Uses an existing hub; [`hub`](Self::hub) settings are then ignored.
    pub fn with_hub(mut self, hub: MidiHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn settings(mut self, settings: InteractionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Default: 120
    pub fn qpm(mut self, qpm: f64) -> Self {
        self.settings.qpm = qpm;
        self
    }

    pub fn controls(mut self, controls: ControlMap) -> Self {
        self.settings.controls = controls;
        self
    }

    pub fn call_response(self, config: CallResponseConfig) -> Self {
        self.strategy(config)
    }

    pub fn external_clock(self, config: ExternalClockConfig) -> Self {
        self.strategy(config)
    }

    pub fn strategy(mut self, strategy: impl Into<Strategy>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Adds a generator. More than one requires a `generator_select` control.
    pub fn generator(mut self, generator: impl SequenceGenerator + 'static) -> Self {
        self.generators = self.generators.with(generator);
        self
    }

    pub fn generators(mut self, generators: GeneratorSet) -> Self {
        self.generators = generators;
        self
    }

    #[cfg(feature = "midi-io")]
    pub fn io(mut self) -> Self {
        self.enable_io = true;
        self
    }

    /// Automatically enables device I/O.
    #[cfg(feature = "midi-io")]
    pub fn input_port(mut self, name: impl Into<String>) -> Self {
        self.enable_io = true;
        self.input_port = Some(name.into());
        self
    }

    /// Automatically enables device I/O.
    #[cfg(feature = "midi-io")]
    pub fn output_port(mut self, name: impl Into<String>) -> Self {
        self.enable_io = true;
        self.output_port = Some(name.into());
        self
    }

    fn build_hub(&self) -> Result<MidiHub> {
        if let Some(hub) = &self.hub {
            return Ok(hub.clone());
        }
        #[allow(unused_mut)]
        let mut builder = MidiHub::builder().config(self.hub_config.clone());
        #[cfg(feature = "midi-io")]
        {
            if self.enable_io {
                builder = builder.io();
            }
            if let Some(name) = &self.input_port {
                builder = builder.input_port(name.clone());
            }
            if let Some(name) = &self.output_port {
                builder = builder.output_port(name.clone());
            }
        }
        Ok(builder.build()?)
    }

    pub fn build(self) -> Result<Antiphon> {
        let strategy = self.strategy.clone().ok_or_else(|| {
            Error::InvalidConfig("no interaction strategy configured".to_string())
        })?;
        let hub = self.build_hub()?;

        // Surfaces configuration errors now rather than at start().
        Interaction::new(
            hub.clone(),
            self.generators.clone(),
            self.settings.clone(),
            strategy.clone(),
        )?;

        Ok(Antiphon::new(hub, self.generators, self.settings, strategy))
    }
}
