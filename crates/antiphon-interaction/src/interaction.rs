//! The interaction controller: strategy selection, run loop and stop handle.

use crate::call_response;
use crate::config::{CallResponseConfig, ExternalClockConfig, InteractionSettings};
use crate::controls::Controls;
use crate::error::{Error, Result};
use crate::external_clock;
use crate::generator::{ArcSequenceGenerator, GeneratorSet};
use antiphon_core::StopToken;
use antiphon_midi::{MidiHub, MidiSignal};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// How calls are delimited.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Bar-counted calls on an internal tempo grid.
    CallResponse(CallResponseConfig),
    /// Calls delimited by ticks of an external clock signal.
    ExternalClock(ExternalClockConfig),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::CallResponse(_) => "call_response",
            Strategy::ExternalClock(_) => "external_clock",
        }
    }

    fn validate(&self, settings: &InteractionSettings) -> Result<()> {
        match self {
            Strategy::CallResponse(config) => config.validate(settings),
            Strategy::ExternalClock(config) => config.validate(),
        }
    }

    /// Signals the controller may block on.
    fn wait_signals(&self) -> Vec<MidiSignal> {
        match self {
            Strategy::CallResponse(config) => [config.start_call_signal, config.end_call_signal]
                .into_iter()
                .flatten()
                .collect(),
            Strategy::ExternalClock(config) => vec![config.clock_signal],
        }
    }
}

impl From<CallResponseConfig> for Strategy {
    fn from(config: CallResponseConfig) -> Self {
        Strategy::CallResponse(config)
    }
}

impl From<ExternalClockConfig> for Strategy {
    fn from(config: ExternalClockConfig) -> Self {
        Strategy::ExternalClock(config)
    }
}

/// A configured interaction between a hub and a set of generators.
pub struct Interaction {
    hub: MidiHub,
    generators: GeneratorSet,
    settings: InteractionSettings,
    controls: Controls,
    strategy: Strategy,
}

impl Interaction {
    /// Validates everything up front; no thread is started.
    pub fn new(
        hub: MidiHub,
        generators: GeneratorSet,
        settings: InteractionSettings,
        strategy: impl Into<Strategy>,
    ) -> Result<Self> {
        let strategy = strategy.into();
        settings.validate()?;
        strategy.validate(&settings)?;
        if generators.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one generator is required".to_string(),
            ));
        }
        if generators.len() > 1 && settings.controls.generator_select.is_none() {
            return Err(Error::InvalidConfig(format!(
                "{} generators need a generator_select control number",
                generators.len()
            )));
        }

        let controls = Controls::new(hub.clone(), settings.controls, settings.qpm);
        Ok(Self {
            hub,
            generators,
            settings,
            controls,
            strategy,
        })
    }

    pub fn hub(&self) -> &MidiHub {
        &self.hub
    }

    pub fn settings(&self) -> &InteractionSettings {
        &self.settings
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// The generator picked by the current selector value.
    pub fn generator(&self) -> Result<ArcSequenceGenerator> {
        let index = if self.generators.len() == 1 {
            0
        } else {
            self.controls.generator_index()
        };
        self.generators
            .get(index)
            .cloned()
            .ok_or_else(|| Error::InvalidConfig("no generators".to_string()))
    }

    /// Runs on the calling thread until `stop` fires or an error ends the loop.
    /// Every session the loop started is stopped before this returns.
    pub fn run(&self, stop: &StopToken) -> Result<()> {
        info!(strategy = self.strategy.name(), "Interaction started");
        let result = match &self.strategy {
            Strategy::CallResponse(config) => call_response::run(self, config, stop),
            Strategy::ExternalClock(config) => external_clock::run(self, config, stop),
        };
        info!(strategy = self.strategy.name(), "Interaction stopped");
        result
    }

    /// Runs on a dedicated thread.
    pub fn start(self) -> Result<InteractionHandle> {
        let stop = StopToken::new();
        let wake = self.strategy.wait_signals();
        let hub = self.hub.clone();

        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("antiphon-interaction".to_string())
            .spawn(move || {
                let result = self.run(&thread_stop);
                if let Err(e) = &result {
                    error!("Interaction exited with error: {e}");
                }
                result
            })
            .map_err(|source| Error::ThreadSpawn {
                name: "interaction",
                source,
            })?;

        Ok(InteractionHandle {
            stop,
            hub,
            wake,
            handle: Mutex::new(Some(handle)),
        })
    }
}

impl std::fmt::Debug for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interaction")
            .field("generators", &self.generators)
            .field("settings", &self.settings)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Handle to a running interaction. Stops it on drop.
pub struct InteractionHandle {
    stop: StopToken,
    hub: MidiHub,
    wake: Vec<MidiSignal>,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl InteractionHandle {
    /// Requests a stop, wakes any blocked waits and joins. Returns the run
    /// result the first time; later calls return `Ok(())`.
    pub fn stop(&self) -> Result<()> {
        self.stop.stop();
        for signal in &self.wake {
            self.hub.wake_signal_waiters(Some(signal));
        }
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle.join().map_err(|_| Error::ControllerPanicked)?,
            None => Ok(()),
        }
    }

    /// True once the interaction thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }
}

impl Drop for InteractionHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Interaction stopped with error: {e}");
        }
    }
}
