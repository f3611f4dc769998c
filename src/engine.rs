//! Antiphon engine: a hub plus a restartable interaction.

use crate::builder::AntiphonBuilder;
use crate::Result;
use antiphon_core::StopToken;
use antiphon_interaction::{
    GeneratorSet, Interaction, InteractionHandle, InteractionSettings, Strategy,
};
use antiphon_midi::{MidiHub, OutputConsumer};
use parking_lot::Mutex;
use tracing::debug;

/// Owns the MIDI hub and runs one interaction at a time on it.
///
/// Each [`start`](Self::start) builds a fresh interaction from the stored
/// configuration, so the engine can be stopped and started again.
pub struct Antiphon {
    hub: MidiHub,
    generators: GeneratorSet,
    settings: InteractionSettings,
    strategy: Strategy,
    running: Mutex<Option<InteractionHandle>>,
}

impl Antiphon {
    pub fn builder() -> AntiphonBuilder {
        AntiphonBuilder::default()
    }

    pub(crate) fn new(
        hub: MidiHub,
        generators: GeneratorSet,
        settings: InteractionSettings,
        strategy: Strategy,
    ) -> Self {
        Self {
            hub,
            generators,
            settings,
            strategy,
            running: Mutex::new(None),
        }
    }

    fn interaction(&self) -> Result<Interaction> {
        Ok(Interaction::new(
            self.hub.clone(),
            self.generators.clone(),
            self.settings.clone(),
            self.strategy.clone(),
        )?)
    }

    /// Starts the interaction on its own thread. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Interaction already running");
            return Ok(());
        }
        if let Some(finished) = running.take() {
            finished.stop()?;
        }
        *running = Some(self.interaction()?.start()?);
        Ok(())
    }

    /// Stops the running interaction and returns how its run ended.
    /// Calling it when nothing runs is a no-op.
    pub fn stop(&self) -> Result<()> {
        let handle = self.running.lock().take();
        match handle {
            Some(handle) => Ok(handle.stop()?),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Runs the interaction on the calling thread until `stop` fires.
    pub fn run(&self, stop: &StopToken) -> Result<()> {
        Ok(self.interaction()?.run(stop)?)
    }

    pub fn hub(&self) -> &MidiHub {
        &self.hub
    }

    /// Scheduled MIDI output for headless use.
    pub fn output(&self) -> OutputConsumer {
        self.hub.output()
    }

    pub fn settings(&self) -> &InteractionSettings {
        &self.settings
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }
}

impl Drop for Antiphon {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Interaction stopped with error: {e}");
        }
    }
}
