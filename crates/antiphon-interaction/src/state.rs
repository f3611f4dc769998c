//! Externally-clocked interaction state and its reporting.

use antiphon_midi::MidiHub;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionState {
    Idle,
    Listening,
    Responding,
}

impl InteractionState {
    /// Value sent on the state control number.
    pub fn control_value(self) -> u8 {
        match self {
            InteractionState::Idle => 0,
            InteractionState::Listening => 1,
            InteractionState::Responding => 2,
        }
    }
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InteractionState::Idle => "Idle",
            InteractionState::Listening => "Listening",
            InteractionState::Responding => "Responding",
        })
    }
}

/// Logs state changes and mirrors them to an optional control number.
pub(crate) struct StateReporter {
    hub: MidiHub,
    control: Option<u8>,
    last: Option<InteractionState>,
}

impl StateReporter {
    pub(crate) fn new(hub: MidiHub, control: Option<u8>) -> Self {
        Self {
            hub,
            control,
            last: None,
        }
    }

    /// Returns `true` if the state changed.
    pub(crate) fn report(&mut self, state: InteractionState) -> bool {
        if self.last == Some(state) {
            return false;
        }
        self.last = Some(state);
        info!(%state, "State");
        if let Some(control) = self.control {
            self.hub.send_control_change(control, state.control_value());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use antiphon_midi::MidiMessage;

    #[test]
    fn test_reports_only_changes() {
        let hub = MidiHub::builder().passthrough(false).build().unwrap();
        let mut reporter = StateReporter::new(hub.clone(), Some(20));

        assert!(reporter.report(InteractionState::Listening));
        assert!(!reporter.report(InteractionState::Listening));
        assert!(reporter.report(InteractionState::Responding));

        let sent: Vec<_> = hub.output().drain_all().into_iter().map(|e| e.message).collect();
        assert_eq!(
            sent,
            vec![
                MidiMessage::control_change(0, 20, 1),
                MidiMessage::control_change(0, 20, 2),
            ]
        );
    }

    #[test]
    fn test_unmapped_sends_nothing() {
        let hub = MidiHub::builder().passthrough(false).build().unwrap();
        let mut reporter = StateReporter::new(hub.clone(), None);
        reporter.report(InteractionState::Idle);
        assert!(!hub.output().has_pending());
    }
}
