//! Patterns over MIDI messages.
//!
//! A [`MidiSignal`] names a message kind plus optional qualifiers. Unset
//! qualifiers are wildcards, so `MidiSignal::control_change(64)` matches any
//! value on CC #64 while `MidiSignal::control_change(64).value(127)` only
//! matches a full press.

use crate::event::MidiMessage;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    NoteOn,
    NoteOff,
    ControlChange,
    ProgramChange,
    TimingClock,
    Start,
    Continue,
    Stop,
}

impl SignalKind {
    pub fn of(message: &MidiMessage) -> Self {
        match message {
            MidiMessage::NoteOn { .. } => SignalKind::NoteOn,
            MidiMessage::NoteOff { .. } => SignalKind::NoteOff,
            MidiMessage::ControlChange { .. } => SignalKind::ControlChange,
            MidiMessage::ProgramChange { .. } => SignalKind::ProgramChange,
            MidiMessage::TimingClock => SignalKind::TimingClock,
            MidiMessage::Start => SignalKind::Start,
            MidiMessage::Continue => SignalKind::Continue,
            MidiMessage::Stop => SignalKind::Stop,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SignalKind::NoteOn => "note_on",
            SignalKind::NoteOff => "note_off",
            SignalKind::ControlChange => "control_change",
            SignalKind::ProgramChange => "program_change",
            SignalKind::TimingClock => "clock",
            SignalKind::Start => "start",
            SignalKind::Continue => "continue",
            SignalKind::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MidiSignal {
    pub kind: Option<SignalKind>,
    pub channel: Option<u8>,
    pub note: Option<u8>,
    pub velocity: Option<u8>,
    pub control: Option<u8>,
    pub value: Option<u8>,
}

impl MidiSignal {
    /// Matches every message.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of_kind(kind: SignalKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn control_change(control: u8) -> Self {
        Self {
            kind: Some(SignalKind::ControlChange),
            control: Some(control),
            ..Self::default()
        }
    }

    pub fn note_on() -> Self {
        Self::of_kind(SignalKind::NoteOn)
    }

    pub fn clock() -> Self {
        Self::of_kind(SignalKind::TimingClock)
    }

    /// Matches only `message`, field for field.
    pub fn exact(message: MidiMessage) -> Self {
        let mut signal = Self::of_kind(SignalKind::of(&message));
        match message {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            }
            | MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => {
                signal.channel = Some(channel);
                signal.note = Some(note);
                signal.velocity = Some(velocity);
            }
            MidiMessage::ControlChange {
                channel,
                control,
                value,
            } => {
                signal.channel = Some(channel);
                signal.control = Some(control);
                signal.value = Some(value);
            }
            MidiMessage::ProgramChange { channel, program } => {
                signal.channel = Some(channel);
                signal.value = Some(program);
            }
            _ => {}
        }
        signal
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn note(mut self, note: u8) -> Self {
        self.note = Some(note);
        self
    }

    pub fn velocity(mut self, velocity: u8) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn value(mut self, value: u8) -> Self {
        self.value = Some(value);
        self
    }

    pub fn matches(&self, message: &MidiMessage) -> bool {
        fn field(want: Option<u8>, have: Option<u8>) -> bool {
            match want {
                None => true,
                Some(w) => have == Some(w),
            }
        }

        if let Some(kind) = self.kind {
            if kind != SignalKind::of(message) {
                return false;
            }
        }
        let (note, velocity, control, value) = match *message {
            MidiMessage::NoteOn { note, velocity, .. }
            | MidiMessage::NoteOff { note, velocity, .. } => {
                (Some(note), Some(velocity), None, None)
            }
            MidiMessage::ControlChange { control, value, .. } => {
                (None, None, Some(control), Some(value))
            }
            MidiMessage::ProgramChange { program, .. } => (None, None, None, Some(program)),
            _ => (None, None, None, None),
        };
        field(self.channel, message.channel())
            && field(self.note, note)
            && field(self.velocity, velocity)
            && field(self.control, control)
            && field(self.value, value)
    }
}

impl fmt::Display for MidiSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.map_or("*", |k| k.name()))?;
        let fields = [
            ("channel", self.channel),
            ("note", self.note),
            ("velocity", self.velocity),
            ("control", self.control),
            ("value", self.value),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                write!(f, " {name}={v}")?;
            }
        }
        Ok(())
    }
}
