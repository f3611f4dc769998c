//! MIDI message model and byte codec.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The subset of MIDI the interaction engine understands.
///
/// Channels are zero-based (0-15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    TimingClock,
    Start,
    Continue,
    Stop,
}

impl MidiMessage {
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        MidiMessage::NoteOn {
            channel: channel.min(15),
            note: note & 0x7F,
            velocity: velocity & 0x7F,
        }
    }

    pub fn note_off(channel: u8, note: u8) -> Self {
        MidiMessage::NoteOff {
            channel: channel.min(15),
            note: note & 0x7F,
            velocity: 0,
        }
    }

    pub fn control_change(channel: u8, control: u8, value: u8) -> Self {
        MidiMessage::ControlChange {
            channel: channel.min(15),
            control: control & 0x7F,
            value: value & 0x7F,
        }
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        MidiMessage::ProgramChange {
            channel: channel.min(15),
            program: program & 0x7F,
        }
    }

    /// Parses a single message from raw bytes. Running status is not supported.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let status = *bytes
            .first()
            .ok_or_else(|| Error::MidiParse("empty message".to_string()))?;
        let data = |i: usize| -> Result<u8> {
            bytes.get(i).map(|b| b & 0x7F).ok_or_else(|| {
                Error::MidiParse(format!("truncated message with status {status:#04x}"))
            })
        };
        let channel = status & 0x0F;
        match status {
            0x80..=0x8F => Ok(MidiMessage::NoteOff {
                channel,
                note: data(1)?,
                velocity: data(2)?,
            }),
            0x90..=0x9F => Ok(MidiMessage::NoteOn {
                channel,
                note: data(1)?,
                velocity: data(2)?,
            }),
            0xB0..=0xBF => Ok(MidiMessage::ControlChange {
                channel,
                control: data(1)?,
                value: data(2)?,
            }),
            0xC0..=0xCF => Ok(MidiMessage::ProgramChange {
                channel,
                program: data(1)?,
            }),
            0xF8 => Ok(MidiMessage::TimingClock),
            0xFA => Ok(MidiMessage::Start),
            0xFB => Ok(MidiMessage::Continue),
            0xFC => Ok(MidiMessage::Stop),
            other => Err(Error::MidiParse(format!(
                "unsupported status byte {other:#04x}"
            ))),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | channel, note, velocity],
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => vec![0x80 | channel, note, velocity],
            MidiMessage::ControlChange {
                channel,
                control,
                value,
            } => vec![0xB0 | channel, control, value],
            MidiMessage::ProgramChange { channel, program } => vec![0xC0 | channel, program],
            MidiMessage::TimingClock => vec![0xF8],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Continue => vec![0xFB],
            MidiMessage::Stop => vec![0xFC],
        }
    }

    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Moves a channel message onto `channel`. System messages are unchanged.
    pub fn with_channel(self, channel: u8) -> Self {
        let channel = channel.min(15);
        match self {
            MidiMessage::NoteOn { note, velocity, .. } => MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            },
            MidiMessage::NoteOff { note, velocity, .. } => MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            },
            MidiMessage::ControlChange { control, value, .. } => MidiMessage::ControlChange {
                channel,
                control,
                value,
            },
            MidiMessage::ProgramChange { program, .. } => {
                MidiMessage::ProgramChange { channel, program }
            }
            other => other,
        }
    }

    /// Note-on with non-zero velocity.
    #[inline]
    pub fn is_note_start(&self) -> bool {
        matches!(self, MidiMessage::NoteOn { velocity, .. } if *velocity > 0)
    }

    /// Note-off, or note-on with zero velocity.
    #[inline]
    pub fn is_note_end(&self) -> bool {
        matches!(
            self,
            MidiMessage::NoteOff { .. } | MidiMessage::NoteOn { velocity: 0, .. }
        )
    }

    pub fn note(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { note, .. } | MidiMessage::NoteOff { note, .. } => Some(note),
            _ => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => write!(f, "note_on channel={channel} note={note} velocity={velocity}"),
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => write!(f, "note_off channel={channel} note={note} velocity={velocity}"),
            MidiMessage::ControlChange {
                channel,
                control,
                value,
            } => write!(f, "control_change channel={channel} control={control} value={value}"),
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "program_change channel={channel} program={program}")
            }
            MidiMessage::TimingClock => f.write_str("clock"),
            MidiMessage::Start => f.write_str("start"),
            MidiMessage::Continue => f.write_str("continue"),
            MidiMessage::Stop => f.write_str("stop"),
        }
    }
}

/// A message stamped with the clock time it was received or is due.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub time: f64,
    pub message: MidiMessage,
}

impl TimedEvent {
    pub fn new(time: f64, message: MidiMessage) -> Self {
        Self { time, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_on() {
        let msg = MidiMessage::from_bytes(&[0x93, 60, 100]).unwrap();
        assert_eq!(msg, MidiMessage::note_on(3, 60, 100));
        assert!(msg.is_note_start());
        assert_eq!(msg.channel(), Some(3));
    }

    #[test]
    fn test_zero_velocity_note_on_ends_note() {
        let msg = MidiMessage::from_bytes(&[0x90, 60, 0]).unwrap();
        assert!(msg.is_note_end());
        assert!(!msg.is_note_start());
    }

    #[test]
    fn test_control_change_bytes() {
        let msg = MidiMessage::control_change(0, 74, 127);
        assert_eq!(msg.to_bytes(), vec![0xB0, 74, 127]);
        assert_eq!(MidiMessage::from_bytes(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_realtime_messages() {
        assert_eq!(
            MidiMessage::from_bytes(&[0xF8]).unwrap(),
            MidiMessage::TimingClock
        );
        assert_eq!(MidiMessage::Stop.to_bytes(), vec![0xFC]);
        assert_eq!(MidiMessage::TimingClock.channel(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            MidiMessage::from_bytes(&[]),
            Err(Error::MidiParse(_))
        ));
        assert!(MidiMessage::from_bytes(&[0x90, 60]).is_err());
        assert!(MidiMessage::from_bytes(&[0xF0, 0x7E, 0xF7]).is_err());
    }

    #[test]
    fn test_with_channel() {
        let msg = MidiMessage::note_on(0, 60, 100).with_channel(20);
        assert_eq!(msg.channel(), Some(15));
        assert_eq!(MidiMessage::Start.with_channel(3), MidiMessage::Start);
    }
}
