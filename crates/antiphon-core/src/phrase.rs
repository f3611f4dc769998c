//! Timed note collections.
//!
//! A [`Phrase`] holds notes stamped with absolute clock seconds (or, when
//! handed to a generator, seconds relative to a capture start). Notes are
//! treated as a set; nothing here requires them to be sorted.

use serde::{Deserialize, Serialize};

/// MIDI channel (zero-based) reserved for percussion.
pub const DRUM_CHANNEL: u8 = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub is_drum: bool,
    #[serde(default)]
    pub instrument: u32,
    #[serde(default)]
    pub program: u8,
}

impl Note {
    /// Creates a note. An `end_time` before `start_time` is clamped to it.
    pub fn new(pitch: u8, velocity: u8, start_time: f64, end_time: f64) -> Self {
        Self {
            pitch,
            velocity,
            start_time,
            end_time: end_time.max(start_time),
            is_drum: false,
            instrument: 0,
            program: 0,
        }
    }

    pub fn with_instrument(mut self, instrument: u32) -> Self {
        self.instrument = instrument;
        self
    }

    pub fn drum(mut self) -> Self {
        self.is_drum = true;
        self
    }

    #[inline]
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// A timed collection of notes with a total duration and tempo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    pub notes: Vec<Note>,
    pub total_time: f64,
    pub qpm: f64,
}

impl Phrase {
    pub fn new(qpm: f64) -> Self {
        Self {
            notes: Vec::new(),
            total_time: 0.0,
            qpm,
        }
    }

    /// Adds a note, extending `total_time` to cover it.
    pub fn push(&mut self, note: Note) {
        self.total_time = self.total_time.max(note.end_time);
        self.notes.push(note);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Latest note end time, or `None` for an empty phrase.
    pub fn last_end_time(&self) -> Option<f64> {
        self.notes.iter().map(|n| n.end_time).reduce(f64::max)
    }

    /// Earliest note start time, or `None` for an empty phrase.
    pub fn first_start_time(&self) -> Option<f64> {
        self.notes.iter().map(|n| n.start_time).reduce(f64::min)
    }

    /// Shifts every note and the total time by `delta` seconds.
    pub fn retime(&self, delta: f64) -> Phrase {
        let mut out = self.clone();
        for note in &mut out.notes {
            note.start_time += delta;
            note.end_time += delta;
        }
        out.total_time += delta;
        out
    }

    /// Shifts the phrase so its earliest note starts at `zero_time`.
    pub fn rezero(&self, zero_time: f64) -> Phrase {
        match self.first_start_time() {
            Some(first) => self.retime(zero_time - first),
            None => self.clone(),
        }
    }

    /// Notes starting in `[start, end)`, with end times truncated to `end`.
    ///
    /// Times are not shifted. `total_time` is clamped to `end`.
    pub fn extract_subsequence(&self, start: f64, end: f64) -> Phrase {
        let notes = self
            .notes
            .iter()
            .filter(|n| n.start_time >= start && n.start_time < end)
            .map(|n| Note {
                end_time: n.end_time.min(end),
                ..n.clone()
            })
            .collect();
        Phrase {
            notes,
            total_time: self.total_time.min(end),
            qpm: self.qpm,
        }
    }

    /// Combines the notes of both phrases. Tempo is taken from `self`.
    pub fn merge(&self, other: &Phrase) -> Phrase {
        let mut out = self.clone();
        out.notes.extend(other.notes.iter().cloned());
        out.total_time = self.total_time.max(other.total_time);
        out
    }

    /// Removes notes of `instrument` starting at or after `from_time` and
    /// truncates the ones still sounding at `from_time`.
    pub fn filter_instrument(&self, instrument: u32, from_time: f64) -> Phrase {
        let notes = self
            .notes
            .iter()
            .filter(|n| n.instrument != instrument || n.start_time < from_time)
            .map(|n| {
                let mut note = n.clone();
                if note.instrument == instrument && note.end_time >= from_time {
                    note.end_time = from_time;
                }
                note
            })
            .collect();
        Phrase {
            notes,
            total_time: self.total_time,
            qpm: self.qpm,
        }
    }
}

impl Default for Phrase {
    fn default() -> Self {
        Self::new(crate::DEFAULT_QPM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> Phrase {
        let mut phrase = Phrase::new(120.0);
        phrase.push(Note::new(60, 100, 0.0, 1.0));
        phrase.push(Note::new(62, 90, 0.5, 2.5));
        phrase.push(Note::new(64, 80, 2.0, 3.0));
        phrase
    }

    #[test]
    fn test_push_extends_total_time() {
        let phrase = sample();
        assert_relative_eq!(phrase.total_time, 3.0);
        assert_eq!(phrase.len(), 3);
    }

    #[test]
    fn test_note_end_clamped() {
        let note = Note::new(60, 100, 2.0, 1.0);
        assert_eq!(note.end_time, 2.0);
        assert_eq!(note.duration(), 0.0);
    }

    #[test]
    fn test_extract_subsequence() {
        let sub = sample().extract_subsequence(0.5, 2.0);
        assert_eq!(sub.notes.len(), 1);
        assert_eq!(sub.notes[0].pitch, 62);
        assert_relative_eq!(sub.notes[0].end_time, 2.0);
        assert_relative_eq!(sub.total_time, 2.0);
    }

    #[test]
    fn test_extract_subsequence_keeps_shorter_total() {
        let sub = sample().extract_subsequence(0.0, 10.0);
        assert_eq!(sub.len(), 3);
        assert_relative_eq!(sub.total_time, 3.0);
    }

    #[test]
    fn test_retime_and_rezero() {
        let shifted = sample().retime(10.0);
        assert_relative_eq!(shifted.notes[0].start_time, 10.0);
        assert_relative_eq!(shifted.notes[1].end_time, 12.5);
        assert_relative_eq!(shifted.total_time, 13.0);

        let back = shifted.rezero(0.0);
        assert_relative_eq!(back.notes[0].start_time, 0.0);
        assert_relative_eq!(back.total_time, 3.0);
    }

    #[test]
    fn test_rezero_empty_is_identity() {
        let empty = Phrase::new(90.0);
        assert_eq!(empty.rezero(5.0), empty);
    }

    #[test]
    fn test_last_end_time() {
        assert_eq!(Phrase::new(120.0).last_end_time(), None);
        assert_eq!(sample().last_end_time(), Some(3.0));
        assert_eq!(sample().first_start_time(), Some(0.0));
    }

    #[test]
    fn test_merge() {
        let mut other = Phrase::new(60.0);
        other.push(Note::new(70, 100, 4.0, 5.0));
        let merged = sample().merge(&other);
        assert_eq!(merged.len(), 4);
        assert_relative_eq!(merged.total_time, 5.0);
        assert_relative_eq!(merged.qpm, 120.0);
    }

    #[test]
    fn test_filter_instrument() {
        let mut phrase = Phrase::new(120.0);
        phrase.push(Note::new(60, 100, 0.0, 2.0).with_instrument(1));
        phrase.push(Note::new(62, 100, 1.5, 2.0).with_instrument(1));
        phrase.push(Note::new(64, 100, 1.5, 2.0).with_instrument(0));

        let filtered = phrase.filter_instrument(1, 1.0);
        assert_eq!(filtered.len(), 2);
        assert_relative_eq!(filtered.notes[0].end_time, 1.0);
        assert_eq!(filtered.notes[1].pitch, 64);
    }
}
