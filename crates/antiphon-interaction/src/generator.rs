//! The sequence generator contract.
//!
//! A generator receives the captured call and a set of [`GeneratorOptions`]
//! naming the window to fill, and returns a phrase. Generators are shared
//! behind `Arc` and invoked from a helper thread, so they must be `Send + Sync`.

use crate::error::{Error, Result};
use antiphon_core::{Note, Phrase, StopToken};
use crossbeam_channel::{bounded, select};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::debug;

/// Key under which the controller passes the sampling temperature.
pub const TEMPERATURE_ARG: &str = "temperature";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Generator rejected options: {0}")]
    InvalidOptions(String),

    #[error("{0}")]
    Failed(String),
}

/// A half-open time window `[start_time, end_time)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSection {
    pub start_time: f64,
    pub end_time: f64,
}

impl TimeSection {
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeneratorArg {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for GeneratorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorArg::Float(v) => write!(f, "{v}"),
            GeneratorArg::Int(v) => write!(f, "{v}"),
            GeneratorArg::Bool(v) => write!(f, "{v}"),
            GeneratorArg::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorOptions {
    /// Parts of the input to condition on. Empty means the whole input.
    pub input_sections: Vec<TimeSection>,
    /// Windows to fill with generated notes.
    pub generate_sections: Vec<TimeSection>,
    pub args: BTreeMap<String, GeneratorArg>,
}

impl GeneratorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_section(mut self, start_time: f64, end_time: f64) -> Self {
        self.input_sections.push(TimeSection::new(start_time, end_time));
        self
    }

    pub fn generate_section(mut self, start_time: f64, end_time: f64) -> Self {
        self.generate_sections
            .push(TimeSection::new(start_time, end_time));
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: GeneratorArg) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    pub fn temperature(self, temperature: f64) -> Self {
        self.arg(TEMPERATURE_ARG, GeneratorArg::Float(temperature))
    }

    pub fn float_arg(&self, name: &str) -> Option<f64> {
        match self.args.get(name) {
            Some(GeneratorArg::Float(v)) => Some(*v),
            Some(GeneratorArg::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorDetails {
    pub id: String,
    pub description: String,
}

/// Produces a response phrase from a captured call.
pub trait SequenceGenerator: Send + Sync {
    fn generate(
        &self,
        input: &Phrase,
        options: &GeneratorOptions,
    ) -> std::result::Result<Phrase, GenerationError>;

    fn details(&self) -> GeneratorDetails {
        GeneratorDetails::default()
    }
}

impl<F> SequenceGenerator for F
where
    F: Fn(&Phrase, &GeneratorOptions) -> std::result::Result<Phrase, GenerationError>
        + Send
        + Sync,
{
    fn generate(
        &self,
        input: &Phrase,
        options: &GeneratorOptions,
    ) -> std::result::Result<Phrase, GenerationError> {
        self(input, options)
    }
}

pub type ArcSequenceGenerator = Arc<dyn SequenceGenerator>;

/// The generators an interaction can switch between.
#[derive(Clone, Default)]
pub struct GeneratorSet {
    generators: Vec<ArcSequenceGenerator>,
}

impl GeneratorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(generator: impl SequenceGenerator + 'static) -> Self {
        Self::new().with(generator)
    }

    pub fn with(mut self, generator: impl SequenceGenerator + 'static) -> Self {
        self.generators.push(Arc::new(generator));
        self
    }

    pub fn push(&mut self, generator: ArcSequenceGenerator) {
        self.generators.push(generator);
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Wraps `index` around the set size.
    pub fn get(&self, index: usize) -> Option<&ArcSequenceGenerator> {
        if self.generators.is_empty() {
            return None;
        }
        self.generators.get(index % self.generators.len())
    }
}

impl fmt::Debug for GeneratorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.generators.iter().map(|g| g.details().id))
            .finish()
    }
}

impl From<Vec<ArcSequenceGenerator>> for GeneratorSet {
    fn from(generators: Vec<ArcSequenceGenerator>) -> Self {
        Self { generators }
    }
}

/// Runs `generator` on a helper thread and waits for either its result or
/// `stop`. Returns `Ok(None)` when stopped; a late result is discarded.
pub(crate) fn generate_until(
    generator: ArcSequenceGenerator,
    input: Phrase,
    options: GeneratorOptions,
    stop: &StopToken,
) -> Result<Option<Phrase>> {
    debug!(generator = %generator.details().id, ?options, "Generating");
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("antiphon-generator".to_string())
        .spawn(move || {
            let _ = tx.send(generator.generate(&input, &options));
        })
        .map_err(|source| Error::ThreadSpawn {
            name: "generator",
            source,
        })?;

    select! {
        recv(rx) -> result => match result {
            Ok(generated) => Ok(Some(generated?)),
            Err(_) => Err(GenerationError::Failed("generator panicked".to_string()).into()),
        },
        recv(stop.receiver()) -> _ => Ok(None),
    }
}

/// Answers a call by repeating it into each generate section, transposed by
/// a fixed interval. Useful as a stand-in model and for testing.
#[derive(Debug, Clone, Default)]
pub struct RepeatGenerator {
    transpose: i8,
}

impl RepeatGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transpose(mut self, semitones: i8) -> Self {
        self.transpose = semitones;
        self
    }

    fn shift_pitch(&self, pitch: u8) -> u8 {
        (pitch as i16 + self.transpose as i16).clamp(0, 127) as u8
    }
}

impl SequenceGenerator for RepeatGenerator {
    fn generate(
        &self,
        input: &Phrase,
        options: &GeneratorOptions,
    ) -> std::result::Result<Phrase, GenerationError> {
        let mut output = input.clone();
        let source = match options.input_sections.first() {
            Some(section) => input.extract_subsequence(section.start_time, section.end_time),
            None => input.clone(),
        };
        let Some(source_start) = source.first_start_time() else {
            return Ok(output);
        };

        for section in &options.generate_sections {
            if section.duration() <= 0.0 {
                return Err(GenerationError::InvalidOptions(format!(
                    "empty generate section [{}, {})",
                    section.start_time, section.end_time
                )));
            }
            let shifted = source.retime(section.start_time - source_start);
            for note in shifted
                .extract_subsequence(section.start_time, section.end_time)
                .notes
            {
                output.push(Note {
                    pitch: self.shift_pitch(note.pitch),
                    ..note
                });
            }
        }
        Ok(output)
    }

    fn details(&self) -> GeneratorDetails {
        GeneratorDetails {
            id: "repeat".to_string(),
            description: format!("Repeats the call transposed by {} semitones", self.transpose),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn call() -> Phrase {
        let mut phrase = Phrase::new(120.0);
        phrase.push(Note::new(60, 100, 0.0, 0.5));
        phrase.push(Note::new(64, 100, 0.5, 1.0));
        phrase
    }

    #[test]
    fn test_repeat_fills_generate_section() {
        let options = GeneratorOptions::new().generate_section(2.0, 4.0);
        let out = RepeatGenerator::new()
            .transpose(12)
            .generate(&call(), &options)
            .unwrap();
        let generated = out.extract_subsequence(2.0, 4.0);
        assert_eq!(
            generated.notes.iter().map(|n| n.pitch).collect::<Vec<_>>(),
            vec![72, 76]
        );
        assert_eq!(generated.notes[0].start_time, 2.0);
    }

    #[test]
    fn test_repeat_clips_to_section() {
        let options = GeneratorOptions::new().generate_section(2.0, 2.75);
        let out = RepeatGenerator::new().generate(&call(), &options).unwrap();
        let generated = out.extract_subsequence(2.0, 10.0);
        assert_eq!(generated.len(), 2);
        assert_eq!(generated.notes[1].end_time, 2.75);
    }

    #[test]
    fn test_repeat_rejects_empty_section() {
        let options = GeneratorOptions::new().generate_section(2.0, 2.0);
        assert!(matches!(
            RepeatGenerator::new().generate(&call(), &options),
            Err(GenerationError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_closure_generator_and_set_wraps() {
        let set = GeneratorSet::new()
            .with(
                |input: &Phrase, _: &GeneratorOptions| -> std::result::Result<Phrase, GenerationError> {
                    Ok(input.clone())
                },
            )
            .with(RepeatGenerator::new());
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(3).unwrap().details().id, "repeat");
        assert!(GeneratorSet::new().get(0).is_none());
    }

    #[test]
    fn test_temperature_arg() {
        let options = GeneratorOptions::new().temperature(1.5);
        assert_eq!(options.float_arg(TEMPERATURE_ARG), Some(1.5));
        assert_eq!(options.float_arg("missing"), None);
    }

    #[test]
    fn test_generate_until_returns_result() {
        let generator: ArcSequenceGenerator = Arc::new(RepeatGenerator::new());
        let options = GeneratorOptions::new().generate_section(2.0, 4.0);
        let out = generate_until(generator, call(), options, &StopToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_generate_until_stops_early() {
        let slow = |input: &Phrase, _: &GeneratorOptions| -> std::result::Result<Phrase, GenerationError> {
            thread::sleep(Duration::from_secs(2));
            Ok(input.clone())
        };
        let generator: ArcSequenceGenerator = Arc::new(slow);
        let stop = StopToken::new();
        let stopper = stop.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.stop();
        });

        let started = std::time::Instant::now();
        let out = generate_until(generator, call(), GeneratorOptions::new(), &stop).unwrap();
        waker.join().unwrap();
        assert!(out.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_generation_error_propagates() {
        let failing = |_: &Phrase, _: &GeneratorOptions| -> std::result::Result<Phrase, GenerationError> {
            Err(GenerationError::Failed("model unavailable".to_string()))
        };
        let generator: ArcSequenceGenerator = Arc::new(failing);
        let result = generate_until(generator, call(), GeneratorOptions::new(), &StopToken::new());
        assert!(matches!(result, Err(Error::Generation(_))));
    }
}
