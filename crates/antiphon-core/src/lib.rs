//! Timing kernel for the Antiphon interaction engine.
//!
//! # Primary API
//!
//! - [`clock`]: process-wide monotonic clock in `f64` seconds
//! - [`Timebase`]: conversions between seconds and musical steps
//! - [`Phrase`] / [`Note`]: timed note collections and window algebra
//! - [`StopToken`]: broadcast cancellation observed by every blocking wait
//!
//! # Example
//!
//! ```
//! use antiphon_core::{Phrase, Note, Timebase};
//!
//! let timebase = Timebase::new(120.0, 4, 16).unwrap();
//! assert_eq!(timebase.seconds_per_step(), 0.125);
//!
//! let mut phrase = Phrase::new(120.0);
//! phrase.push(Note::new(60, 100, 0.0, 0.5));
//! phrase.push(Note::new(62, 100, 1.0, 1.5));
//! let head = phrase.extract_subsequence(0.0, 1.0);
//! assert_eq!(head.notes.len(), 1);
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod clock;

mod timebase;
pub use timebase::{seconds_per_step, Timebase, DEFAULT_QPM};

mod phrase;
pub use phrase::{Note, Phrase, DRUM_CHANNEL};

mod cancel;
pub use cancel::StopToken;

pub(crate) mod lockfree;
pub use lockfree::AtomicFlag;

pub use std::sync::atomic::Ordering;
pub use std::sync::Arc;

pub mod prelude {
    pub use crate::clock;
    pub use crate::{Error, Note, Phrase, Result, StopToken, Timebase};
}
