//! Property tests for timebase conversions and phrase window trimming.

use antiphon_core::{Note, Phrase, Timebase};
use proptest::prelude::*;

fn arb_note() -> impl Strategy<Value = Note> {
    (0u8..128, 1u8..128, 0.0f64..100.0, 0.0f64..10.0)
        .prop_map(|(pitch, velocity, start, len)| Note::new(pitch, velocity, start, start + len))
}

fn arb_phrase() -> impl Strategy<Value = Phrase> {
    prop::collection::vec(arb_note(), 0..40).prop_map(|notes| {
        let mut phrase = Phrase::new(120.0);
        for note in notes {
            phrase.push(note);
        }
        phrase
    })
}

proptest! {
    #[test]
    fn steps_seconds_round_trip(
        qpm in 1.0f64..400.0,
        steps_per_quarter in 1u32..16,
        seconds in 0.0f64..10_000.0,
    ) {
        let tb = Timebase::new(qpm, steps_per_quarter, steps_per_quarter * 4).unwrap();
        let back = tb.steps_to_seconds(tb.seconds_to_steps(seconds));
        prop_assert!((back - seconds).abs() <= 1e-9 * seconds.max(1.0));
    }

    #[test]
    fn seconds_steps_round_trip(
        qpm in 1.0f64..400.0,
        steps_per_quarter in 1u32..16,
        steps in 0.0f64..100_000.0,
    ) {
        let tb = Timebase::new(qpm, steps_per_quarter, 16).unwrap();
        let back = tb.seconds_to_steps(tb.steps_to_seconds(steps));
        prop_assert!((back - steps).abs() <= 1e-9 * steps.max(1.0));
    }

    #[test]
    fn extract_subsequence_stays_in_window(
        phrase in arb_phrase(),
        start in 0.0f64..100.0,
        len in 0.0f64..50.0,
    ) {
        let end = start + len;
        let sub = phrase.extract_subsequence(start, end);
        for note in &sub.notes {
            prop_assert!(note.start_time >= start);
            prop_assert!(note.start_time < end);
            prop_assert!(note.end_time <= end);
            prop_assert!(note.end_time >= note.start_time);
        }
        prop_assert!(sub.total_time <= end);
        let expected = phrase
            .notes
            .iter()
            .filter(|n| n.start_time >= start && n.start_time < end)
            .count();
        prop_assert_eq!(sub.len(), expected);
    }

    #[test]
    fn retime_preserves_durations(phrase in arb_phrase(), delta in -50.0f64..50.0) {
        let moved = phrase.retime(delta);
        for (a, b) in phrase.notes.iter().zip(&moved.notes) {
            prop_assert!((a.duration() - b.duration()).abs() < 1e-9);
        }
    }
}
