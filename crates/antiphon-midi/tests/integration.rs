//! Hub-level integration: input through capture, playback with live updates,
//! and metronome output sharing the same queue.

use antiphon_core::{clock, Note, Phrase};
use antiphon_midi::{MidiHub, MidiMessage, MidiSignal, ScheduledEvent};
use std::thread;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn headless() -> MidiHub {
    MidiHub::builder()
        .passthrough(false)
        .build()
        .expect("Failed to build hub")
}

fn note_ons(events: &[ScheduledEvent], pitch: u8) -> usize {
    events
        .iter()
        .filter(|e| e.message.is_note_start() && e.message.note() == Some(pitch))
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_captured_phrase_replays() {
    let hub = headless();
    let feeder = hub.clone();
    let start = clock::now();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        for pitch in [60u8, 64, 67] {
            feeder.receive(MidiMessage::note_on(0, pitch, 100));
            thread::sleep(Duration::from_millis(15));
            feeder.receive(MidiMessage::note_off(0, pitch));
        }
    });

    let captured = hub
        .capture_sequence(120.0, start, Some(start + 0.3), None)
        .unwrap();
    worker.join().unwrap();
    assert_eq!(
        captured.notes.iter().map(|n| n.pitch).collect::<Vec<_>>(),
        vec![60, 64, 67]
    );

    let shift = clock::now() + 0.05 - captured.first_start_time().unwrap();
    let response = captured.retime(shift);
    let player = hub.start_playback(&response, None, false).unwrap();
    assert!(player.wait_timeout(Duration::from_secs(2)));

    let out = hub.output().drain_all();
    let pitches: Vec<u8> = out
        .iter()
        .filter(|e| e.message.is_note_start())
        .filter_map(|e| e.message.note())
        .collect();
    assert_eq!(pitches, vec![60, 64, 67]);
}

#[test]
fn test_overlapping_updates_play_each_note_once() {
    let hub = headless();
    let t = clock::now() + 0.05;

    let mut first = Phrase::new(120.0);
    first.push(Note::new(60, 100, t, t + 0.05));
    first.push(Note::new(62, 100, t + 0.25, t + 0.3));
    let player = hub.start_playback(&first, Some(t - 0.01), true).unwrap();

    thread::sleep(Duration::from_millis(150));
    let mut second = first.clone();
    second.push(Note::new(64, 100, t + 0.3, t + 0.35));
    player.update_sequence(&second, Some(t - 0.01)).unwrap();

    thread::sleep(Duration::from_millis(400));
    player.stop();

    let out = hub.output().drain_all();
    assert_eq!(note_ons(&out, 60), 1);
    assert_eq!(note_ons(&out, 62), 1);
    assert_eq!(note_ons(&out, 64), 1);
}

#[test]
fn test_stop_signal_ends_capture_early() {
    let hub = headless();
    let feeder = hub.clone();
    let start = clock::now();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        feeder.receive(MidiMessage::note_on(0, 48, 90));
        feeder.receive(MidiMessage::control_change(0, 64, 127));
        feeder.receive(MidiMessage::note_on(0, 50, 90));
    });

    let captured = hub
        .capture_sequence(
            120.0,
            start,
            Some(start + 30.0),
            Some(MidiSignal::control_change(64)),
        )
        .unwrap();
    worker.join().unwrap();

    assert!(clock::now() < start + 5.0);
    assert_eq!(captured.notes.iter().map(|n| n.pitch).collect::<Vec<_>>(), vec![48]);
}

#[test]
fn test_metronome_and_playback_share_output() {
    let hub = headless();
    let now = clock::now();
    hub.start_metronome(600.0, now).unwrap();

    let mut phrase = Phrase::new(120.0);
    phrase.push(Note::new(72, 100, now + 0.05, now + 0.1));
    let player = hub.start_playback(&phrase, Some(now), false).unwrap();
    assert!(player.wait_timeout(Duration::from_secs(2)));
    hub.stop_metronome(None, true);

    let out = hub.output().drain_all();
    assert_eq!(note_ons(&out, 72), 1);
    assert!(note_ons(&out, hub.config().metronome.pitch) >= 1);
}
