//! # Clocked Loop
//!
//! The interaction advances on an external clock (CC 100) instead of its own
//! timer. The player noodles for a few ticks, falls silent, and the answer
//! arrives on the next tick. Holding CC 64 at 127 loops the last answer.
//!
//! **Concepts:** External clock, control map, state reporting
//!
//! ```bash
//! cargo run --example clocked_loop
//! ```

use antiphon::prelude::*;
use std::thread;
use std::time::Duration;

const CLOCK_CC: u8 = 100;
const STATE_CC: u8 = 20;
const LOOP_CC: u8 = 64;

fn main() -> antiphon::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let engine = Antiphon::builder()
        .hub(HubConfig {
            passthrough: false,
            ..HubConfig::default()
        })
        .controls(ControlMap {
            state: Some(STATE_CC),
            loop_toggle: Some(LOOP_CC),
            ..ControlMap::default()
        })
        .external_clock(ExternalClockConfig::new(MidiSignal::control_change(
            CLOCK_CC,
        )))
        .generator(RepeatGenerator::new().transpose(-12))
        .build()?;

    let hub = engine.hub().clone();
    let clock_hub = hub.clone();
    let ticker = thread::spawn(move || {
        for _ in 0..12 {
            thread::sleep(Duration::from_millis(500));
            clock_hub.receive(MidiMessage::control_change(0, CLOCK_CC, 127));
        }
    });
    let player = thread::spawn(move || {
        for pitch in [62, 65, 69, 72] {
            hub.receive(MidiMessage::note_on(0, pitch, 90));
            thread::sleep(Duration::from_millis(200));
            hub.receive(MidiMessage::note_off(0, pitch));
        }
        thread::sleep(Duration::from_secs(2));
        hub.receive(MidiMessage::control_change(0, LOOP_CC, 127));
    });

    engine.start()?;
    let output = engine.output();
    let start = clock::now();
    while clock::now() - start < 7.0 {
        if let Some(event) = output.recv_timeout(Duration::from_millis(100)) {
            println!("{:>8.3}s  {}", event.time - start, event.message);
        }
    }
    engine.stop()?;
    let _ = player.join();
    let _ = ticker.join();

    Ok(())
}
