//! # Call and Response
//!
//! Two-bar calls answered by the input transposed up a fifth. A background
//! thread plays an arpeggio into the hub and the scheduled output is printed.
//!
//! **Concepts:** Engine setup, fixed-length phrases, headless I/O
//!
//! ```bash
//! cargo run --example call_and_response
//! ```

use antiphon::prelude::*;
use std::thread;
use std::time::Duration;

fn main() -> antiphon::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let engine = Antiphon::builder()
        .hub(HubConfig {
            passthrough: false,
            ..HubConfig::default()
        })
        .qpm(120.0)
        .call_response(CallResponseConfig::bars(2))
        .generator(RepeatGenerator::new().transpose(7))
        .build()?;

    let hub = engine.hub().clone();
    let player = thread::spawn(move || {
        for pitch in [60, 64, 67, 72, 67, 64, 60, 55].into_iter().cycle().take(32) {
            hub.receive(MidiMessage::note_on(0, pitch, 96));
            thread::sleep(Duration::from_millis(240));
            hub.receive(MidiMessage::note_off(0, pitch));
            thread::sleep(Duration::from_millis(10));
        }
    });

    engine.start()?;
    let output = engine.output();
    let start = clock::now();
    while clock::now() - start < 12.0 {
        if let Some(event) = output.recv_timeout(Duration::from_millis(100)) {
            println!("{:>8.3}s  {}", event.time - start, event.message);
        }
    }
    engine.stop()?;
    let _ = player.join();

    Ok(())
}
