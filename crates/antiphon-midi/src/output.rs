//! Scheduled MIDI output.
//!
//! Playback, metronome and passthrough all push onto one channel at the
//! moment an event is due. A device adapter (or a test) drains the other end.

use crate::event::MidiMessage;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A message tagged with its absolute emission time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub time: f64,
    pub message: MidiMessage,
}

/// Producer side. Cheap to clone; shared by every emitting thread.
#[derive(Clone)]
pub struct OutputProducer {
    sender: Sender<ScheduledEvent>,
}

impl OutputProducer {
    /// Returns `false` once every consumer has been dropped.
    #[inline]
    pub fn push(&self, time: f64, message: MidiMessage) -> bool {
        self.sender.send(ScheduledEvent { time, message }).is_ok()
    }
}

/// Consumer side -- drain scheduled events from the output thread.
#[derive(Clone)]
pub struct OutputConsumer {
    receiver: Receiver<ScheduledEvent>,
}

impl OutputConsumer {
    #[inline]
    pub fn pop(&self) -> Option<ScheduledEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ScheduledEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn drain_all(&self) -> Vec<ScheduledEvent> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        !self.receiver.is_empty()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    pub fn receiver(&self) -> &Receiver<ScheduledEvent> {
        &self.receiver
    }
}

pub fn output_channel() -> (OutputProducer, OutputConsumer) {
    let (sender, receiver) = unbounded();
    (OutputProducer { sender }, OutputConsumer { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_drain() {
        let (producer, consumer) = output_channel();
        assert!(!consumer.has_pending());

        producer.push(1.0, MidiMessage::note_on(0, 60, 100));
        producer.push(2.0, MidiMessage::note_off(0, 60));
        assert_eq!(consumer.pending_count(), 2);

        let events = consumer.drain_all();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].time, 1.0);
        assert_eq!(events[1].message, MidiMessage::note_off(0, 60));
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let (producer, consumer) = output_channel();
        drop(consumer);
        assert!(!producer.push(0.0, MidiMessage::Start));
    }

    #[test]
    fn test_multiple_producers() {
        let (producer, consumer) = output_channel();
        let other = producer.clone();
        producer.push(0.0, MidiMessage::Start);
        other.push(0.1, MidiMessage::Stop);
        assert_eq!(consumer.drain_all().len(), 2);
    }
}
