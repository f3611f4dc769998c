//! Call and response following an external clock.
//!
//! Every clock tick yields a snapshot of the capture so far. [`ClockedCycle`]
//! decides per tick whether the player is idle, still playing its call, or
//! done and owed a response. The runner applies that decision to the capture,
//! generator and player.

use crate::config::ExternalClockConfig;
use crate::error::{Error, Result};
use crate::generator::{generate_until, GeneratorOptions};
use crate::interaction::Interaction;
use crate::state::{InteractionState, StateReporter};
use antiphon_core::{clock, AtomicFlag, Phrase, StopToken};
use std::sync::Arc;
use tracing::{info, warn};

/// Call-length bounds in ticks for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenLimits {
    pub min_listen: u32,
    /// `None` is unbounded.
    pub max_listen: Option<u32>,
}

/// A response to generate for a finished call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePlan {
    /// Absolute time the call window opened.
    pub capture_start: f64,
    pub response_start: f64,
    pub response_end: f64,
    /// The call, shifted so `capture_start` is zero.
    pub input: Phrase,
}

impl ResponsePlan {
    /// Options relative to `capture_start`, matching [`input`](Self::input).
    pub fn options(&self, temperature: f64) -> GeneratorOptions {
        GeneratorOptions::new()
            .input_section(0.0, self.response_start - self.capture_start)
            .generate_section(
                self.response_start - self.capture_start,
                self.response_end - self.capture_start,
            )
            .temperature(temperature)
    }

    /// Moves a generated phrase back to absolute time, trimmed to the response window.
    pub fn anchor(&self, generated: &Phrase) -> Phrase {
        generated
            .retime(self.capture_start)
            .extract_subsequence(self.response_start, self.response_end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    /// Nothing captured. The capture window moves to `window_start` if set.
    Reset { window_start: Option<f64> },
    Listen,
    /// The call was shorter than the minimum and is dropped.
    Skip { window_start: f64, listened: u32 },
    Respond(ResponsePlan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub tick_time: f64,
    /// State to report, if this tick sets one.
    pub state: Option<InteractionState>,
    pub action: TickAction,
}

/// Per-tick call and response state machine.
#[derive(Debug, Clone)]
pub struct ClockedCycle {
    last_tick_time: f64,
    listen_ticks: u32,
    response: Phrase,
    response_start: f64,
}

impl ClockedCycle {
    pub fn new(start_time: f64) -> Self {
        Self {
            last_tick_time: start_time,
            listen_ticks: 0,
            response: Phrase::default(),
            response_start: 0.0,
        }
    }

    pub fn last_tick_time(&self) -> f64 {
        self.last_tick_time
    }

    pub fn listen_ticks(&self) -> u32 {
        self.listen_ticks
    }

    pub fn response(&self) -> &Phrase {
        &self.response
    }

    pub fn response_start(&self) -> f64 {
        self.response_start
    }

    /// `captured` is the snapshot at this tick; its `total_time` is the tick time.
    /// `window_start` is the capture's current start time.
    pub fn on_tick(
        &mut self,
        captured: &Phrase,
        window_start: f64,
        end_call: bool,
        limits: ListenLimits,
        response_ticks: Option<u32>,
    ) -> TickOutcome {
        let tick_time = captured.total_time;
        self.listen_ticks += 1;

        let Some(last_end) = captured.last_end_time() else {
            self.listen_ticks = 0;
            return TickOutcome {
                tick_time,
                state: (self.response.total_time <= tick_time).then_some(InteractionState::Idle),
                action: TickAction::Reset {
                    window_start: (window_start < tick_time).then_some(tick_time),
                },
            };
        };

        let call_ended = end_call
            || last_end <= self.last_tick_time
            || limits
                .max_listen
                .is_some_and(|max| self.listen_ticks >= max);
        if !call_ended {
            return TickOutcome {
                tick_time,
                state: Some(InteractionState::Listening),
                action: TickAction::Listen,
            };
        }

        let listened = std::mem::take(&mut self.listen_ticks);
        if listened < limits.min_listen {
            return TickOutcome {
                tick_time,
                state: None,
                action: TickAction::Skip {
                    window_start: tick_time,
                    listened,
                },
            };
        }

        let tick_length = tick_time - self.last_tick_time;
        // A call that went quiet before the last tick is moved forward one
        // tick so the response follows it without a gap.
        let (call, capture_start) = if last_end <= self.last_tick_time {
            (captured.retime(tick_length), window_start + tick_length)
        } else {
            (captured.clone(), window_start)
        };
        let duration = match response_ticks {
            Some(ticks) => f64::from(ticks) * tick_length,
            None => tick_time - capture_start,
        };

        TickOutcome {
            tick_time,
            state: Some(InteractionState::Responding),
            action: TickAction::Respond(ResponsePlan {
                capture_start,
                response_start: tick_time,
                response_end: tick_time + duration,
                input: call.retime(-capture_start),
            }),
        }
    }

    pub fn set_response(&mut self, response: Phrase, start_time: f64) {
        self.response = response;
        self.response_start = start_time;
    }

    pub fn clear_response(&mut self) {
        self.response = Phrase::new(self.response.qpm);
    }

    /// Shifts a finished response to restart at `tick_time`. Returns the
    /// shifted phrase, or `None` if the response is empty or still playing.
    pub fn loop_response(&mut self, tick_time: f64) -> Option<&Phrase> {
        if self.response.is_empty() || self.response.total_time > tick_time {
            return None;
        }
        self.response = self.response.retime(tick_time - self.response_start);
        self.response_start = tick_time;
        Some(&self.response)
    }

    pub fn finish_tick(&mut self, tick_time: f64) {
        self.last_tick_time = tick_time;
    }
}

pub(crate) fn run(
    interaction: &Interaction,
    config: &ExternalClockConfig,
    stop: &StopToken,
) -> Result<()> {
    let hub = interaction.hub();
    let controls = interaction.controls();

    let captor = hub.start_capture(controls.qpm(), clock::now())?;
    let end_call = Arc::new(AtomicFlag::new(false));
    let panic = Arc::new(AtomicFlag::new(false));
    if let Some(signal) = config.end_call_signal {
        let flag = Arc::clone(&end_call);
        captor.register_callback(signal, move |_| {
            flag.set(true);
            info!("End call signal received");
        });
    }
    if let Some(signal) = config.panic_signal {
        let flag = Arc::clone(&panic);
        captor.register_callback(signal, move |_| {
            flag.set(true);
            info!("Panic signal received");
        });
    }

    let mut cycle = ClockedCycle::new(clock::now());
    let mut reporter = StateReporter::new(hub.clone(), controls.map().state);
    let player = hub.start_playback(cycle.response(), None, true)?;

    for mut captured in captor.iterate(config.clock_signal).until(stop) {
        if stop.is_stopped() {
            break;
        }
        if panic.take() {
            cycle.clear_response();
            player.update_sequence(cycle.response(), None)?;
        }
        captured.qpm = controls.qpm();

        let limits = ListenLimits {
            min_listen: controls.min_listen_ticks(),
            max_listen: controls.max_listen_ticks(),
        };
        let outcome = cycle.on_tick(
            &captured,
            captor.start_time(),
            end_call.get(),
            limits,
            controls.response_ticks(),
        );
        if let Some(state) = outcome.state {
            reporter.report(state);
        }

        match outcome.action {
            TickAction::Listen => {}
            TickAction::Reset { window_start } => {
                if let Some(start) = window_start {
                    captor.set_start_time(start);
                }
                end_call.set(false);
            }
            TickAction::Skip {
                window_start,
                listened,
            } => {
                info!(
                    listened,
                    min = limits.min_listen,
                    "Input too short, skipping"
                );
                captor.set_start_time(window_start);
                end_call.set(false);
            }
            TickAction::Respond(plan) => {
                let generator = interaction.generator()?;
                info!(
                    generator = %generator.details().id,
                    start = plan.response_start,
                    end = plan.response_end,
                    "Generating response"
                );
                let options = plan.options(controls.temperature());
                match generate_until(generator, plan.input.clone(), options, stop) {
                    Ok(Some(generated)) => {
                        let response = plan.anchor(&generated);
                        player.update_sequence(&response, Some(plan.response_start))?;
                        cycle.set_response(response, plan.response_start);
                    }
                    Ok(None) => break,
                    Err(Error::Generation(e)) => {
                        warn!("Generation failed, keeping previous response: {e}");
                    }
                    Err(e) => return Err(e),
                }
                let window_start = if config.allow_overlap {
                    plan.response_start
                } else {
                    plan.response_end
                };
                captor.set_start_time(window_start);
                end_call.set(false);
            }
        }

        if controls.should_loop() {
            let start = outcome.tick_time;
            if let Some(response) = cycle.loop_response(start) {
                player.update_sequence(response, Some(start))?;
            }
        }
        cycle.finish_tick(outcome.tick_time);
    }

    player.stop();
    captor.stop(None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use antiphon_core::Note;
    use approx::assert_relative_eq;

    fn snapshot(tick_time: f64, notes: &[(f64, f64)]) -> Phrase {
        let mut phrase = Phrase::new(120.0);
        for &(start, end) in notes {
            phrase.push(Note::new(60, 100, start, end.min(tick_time)));
        }
        phrase.total_time = tick_time;
        phrase
    }

    fn limits(min_listen: u32, max_listen: u32) -> ListenLimits {
        ListenLimits {
            min_listen,
            max_listen: Some(max_listen),
        }
    }

    #[test]
    fn test_call_ends_when_last_note_before_previous_tick() {
        let mut cycle = ClockedCycle::new(0.0);
        let mut states = Vec::new();
        for tick in [1.0, 2.0, 3.0] {
            let captured = snapshot(tick, &[(0.5, 1.5)]);
            let outcome = cycle.on_tick(&captured, 0.0, false, limits(1, 10), None);
            states.push(outcome.state);
            cycle.finish_tick(tick);
            if tick == 3.0 {
                let TickAction::Respond(plan) = outcome.action else {
                    panic!("expected a response");
                };
                // Quiet call is moved forward one tick.
                assert_relative_eq!(plan.capture_start, 1.0);
                assert_relative_eq!(plan.response_start, 3.0);
                assert_relative_eq!(plan.response_end, 5.0);
                assert_relative_eq!(plan.input.notes[0].start_time, 0.5);
            }
        }
        assert_eq!(
            states,
            vec![
                Some(InteractionState::Listening),
                Some(InteractionState::Listening),
                Some(InteractionState::Responding),
            ]
        );
    }

    #[test]
    fn test_empty_tick_is_idle_and_moves_window() {
        let mut cycle = ClockedCycle::new(0.0);
        let outcome = cycle.on_tick(&snapshot(1.0, &[]), 0.0, true, limits(0, 10), None);
        assert_eq!(outcome.state, Some(InteractionState::Idle));
        assert_eq!(
            outcome.action,
            TickAction::Reset {
                window_start: Some(1.0)
            }
        );
        assert_eq!(cycle.listen_ticks(), 0);
    }

    #[test]
    fn test_idle_not_reported_while_response_plays() {
        let mut cycle = ClockedCycle::new(0.0);
        let mut response = Phrase::new(120.0);
        response.push(Note::new(60, 100, 1.0, 4.0));
        cycle.set_response(response, 1.0);
        let outcome = cycle.on_tick(&snapshot(2.0, &[]), 2.0, false, limits(0, 10), None);
        assert_eq!(outcome.state, None);
        assert_eq!(outcome.action, TickAction::Reset { window_start: None });
    }

    #[test]
    fn test_short_call_skipped() {
        let mut cycle = ClockedCycle::new(0.0);
        let outcome = cycle.on_tick(&snapshot(1.0, &[(0.2, 0.4)]), 0.0, true, limits(3, 10), None);
        assert_eq!(outcome.state, None);
        assert_eq!(
            outcome.action,
            TickAction::Skip {
                window_start: 1.0,
                listened: 1
            }
        );
    }

    #[test]
    fn test_max_listen_ends_call_with_response_ticks() {
        let mut cycle = ClockedCycle::new(0.0);
        let mut last = None;
        for tick in [1.0, 2.0] {
            let outcome =
                cycle.on_tick(&snapshot(tick, &[(0.1, 10.0)]), 0.0, false, limits(0, 2), Some(4));
            cycle.finish_tick(tick);
            last = Some(outcome);
        }
        let Some(TickOutcome {
            action: TickAction::Respond(plan),
            ..
        }) = last
        else {
            panic!("expected a response");
        };
        assert_relative_eq!(plan.capture_start, 0.0);
        assert_relative_eq!(plan.response_start, 2.0);
        assert_relative_eq!(plan.response_end, 6.0);
    }

    #[test]
    fn test_plan_options_and_anchor() {
        let plan = ResponsePlan {
            capture_start: 10.0,
            response_start: 12.0,
            response_end: 14.0,
            input: Phrase::new(120.0),
        };
        let options = plan.options(0.5);
        assert_eq!(options.input_sections[0].end_time, 2.0);
        assert_eq!(options.generate_sections[0].start_time, 2.0);
        assert_eq!(options.generate_sections[0].end_time, 4.0);

        let mut generated = Phrase::new(120.0);
        generated.push(Note::new(60, 100, 1.0, 1.5));
        generated.push(Note::new(62, 100, 2.5, 5.0));
        let anchored = plan.anchor(&generated);
        assert_eq!(anchored.len(), 1);
        assert_relative_eq!(anchored.notes[0].start_time, 12.5);
        assert_relative_eq!(anchored.notes[0].end_time, 14.0);
    }

    #[test]
    fn test_loop_response_restarts_at_tick() {
        let mut cycle = ClockedCycle::new(0.0);
        assert!(cycle.loop_response(5.0).is_none());

        let mut response = Phrase::new(120.0);
        response.push(Note::new(60, 100, 2.0, 3.0));
        cycle.set_response(response, 2.0);
        assert!(cycle.loop_response(2.5).is_none());

        let looped = cycle.loop_response(4.0).unwrap();
        assert_relative_eq!(looped.notes[0].start_time, 4.0);
        assert_relative_eq!(cycle.response_start(), 4.0);
    }
}
