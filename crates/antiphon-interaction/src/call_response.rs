//! Bar-counted call and response.
//!
//! Each cycle captures a call of whole bars, stops capturing `predictahead`
//! steps early to generate, and plays the response over the same number of
//! bars straight after the call. Time is counted in steps from the clock epoch.

use crate::config::CallResponseConfig;
use crate::error::{Error, Result};
use crate::generator::{generate_until, GeneratorOptions};
use crate::interaction::Interaction;
use crate::predictahead::PredictaheadTuner;
use antiphon_core::{clock, StopToken, Timebase};
use antiphon_midi::PlaybackSession;
use tracing::{debug, info};

/// Call length in steps when the end signal arrives `elapsed` steps after the
/// call started: rounded up to the next bar line that is at least
/// `predictahead` steps away, adding bars while the line is too close.
///
/// A signal that arrives before the call starts counts as arriving at its
/// start, so the call always lasts at least one bar.
pub fn call_steps_until_bar(elapsed: i64, steps_per_bar: u32, predictahead: u32) -> i64 {
    let elapsed = elapsed.max(0);
    let steps_per_bar = i64::from(steps_per_bar.max(1));
    let mut remaining = (-elapsed).rem_euclid(steps_per_bar);
    while remaining < i64::from(predictahead.max(1)) {
        remaining += steps_per_bar;
    }
    elapsed + remaining
}

/// Call length in steps for a fixed-length call, `None` when the call is
/// ended by a signal.
pub fn fixed_call_steps(config: &CallResponseConfig, timebase: &Timebase) -> Option<i64> {
    config
        .phrase_bars
        .map(|bars| i64::from(bars) * i64::from(timebase.steps_per_bar()))
}

/// Step boundaries of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePlan {
    pub call_start: i64,
    pub call_steps: i64,
    pub predictahead: u32,
}

impl CyclePlan {
    pub fn call_end(&self) -> i64 {
        self.call_start + self.call_steps
    }

    /// Capture stops this many steps before the call ends.
    pub fn capture_end(&self) -> i64 {
        self.call_end() - i64::from(self.predictahead)
    }

    pub fn response_start(&self) -> i64 {
        self.call_end()
    }

    pub fn response_end(&self) -> i64 {
        self.call_start + 2 * self.call_steps
    }
}

struct CallResponse<'a> {
    interaction: &'a Interaction,
    config: &'a CallResponseConfig,
    timebase: Timebase,
    tuner: PredictaheadTuner,
    player: Option<PlaybackSession>,
}

impl CallResponse<'_> {
    fn seconds(&self, steps: i64) -> f64 {
        self.timebase.steps_to_seconds(steps as f64)
    }

    fn current_step(&self) -> i64 {
        self.timebase.step_floor(clock::now()) as i64
    }

    fn cycles(&mut self, stop: &StopToken) -> Result<()> {
        let hub = self.interaction.hub().clone();
        let qpm = self.timebase.qpm();
        let mut call_start =
            self.timebase.step_floor(clock::now() + self.config.lead_in) as i64;

        while !stop.is_stopped() {
            if let Some(signal) = &self.config.start_call_signal {
                hub.wait_for_event_until(signal, stop);
                if stop.is_stopped() {
                    break;
                }
                call_start = call_start.max(self.current_step() + 1);
            }

            // Call stage.
            hub.start_metronome(qpm, self.seconds(call_start))?;
            let captor = hub.start_capture(qpm, self.seconds(call_start))?;

            let call_steps = match fixed_call_steps(self.config, &self.timebase) {
                Some(steps) => steps,
                None => {
                    let signal = self.config.end_call_signal.as_ref().ok_or_else(|| {
                        Error::InvalidConfig("end_call_signal required without phrase_bars".into())
                    })?;
                    hub.wait_for_event_until(signal, stop);
                    if stop.is_stopped() {
                        break;
                    }
                    call_steps_until_bar(
                        self.current_step() - call_start,
                        self.timebase.steps_per_bar(),
                        self.tuner.steps(),
                    )
                }
            };
            let plan = CyclePlan {
                call_start,
                call_steps,
                predictahead: self.tuner.steps(),
            };
            debug!(?plan, "Call planned");

            hub.stop_metronome(Some(self.seconds(plan.call_end())), false);
            let capture_end = self.seconds(plan.capture_end());
            captor.schedule_stop(Some(capture_end));
            if !stop.sleep_until(capture_end) {
                break;
            }
            captor.join();
            let mut captured = captor.captured_sequence();
            captured.qpm = qpm;

            // Response stage.
            let response_start = self.seconds(plan.response_start());
            let options = GeneratorOptions::new()
                .generate_section(response_start, self.seconds(plan.response_end()))
                .temperature(self.interaction.controls().temperature());
            let generator = self.interaction.generator()?;
            info!(
                generator = %generator.details().id,
                notes = captured.len(),
                "Generating response"
            );
            let Some(response) = generate_until(generator, captured, options, stop)? else {
                break;
            };
            if stop.is_stopped() {
                break;
            }

            self.player = Some(hub.start_playback(&response, None, false)?);

            self.tuner
                .observe(response_start - clock::now(), self.timebase.seconds_per_step());
            call_start = plan.response_end();
        }
        Ok(())
    }
}

pub(crate) fn run(
    interaction: &Interaction,
    config: &CallResponseConfig,
    stop: &StopToken,
) -> Result<()> {
    let settings = interaction.settings();
    let timebase = Timebase::new(
        interaction.controls().qpm(),
        settings.steps_per_quarter,
        settings.steps_per_bar,
    )?;
    let mut call_response = CallResponse {
        interaction,
        config,
        timebase,
        tuner: PredictaheadTuner::new(config.initial_predictahead, config.min_predictahead),
        player: None,
    };

    let result = call_response.cycles(stop);

    interaction.hub().stop_metronome(None, true);
    if let Some(player) = call_response.player.take() {
        player.stop();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fixed_phrase_is_32_steps() {
        let timebase = Timebase::new(120.0, 4, 16).unwrap();
        let call_steps = fixed_call_steps(&CallResponseConfig::bars(2), &timebase).unwrap();
        assert_eq!(call_steps, 32);
        assert_relative_eq!(timebase.steps_to_seconds(call_steps as f64), 4.0);

        let plan = CyclePlan {
            call_start: 0,
            call_steps,
            predictahead: 4,
        };
        assert_eq!(plan.capture_end(), 28);
        assert_eq!(plan.response_end(), 64);

        let signalled = CallResponseConfig::until_signal(antiphon_midi::MidiSignal::clock());
        assert_eq!(fixed_call_steps(&signalled, &timebase), None);
    }

    #[test]
    fn test_rounds_up_to_bar() {
        assert_eq!(call_steps_until_bar(5, 16, 4), 16);
        assert_eq!(call_steps_until_bar(16, 16, 4), 32);
        assert_eq!(call_steps_until_bar(17, 16, 4), 32);
    }

    #[test]
    fn test_signal_before_call_start_gives_one_bar() {
        assert_eq!(call_steps_until_bar(-8, 16, 4), 16);
        assert_eq!(call_steps_until_bar(-40, 16, 4), 16);
    }

    #[test]
    fn test_lead_longer_than_a_bar() {
        assert_eq!(call_steps_until_bar(0, 4, 6), 8);
        assert_eq!(call_steps_until_bar(3, 4, 6), 12);
    }

    #[test]
    fn test_extends_bar_when_too_close() {
        // Three steps left in the bar is less than the lead.
        assert_eq!(call_steps_until_bar(13, 16, 4), 32);
        // Exactly the lead is enough.
        assert_eq!(call_steps_until_bar(12, 16, 4), 16);
    }

    #[test]
    fn test_cycle_plan_boundaries() {
        let plan = CyclePlan {
            call_start: 100,
            call_steps: 32,
            predictahead: 4,
        };
        assert_eq!(plan.call_end(), 132);
        assert_eq!(plan.capture_end(), 128);
        assert_eq!(plan.response_start(), 132);
        assert_eq!(plan.response_end(), 164);
    }
}
