//! Adaptive generation lead time.
//!
//! The fixed-phrase controller stops capturing `steps` before the call ends so
//! the generator has time to run. After each response it compares when the
//! response had to start with when generation finished and nudges the lead.

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Decreased,
    Increased,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictaheadTuner {
    steps: u32,
    min: u32,
}

impl PredictaheadTuner {
    /// `initial` is raised to `min` if below it.
    pub fn new(initial: u32, min: u32) -> Self {
        Self {
            steps: initial.max(min),
            min,
        }
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    /// `slack` is the time between generation finishing and the response
    /// start; negative when the generator ran late.
    pub fn observe(&mut self, slack: f64, seconds_per_step: f64) -> Adjustment {
        if slack > f64::from(self.steps) * seconds_per_step {
            let steps = self.steps.saturating_sub(1).max(self.min);
            if steps == self.steps {
                return Adjustment::Unchanged;
            }
            self.steps = steps;
            info!(
                ahead = slack,
                predictahead = steps,
                "Generator is ahead, decreasing predictahead"
            );
            Adjustment::Decreased
        } else if slack < 0.0 {
            self.steps = self.steps.saturating_add(1);
            warn!(
                lagging = -slack,
                predictahead = self.steps,
                "Generator is lagging, increasing predictahead"
            );
            Adjustment::Increased
        } else {
            Adjustment::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SPS: f64 = 0.125;

    #[test]
    fn test_decrease_stops_at_floor() {
        let mut tuner = PredictaheadTuner::new(3, 1);
        assert_eq!(tuner.observe(10.0, SPS), Adjustment::Decreased);
        assert_eq!(tuner.observe(10.0, SPS), Adjustment::Decreased);
        assert_eq!(tuner.steps(), 1);
        assert_eq!(tuner.observe(10.0, SPS), Adjustment::Unchanged);
        assert_eq!(tuner.steps(), 1);
    }

    #[test]
    fn test_late_increases_by_one() {
        let mut tuner = PredictaheadTuner::new(4, 1);
        assert_eq!(tuner.observe(-0.01, SPS), Adjustment::Increased);
        assert_eq!(tuner.steps(), 5);
    }

    #[test]
    fn test_small_slack_keeps_lead() {
        let mut tuner = PredictaheadTuner::new(4, 1);
        // Exactly the lead is not "ahead".
        assert_eq!(tuner.observe(4.0 * SPS, SPS), Adjustment::Unchanged);
        assert_eq!(tuner.observe(0.0, SPS), Adjustment::Unchanged);
        assert_eq!(tuner.steps(), 4);
    }

    #[test]
    fn test_initial_raised_to_min() {
        assert_eq!(PredictaheadTuner::new(0, 2).steps(), 2);
    }

    proptest! {
        #[test]
        fn test_predictahead_never_below_floor(
            initial in 1u32..16,
            min in 1u32..4,
            slacks in prop::collection::vec(-2.0f64..4.0, 0..64),
        ) {
            let mut tuner = PredictaheadTuner::new(initial, min);
            for slack in slacks {
                let before = tuner.steps();
                let adjustment = tuner.observe(slack, SPS);
                prop_assert!(tuner.steps() >= min);
                match adjustment {
                    Adjustment::Increased => {
                        prop_assert!(slack < 0.0);
                        prop_assert_eq!(tuner.steps(), before + 1);
                    }
                    Adjustment::Decreased => {
                        prop_assert!(slack > f64::from(before) * SPS);
                        prop_assert_eq!(tuner.steps(), before - 1);
                    }
                    Adjustment::Unchanged => prop_assert_eq!(tuner.steps(), before),
                }
            }
        }
    }
}
