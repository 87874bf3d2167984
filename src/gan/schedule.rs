//! Adaptive critic/generator step ratio.
//!
//! Exponentially smoothed losses decide how many critic and generator updates
//! the next epoch runs. Thresholds are strict: a running mean of exactly 50 or
//! -50 keeps the default critic count.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Weight of the previous running value in each update.
pub const SMOOTHING: f32 = 0.9;
/// Weight of the current loss. Not `1.0 - SMOOTHING`, which is 0.100000024 in f32.
pub const CURRENT_WEIGHT: f32 = 0.1;

/// Critic and generator updates per epoch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRatio {
    pub n_critic: usize,
    pub n_gen: usize,
}

impl Default for StepRatio {
    fn default() -> Self {
        StepRatio { n_critic: 5, n_gen: 1 }
    }
}

impl fmt::Display for StepRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.n_critic, self.n_gen)
    }
}

/// Exponentially smoothed critic and generator losses, both starting at zero.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningStats {
    pub critic_loss: f32,
    pub generator_loss: f32,
}

impl RunningStats {
    /// `running = 0.1 * current + 0.9 * running` for both losses.
    pub fn observe(&mut self, critic_loss: f32, generator_loss: f32) {
        self.critic_loss = CURRENT_WEIGHT * critic_loss + SMOOTHING * self.critic_loss;
        self.generator_loss = CURRENT_WEIGHT * generator_loss + SMOOTHING * self.generator_loss;
    }

    /// Step ratio for the next epoch given these running means.
    pub fn next_ratio(&self) -> StepRatio {
        let n_critic = if self.critic_loss > 50.0 || self.generator_loss < -100.0 {
            7
        } else if self.critic_loss < -50.0 {
            3
        } else {
            5
        };

        let n_gen = if self.generator_loss > 100.0 {
            3
        } else if self.generator_loss > 50.0 {
            2
        } else {
            1
        };

        StepRatio { n_critic, n_gen }
    }
}

/// Owns the running statistics and the current ratio.
///
/// With `adaptive` off the initial ratio is kept for the whole run; the
/// statistics are still tracked so they can be logged.
#[derive(Debug, Clone)]
pub struct ScheduleController {
    stats: RunningStats,
    ratio: StepRatio,
    adaptive: bool,
}

impl ScheduleController {
    pub fn new(initial: StepRatio, adaptive: bool) -> Self {
        ScheduleController {
            stats: RunningStats::default(),
            ratio: initial,
            adaptive,
        }
    }

    pub fn ratio(&self) -> StepRatio {
        self.ratio
    }

    pub fn stats(&self) -> RunningStats {
        self.stats
    }

    /// Folds in one epoch's losses and returns the ratio for the next epoch.
    pub fn observe(&mut self, critic_loss: f32, generator_loss: f32) -> StepRatio {
        self.stats.observe(critic_loss, generator_loss);
        if self.adaptive {
            let next = self.stats.next_ratio();
            if next != self.ratio {
                log::debug!(
                    "step ratio {} -> {} (running critic {:.3}, generator {:.3})",
                    self.ratio,
                    next,
                    self.stats.critic_loss,
                    self.stats.generator_loss
                );
            }
            self.ratio = next;
        }
        self.ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratio_for(critic_loss: f32, generator_loss: f32) -> StepRatio {
        RunningStats {
            critic_loss,
            generator_loss,
        }
        .next_ratio()
    }

    #[test]
    fn critic_count_thresholds() {
        assert_eq!(ratio_for(60.0, 0.0).n_critic, 7);
        assert_eq!(ratio_for(-60.0, 0.0).n_critic, 3);
        assert_eq!(ratio_for(0.0, 0.0).n_critic, 5);
        assert_eq!(ratio_for(0.0, -101.0).n_critic, 7);
    }

    #[test]
    fn boundaries_take_the_default_branch() {
        assert_eq!(ratio_for(50.0, 0.0).n_critic, 5);
        assert_eq!(ratio_for(-50.0, 0.0).n_critic, 5);
        assert_eq!(ratio_for(0.0, -100.0).n_critic, 5);
        assert_eq!(ratio_for(0.0, 100.0).n_gen, 2);
        assert_eq!(ratio_for(0.0, 50.0).n_gen, 1);
    }

    #[test]
    fn generator_count_thresholds() {
        assert_eq!(ratio_for(0.0, 150.0).n_gen, 3);
        assert_eq!(ratio_for(0.0, 75.0).n_gen, 2);
        assert_eq!(ratio_for(0.0, -500.0).n_gen, 1);
    }

    #[test]
    fn generator_collapse_overrides_negative_critic_loss() {
        assert_eq!(ratio_for(-60.0, -200.0), StepRatio { n_critic: 7, n_gen: 1 });
    }

    #[test]
    fn smoothing_weights_history() {
        let mut stats = RunningStats::default();
        stats.observe(100.0, -10.0);
        assert_eq!(stats.critic_loss, 10.0);
        assert_eq!(stats.generator_loss, -1.0);
        stats.observe(0.0, 0.0);
        assert_eq!(stats.critic_loss, 9.0);
    }

    #[test]
    fn smoothed_loss_landing_on_a_threshold_keeps_the_default() {
        let mut stats = RunningStats::default();
        stats.observe(500.0, -500.0);
        assert_eq!(stats.critic_loss, 50.0);
        assert_eq!(stats.generator_loss, -50.0);
        assert_eq!(stats.next_ratio(), StepRatio { n_critic: 5, n_gen: 1 });

        let mut controller = ScheduleController::new(StepRatio::default(), true);
        assert_eq!(controller.observe(500.0, 500.0), StepRatio { n_critic: 5, n_gen: 1 });
        assert_eq!(controller.stats().generator_loss, 50.0);
    }

    #[test]
    fn controller_needs_sustained_losses_to_switch() {
        let mut controller = ScheduleController::new(StepRatio::default(), true);
        // One spike of 600 gives a running mean of 60.
        assert_eq!(controller.observe(600.0, 0.0).n_critic, 7);
        // Decays below 50 after two quiet epochs: 54, 48.6.
        assert_eq!(controller.observe(0.0, 0.0).n_critic, 7);
        assert_eq!(controller.observe(0.0, 0.0).n_critic, 5);
    }

    #[test]
    fn fixed_schedule_ignores_losses() {
        let initial = StepRatio { n_critic: 5, n_gen: 1 };
        let mut controller = ScheduleController::new(initial, false);
        assert_eq!(controller.observe(1e6, 1e6), initial);
        assert!(controller.stats().critic_loss > 50.0);
    }
}
