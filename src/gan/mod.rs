//! # WGAN-GP Training (`gan`)
//!
//! The gradient penalty, the adaptive critic/generator step ratio, and the
//! training loop that ties them to the optimizers and the worker pool.

pub mod penalty;
pub mod schedule;
pub mod trainer;

pub use penalty::{gradient_penalty, interpolate};
pub use schedule::{RunningStats, ScheduleController, StepRatio};
pub use trainer::{EpochStats, Trainer};
