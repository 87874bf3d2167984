//! # WGAN-GP Core Library
//!
//! Trains a label-conditioned Wasserstein GAN with gradient penalty. The crate
//! carries its own small tensor/autodiff engine (with second-order gradients),
//! MLP models, an Adam optimizer, an IDX dataset loader, and the multi-worker
//! training loop with its adaptive critic/generator schedule.

pub mod config;
pub mod data;
pub mod error;
pub mod gan;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod utils;

pub mod prelude {
    pub use crate::config::TrainingConfig;
    pub use crate::error::TrainError;
    pub use crate::gan::{EpochStats, Trainer};
    pub use crate::nn::{Model, Module};
    pub use crate::optim::{Adam, AdamConfig, Optimizer};
    pub use crate::tensor::Tensor;
}
