//! Top-level error for a training run.

use crate::config::ConfigError;
use crate::data::DataError;
use crate::optim::OptimError;
use crate::tensor::TensorError;
use crate::utils::serialization::CheckpointError;
use crate::utils::telemetry::TelemetryError;

#[derive(thiserror::Error, Debug)]
pub enum TrainError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Dataset error: {0}")]
    Data(#[from] DataError),
    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),
    #[error("Optimizer error: {0}")]
    Optim(#[from] OptimError),
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
