//! # Optimization Algorithms (`optim`)
//!
//! Optimizers own the model they update. Gradients are passed in explicitly,
//! aligned index-for-index with `Model::parameter_vector()`, because they are
//! produced (and averaged) outside the model by the worker pool.

use crate::tensor::TensorError;
use crate::utils::serialization::SerializableTensor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Submodules ---
pub mod adam;

pub use adam::{Adam, AdamConfig};

#[derive(thiserror::Error, Debug)]
pub enum OptimError {
    #[error("Expected {expected} gradients (one per parameter), got {got}")]
    GradientCountMismatch { expected: usize, got: usize },
    #[error("Gradient {index} has shape {got:?}, parameter has shape {expected:?}")]
    GradientShapeMismatch {
        index: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Gradient {index} contains NaN or infinite values")]
    NonFiniteGradient { index: usize },
    #[error("Invalid hyper-parameter: {0}")]
    InvalidHyperParameter(String),
    #[error("Optimizer state does not match the model: {0}")]
    StateMismatch(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

// --- Optimizer Trait ---

/// Base trait for all optimizers.
pub trait Optimizer {
    /// Applies one update given one gradient per parameter.
    fn update(&mut self, gradients: &[crate::tensor::Tensor]) -> Result<(), OptimError>;

    /// Number of successful `update` calls so far.
    fn step_count(&self) -> u64;
}

/// Serializable snapshot of an Adam optimizer and the parameters it owns.
///
/// Tensors are keyed by parameter name, so a snapshot can only be restored
/// into a model with the same architecture.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OptimizerState {
    pub hyper: AdamConfig,
    pub step: u64,
    pub parameters: BTreeMap<String, SerializableTensor>,
    pub first_moments: BTreeMap<String, SerializableTensor>,
    pub second_moments: BTreeMap<String, SerializableTensor>,
}
