//! # Neural Network Module (`nn`)
//!
//! Building blocks for the generator and critic: layer modules composed with
//! `Sequential`, and the label-conditioned models the trainer optimizes.

use crate::tensor::{Tensor, TensorError};
use std::collections::BTreeMap;
use std::fmt::Debug;

// --- Submodules ---
pub mod models;
pub mod modules;

pub use models::{MlpCritic, MlpGenerator};
pub use modules::*;

// --- Core Trait: Module ---

/// Base trait for layers and layer containers.
pub trait Module: Debug + Send + Sync + 'static {
    /// Performs the forward pass of the module.
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError>;

    /// Returns the module's trainable parameters keyed by a descriptive name.
    /// Uses BTreeMap for a deterministic order.
    fn parameters(&self) -> BTreeMap<String, Tensor>;
}

// --- Core Trait: Model ---

/// A label-conditioned network: the generator maps `(noise, labels)` to images,
/// the critic maps `(images, labels)` to one score per sample.
///
/// `parameter_vector` is the ordering contract between a model, its optimizer,
/// and the gradients returned by `tensor::grad`: gradients are requested for
/// exactly this list and come back aligned with it.
pub trait Model: Debug + Send + Sync + 'static {
    fn forward(&self, input: &Tensor, labels: &Tensor) -> Result<Tensor, TensorError>;

    fn parameters(&self) -> BTreeMap<String, Tensor>;

    /// Parameters in key order of `parameters()`. Stable across calls.
    fn parameter_vector(&self) -> Vec<Tensor> {
        self.parameters().into_values().collect()
    }

    /// Names aligned with `parameter_vector()`.
    fn parameter_names(&self) -> Vec<String> {
        self.parameters().into_keys().collect()
    }
}

// --- Sequential container ---

/// A sequential container for modules; the forward pass applies each module in order.
#[derive(Debug, Default)]
pub struct Sequential {
    modules: Vec<Box<dyn Module>>,
}

impl Sequential {
    /// Creates a new empty Sequential container.
    pub fn new() -> Self {
        Sequential { modules: Vec::new() }
    }

    /// Creates a Sequential container from a vector of modules.
    pub fn from_modules(modules: Vec<Box<dyn Module>>) -> Self {
        Sequential { modules }
    }

    /// Adds a module to the sequence.
    pub fn add_module(&mut self, module: Box<dyn Module>) {
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        let mut current = input.clone();
        for module in &self.modules {
            current = module.forward(&current)?;
        }
        Ok(current)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        for (i, module) in self.modules.iter().enumerate() {
            for (name, param) in module.parameters() {
                // Zero-padded index keeps key order equal to layer order.
                params.insert(format!("{:02}.{}", i, name), param);
            }
        }
        params
    }
}
