//! # Activation Function Modules

use crate::nn::Module;
use crate::tensor::{ops, Tensor, TensorData, TensorError};
use std::collections::BTreeMap;

/// Applies the Rectified Linear Unit function element-wise.
/// `ReLU(x) = max(0, x)`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl ReLU {
    pub fn new() -> Self {
        ReLU
    }
}

impl Module for ReLU {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        ops::relu(input)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        BTreeMap::new()
    }
}

/// `LeakyReLU(x) = x` for positive `x`, `negative_slope * x` otherwise.
#[derive(Debug, Clone, Copy)]
pub struct LeakyReLU {
    negative_slope: TensorData,
}

impl LeakyReLU {
    pub fn new(negative_slope: TensorData) -> Self {
        LeakyReLU { negative_slope }
    }
}

impl Default for LeakyReLU {
    fn default() -> Self {
        LeakyReLU::new(0.2)
    }
}

impl Module for LeakyReLU {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        ops::leaky_relu(input, self.negative_slope)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        BTreeMap::new()
    }
}

/// Applies the Sigmoid function element-wise.
/// `Sigmoid(x) = 1 / (1 + exp(-x))`
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl Sigmoid {
    pub fn new() -> Self {
        Sigmoid
    }
}

impl Module for Sigmoid {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        ops::sigmoid(input)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        BTreeMap::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl Tanh {
    pub fn new() -> Self {
        Tanh
    }
}

impl Module for Tanh {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        ops::tanh(input)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        BTreeMap::new()
    }
}
