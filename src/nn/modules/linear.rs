//! # Linear Layer Module

use crate::nn::Module;
use crate::tensor::{ops, uniform, Tensor, TensorData, TensorError};
use rand::Rng;
use std::collections::BTreeMap;

/// Applies a linear transformation to the incoming data: `y = xA^T + b`.
///
/// Input shape: `(N, in_features)`. Output shape: `(N, out_features)`.
#[derive(Debug)]
pub struct Linear {
    pub weight: Tensor, // Shape: (out_features, in_features)
    pub bias: Tensor,   // Shape: (out_features)

    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Creates a new Linear module.
    ///
    /// Weight and bias are drawn uniformly from `[-k, k)` with
    /// `k = 1 / sqrt(in_features)`, the PyTorch default.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let k = (1.0 / in_features.max(1) as TensorData).sqrt();
        let weight = uniform(&[out_features, in_features], -k, k, true, rng);
        let bias = uniform(&[out_features], -k, k, true, rng);
        Linear {
            weight,
            bias,
            in_features,
            out_features,
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Result<Tensor, TensorError> {
        if input.ndim() != 2 || input.shape()[1] != self.in_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![input.shape().first().copied().unwrap_or(0), self.in_features],
                got: input.shape().to_vec(),
            });
        }
        let weight_t = ops::transpose(&self.weight)?;
        let output = ops::matmul(input, &weight_t)?;
        ops::add(&output, &self.bias)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        params.insert("weight".to_string(), self.weight.clone());
        params.insert("bias".to_string(), self.bias.clone());
        params
    }
}
