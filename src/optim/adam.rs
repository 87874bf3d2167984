//! # Adam Optimizer

use super::{OptimError, Optimizer, OptimizerState};
use crate::nn::Model;
use crate::tensor::{Tensor, TensorData};
use crate::utils::serialization::SerializableTensor;
use ndarray::{ArrayD, IxDyn, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Adam hyper-parameters.
///
/// Defaults follow the WGAN-GP convention: `beta1 = 0` disables first-moment
/// smoothing, which leaves a bias-corrected RMS-normalised step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct AdamConfig {
    pub learning_rate: TensorData,
    pub beta1: TensorData,
    pub beta2: TensorData,
    pub epsilon: TensorData,
}

impl Default for AdamConfig {
    fn default() -> Self {
        AdamConfig {
            learning_rate: 1e-3,
            beta1: 0.0,
            beta2: 0.9,
            epsilon: 1e-8,
        }
    }
}

impl AdamConfig {
    pub fn validate(&self) -> Result<(), OptimError> {
        if !(self.learning_rate >= 0.0) {
            return Err(OptimError::InvalidHyperParameter(format!(
                "learning_rate must be >= 0, got {}",
                self.learning_rate
            )));
        }
        // A parameter whose gradient is always zero would otherwise step by 0 / 0.
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(OptimError::InvalidHyperParameter(format!("epsilon must be > 0, got {}", self.epsilon)));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(OptimError::InvalidHyperParameter(format!("{} must be in [0, 1), got {}", name, beta)));
            }
        }
        Ok(())
    }
}

/// Implements the Adam algorithm.
/// Reference: Adam: A Method for Stochastic Optimization - https://arxiv.org/abs/1412.6980
///
/// Owns the model. Parameters are updated in place through their shared
/// storage, so the model sees every update without being rebuilt.
#[derive(Debug)]
pub struct Adam<M: Model> {
    model: M,
    config: AdamConfig,
    names: Vec<String>,
    params: Vec<Tensor>,
    first_moments: Vec<ArrayD<TensorData>>,
    second_moments: Vec<ArrayD<TensorData>>,
    step: u64,
    reject_non_finite: bool,
}

impl<M: Model> Adam<M> {
    /// Creates an optimizer with zero moments and `step = 0`.
    pub fn new(model: M, config: AdamConfig) -> Result<Self, OptimError> {
        config.validate()?;
        let (names, params): (Vec<String>, Vec<Tensor>) = model.parameters().into_iter().unzip();
        let zeros: Vec<ArrayD<TensorData>> = params.iter().map(|p| ArrayD::zeros(IxDyn(p.shape()))).collect();
        Ok(Adam {
            model,
            config,
            names,
            params,
            first_moments: zeros.clone(),
            second_moments: zeros,
            step: 0,
            reject_non_finite: false,
        })
    }

    /// Makes `update` fail with `OptimError::NonFiniteGradient` instead of
    /// folding NaN/Inf into the moment estimates.
    pub fn reject_non_finite(mut self, enabled: bool) -> Self {
        self.reject_non_finite = enabled;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    pub fn first_moments(&self) -> &[ArrayD<TensorData>] {
        &self.first_moments
    }

    pub fn second_moments(&self) -> &[ArrayD<TensorData>] {
        &self.second_moments
    }

    fn check_gradients(&self, gradients: &[Tensor]) -> Result<(), OptimError> {
        if gradients.len() != self.params.len() {
            return Err(OptimError::GradientCountMismatch {
                expected: self.params.len(),
                got: gradients.len(),
            });
        }
        for (index, (param, gradient)) in self.params.iter().zip(gradients).enumerate() {
            if param.shape() != gradient.shape() {
                return Err(OptimError::GradientShapeMismatch {
                    index,
                    expected: param.shape().to_vec(),
                    got: gradient.shape().to_vec(),
                });
            }
            if self.reject_non_finite && !gradient.is_finite() {
                return Err(OptimError::NonFiniteGradient { index });
            }
        }
        Ok(())
    }

    /// Snapshot of the hyper-parameters, step counter, parameters and moments.
    pub fn state(&self) -> OptimizerState {
        let keyed = |arrays: Vec<SerializableTensor>| -> BTreeMap<String, SerializableTensor> {
            self.names.iter().cloned().zip(arrays).collect()
        };
        OptimizerState {
            hyper: self.config,
            step: self.step,
            parameters: keyed(self.params.iter().map(|p| SerializableTensor::from(&*p.data())).collect()),
            first_moments: keyed(self.first_moments.iter().map(SerializableTensor::from).collect()),
            second_moments: keyed(self.second_moments.iter().map(SerializableTensor::from).collect()),
        }
    }

    /// Restores a snapshot taken from an optimizer over the same architecture.
    ///
    /// Everything is validated before anything is written, so a mismatched
    /// snapshot leaves the optimizer untouched.
    pub fn load_state(&mut self, state: &OptimizerState) -> Result<(), OptimError> {
        state.hyper.validate()?;
        let parameters = self.aligned_arrays("parameters", &state.parameters)?;
        let first_moments = self.aligned_arrays("first_moments", &state.first_moments)?;
        let second_moments = self.aligned_arrays("second_moments", &state.second_moments)?;

        for (param, values) in self.params.iter().zip(&parameters) {
            param.assign(values)?;
        }
        self.first_moments = first_moments;
        self.second_moments = second_moments;
        self.step = state.step;
        self.config = state.hyper;
        Ok(())
    }

    fn aligned_arrays(
        &self,
        section: &str,
        tensors: &BTreeMap<String, SerializableTensor>,
    ) -> Result<Vec<ArrayD<TensorData>>, OptimError> {
        if tensors.len() != self.names.len() {
            return Err(OptimError::StateMismatch(format!(
                "{} holds {} tensors, model has {} parameters",
                section,
                tensors.len(),
                self.names.len()
            )));
        }
        self.names
            .iter()
            .zip(&self.params)
            .map(|(name, param)| {
                let stored = tensors
                    .get(name)
                    .ok_or_else(|| OptimError::StateMismatch(format!("{} is missing '{}'", section, name)))?;
                if stored.shape != param.shape() {
                    return Err(OptimError::StateMismatch(format!(
                        "{} '{}' has shape {:?}, parameter has shape {:?}",
                        section,
                        name,
                        stored.shape,
                        param.shape()
                    )));
                }
                stored
                    .to_array()
                    .map_err(|e| OptimError::StateMismatch(format!("{} '{}': {}", section, name, e)))
            })
            .collect()
    }
}

impl<M: Model> Optimizer for Adam<M> {
    fn update(&mut self, gradients: &[Tensor]) -> Result<(), OptimError> {
        self.check_gradients(gradients)?;

        self.step += 1;
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        let exponent = self.step.min(i32::MAX as u64) as i32;
        let bias_correction1 = 1.0 - beta1.powi(exponent);
        let bias_correction2 = 1.0 - beta2.powi(exponent);

        for (((param, gradient), m), v) in self
            .params
            .iter()
            .zip(gradients)
            .zip(self.first_moments.iter_mut())
            .zip(self.second_moments.iter_mut())
        {
            let g = gradient.data_clone();
            let mut p = param.data_mut();
            Zip::from(&mut *p).and(m).and(v).and(&g).for_each(|p, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bias_correction1;
                let v_hat = *v / bias_correction2;
                *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
            });
        }
        Ok(())
    }

    fn step_count(&self) -> u64 {
        self.step
    }
}
