//! Gradient penalty for the critic.
//!
//! Penalises the critic's input-gradient norm for deviating from one on
//! samples interpolated between the real and generated batch. The gradient is
//! taken with the graph retained so that the penalty stays differentiable with
//! respect to the critic's parameters (a gradient of a gradient).

use crate::nn::Model;
use crate::tensor::{grad, ops, Tensor, TensorData, TensorError};

/// `real * epsilon + fake * (1 - epsilon)`, detached and marked as a fresh
/// differentiation variable.
pub fn interpolate(real: &Tensor, fake: &Tensor, epsilon: TensorData) -> Result<Tensor, TensorError> {
    if real.shape() != fake.shape() {
        return Err(TensorError::ShapeMismatch {
            expected: real.shape().to_vec(),
            got: fake.shape().to_vec(),
        });
    }
    let mixed = ops::add(&ops::mul_scalar(real, epsilon)?, &ops::mul_scalar(fake, 1.0 - epsilon)?)?;
    Ok(mixed.detach().requiring_grad())
}

/// `mean((||d critic(mixed) / d mixed||_2 - 1)^2)` with one norm per sample.
///
/// A single `epsilon` is shared by the whole batch. The returned scalar is
/// part of a live graph reaching the critic's parameters.
pub fn gradient_penalty<C: Model>(
    critic: &C,
    real: &Tensor,
    fake: &Tensor,
    labels: &Tensor,
    epsilon: TensorData,
) -> Result<Tensor, TensorError> {
    let mixed = interpolate(real, fake, epsilon)?;
    let scores = critic.forward(&mixed, labels)?;

    // The critic scores each sample independently, so the gradient of the
    // summed scores holds every per-sample input gradient.
    let total = ops::sum(&scores)?;
    let mixed_grad = grad(&[total], &[mixed], true)?.remove(0);

    let per_sample = ops::flatten_batch(&mixed_grad)?;
    let batch = per_sample.shape()[0];
    let squared = ops::square(&per_sample)?;
    let norms = ops::sqrt(&ops::sum_to_shape(&squared, &[batch, 1])?)?;
    let deviation = ops::add_scalar(&norms, -1.0)?;
    ops::mean(&ops::square(&deviation)?)
}
