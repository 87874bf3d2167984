//! # Conditional MLP Models
//!
//! Label-conditioned generator and critic built from `Sequential` stacks of
//! `Linear` and `LeakyReLU` layers.

use super::{LeakyReLU, Linear, Model, Module, Sequential, Sigmoid};
use crate::tensor::{ops, Tensor, TensorData, TensorError};
use rand::Rng;
use std::collections::BTreeMap;

const LEAKY_SLOPE: TensorData = 0.2;

/// Builds `in -> hidden[0] -> ... -> hidden[n-1] -> out` with LeakyReLU between layers.
fn mlp<R: Rng + ?Sized>(in_features: usize, hidden: &[usize], out_features: usize, rng: &mut R) -> Sequential {
    let mut net = Sequential::new();
    let mut width = in_features;
    for &h in hidden {
        net.add_module(Box::new(Linear::new(width, h, rng)));
        net.add_module(Box::new(LeakyReLU::new(LEAKY_SLOPE)));
        width = h;
    }
    net.add_module(Box::new(Linear::new(width, out_features, rng)));
    net
}

fn check_labels(batch: usize, num_classes: usize, labels: &Tensor) -> Result<(), TensorError> {
    if labels.shape() != [batch, num_classes] {
        return Err(TensorError::ShapeMismatch {
            expected: vec![batch, num_classes],
            got: labels.shape().to_vec(),
        });
    }
    Ok(())
}

/// Maps `(noise [B, noise_dim], one-hot labels [B, classes])` to images `[B, C, H, W]`
/// with values in `(0, 1)`.
#[derive(Debug)]
pub struct MlpGenerator {
    net: Sequential,
    noise_dim: usize,
    num_classes: usize,
    image_shape: [usize; 3],
}

impl MlpGenerator {
    pub fn new<R: Rng + ?Sized>(
        noise_dim: usize,
        num_classes: usize,
        hidden: &[usize],
        image_shape: [usize; 3],
        rng: &mut R,
    ) -> Self {
        let image_size = image_shape.iter().product();
        let mut net = mlp(noise_dim + num_classes, hidden, image_size, rng);
        net.add_module(Box::new(Sigmoid::new()));
        MlpGenerator {
            net,
            noise_dim,
            num_classes,
            image_shape,
        }
    }

    pub fn noise_dim(&self) -> usize {
        self.noise_dim
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn image_shape(&self) -> [usize; 3] {
        self.image_shape
    }
}

impl Model for MlpGenerator {
    fn forward(&self, noise: &Tensor, labels: &Tensor) -> Result<Tensor, TensorError> {
        let batch = noise.shape().first().copied().unwrap_or(0);
        if noise.shape() != [batch, self.noise_dim] {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, self.noise_dim],
                got: noise.shape().to_vec(),
            });
        }
        check_labels(batch, self.num_classes, labels)?;

        let input = ops::concat(&[noise.clone(), labels.clone()], 1)?;
        let flat = self.net.forward(&input)?;
        let [c, h, w] = self.image_shape;
        ops::reshape(&flat, &[batch, c, h, w])
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        self.net.parameters()
    }
}

/// Scores `(images [B, ...], one-hot labels [B, classes])` with one value per sample, `[B, 1]`.
///
/// Deliberately free of batch normalisation: every score depends on its own
/// sample only, which the per-sample gradient penalty relies on.
#[derive(Debug)]
pub struct MlpCritic {
    net: Sequential,
    input_size: usize,
    num_classes: usize,
}

impl MlpCritic {
    pub fn new<R: Rng + ?Sized>(image_shape: [usize; 3], num_classes: usize, hidden: &[usize], rng: &mut R) -> Self {
        let input_size: usize = image_shape.iter().product();
        MlpCritic {
            net: mlp(input_size + num_classes, hidden, 1, rng),
            input_size,
            num_classes,
        }
    }
}

impl Model for MlpCritic {
    fn forward(&self, images: &Tensor, labels: &Tensor) -> Result<Tensor, TensorError> {
        let flat = ops::flatten_batch(images)?;
        let batch = flat.shape()[0];
        if flat.shape()[1] != self.input_size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, self.input_size],
                got: flat.shape().to_vec(),
            });
        }
        check_labels(batch, self.num_classes, labels)?;

        let input = ops::concat(&[flat, labels.clone()], 1)?;
        self.net.forward(&input)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        self.net.parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{grad, zeros};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn one_hot(batch: usize, classes: usize) -> Tensor {
        let labels = zeros(&[batch, classes], false);
        {
            let mut data = labels.data_mut();
            for i in 0..batch {
                data[[i, i % classes].as_slice()] = 1.0;
            }
        }
        labels
    }

    #[test]
    fn generator_output_is_an_image_batch() {
        let mut rng = StdRng::seed_from_u64(3);
        let g = MlpGenerator::new(4, 3, &[8], [1, 2, 2], &mut rng);
        let noise = crate::tensor::uniform(&[5, 4], 0.0, 1.0, false, &mut rng);
        let images = g.forward(&noise, &one_hot(5, 3)).unwrap();
        assert_eq!(images.shape(), &[5, 1, 2, 2]);
        assert!(images.to_vec().iter().all(|&p| p > 0.0 && p < 1.0));
        assert_eq!(g.parameter_vector().len(), 4);
    }

    #[test]
    fn critic_scores_each_sample_independently() {
        let mut rng = StdRng::seed_from_u64(4);
        let c = MlpCritic::new([1, 2, 2], 3, &[6, 6], &mut rng);
        let images = crate::tensor::uniform(&[4, 1, 2, 2], 0.0, 1.0, false, &mut rng);
        let labels = one_hot(4, 3);
        let scores = c.forward(&images, &labels).unwrap();
        assert_eq!(scores.shape(), &[4, 1]);

        // Perturbing one sample leaves the other scores unchanged.
        let perturbed = images.detach();
        perturbed.data_mut()[[0, 0, 0, 0].as_slice()] += 1.0;
        let rescored = c.forward(&perturbed, &labels).unwrap();
        assert_eq!(&scores.to_vec()[1..], &rescored.to_vec()[1..]);
    }

    #[test]
    fn critic_input_gradient_has_image_shape() {
        let mut rng = StdRng::seed_from_u64(5);
        let c = MlpCritic::new([1, 2, 2], 2, &[4], &mut rng);
        let images = crate::tensor::uniform(&[3, 1, 2, 2], 0.0, 1.0, false, &mut rng).requiring_grad();
        let scores = c.forward(&images, &one_hot(3, 2)).unwrap();
        let g = grad(&[ops::sum(&scores).unwrap()], &[images], false).unwrap();
        assert_eq!(g[0].shape(), &[3, 1, 2, 2]);
    }

    #[test]
    fn mismatched_labels_are_rejected() {
        let mut rng = StdRng::seed_from_u64(6);
        let c = MlpCritic::new([1, 2, 2], 3, &[4], &mut rng);
        let images = zeros(&[2, 1, 2, 2], false);
        assert!(c.forward(&images, &one_hot(2, 2)).is_err());
    }
}
