//! Minibatch sampling for real data and generator inputs.
//!
//! The sampler itself is immutable: every draw takes the caller's RNG, so
//! concurrent workers only share the read-only dataset and each brings its own
//! independently seeded generator.

use super::{one_hot, Batch, DataError, Dataset};
use crate::tensor::{Tensor, TensorData};
use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Distribution of the generator's noise input.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoiseDistribution {
    /// Uniform on `[min, max)`.
    Uniform { min: TensorData, max: TensorData },
    Normal { mean: TensorData, std_dev: TensorData },
}

impl Default for NoiseDistribution {
    fn default() -> Self {
        NoiseDistribution::Uniform { min: 0.0, max: 1.0 }
    }
}

impl NoiseDistribution {
    /// Rejects parameters that would make every draw fail or panic.
    pub fn validate(&self) -> Result<(), DataError> {
        match *self {
            NoiseDistribution::Uniform { min, max } => {
                if !(min.is_finite() && max.is_finite() && (max - min).is_finite()) {
                    return Err(DataError::InvalidNoise(format!(
                        "uniform range [{}, {}) must have finite bounds and width",
                        min, max
                    )));
                }
                if !(min < max) {
                    return Err(DataError::InvalidNoise(format!("uniform range [{}, {}) is empty", min, max)));
                }
            }
            NoiseDistribution::Normal { mean, std_dev } => {
                if !mean.is_finite() {
                    return Err(DataError::InvalidNoise(format!("normal mean must be finite, got {}", mean)));
                }
                if !(std_dev >= 0.0 && std_dev.is_finite()) {
                    return Err(DataError::InvalidNoise(format!(
                        "normal std_dev must be finite and >= 0, got {}",
                        std_dev
                    )));
                }
            }
        }
        Ok(())
    }

    /// Draws an array of the given shape.
    pub fn sample<R: Rng + ?Sized>(&self, shape: &[usize], rng: &mut R) -> Result<ArrayD<TensorData>, DataError> {
        self.validate()?;
        let array = match *self {
            NoiseDistribution::Uniform { min, max } => {
                let dist = Uniform::new(min, max);
                ArrayD::from_shape_simple_fn(IxDyn(shape), || dist.sample(rng))
            }
            NoiseDistribution::Normal { mean, std_dev } => {
                let dist = Normal::new(mean, std_dev).map_err(|e| DataError::InvalidNoise(e.to_string()))?;
                ArrayD::from_shape_simple_fn(IxDyn(shape), || dist.sample(rng))
            }
        };
        Ok(array)
    }
}

/// Draws real minibatches (with replacement) and generator inputs.
#[derive(Debug, Clone)]
pub struct BatchSampler {
    dataset: Arc<Dataset>,
    noise: NoiseDistribution,
    noise_dim: usize,
}

impl BatchSampler {
    pub fn new(dataset: Arc<Dataset>, noise: NoiseDistribution, noise_dim: usize) -> Result<Self, DataError> {
        noise.validate()?;
        if dataset.is_empty() {
            return Err(DataError::Empty);
        }
        Ok(BatchSampler {
            dataset,
            noise,
            noise_dim,
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn num_classes(&self) -> usize {
        self.dataset.num_classes()
    }

    pub fn noise_dim(&self) -> usize {
        self.noise_dim
    }

    /// `n` samples drawn independently and uniformly, with replacement.
    pub fn sample_real<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Batch {
        let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..self.dataset.len())).collect();
        self.dataset.gather(&indices)
    }

    /// `n` noise vectors `[n, noise_dim]` with uniformly drawn one-hot labels.
    pub fn sample_generator_input<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Batch, DataError> {
        let noise = self.noise.sample(&[n, self.noise_dim], rng)?;
        let classes: Vec<usize> = (0..n).map(|_| rng.gen_range(0..self.num_classes())).collect();
        Ok(Batch {
            data: Tensor::new(noise, false),
            labels: Tensor::new(one_hot(&classes, self.num_classes()), false),
        })
    }

    /// Noise for `labels.len()` samples conditioned on the given one-hot labels.
    pub fn sample_noise_for<R: Rng + ?Sized>(&self, labels: &Tensor, rng: &mut R) -> Result<Batch, DataError> {
        let n = labels.shape().first().copied().unwrap_or(0);
        let noise = self.noise.sample(&[n, self.noise_dim], rng)?;
        Ok(Batch {
            data: Tensor::new(noise, false),
            labels: labels.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sampler(noise: NoiseDistribution) -> BatchSampler {
        let images = ArrayD::from_shape_fn(IxDyn(&[4, 1, 2, 2]), |ix| ix[0] as f32);
        let dataset = Dataset::new(images, vec![0, 1, 2, 3], 4).unwrap();
        BatchSampler::new(Arc::new(dataset), noise, 3).unwrap()
    }

    #[test]
    fn real_batches_have_matching_labels() {
        let s = sampler(NoiseDistribution::default());
        let batch = s.sample_real(64, &mut StdRng::seed_from_u64(1));
        assert_eq!(batch.data.shape(), &[64, 1, 2, 2]);
        assert_eq!(batch.labels.shape(), &[64, 4]);

        let data = batch.data.data_clone();
        let labels = batch.labels.data_clone();
        for i in 0..64 {
            // Image i is filled with its index, which is also its class.
            let class = data[[i, 0, 0, 0].as_slice()] as usize;
            assert_eq!(labels[[i, class].as_slice()], 1.0);
        }
    }

    #[test]
    fn draws_with_replacement_cover_the_dataset() {
        let s = sampler(NoiseDistribution::default());
        let batch = s.sample_real(200, &mut StdRng::seed_from_u64(2));
        let column_sums = batch.labels.data_clone().sum_axis(ndarray::Axis(0));
        assert!(column_sums.iter().all(|&count| count > 0.0));
    }

    #[test]
    fn generator_input_is_uniform_noise_by_default() {
        let s = sampler(NoiseDistribution::default());
        let input = s.sample_generator_input(32, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(input.data.shape(), &[32, 3]);
        assert!(input.data.to_vec().iter().all(|&v| (0.0..1.0).contains(&v)));
        let rows = input.labels.data_clone().sum_axis(ndarray::Axis(1));
        assert!(rows.iter().all(|&r| r == 1.0));
    }

    #[test]
    fn same_seed_same_draws() {
        let s = sampler(NoiseDistribution::Normal { mean: 0.0, std_dev: 1.0 });
        let a = s.sample_generator_input(8, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = s.sample_generator_input(8, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a.data.to_vec(), b.data.to_vec());
        assert_eq!(a.labels.to_vec(), b.labels.to_vec());
    }

    #[test]
    fn noise_for_labels_keeps_them() {
        let s = sampler(NoiseDistribution::default());
        let mut rng = StdRng::seed_from_u64(4);
        let real = s.sample_real(5, &mut rng);
        let input = s.sample_noise_for(&real.labels, &mut rng).unwrap();
        assert_eq!(input.data.shape(), &[5, 3]);
        assert_eq!(input.labels.id(), real.labels.id());
    }

    #[test]
    fn invalid_distributions_are_rejected() {
        let invalid = [
            NoiseDistribution::Uniform { min: 1.0, max: 1.0 },
            NoiseDistribution::Uniform { min: 0.0, max: f32::INFINITY },
            NoiseDistribution::Uniform { min: f32::NAN, max: 1.0 },
            NoiseDistribution::Uniform { min: -3e38, max: 3e38 },
            NoiseDistribution::Normal { mean: 0.0, std_dev: -1.0 },
            NoiseDistribution::Normal { mean: 0.0, std_dev: f32::NAN },
            NoiseDistribution::Normal { mean: f32::INFINITY, std_dev: 1.0 },
        ];
        for noise in invalid {
            assert!(
                matches!(noise.validate(), Err(DataError::InvalidNoise(_))),
                "{:?} passed validation",
                noise
            );
            assert!(noise.sample(&[2, 2], &mut StdRng::seed_from_u64(0)).is_err());
        }
    }

    #[test]
    fn wide_finite_ranges_still_sample() {
        let noise = NoiseDistribution::Uniform { min: -1e30, max: 1e30 };
        assert!(noise.validate().is_ok());
        let draws = noise.sample(&[16], &mut StdRng::seed_from_u64(0)).unwrap();
        assert!(draws.iter().all(|v| v.is_finite()));

        let point = NoiseDistribution::Normal { mean: 0.5, std_dev: 0.0 };
        let draws = point.sample(&[4], &mut StdRng::seed_from_u64(0)).unwrap();
        assert!(draws.iter().all(|&v| v == 0.5));
    }
}
