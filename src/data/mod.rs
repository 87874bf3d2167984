//! # Training Data (`data`)
//!
//! The in-memory labelled image set, the IDX (MNIST) loader that fills it, and
//! the batch sampler the training workers draw from.

use crate::tensor::{Tensor, TensorData};
use ndarray::{ArrayD, Axis, IxDyn};
use std::path::PathBuf;

pub mod idx;
pub mod sampler;

pub use idx::load_idx_dataset;
pub use sampler::{BatchSampler, NoiseDistribution};

#[derive(thiserror::Error, Debug)]
pub enum DataError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed IDX {kind} file: {reason}")]
    Malformed { kind: &'static str, reason: String },
    #[error("Found {images} images but {labels} labels")]
    CountMismatch { images: usize, labels: usize },
    #[error("Label {label} of sample {index} is outside [0, {num_classes})")]
    LabelOutOfRange {
        index: usize,
        label: usize,
        num_classes: usize,
    },
    #[error("Dataset is empty")]
    Empty,
    #[error("Invalid noise distribution: {0}")]
    InvalidNoise(String),
    #[error("ndarray error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// One minibatch: `data` is `[batch, ...]`, `labels` is one-hot `[batch, num_classes]`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub data: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.data.shape().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Full training split held in memory; shared read-only between workers.
#[derive(Debug, Clone)]
pub struct Dataset {
    images: ArrayD<TensorData>,
    labels: Vec<usize>,
    num_classes: usize,
}

impl Dataset {
    /// `images` is `[N, ...]`; `labels` holds one class index per image.
    pub fn new(images: ArrayD<TensorData>, labels: Vec<usize>, num_classes: usize) -> Result<Self, DataError> {
        let count = images.shape().first().copied().unwrap_or(0);
        if count == 0 || images.ndim() < 2 {
            return Err(DataError::Empty);
        }
        if count != labels.len() {
            return Err(DataError::CountMismatch {
                images: count,
                labels: labels.len(),
            });
        }
        if let Some((index, &label)) = labels.iter().enumerate().find(|(_, l)| **l >= num_classes) {
            return Err(DataError::LabelOutOfRange {
                index,
                label,
                num_classes,
            });
        }
        Ok(Dataset {
            images,
            labels,
            num_classes,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Shape of a single sample, e.g. `[1, 28, 28]`.
    pub fn sample_shape(&self) -> &[usize] {
        &self.images.shape()[1..]
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Gathers the given samples into a batch (indices may repeat).
    pub fn gather(&self, indices: &[usize]) -> Batch {
        let data = self.images.select(Axis(0), indices);
        let classes: Vec<usize> = indices.iter().map(|&i| self.labels[i]).collect();
        Batch {
            data: Tensor::new(data, false),
            labels: Tensor::new(one_hot(&classes, self.num_classes), false),
        }
    }
}

/// `[n, num_classes]` one-hot rows for the given class indices.
pub fn one_hot(classes: &[usize], num_classes: usize) -> ArrayD<TensorData> {
    let mut encoded = ArrayD::zeros(IxDyn(&[classes.len(), num_classes]));
    for (row, &class) in classes.iter().enumerate() {
        encoded[[row, class].as_slice()] = 1.0;
    }
    encoded
}
