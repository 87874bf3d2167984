//! # Checkpoint Serialization
//!
//! Saving and loading optimizer snapshots (parameters, moment estimates, step
//! counter and hyper-parameters). Uses `serde` with `bincode` as the default
//! binary format and `serde_json` as a human-readable alternative.

use crate::optim::OptimizerState;
use crate::tensor::TensorData;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

// --- Error Type ---
#[derive(thiserror::Error, Debug)]
pub enum CheckpointError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization Error (Bincode): {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Serialization Error (JSON): {0}")]
    Json(#[from] serde_json::Error),
}

impl CheckpointError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// --- Serializable Tensor Wrapper ---

/// Shape plus row-major values; the on-disk form of every tensor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SerializableTensor {
    pub shape: Vec<usize>,
    pub data: Vec<TensorData>,
}

impl SerializableTensor {
    /// Converts the wrapper back into an `ndarray::ArrayD`.
    pub fn to_array(&self) -> Result<ArrayD<TensorData>, ndarray::ShapeError> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone())
    }
}

impl From<&ArrayD<TensorData>> for SerializableTensor {
    fn from(array: &ArrayD<TensorData>) -> Self {
        SerializableTensor {
            shape: array.shape().to_vec(),
            // `iter()` walks logical order regardless of memory layout.
            data: array.iter().copied().collect(),
        }
    }
}

// --- Format ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointFormat {
    #[default]
    Bincode,
    Json,
}

impl CheckpointFormat {
    pub fn extension(self) -> &'static str {
        match self {
            CheckpointFormat::Bincode => "bin",
            CheckpointFormat::Json => "json",
        }
    }
}

impl fmt::Display for CheckpointFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointFormat::Bincode => write!(f, "bincode"),
            CheckpointFormat::Json => write!(f, "json"),
        }
    }
}

/// `{dir}/{model}.{epoch}.{ext}`
pub fn checkpoint_path(dir: &Path, model: &str, epoch: usize, format: CheckpointFormat) -> PathBuf {
    dir.join(format!("{}.{}.{}", model, epoch, format.extension()))
}

// --- Save / Load ---

/// Writes `state` to `path`, creating parent directories and truncating any
/// existing file.
pub fn save_state(path: &Path, state: &OptimizerState, format: CheckpointFormat) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| CheckpointError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    match format {
        CheckpointFormat::Bincode => bincode::serialize_into(&mut writer, state)?,
        CheckpointFormat::Json => serde_json::to_writer(&mut writer, state)?,
    }
    writer.flush().map_err(|e| CheckpointError::io(path, e))?;
    Ok(())
}

pub fn load_state(path: &Path, format: CheckpointFormat) -> Result<OptimizerState, CheckpointError> {
    let file = File::open(path).map_err(|e| CheckpointError::io(path, e))?;
    let reader = BufReader::new(file);
    let state = match format {
        CheckpointFormat::Bincode => bincode::deserialize_from(reader)?,
        CheckpointFormat::Json => serde_json::from_reader(reader)?,
    };
    Ok(state)
}
