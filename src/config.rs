//! # Training Configuration (`config`)
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! describes the reference MNIST run.

use crate::data::NoiseDistribution;
use crate::optim::AdamConfig;
use crate::tensor::TensorData;
use crate::utils::serialization::CheckpointFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Architecture of the generator and critic MLPs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub noise_dim: usize,
    pub generator_hidden: Vec<usize>,
    pub critic_hidden: Vec<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            noise_dim: 50,
            generator_hidden: vec![512, 512],
            critic_hidden: vec![512, 256],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    /// Directory holding the IDX training files.
    pub dataset_dir: PathBuf,
    pub num_classes: usize,
    pub epochs: usize,
    /// Total samples per optimizer step, split evenly across workers.
    pub batch_size: usize,
    pub workers: usize,
    /// Gradient penalty weight.
    pub lambda: TensorData,
    pub n_critic: usize,
    pub n_gen: usize,
    pub adaptive_schedule: bool,
    pub generator_optimizer: AdamConfig,
    pub critic_optimizer: AdamConfig,
    pub noise: NoiseDistribution,
    pub model: ModelConfig,
    pub log_every: usize,
    pub checkpoint_every: usize,
    pub sample_count: usize,
    pub checkpoint_dir: PathBuf,
    pub log_dir: PathBuf,
    pub checkpoint_format: CheckpointFormat,
    pub seed: Option<u64>,
    /// Epoch whose checkpoints are restored before training continues.
    pub resume_epoch: Option<usize>,
    pub reject_non_finite: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            dataset_dir: PathBuf::from("data/mnist"),
            num_classes: 10,
            epochs: 50_000,
            batch_size: 256,
            workers: 8,
            lambda: 10.0,
            n_critic: 5,
            n_gen: 1,
            adaptive_schedule: true,
            generator_optimizer: AdamConfig::default(),
            critic_optimizer: AdamConfig::default(),
            noise: NoiseDistribution::default(),
            model: ModelConfig::default(),
            log_every: 10,
            checkpoint_every: 100,
            sample_count: 64,
            checkpoint_dir: PathBuf::from("checkpoints"),
            log_dir: PathBuf::from("logs"),
            checkpoint_format: CheckpointFormat::default(),
            seed: None,
            resume_epoch: None,
            reject_non_finite: false,
        }
    }
}

impl TrainingConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TrainingConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Samples each worker computes per step.
    pub fn per_worker_batch(&self) -> usize {
        self.batch_size / self.workers.max(1)
    }

    /// Samples of `batch_size` that no worker draws when it does not divide
    /// evenly between the workers.
    pub fn dropped_samples(&self) -> usize {
        self.batch_size % self.workers.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("epochs", self.epochs),
            ("batch_size", self.batch_size),
            ("workers", self.workers),
            ("num_classes", self.num_classes),
            ("n_critic", self.n_critic),
            ("n_gen", self.n_gen),
            ("log_every", self.log_every),
            ("checkpoint_every", self.checkpoint_every),
            ("model.noise_dim", self.model.noise_dim),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
        }
        if self.batch_size < self.workers {
            return Err(ConfigError::Invalid(format!(
                "batch_size {} leaves some of the {} workers without samples",
                self.batch_size, self.workers
            )));
        }
        if !(self.lambda >= 0.0) {
            return Err(ConfigError::Invalid(format!("lambda must be >= 0, got {}", self.lambda)));
        }
        for (name, optimizer) in [
            ("generator_optimizer", &self.generator_optimizer),
            ("critic_optimizer", &self.critic_optimizer),
        ] {
            optimizer
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("{}: {}", name, e)))?;
        }
        self.noise
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_the_defaults() {
        let config: TrainingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TrainingConfig::default());
        assert_eq!(config.per_worker_batch(), 32);
        assert_eq!(config.dropped_samples(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn uneven_batch_split_reports_the_remainder() {
        let config = TrainingConfig {
            batch_size: 100,
            workers: 8,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.per_worker_batch(), 12);
        assert_eq!(config.dropped_samples(), 4);
        assert_eq!(config.per_worker_batch() * config.workers + config.dropped_samples(), 100);
    }

    #[test]
    fn partial_overrides_keep_other_defaults() {
        let config: TrainingConfig = serde_json::from_str(
            r#"{
                "batch_size": 64,
                "critic_optimizer": { "learning_rate": 0.0001 },
                "noise": { "kind": "normal", "mean": 0.0, "std_dev": 1.0 },
                "checkpoint_format": "json",
                "seed": 7
            }"#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.critic_optimizer.learning_rate, 1e-4);
        assert_eq!(config.critic_optimizer.beta2, 0.9);
        assert_eq!(config.noise, NoiseDistribution::Normal { mean: 0.0, std_dev: 1.0 });
        assert_eq!(config.checkpoint_format, CheckpointFormat::Json);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.workers, 8);
    }

    #[test]
    fn validation_rejects_degenerate_values() {
        let cases: Vec<Box<dyn Fn(&mut TrainingConfig)>> = vec![
            Box::new(|c| c.workers = 0),
            Box::new(|c| c.batch_size = 0),
            Box::new(|c| c.epochs = 0),
            Box::new(|c| c.batch_size = 4),
            Box::new(|c| c.lambda = -1.0),
            Box::new(|c| c.critic_optimizer.beta2 = 1.0),
            Box::new(|c| c.noise = NoiseDistribution::Uniform { min: 1.0, max: 0.0 }),
            Box::new(|c| c.noise = NoiseDistribution::Uniform { min: -3e38, max: 3e38 }),
            Box::new(|c| c.noise = NoiseDistribution::Normal { mean: 0.0, std_dev: -1.0 }),
            Box::new(|c| c.critic_optimizer.epsilon = 0.0),
        ];
        for mutate in cases {
            let mut config = TrainingConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn load_reports_missing_files_and_bad_json() {
        let dir = std::env::temp_dir().join(format!("wgan_gp_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        assert!(matches!(
            TrainingConfig::load(&dir.join("absent.json")),
            Err(ConfigError::Io { .. })
        ));

        let bad = dir.join("bad.json");
        std::fs::write(&bad, "{ \"epochs\": \"many\" }").unwrap();
        assert!(matches!(TrainingConfig::load(&bad), Err(ConfigError::Parse(_))));

        let good = dir.join("good.json");
        std::fs::write(&good, "{ \"epochs\": 3, \"workers\": 2 }").unwrap();
        let config = TrainingConfig::load(&good).unwrap();
        assert_eq!((config.epochs, config.workers), (3, 2));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
