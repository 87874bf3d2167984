use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use wgan_gp::config::{ConfigError, TrainingConfig};
use wgan_gp::data::load_idx_dataset;
use wgan_gp::error::TrainError;
use wgan_gp::gan::Trainer;
use wgan_gp::nn::{MlpCritic, MlpGenerator};
use wgan_gp::utils::telemetry::{FileSink, NullSink, TelemetrySink};

const SEED_VAR: &str = "WGAN_SEED";

fn load_config() -> Result<TrainingConfig, TrainError> {
    let mut config = match env::args().nth(1) {
        Some(path) => TrainingConfig::load(Path::new(&path))?,
        None => TrainingConfig::default(),
    };
    if let Ok(seed) = env::var(SEED_VAR) {
        let seed = seed
            .parse::<u64>()
            .map_err(|e| ConfigError::Invalid(format!("{SEED_VAR}={seed:?}: {e}")))?;
        config.seed = Some(seed);
    }
    config.validate()?;
    Ok(config)
}

fn run() -> Result<(), TrainError> {
    let config = load_config()?;
    let dataset = load_idx_dataset(&config.dataset_dir, config.num_classes)?;
    let image_shape: [usize; 3] = dataset.sample_shape().try_into().map_err(|_| {
        ConfigError::Invalid(format!(
            "expected [channels, height, width] samples, got {:?}",
            dataset.sample_shape()
        ))
    })?;

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let generator = MlpGenerator::new(
        config.model.noise_dim,
        config.num_classes,
        &config.model.generator_hidden,
        image_shape,
        &mut rng,
    );
    let critic = MlpCritic::new(image_shape, config.num_classes, &config.model.critic_hidden, &mut rng);

    let sink: Box<dyn TelemetrySink> = match FileSink::new(&config.log_dir) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!("telemetry disabled: {e}");
            Box::new(NullSink)
        }
    };

    let mut trainer = Trainer::new(config, generator, critic, Arc::new(dataset), sink)?;
    if let Some(stats) = trainer.train()? {
        info!(
            "finished after epoch {}: loss c: {:.4}, gp: {:.4}, g: {:.4}",
            stats.epoch, stats.critic_loss, stats.gradient_penalty, stats.generator_loss
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
