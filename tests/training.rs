use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use wgan_gp::config::TrainingConfig;
use wgan_gp::data::Dataset;
use wgan_gp::gan::{gradient_penalty, EpochStats, Trainer};
use wgan_gp::nn::Model;
use wgan_gp::optim::{Adam, AdamConfig, Optimizer};
use wgan_gp::tensor::{ops, Tensor, TensorError};
use wgan_gp::utils::serialization::{load_state, save_state, CheckpointFormat};
use wgan_gp::utils::telemetry::{FileSink, NullSink, SCALARS_FILE};

/// `image = a * noise + b`, one pixel per sample.
#[derive(Debug)]
struct LinearGenerator {
    a: Tensor,
    b: Tensor,
}

impl LinearGenerator {
    fn new(a: f32, b: f32) -> Self {
        LinearGenerator {
            a: Tensor::from_vec(&[1], vec![a]).unwrap().requiring_grad(),
            b: Tensor::from_vec(&[1], vec![b]).unwrap().requiring_grad(),
        }
    }
}

impl Model for LinearGenerator {
    fn forward(&self, noise: &Tensor, _labels: &Tensor) -> Result<Tensor, TensorError> {
        let batch = noise.shape()[0];
        let pixels = ops::add(&ops::mul(noise, &self.a)?, &self.b)?;
        ops::reshape(&pixels, &[batch, 1, 1, 1])
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        BTreeMap::from([("a".to_string(), self.a.clone()), ("b".to_string(), self.b.clone())])
    }
}

/// `score = w * pixel + c`.
#[derive(Debug)]
struct LinearCritic {
    w: Tensor,
    c: Tensor,
}

impl LinearCritic {
    fn new(w: f32, c: f32) -> Self {
        LinearCritic {
            w: Tensor::from_vec(&[1], vec![w]).unwrap().requiring_grad(),
            c: Tensor::from_vec(&[1], vec![c]).unwrap().requiring_grad(),
        }
    }
}

impl Model for LinearCritic {
    fn forward(&self, images: &Tensor, _labels: &Tensor) -> Result<Tensor, TensorError> {
        let flat = ops::flatten_batch(images)?;
        ops::add(&ops::mul(&flat, &self.w)?, &self.c)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        BTreeMap::from([("c".to_string(), self.c.clone()), ("w".to_string(), self.w.clone())])
    }
}

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("wgan_gp_it_{}_{}", name, std::process::id()))
}

/// Single-pixel images around 0.7, ten classes.
fn toy_dataset() -> Arc<Dataset> {
    let mut rng = StdRng::seed_from_u64(99);
    let pixels: Vec<f32> = (0..512).map(|_| 0.7 + rng.gen_range(-0.1..0.1)).collect();
    let images = ArrayD::from_shape_vec(IxDyn(&[512, 1, 1, 1]), pixels).unwrap();
    let labels = (0..512).map(|i| i % 10).collect();
    Arc::new(Dataset::new(images, labels, 10).unwrap())
}

fn toy_config(seed: u64, name: &str) -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.batch_size = 256;
    config.workers = 8;
    config.n_critic = 5;
    config.n_gen = 1;
    config.lambda = 10.0;
    config.epochs = 3;
    config.model.noise_dim = 1;
    config.seed = Some(seed);
    config.checkpoint_dir = temp_dir(name);
    config
}

fn toy_trainer(config: TrainingConfig) -> Trainer<LinearGenerator, LinearCritic> {
    Trainer::new(
        config,
        LinearGenerator::new(0.5, 0.1),
        LinearCritic::new(0.8, 0.0),
        toy_dataset(),
        Box::new(NullSink),
    )
    .unwrap()
}

fn trajectory(seed: u64) -> Vec<EpochStats> {
    let mut trainer = toy_trainer(toy_config(seed, "trajectory"));
    (1..=3).map(|epoch| trainer.run_epoch(epoch).unwrap()).collect()
}

fn losses(stats: &[EpochStats]) -> Vec<(f32, f32, f32)> {
    stats
        .iter()
        .map(|s| (s.critic_loss, s.gradient_penalty, s.generator_loss))
        .collect()
}

#[test]
fn fixed_seed_gives_a_reproducible_loss_trajectory() {
    let first = trajectory(2024);
    let second = trajectory(2024);
    assert_eq!(losses(&first), losses(&second));
    assert!(first.iter().all(|s| (s.n_critic, s.n_gen) == (5, 1)));
    assert!(losses(&first)
        .iter()
        .all(|(c, gp, g)| c.is_finite() && gp.is_finite() && g.is_finite()));

    let other = trajectory(7);
    assert_ne!(losses(&first), losses(&other));
}

#[test]
fn critic_phase_then_generator_phase_updates_each_model() {
    let mut trainer = toy_trainer(toy_config(3, "phases"));
    let (critic_loss, penalty) = trainer.critic_phase(5).unwrap();
    assert_eq!(trainer.critic().step_count(), 5);
    assert_eq!(trainer.generator().step_count(), 0);
    // |w| stays near 0.8 after five small steps, so the penalty is about (0.8 - 1)^2.
    assert!(penalty > 0.0 && penalty < 0.2, "penalty {}", penalty);
    assert!(critic_loss.is_finite());

    let a_before = trainer.generator().model().a.to_vec();
    trainer.generator_phase(1).unwrap();
    assert_eq!(trainer.generator().step_count(), 1);
    assert_ne!(trainer.generator().model().a.to_vec(), a_before);
}

#[test]
fn linear_critic_penalty_is_the_squared_slope_deviation() {
    let critic = LinearCritic::new(3.0, 0.5);
    let real = Tensor::from_vec(&[4, 1, 1, 1], vec![0.1, 0.4, 0.6, 0.9]).unwrap();
    let fake = Tensor::from_vec(&[4, 1, 1, 1], vec![0.0, 0.2, 0.3, 0.5]).unwrap();
    let labels = Tensor::new(ArrayD::zeros(IxDyn(&[4, 10])), false);
    let penalty = gradient_penalty(&critic, &real, &fake, &labels, 0.37).unwrap();
    assert_abs_diff_eq!(penalty.item().unwrap(), 4.0, epsilon = 1e-5);
}

#[test]
fn checkpoint_round_trip_continues_identically() {
    for format in [CheckpointFormat::Bincode, CheckpointFormat::Json] {
        let dir = temp_dir(&format!("roundtrip_{}", format));
        let path = dir.join(format!("critic.1.{}", format.extension()));
        let config = AdamConfig::default();

        let mut original = Adam::new(LinearCritic::new(0.8, -0.2), config).unwrap();
        for g in [[0.3, -1.0], [0.1, 0.5], [-0.2, 2.0]] {
            let grads = vec![Tensor::from_vec(&[1], vec![g[0]]).unwrap(), Tensor::from_vec(&[1], vec![g[1]]).unwrap()];
            original.update(&grads).unwrap();
        }
        save_state(&path, &original.state(), format).unwrap();

        let mut restored = Adam::new(LinearCritic::new(0.0, 0.0), config).unwrap();
        restored.load_state(&load_state(&path, format).unwrap()).unwrap();
        assert_eq!(restored.state(), original.state());
        assert_eq!(restored.step_count(), 3);

        let next = vec![Tensor::from_vec(&[1], vec![-0.4]).unwrap(), Tensor::from_vec(&[1], vec![0.7]).unwrap()];
        original.update(&next).unwrap();
        restored.update(&next).unwrap();
        assert_eq!(restored.model().w.to_vec(), original.model().w.to_vec());
        assert_eq!(restored.model().c.to_vec(), original.model().c.to_vec());
        assert_eq!(restored.first_moments(), original.first_moments());
        assert_eq!(restored.second_moments(), original.second_moments());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

#[test]
fn full_run_writes_scalars_samples_and_checkpoints() {
    let log_dir = temp_dir("run_logs");
    let mut config = toy_config(5, "run_checkpoints");
    config.epochs = 4;
    config.checkpoint_every = 2;
    config.sample_count = 3;
    config.log_every = 1;
    config.log_dir = log_dir.clone();
    let checkpoint_dir = config.checkpoint_dir.clone();

    let sink = FileSink::new(&log_dir).unwrap();
    let mut trainer = Trainer::new(
        config,
        LinearGenerator::new(0.5, 0.1),
        LinearCritic::new(0.8, 0.0),
        toy_dataset(),
        Box::new(sink),
    )
    .unwrap();
    let last = trainer.train().unwrap().unwrap();
    assert_eq!(last.epoch, 4);

    let scalars = std::fs::read_to_string(log_dir.join(SCALARS_FILE)).unwrap();
    assert_eq!(scalars.lines().count(), 12);
    for epoch in [2, 4] {
        for index in 0..3 {
            let png = log_dir.join(format!("images/generator/output/{}_{}.png", epoch, index));
            assert!(png.is_file(), "missing {}", png.display());
        }
        for model in ["generator", "critic"] {
            assert!(checkpoint_dir.join(format!("{}.{}.bin", model, epoch)).is_file());
        }
    }

    // Resuming from epoch 2 restores the generator written at that point.
    let mut resume = toy_config(5, "run_checkpoints");
    resume.epochs = 4;
    resume.resume_epoch = Some(2);
    let resumed = Trainer::new(
        resume,
        LinearGenerator::new(0.0, 0.0),
        LinearCritic::new(0.0, 0.0),
        toy_dataset(),
        Box::new(NullSink),
    )
    .unwrap();
    assert_eq!(resumed.start_epoch(), 3);
    assert_eq!(resumed.critic().step_count(), 10);
    assert_ne!(resumed.generator().model().a.to_vec(), vec![0.0]);

    std::fs::remove_dir_all(&log_dir).unwrap();
    std::fs::remove_dir_all(&checkpoint_dir).unwrap();
}
