//! # Training Loop
//!
//! One epoch runs `n_critic` critic updates, then `n_gen` generator updates,
//! feeds the losses to the schedule controller and performs the periodic side
//! effects (scalars, progress log, checkpoints, sample images).
//!
//! Every update is a fork-join round on the worker pool: each worker draws its
//! own sub-batch from an RNG seeded by the trainer's master RNG, computes a
//! partial loss and gradient against the frozen parameters, and the averaged
//! gradient is applied only after all workers have returned.

use super::penalty::gradient_penalty;
use super::schedule::{ScheduleController, StepRatio};
use crate::config::{ConfigError, TrainingConfig};
use crate::data::{BatchSampler, Dataset};
use crate::error::TrainError;
use crate::nn::Model;
use crate::optim::{Adam, Optimizer};
use crate::tensor::{grad, no_grad, ops, TensorData};
use crate::utils::parallel::{average_partials, PartialResult, WorkerPool};
use crate::utils::serialization::{checkpoint_path, load_state, save_state, CheckpointError};
use crate::utils::telemetry::TelemetrySink;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

pub const GENERATOR_NAME: &str = "generator";
pub const CRITIC_NAME: &str = "critic";
pub const SAMPLE_TAG: &str = "generator/output";

/// Losses and schedule of one finished epoch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub n_critic: usize,
    pub n_gen: usize,
    /// Worker-averaged discrimination loss of the last critic update.
    pub critic_loss: TensorData,
    pub gradient_penalty: TensorData,
    /// Worker-averaged loss of the last generator update.
    pub generator_loss: TensorData,
    pub elapsed_ms: u64,
}

/// One critic partial: `mean(D(fake)) - mean(D(real)) + lambda * penalty`,
/// differentiated with respect to the critic's parameters.
fn critic_partial<G: Model, C: Model>(
    generator: &G,
    critic: &C,
    sampler: &BatchSampler,
    batch_size: usize,
    lambda: TensorData,
    seed: u64,
) -> Result<PartialResult, TrainError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let real = sampler.sample_real(batch_size, &mut rng);
    let input = sampler.sample_noise_for(&real.labels, &mut rng)?;
    let fake = {
        let _guard = no_grad();
        generator.forward(&input.data, &input.labels)?.detach()
    };
    let epsilon: TensorData = rng.gen_range(0.0..=1.0);

    let fake_scores = critic.forward(&fake, &real.labels)?;
    let real_scores = critic.forward(&real.data, &real.labels)?;
    let discrimination = ops::sub(&ops::mean(&fake_scores)?, &ops::mean(&real_scores)?)?;
    let penalty = gradient_penalty(critic, &real.data, &fake, &real.labels, epsilon)?;
    let loss = ops::add(&discrimination, &ops::mul_scalar(&penalty, lambda)?)?;

    let (loss_value, penalty_value) = (discrimination.item()?, penalty.item()?);
    let gradients = grad(&[loss], &critic.parameter_vector(), false)?;
    Ok(PartialResult {
        loss: loss_value,
        penalty: penalty_value,
        gradients,
    })
}

/// One generator partial: `-mean(D(G(z)))`, differentiated with respect to the
/// generator's parameters.
fn generator_partial<G: Model, C: Model>(
    generator: &G,
    critic: &C,
    sampler: &BatchSampler,
    batch_size: usize,
    seed: u64,
) -> Result<PartialResult, TrainError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let input = sampler.sample_generator_input(batch_size, &mut rng)?;
    let fake = generator.forward(&input.data, &input.labels)?;
    let scores = critic.forward(&fake, &input.labels)?;
    let loss = ops::neg(&ops::mean(&scores)?)?;

    let loss_value = loss.item()?;
    let gradients = grad(&[loss], &generator.parameter_vector(), false)?;
    Ok(PartialResult {
        loss: loss_value,
        penalty: 0.0,
        gradients,
    })
}

/// Owns both optimizers (and through them both models) plus all state of a run.
pub struct Trainer<G: Model, C: Model> {
    config: TrainingConfig,
    generator: Adam<G>,
    critic: Adam<C>,
    sampler: BatchSampler,
    pool: WorkerPool,
    schedule: ScheduleController,
    rng: StdRng,
    sample_rng: StdRng,
    sink: Box<dyn TelemetrySink>,
    start_epoch: usize,
}

impl<G: Model, C: Model> Trainer<G, C> {
    /// Builds a trainer, restoring `config.resume_epoch` checkpoints if set.
    pub fn new(
        config: TrainingConfig,
        generator: G,
        critic: C,
        dataset: Arc<Dataset>,
        sink: Box<dyn TelemetrySink>,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        if dataset.num_classes() != config.num_classes {
            return Err(ConfigError::Invalid(format!(
                "dataset has {} classes, config expects {}",
                dataset.num_classes(),
                config.num_classes
            ))
            .into());
        }
        if config.dropped_samples() > 0 {
            log::warn!(
                "batch_size {} does not divide between {} workers; each step uses {} samples",
                config.batch_size,
                config.workers,
                config.per_worker_batch() * config.workers
            );
        }

        let generator = Adam::new(generator, config.generator_optimizer)?.reject_non_finite(config.reject_non_finite);
        let critic = Adam::new(critic, config.critic_optimizer)?.reject_non_finite(config.reject_non_finite);
        let sampler = BatchSampler::new(dataset, config.noise, config.model.noise_dim)?;
        let pool = WorkerPool::new(config.workers)?;
        let schedule = ScheduleController::new(
            StepRatio {
                n_critic: config.n_critic,
                n_gen: config.n_gen,
            },
            config.adaptive_schedule,
        );
        let mut rng = config.seed.map(StdRng::seed_from_u64).unwrap_or_else(StdRng::from_entropy);
        let sample_rng = StdRng::seed_from_u64(rng.gen());

        let mut trainer = Trainer {
            config,
            generator,
            critic,
            sampler,
            pool,
            schedule,
            rng,
            sample_rng,
            sink,
            start_epoch: 1,
        };
        if let Some(epoch) = trainer.config.resume_epoch {
            trainer.restore(epoch)?;
            trainer.start_epoch = epoch + 1;
            log::info!("Resumed from epoch {} checkpoints", epoch);
        }
        Ok(trainer)
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn generator(&self) -> &Adam<G> {
        &self.generator
    }

    pub fn critic(&self) -> &Adam<C> {
        &self.critic
    }

    pub fn schedule(&self) -> &ScheduleController {
        &self.schedule
    }

    /// First epoch `train` will run (1 unless resumed).
    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    fn worker_seeds(&mut self) -> Vec<u64> {
        (0..self.pool.workers()).map(|_| self.rng.gen()).collect()
    }

    /// One critic update over `workers` independent sub-batches.
    ///
    /// Returns the worker-averaged discrimination loss and penalty.
    pub fn critic_step(&mut self) -> Result<(TensorData, TensorData), TrainError> {
        let seeds = self.worker_seeds();
        let batch_size = self.config.per_worker_batch();
        let lambda = self.config.lambda;
        let (generator, critic, sampler) = (self.generator.model(), self.critic.model(), &self.sampler);

        let partials = self.pool.run_parallel(seeds.len(), |unit| {
            critic_partial(generator, critic, sampler, batch_size, lambda, seeds[unit])
        })?;
        let averaged = average_partials(partials)?;
        self.critic.update(&averaged.gradients)?;
        Ok((averaged.loss, averaged.penalty))
    }

    /// One generator update; returns the worker-averaged generator loss.
    pub fn generator_step(&mut self) -> Result<TensorData, TrainError> {
        let seeds = self.worker_seeds();
        let batch_size = self.config.per_worker_batch();
        let (generator, critic, sampler) = (self.generator.model(), self.critic.model(), &self.sampler);

        let partials = self.pool.run_parallel(seeds.len(), |unit| {
            generator_partial(generator, critic, sampler, batch_size, seeds[unit])
        })?;
        let averaged = average_partials(partials)?;
        self.generator.update(&averaged.gradients)?;
        Ok(averaged.loss)
    }

    /// Runs `steps` critic updates and returns the losses of the last one.
    pub fn critic_phase(&mut self, steps: usize) -> Result<(TensorData, TensorData), TrainError> {
        let mut last = (0.0, 0.0);
        for _ in 0..steps {
            last = self.critic_step()?;
            log::debug!("critic step {}: loss {:.5}, gp {:.5}", self.critic.step_count(), last.0, last.1);
        }
        Ok(last)
    }

    /// Runs `steps` generator updates and returns the loss of the last one.
    pub fn generator_phase(&mut self, steps: usize) -> Result<TensorData, TrainError> {
        let mut last = 0.0;
        for _ in 0..steps {
            last = self.generator_step()?;
            log::debug!("generator step {}: loss {:.5}", self.generator.step_count(), last);
        }
        Ok(last)
    }

    pub fn run_epoch(&mut self, epoch: usize) -> Result<EpochStats, TrainError> {
        let started = Instant::now();
        let ratio = self.schedule.ratio();
        let (critic_loss, gradient_penalty) = self.critic_phase(ratio.n_critic)?;
        let generator_loss = self.generator_phase(ratio.n_gen)?;
        self.schedule.observe(critic_loss, generator_loss);

        let stats = EpochStats {
            epoch,
            n_critic: ratio.n_critic,
            n_gen: ratio.n_gen,
            critic_loss,
            gradient_penalty,
            generator_loss,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        self.emit_scalars(&stats);

        if epoch % self.config.log_every == 0 {
            log::info!(
                "[{}/{}] [ratio: {}] loss c: {:.4}, gp: {:.4}, g: {:.4} ({} ms)",
                epoch,
                self.config.epochs,
                ratio,
                critic_loss,
                gradient_penalty,
                generator_loss,
                stats.elapsed_ms
            );
        }
        if epoch % self.config.checkpoint_every == 0 {
            self.checkpoint(epoch);
            if let Err(e) = self.export_samples(epoch) {
                log::warn!("Could not export samples for epoch {}: {}", epoch, e);
            }
        }
        Ok(stats)
    }

    /// Runs the remaining epochs, then writes the final checkpoints.
    ///
    /// Returns the stats of the last epoch run, if any.
    pub fn train(&mut self) -> Result<Option<EpochStats>, TrainError> {
        log::info!(
            "Training epochs {}..={} with {} workers, batch {} ({} per worker)",
            self.start_epoch,
            self.config.epochs,
            self.pool.workers(),
            self.config.batch_size,
            self.config.per_worker_batch()
        );
        let mut last = None;
        for epoch in self.start_epoch..=self.config.epochs {
            last = Some(self.run_epoch(epoch)?);
        }
        if self.config.epochs % self.config.checkpoint_every != 0 {
            self.checkpoint(self.config.epochs);
        }
        Ok(last)
    }

    /// Writes both models' optimizer state for `epoch`.
    pub fn save_checkpoint(&self, epoch: usize) -> Result<(), CheckpointError> {
        let dir = &self.config.checkpoint_dir;
        let format = self.config.checkpoint_format;
        save_state(
            &checkpoint_path(dir, GENERATOR_NAME, epoch, format),
            &self.generator.state(),
            format,
        )?;
        save_state(&checkpoint_path(dir, CRITIC_NAME, epoch, format), &self.critic.state(), format)
    }

    /// Loads both models' optimizer state written for `epoch`.
    ///
    /// The schedule's running statistics are not part of a checkpoint and
    /// start again from zero.
    pub fn restore(&mut self, epoch: usize) -> Result<(), TrainError> {
        let dir = &self.config.checkpoint_dir;
        let format = self.config.checkpoint_format;
        let generator = load_state(&checkpoint_path(dir, GENERATOR_NAME, epoch, format), format)?;
        let critic = load_state(&checkpoint_path(dir, CRITIC_NAME, epoch, format), format)?;
        self.generator.load_state(&generator)?;
        self.critic.load_state(&critic)?;
        self.schedule = ScheduleController::new(self.schedule.ratio(), self.config.adaptive_schedule);
        Ok(())
    }

    fn checkpoint(&self, epoch: usize) {
        match self.save_checkpoint(epoch) {
            Ok(()) => log::info!("Wrote checkpoints for epoch {}", epoch),
            Err(e) => log::warn!("Could not write checkpoints for epoch {}: {}", epoch, e),
        }
    }

    fn emit_scalars(&mut self, stats: &EpochStats) {
        let scalars = [
            ("critic/neg_loss", -stats.critic_loss),
            ("critic/gradient_penalty", stats.gradient_penalty),
            ("generator/loss", stats.generator_loss),
        ];
        for (tag, value) in scalars {
            if let Err(e) = self.sink.write_scalar(tag, value, stats.epoch) {
                log::warn!("Could not write {} for epoch {}: {}", tag, stats.epoch, e);
            }
        }
    }

    /// Generates `sample_count` images and hands each to the telemetry sink.
    pub fn export_samples(&mut self, epoch: usize) -> Result<(), TrainError> {
        let count = self.config.sample_count;
        if count == 0 {
            return Ok(());
        }
        let _guard = no_grad();
        let input = self.sampler.sample_generator_input(count, &mut self.sample_rng)?;
        let images = self.generator.model().forward(&input.data, &input.labels)?;
        let image_shape = images.shape()[1..].to_vec();
        for index in 0..count {
            let image = ops::reshape(&ops::narrow(&images, 0, index, 1)?, &image_shape)?;
            self.sink.write_image(SAMPLE_TAG, &image, epoch, index)?;
        }
        Ok(())
    }
}
