use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::convert::Infallible;
use wgan_gp::nn::{MlpCritic, Model};
use wgan_gp::tensor::{grad, ops, uniform, zeros};
use wgan_gp::utils::parallel::{average_partials, PartialResult, WorkerPool};

const SHAPE: [usize; 3] = [1, 8, 8];

fn critic_partials(c: &mut Criterion) {
    let critic = MlpCritic::new(SHAPE, 10, &[64, 32], &mut StdRng::seed_from_u64(0));
    let mut group = c.benchmark_group("critic_partials");
    for workers in [1, 2, 4, 8] {
        let pool = WorkerPool::new(workers).unwrap();
        let per_worker = 256 / workers;
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter(|| {
                let partials = pool
                    .run_parallel(workers, |unit| -> Result<PartialResult, wgan_gp::tensor::TensorError> {
                        let mut rng = StdRng::seed_from_u64(unit as u64);
                        let images = uniform(&[per_worker, 1, 8, 8], 0.0, 1.0, false, &mut rng);
                        let labels = zeros(&[per_worker, 10], false);
                        let loss = ops::mean(&critic.forward(&images, &labels)?)?;
                        let value = loss.item()?;
                        let gradients = grad(&[loss], &critic.parameter_vector(), false)?;
                        Ok(PartialResult {
                            loss: value,
                            penalty: 0.0,
                            gradients,
                        })
                    })
                    .unwrap();
                black_box(average_partials(partials).unwrap())
            })
        });
    }
    group.finish();
}

fn fork_join_overhead(c: &mut Criterion) {
    let pool = WorkerPool::new(8).unwrap();
    c.bench_function("run_parallel_noop_8", |b| {
        b.iter(|| {
            let results = pool.run_parallel(8, |unit| Ok::<_, Infallible>(unit * 2)).unwrap();
            black_box(results)
        })
    });
}

criterion_group!(benches, critic_partials, fork_join_overhead);
criterion_main!(benches);
