//! # Parallelism Utilities (CPU Threading)
//!
//! Fork-join execution of per-worker gradient computations on a dedicated
//! `rayon` pool, and the deterministic averaging of their partial results.
//!
//! Workers receive shared references only. Each returns an owned
//! [`PartialResult`] that lands in its own slot of the result vector, so no
//! locking is involved, and the caller cannot mutate model parameters until
//! `run_parallel` has returned, i.e. after every worker has finished.

use crate::tensor::{Tensor, TensorData, TensorError};
use ndarray::ArrayD;
use rayon::prelude::*;
use std::ops::Range;

/// Splits `[0, unit_count)` into contiguous ranges, one per worker.
///
/// Every range holds `unit_count / worker_count` units and the last one also
/// absorbs the remainder. A worker count above `unit_count` is clamped so no
/// range is empty; zero units (or zero workers) yield no ranges.
pub fn partition(unit_count: usize, worker_count: usize) -> Vec<Range<usize>> {
    let workers = worker_count.min(unit_count);
    if workers == 0 {
        return Vec::new();
    }
    let chunk = unit_count / workers;
    (0..workers)
        .map(|w| {
            let start = w * chunk;
            let end = if w + 1 == workers { unit_count } else { start + chunk };
            start..end
        })
        .collect()
}

/// A fixed pool of worker threads used for every fork-join round of a run.
#[derive(Debug)]
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("wgan-worker-{}", i))
            .build()?;
        Ok(WorkerPool { pool, workers: workers.max(1) })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `task(unit)` for every unit in `[0, unit_count)` and returns the
    /// results in unit order.
    ///
    /// Units are partitioned across the pool's workers; each worker runs its
    /// range sequentially. Blocks until every unit has finished, then reports
    /// the error of the lowest failing unit, if any.
    pub fn run_parallel<T, E, F>(&self, unit_count: usize, task: F) -> Result<Vec<T>, E>
    where
        T: Send,
        E: Send,
        F: Fn(usize) -> Result<T, E> + Sync,
    {
        let ranges = partition(unit_count, self.workers);
        let per_worker: Vec<Vec<Result<T, E>>> = self.pool.install(|| {
            ranges
                .into_par_iter()
                .map(|range| range.map(&task).collect())
                .collect()
        });
        per_worker.into_iter().flatten().collect()
    }
}

/// Output of one worker for one optimizer step.
///
/// `gradients` are aligned with the optimized model's `parameter_vector()`.
/// `penalty` is zero for generator steps.
#[derive(Debug, Clone)]
pub struct PartialResult {
    pub loss: TensorData,
    pub penalty: TensorData,
    pub gradients: Vec<Tensor>,
}

/// Elementwise mean of the partial results, summed in index order.
///
/// The sum starts from the first partial rather than from zero, so a single
/// partial is returned unchanged, bit for bit.
pub fn average_partials(partials: Vec<PartialResult>) -> Result<PartialResult, TensorError> {
    let count = partials.len();
    let mut iter = partials.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| TensorError::InvalidArgument("cannot average zero partial results".to_string()))?;

    let mut loss = first.loss;
    let mut penalty = first.penalty;
    let mut sums: Vec<ArrayD<TensorData>> = first.gradients.iter().map(Tensor::data_clone).collect();

    for partial in iter {
        if partial.gradients.len() != sums.len() {
            return Err(TensorError::InvalidArgument(format!(
                "partial result holds {} gradients, expected {}",
                partial.gradients.len(),
                sums.len()
            )));
        }
        loss += partial.loss;
        penalty += partial.penalty;
        for (sum, gradient) in sums.iter_mut().zip(&partial.gradients) {
            let gradient = gradient.data();
            if sum.shape() != gradient.shape() {
                return Err(TensorError::ShapeMismatch {
                    expected: sum.shape().to_vec(),
                    got: gradient.shape().to_vec(),
                });
            }
            *sum += &*gradient;
        }
    }

    let divisor = count as TensorData;
    Ok(PartialResult {
        loss: loss / divisor,
        penalty: penalty / divisor,
        gradients: sums.into_iter().map(|sum| Tensor::new(sum / divisor, false)).collect(),
    })
}
