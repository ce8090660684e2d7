use log::{debug, trace};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rayon::prelude::*;

use super::{batch_size, estimate_acceptance, exhausted, Sample, Sampler, Trial, TrialResult};
use crate::error::{ABCErr, ABCResult};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Runs trials in parallel batches on a dedicated rayon pool.
///
/// Every trial gets its own generator seeded from the sampler's master
/// generator in launch order, and results are merged in launch order, so a
/// fixed seed gives the same population whatever the thread count.
pub struct MulticoreSampler {
    pool: rayon::ThreadPool,
    rng: SmallRng,
    max_trials: u64,
    max_batch_size: usize,
}
impl MulticoreSampler {
    /// `num_threads` of `None` lets rayon pick one per core.
    pub fn new(
        num_threads: Option<usize>,
        seed: Option<u64>,
        max_trials: u64,
        max_batch_size: usize,
    ) -> ABCResult<Self> {
        if max_trials == 0 || max_batch_size == 0 {
            return Err(ABCErr::ConfigError(
                "Trial budget and batch size must be positive.".into(),
            ));
        }
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = num_threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| ABCErr::ConfigError(format!("Failed to build thread pool: {}", e)))?;
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Ok(Self {
            pool,
            rng,
            max_trials,
            max_batch_size,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn run_batch(&mut self, size: usize, trial: &Trial<'_>) -> Vec<ABCResult<TrialResult>> {
        let seeds: Vec<u64> = (0..size).map(|_| self.rng.gen()).collect();
        self.pool.install(|| {
            seeds
                .into_par_iter()
                .map(|seed| {
                    let mut rng = SmallRng::seed_from_u64(seed);
                    trial(&mut rng)
                })
                .collect()
        })
    }
}
impl Sampler for MulticoreSampler {
    fn sample_until_n_accepted(&mut self, n: usize, trial: &Trial<'_>) -> ABCResult<Sample> {
        let mut accepted = Vec::with_capacity(n);
        let mut nr_evaluations: u64 = 0;
        let mut nr_early_stopped: u64 = 0;
        let mut nr_accepted_total: u64 = 0;

        while accepted.len() < n {
            let budget_left = self.max_trials.saturating_sub(nr_evaluations);
            if budget_left == 0 {
                return Err(exhausted(n, accepted.len(), nr_evaluations));
            }
            let p_hat = estimate_acceptance(nr_accepted_total, nr_evaluations);
            let size = batch_size(n - accepted.len(), p_hat, self.max_batch_size, budget_left);
            trace!("Launching batch of {} trials (p_hat = {:.4})", size, p_hat);

            let mut batch_accepted = Vec::new();
            for result in self.run_batch(size, trial) {
                let result = result?;
                nr_evaluations += 1;
                if result.evaluation.early_stopped {
                    nr_early_stopped += 1;
                }
                if result.accepted() {
                    batch_accepted.push(result);
                }
            }
            nr_accepted_total += batch_accepted.len() as u64;

            let needed = n - accepted.len();
            if batch_accepted.len() > needed {
                debug!(
                    "Discarding {} excess accepted particles",
                    batch_accepted.len() - needed
                );
                batch_accepted.truncate(needed);
            }
            accepted.extend(batch_accepted);
        }

        Ok(Sample {
            accepted,
            nr_evaluations,
            nr_early_stopped,
        })
    }

    fn max_trials(&self) -> u64 {
        self.max_trials
    }
}
