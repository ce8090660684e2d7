pub mod multicore;
pub mod single_core;

pub use multicore::MulticoreSampler;
pub use single_core::SingleCoreSampler;

use rand::rngs::SmallRng;

use crate::{
    error::{ABCErr, ABCResult},
    model::Evaluation,
    parameters::Parameters,
    types::ModelId,
};

/// Default cap on simulations per generation before giving up.
pub const DEFAULT_MAX_TRIALS: u64 = 10_000_000;

/// A proposed particle and what its simulation made of it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    pub model: ModelId,
    pub parameters: Parameters,
    pub evaluation: Evaluation,
}
impl TrialResult {
    pub fn accepted(&self) -> bool {
        self.evaluation.accepted
    }
}

/// One full proposal: choose a model and parameters, simulate, decide.
///
/// Must only draw randomness from the generator it is given so that results
/// are reproducible for a fixed seed.
pub type Trial<'a> = dyn Fn(&mut SmallRng) -> ABCResult<TrialResult> + Sync + 'a;

#[derive(Debug)]
pub struct Sample {
    pub accepted: Vec<TrialResult>,
    pub nr_evaluations: u64,
    pub nr_early_stopped: u64,
}
impl Sample {
    pub fn acceptance_rate(&self) -> f64 {
        if self.nr_evaluations == 0 {
            0.0
        } else {
            cast::f64(self.accepted.len()) / cast::f64(self.nr_evaluations)
        }
    }
}

/// Runs trials until `n` have been accepted.
pub trait Sampler: Send + Sync {
    /// Fails with `SamplerExhausted` if the trial budget runs out first,
    /// and with the trial's own error as soon as any trial fails.
    fn sample_until_n_accepted(&mut self, n: usize, trial: &Trial<'_>) -> ABCResult<Sample>;

    fn max_trials(&self) -> u64;
}

pub(crate) fn exhausted(n: usize, accepted: usize, nr_evaluations: u64) -> ABCErr {
    ABCErr::SamplerExhausted(format!(
        "Only {} of {} particles accepted after {} simulations",
        accepted, n, nr_evaluations
    ))
}

/// Trials to launch so that, at acceptance probability `p_hat`, the
/// remaining `needed` particles are expected to arrive in one batch.
pub(crate) fn batch_size(needed: usize, p_hat: f64, max_batch_size: usize, budget_left: u64) -> usize {
    let expected = if p_hat > 0.0 {
        (needed as f64 / p_hat).ceil()
    } else {
        f64::INFINITY
    };
    let capped = expected.min(max_batch_size as f64).min(budget_left as f64);
    (capped as usize).max(1)
}

/// Smoothed acceptance probability so early batches of zero acceptances
/// still produce a finite size.
pub(crate) fn estimate_acceptance(accepted: u64, evaluations: u64) -> f64 {
    (accepted as f64 + 1.0) / (evaluations as f64 + 2.0)
}
