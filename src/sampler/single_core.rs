use rand::{rngs::SmallRng, SeedableRng};

use super::{exhausted, Sample, Sampler, Trial, DEFAULT_MAX_TRIALS};
use crate::error::{ABCErr, ABCResult};

/// Runs trials one after another on the calling thread.
#[derive(Debug, Clone)]
pub struct SingleCoreSampler {
    rng: SmallRng,
    max_trials: u64,
}
impl SingleCoreSampler {
    pub fn new(seed: Option<u64>, max_trials: u64) -> ABCResult<Self> {
        if max_trials == 0 {
            return Err(ABCErr::ConfigError("Trial budget must be positive.".into()));
        }
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Ok(Self { rng, max_trials })
    }
}
impl Default for SingleCoreSampler {
    fn default() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
            max_trials: DEFAULT_MAX_TRIALS,
        }
    }
}
impl Sampler for SingleCoreSampler {
    fn sample_until_n_accepted(&mut self, n: usize, trial: &Trial<'_>) -> ABCResult<Sample> {
        let mut accepted = Vec::with_capacity(n);
        let mut nr_evaluations = 0;
        let mut nr_early_stopped = 0;

        while accepted.len() < n {
            if nr_evaluations >= self.max_trials {
                return Err(exhausted(n, accepted.len(), nr_evaluations));
            }
            let result = trial(&mut self.rng)?;
            nr_evaluations += 1;
            if result.evaluation.early_stopped {
                nr_early_stopped += 1;
            }
            if result.accepted() {
                accepted.push(result);
            }
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
