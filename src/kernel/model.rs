use rand::{Rng, RngCore};

use crate::{
    error::{ABCErr, ABCResult},
    types::ModelId,
};

/// Proposes a model given the model of a parent particle: stay with
/// probability `probability_to_stay`, otherwise jump uniformly to one of the
/// other models.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPerturbationKernel {
    nr_models: usize,
    probability_to_stay: f64,
}
impl ModelPerturbationKernel {
    pub fn new(nr_models: usize, probability_to_stay: f64) -> ABCResult<Self> {
        if nr_models == 0 {
            return Err(ABCErr::ConfigError("At least one model is required.".into()));
        }
        if !(0.0..=1.0).contains(&probability_to_stay) {
            return Err(ABCErr::ConfigError(format!(
                "Probability to stay must be in [0, 1], got {}",
                probability_to_stay
            )));
        }
        // With a single model there is nowhere to jump to.
        let probability_to_stay = if nr_models == 1 {
            1.0
        } else {
            probability_to_stay
        };
        Ok(Self {
            nr_models,
            probability_to_stay,
        })
    }

    pub fn rvs(&self, from: ModelId, rng: &mut dyn RngCore) -> ModelId {
        if rng.gen::<f64>() < self.probability_to_stay {
            return from;
        }
        let jump = rng.gen_range(0..self.nr_models - 1);
        if jump >= from {
            jump + 1
        } else {
            jump
        }
    }

    pub fn pmf(&self, to: ModelId, from: ModelId) -> f64 {
        if to >= self.nr_models || from >= self.nr_models {
            0.0
        } else if to == from {
            self.probability_to_stay
        } else {
            (1.0 - self.probability_to_stay) / (self.nr_models - 1) as f64
        }
    }
}
