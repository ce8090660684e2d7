use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::SmallRng,
};

use crate::{
    error::{ABCErr, ABCResult},
    kernel::{joint::transition_for, Transition},
    model::{ModelSet, TrialContext},
    parameters::{Parameters, SummaryStatistics},
    sampler::TrialResult,
    types::{Generation, ModelId, Particle},
};

/// Where the particles of the next generation are proposed from.
#[derive(Debug)]
pub enum GenWrapper {
    Prior,
    Emp(Box<Empirical>),
}
impl GenWrapper {
    pub fn from_prior() -> Self {
        Self::Prior
    }

    pub fn from_generation(
        gen: &Generation,
        models: &ModelSet,
        continuous: &dyn Transition,
        discrete: &dyn Transition,
    ) -> ABCResult<Self> {
        Ok(Self::Emp(Box::new(Empirical::new(gen, models, continuous, discrete)?)))
    }

    pub fn empirical(&self) -> Option<&Empirical> {
        match self {
            GenWrapper::Emp(e) => Some(e),
            GenWrapper::Prior => None,
        }
    }
}

/// A completed generation prepared for proposing: model probabilities and a
/// kernel fitted to every model still alive. Integer-coded parameters are
/// moved by the `discrete` kernel, the rest by `continuous`.
#[derive(Debug)]
pub struct Empirical {
    generation_number: u16,
    model_probabilities: Vec<f64>,
    model_index: WeightedIndex<f64>,
    transitions: Vec<Option<Box<dyn Transition>>>,
}
impl Empirical {
    pub fn new(
        gen: &Generation,
        models: &ModelSet,
        continuous: &dyn Transition,
        discrete: &dyn Transition,
    ) -> ABCResult<Self> {
        let model_probabilities = gen.model_probabilities(models.len());
        let model_index = WeightedIndex::new(&model_probabilities).map_err(|e| {
            ABCErr::DomainError(format!("Invalid model probabilities {:?}: {}", model_probabilities, e))
        })?;

        let transitions = (0..models.len())
            .map(|m| match gen.population(m) {
                Some(population) => {
                    let (parameters, weights) = population.weighted_parameters();
                    let prior = &models.get(m).prior;
                    let mut transition = transition_for(
                        &prior.parameter_names(),
                        &prior.discrete_parameter_names(),
                        continuous,
                        discrete,
                    )?;
                    transition
                        .fit(&parameters, &weights)
                        .map_err(|e| e.in_generation(gen.number, Some(m)))?;
                    Ok(Some(transition))
                }
                None => {
                    log::debug!("Model {} is dead after generation {}", m, gen.number);
                    Ok(None)
                }
            })
            .collect::<ABCResult<Vec<_>>>()?;

        Ok(Self {
            generation_number: gen.number,
            model_probabilities,
            model_index,
            transitions,
        })
    }

    pub fn generation_number(&self) -> u16 {
        self.generation_number
    }

    pub fn model_probabilities(&self) -> &[f64] {
        &self.model_probabilities
    }

    pub fn transition(&self, model: ModelId) -> Option<&dyn Transition> {
        self.transitions.get(model).and_then(|t| t.as_deref())
    }

    /// Fitted kernel and probability of every model still alive.
    pub fn alive(&self) -> Vec<(&dyn Transition, f64)> {
        self.transitions
            .iter()
            .zip(&self.model_probabilities)
            .filter_map(|(t, p)| t.as_deref().map(|t| (t, *p)))
            .collect()
    }
}

/// Everything one generation's trials share.
pub struct Proposer<'a> {
    pub models: &'a ModelSet,
    pub source: &'a GenWrapper,
    pub observed: &'a SummaryStatistics,
    pub epsilon: f64,
    pub generation: u16,
    pub max_proposal_attempts: usize,
}
impl Proposer<'_> {
    /// Sample from the priors at t = 0, otherwise pick a parent model by its
    /// probability, move it with the model kernel and perturb a particle of
    /// the chosen model. Proposals outside the prior support are redrawn.
    pub fn propose(&self, rng: &mut SmallRng) -> ABCResult<(ModelId, Parameters)> {
        let empirical = match self.source {
            GenWrapper::Prior => {
                let model = self.models.sample_model(rng);
                return Ok((model, self.models.get(model).prior.sample(rng)));
            }
            GenWrapper::Emp(e) => e,
        };

        for _ in 0..self.max_proposal_attempts {
            let parent_model = empirical.model_index.sample(rng);
            let model = self.models.kernel().rvs(parent_model, rng);
            if self.models.prior()[model] <= 0.0 {
                continue;
            }
            // Dead models are never proposed again.
            let Some(transition) = empirical.transition(model) else {
                continue;
            };
            let parameters = transition.rvs(rng)?;
            if self.models.get(model).prior.density(&parameters)? > 0.0 {
                return Ok((model, parameters));
            }
        }
        Err(ABCErr::SamplerExhausted(format!(
            "No proposal inside the prior support after {} attempts",
            self.max_proposal_attempts
        )))
    }

    pub fn trial(&self, rng: &mut SmallRng) -> ABCResult<TrialResult> {
        let (model, parameters) = self.propose(rng)?;
        let context = TrialContext {
            observed: self.observed,
            generation: self.generation,
            model,
        };
        let evaluation = self.models.get(model).simulator.evaluate(
            &parameters,
            self.epsilon,
            self.models.distance(),
            &context,
            rng,
        )?;
        Ok(TrialResult {
            model,
            parameters,
            evaluation,
        })
    }

    /// Calculate a **not**-normalised weight for an accepted trial.
    pub fn weigh(&self, result: TrialResult) -> ABCResult<Particle> {
        let distance = result.evaluation.distance.ok_or_else(|| {
            ABCErr::ModelError("Accepted particle has no distance".into())
        })?;

        let weight = match self.source {
            GenWrapper::Prior => 1.0,
            GenWrapper::Emp(empirical) => {
                let model_factor: f64 = empirical
                    .model_probabilities
                    .iter()
                    .enumerate()
                    .map(|(from, p)| p * self.models.kernel().pmf(result.model, from))
                    .sum();
                let transition = empirical.transition(result.model).ok_or_else(|| {
                    ABCErr::DomainError(format!("Particle proposed for dead model {}", result.model))
                })?;
                let particle_factor = transition.density(&result.parameters)?;
                let prior = self.models.prior()[result.model]
                    * self.models.get(result.model).prior.density(&result.parameters)?;
                prior / (model_factor * particle_factor)
            }
        };
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(ABCErr::DomainError(format!(
                "Particle weight {} is not a finite non-negative number",
                weight
            )));
        }

        Ok(Particle {
            model: result.model,
            parameters: result.parameters,
            summary: result.evaluation.summary,
            distance,
            weight,
            accepted: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::{
        kernel::{DiscreteRandomWalkTransition, MultivariateNormalTransition},
        model::{Model, PNormDistance, Simulator},
        prior::{ProductPrior, RV},
    };

    fn echo_model(name: &str, low: f64, high: f64) -> ABCResult<Model> {
        Ok(Model::new(
            name,
            ProductPrior::new([("x", RV::uniform(low, high))])?,
            Simulator::two_stage(
                |p: &Parameters, _: &TrialContext, _: &mut dyn rand::RngCore| -> ABCResult<SummaryStatistics> {
                    Ok([("y".to_string(), p["x"])].into_iter().collect())
                },
            ),
        ))
    }

    fn two_models() -> ABCResult<ModelSet> {
        ModelSet::new(
            vec![echo_model("a", 0.0, 1.0)?, echo_model("b", 0.0, 1.0)?],
            Some(Box::new(PNormDistance::new(1.0)?)),
        )
    }

    fn previous_generation(models: &[ModelId]) -> ABCResult<Generation> {
        let particles = models
            .iter()
            .enumerate()
            .map(|(i, m)| Particle {
                model: *m,
                parameters: Parameters::from([("x", 0.1 + 0.08 * i as f64)]),
                summary: None,
                distance: 0.1,
                weight: 1.0,
                accepted: true,
            })
            .collect();
        Generation::new(0, 1.0, particles, 20, 0)
    }

    #[test]
    fn prior_particles_have_unit_weight() -> ABCResult<()> {
        let models = two_models()?;
        let observed: SummaryStatistics = [("y".to_string(), 0.5)].into_iter().collect();
        let source = GenWrapper::from_prior();
        let proposer = Proposer {
            models: &models,
            source: &source,
            observed: &observed,
            epsilon: f64::INFINITY,
            generation: 0,
            max_proposal_attempts: 10,
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let result = proposer.trial(&mut rng)?;
        assert!(result.accepted());
        let particle = proposer.weigh(result)?;
        assert_eq!(1.0, particle.weight);
        assert!(particle.summary.is_some());
        Ok(())
    }

    #[test]
    fn dead_model_never_proposed() -> ABCResult<()> {
        let models = two_models()?.with_stay_probability(0.0)?;
        // Model 1 has no particles, so every jump to it is redrawn.
        let gen = previous_generation(&[0, 0, 0, 0, 0])?;
        let source = GenWrapper::from_generation(
            &gen,
            &models,
            &MultivariateNormalTransition::default(),
            &DiscreteRandomWalkTransition::default(),
        )?;
        assert!(source.empirical().unwrap().transition(1).is_none());

        let observed: SummaryStatistics = [("y".to_string(), 0.5)].into_iter().collect();
        let proposer = Proposer {
            models: &models,
            source: &source,
            observed: &observed,
            epsilon: f64::INFINITY,
            generation: 1,
            max_proposal_attempts: 50,
        };
        let mut rng = SmallRng::seed_from_u64(2);
        // With stay probability 0 a parent from model 0 always jumps to the dead model.
        let result = proposer.propose(&mut rng);
        assert!(matches!(result, Err(ABCErr::SamplerExhausted(_))));
        Ok(())
    }

    #[test]
    fn empirical_weight_matches_formula() -> ABCResult<()> {
        let models = two_models()?.with_stay_probability(0.8)?;
        let gen = previous_generation(&[0, 0, 0, 1, 1, 1, 1, 1])?;
        let source = GenWrapper::from_generation(
            &gen,
            &models,
            &MultivariateNormalTransition::default(),
            &DiscreteRandomWalkTransition::default(),
        )?;
        let empirical = source.empirical().unwrap();
        assert!((empirical.model_probabilities()[0] - 0.375).abs() < 1e-12);

        let observed: SummaryStatistics = [("y".to_string(), 0.5)].into_iter().collect();
        let proposer = Proposer {
            models: &models,
            source: &source,
            observed: &observed,
            epsilon: f64::INFINITY,
            generation: 1,
            max_proposal_attempts: 100,
        };
        let mut rng = SmallRng::seed_from_u64(3);
        let result = proposer.trial(&mut rng)?;
        let model = result.model;
        let parameters = result.parameters.clone();
        let particle = proposer.weigh(result)?;

        let probabilities = empirical.model_probabilities();
        let model_factor = probabilities[model] * 0.8 + probabilities[1 - model] * 0.2;
        let expected = 0.5 * 1.0 / (model_factor * empirical.transition(model).unwrap().density(&parameters)?);
        assert!((particle.weight - expected).abs() < 1e-9 * expected);
        Ok(())
    }

    #[test]
    fn proposals_stay_inside_prior_support() -> ABCResult<()> {
        let models = two_models()?;
        let gen = previous_generation(&[0, 0, 0, 0, 1, 1, 1, 1])?;
        let source = GenWrapper::from_generation(
            &gen,
            &models,
            &MultivariateNormalTransition::new(25.0, 1e-6),
            &DiscreteRandomWalkTransition::default(),
        )?;
        let observed = SummaryStatistics::new();
        let proposer = Proposer {
            models: &models,
            source: &source,
            observed: &observed,
            epsilon: 1.0,
            generation: 1,
            max_proposal_attempts: 10_000,
        };
        let mut rng = SmallRng::seed_from_u64(4);
        for _ in 0..200 {
            let (_, parameters) = proposer.propose(&mut rng)?;
            assert!((0.0..=1.0).contains(&parameters["x"]));
        }
        Ok(())
    }
}
