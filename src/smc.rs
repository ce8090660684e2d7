use std::sync::Arc;

use log::{debug, error, info};
use rand::{rngs::SmallRng, SeedableRng};

use crate::{
    config::AbcConfig,
    epsilon::{Epsilon, QuantileEpsilon},
    error::{ABCErr, ABCResult},
    generation::{GenWrapper, Proposer},
    kernel::{DiscreteRandomWalkTransition, MultivariateNormalTransition, Transition},
    model::{Distance, Model, ModelSet},
    parameters::SummaryStatistics,
    population::{ConstantPopulationSize, PopulationStrategy},
    sampler::{Sampler, SingleCoreSampler},
    storage::{HistoryStore, RunId, RunInfo},
    types::Generation,
};

pub const DEFAULT_MAX_PROPOSAL_ATTEMPTS: usize = 10_000;

/// Where the engine is in the generation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Initializing,
    Sampling,
    Weighting,
    Scheduling,
    Persisted,
    Converged,
    Failed,
}

/// Graceful termination criteria, checked after each generation is saved.
#[derive(Debug, Clone, PartialEq)]
pub struct StopConditions {
    pub max_generations: u16,
    pub minimum_epsilon: f64,
    pub max_total_simulations: Option<u64>,
    pub min_acceptance_rate: Option<f64>,
}
impl Default for StopConditions {
    fn default() -> Self {
        Self {
            max_generations: 10,
            minimum_epsilon: 0.0,
            max_total_simulations: None,
            min_acceptance_rate: None,
        }
    }
}
impl StopConditions {
    fn validate(&self) -> ABCResult<()> {
        if self.max_generations == 0 {
            return Err(ABCErr::ConfigError("At least one generation must be requested.".into()));
        }
        Ok(())
    }

    /// Why the run should stop after `gen`, if it should.
    pub fn reason(&self, gen: &Generation, total_simulations: u64) -> Option<String> {
        if u32::from(gen.number) + 1 >= u32::from(self.max_generations) {
            return Some(format!("reached {} generations", self.max_generations));
        }
        if gen.epsilon <= self.minimum_epsilon {
            return Some(format!(
                "epsilon {} at or below minimum {}",
                gen.epsilon, self.minimum_epsilon
            ));
        }
        if let Some(max) = self.max_total_simulations {
            if total_simulations >= max {
                return Some(format!("{} simulations used of {} allowed", total_simulations, max));
            }
        }
        if let Some(min) = self.min_acceptance_rate {
            if gen.acceptance_rate() < min {
                return Some(format!(
                    "acceptance rate {:.5} below minimum {}",
                    gen.acceptance_rate(),
                    min
                ));
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    /// Generations saved so far, including those from before a resume.
    pub generations: u16,
    pub last_epsilon: Option<f64>,
    pub total_simulations: u64,
    pub state: EngineState,
}

struct RunState {
    info: RunInfo,
    next_t: u16,
    /// Threshold for generation `next_t`, `None` until established.
    epsilon: Option<f64>,
    last_epsilon: Option<f64>,
    source: GenWrapper,
    total_simulations: u64,
    finished: bool,
}

/// Sequential Monte Carlo approximate Bayesian computation over one or more
/// candidate models.
pub struct ABCSMC {
    models: ModelSet,
    transition: Box<dyn Transition>,
    discrete_transition: Box<dyn Transition>,
    epsilon: Box<dyn Epsilon>,
    sampler: Box<dyn Sampler>,
    population_strategy: Box<dyn PopulationStrategy>,
    store: Arc<dyn HistoryStore>,
    stop: StopConditions,
    max_proposal_attempts: usize,
    rng: SmallRng,
    state: EngineState,
    run: Option<RunState>,
}
impl ABCSMC {
    /// Engine with a global Gaussian kernel, a calibrated median epsilon
    /// schedule, 100 particles and a single-core sampler.
    pub fn new(models: Vec<Model>, distance: Option<Box<dyn Distance>>, store: Arc<dyn HistoryStore>) -> ABCResult<Self> {
        Ok(Self {
            models: ModelSet::new(models, distance)?,
            transition: Box::new(MultivariateNormalTransition::default()),
            discrete_transition: Box::new(DiscreteRandomWalkTransition::default()),
            epsilon: Box::new(QuantileEpsilon::median(None, 1.0)?),
            sampler: Box::new(SingleCoreSampler::default()),
            population_strategy: Box::new(ConstantPopulationSize::new(100)?),
            store,
            stop: StopConditions::default(),
            max_proposal_attempts: DEFAULT_MAX_PROPOSAL_ATTEMPTS,
            rng: SmallRng::from_entropy(),
            state: EngineState::Initializing,
            run: None,
        })
    }

    pub fn from_config(config: &AbcConfig, models: Vec<Model>, distance: Option<Box<dyn Distance>>) -> ABCResult<Self> {
        let algorithm = &config.algorithm;
        let mut engine = Self::new(models, distance, config.storage.build()?)?
            .with_transition(algorithm.build_kernel()?)
            .with_discrete_transition(algorithm.build_discrete_kernel()?)
            .with_epsilon(algorithm.build_epsilon()?)
            .with_sampler(config.sampler.build()?)
            .with_population_strategy(algorithm.build_population(config.job.num_particles)?)
            .with_max_proposal_attempts(algorithm.max_proposal_attempts)?
            .with_model_stay_probability(algorithm.model_stay_probability)?
            .with_stop_conditions(config.job.stop_conditions())?;
        if let Some(seed) = config.sampler.seed() {
            // Keep the engine's stream apart from the sampler's.
            engine = engine.with_seed(seed.wrapping_add(1));
        }
        Ok(engine)
    }

    pub fn with_transition(mut self, transition: Box<dyn Transition>) -> Self {
        self.transition = transition;
        self
    }

    /// Kernel for integer-coded parameters (discrete uniform, categorical).
    pub fn with_discrete_transition(mut self, transition: Box<dyn Transition>) -> Self {
        self.discrete_transition = transition;
        self
    }

    pub fn with_epsilon(mut self, epsilon: Box<dyn Epsilon>) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_sampler(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_population_strategy(mut self, strategy: Box<dyn PopulationStrategy>) -> Self {
        self.population_strategy = strategy;
        self
    }

    pub fn with_stop_conditions(mut self, stop: StopConditions) -> ABCResult<Self> {
        stop.validate()?;
        self.stop = stop;
        Ok(self)
    }

    pub fn with_model_prior(mut self, weights: Vec<f64>) -> ABCResult<Self> {
        self.models = self.models.with_prior(weights)?;
        Ok(self)
    }

    pub fn with_model_stay_probability(mut self, probability: f64) -> ABCResult<Self> {
        self.models = self.models.with_stay_probability(probability)?;
        Ok(self)
    }

    pub fn with_max_proposal_attempts(mut self, attempts: usize) -> ABCResult<Self> {
        if attempts == 0 {
            return Err(ABCErr::ConfigError("Proposal attempts must be positive.".into()));
        }
        self.max_proposal_attempts = attempts;
        Ok(self)
    }

    /// Seeds the engine's own generator, used by adaptive population sizing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.run.as_ref().map(|r| r.info.id)
    }

    pub fn store(&self) -> Arc<dyn HistoryStore> {
        self.store.clone()
    }

    /// Register a new run against `observed` and make it current.
    pub fn new_run(&mut self, observed: SummaryStatistics) -> ABCResult<RunId> {
        let info = RunInfo::new(self.models.names(), self.models.parameter_names(), observed);
        self.store.create_run(&info)?;
        info!("Created run {}", info.id);
        let id = info.id;
        self.run = Some(RunState {
            info,
            next_t: 0,
            epsilon: None,
            last_epsilon: None,
            source: GenWrapper::from_prior(),
            total_simulations: 0,
            finished: false,
        });
        self.state = EngineState::Initializing;
        Ok(id)
    }

    /// Continue a stored run from the generation after its last saved one.
    pub fn resume(&mut self, run_id: RunId) -> ABCResult<()> {
        let info = self.store.load_run(run_id)?;
        if info.model_names != self.models.names() {
            return Err(ABCErr::ConfigError(format!(
                "Run {} was made with models {:?}, engine has {:?}",
                run_id,
                info.model_names,
                self.models.names()
            )));
        }

        let total_simulations =
            self.store.get_nr_evaluations(run_id)?.iter().sum::<u64>() + info.calibration_simulations;
        let mut run = RunState {
            info,
            next_t: 0,
            epsilon: None,
            last_epsilon: None,
            source: GenWrapper::from_prior(),
            total_simulations,
            finished: false,
        };
        self.state = EngineState::Initializing;

        if let Some(gen) = self.store.load_last_generation(run_id)? {
            let next_t = gen.number.checked_add(1).ok_or_else(|| {
                ABCErr::StorageConsistencyError("Generation numbers exhausted".into())
            })?;
            run.next_t = next_t;
            run.last_epsilon = Some(gen.epsilon);

            if let Some(reason) = self.stop.reason(&gen, run.total_simulations) {
                info!("Run {} had already stopped: {}", run_id, reason);
                run.finished = true;
                self.state = EngineState::Converged;
            } else {
                info!("Resuming run {} at generation {}", run_id, next_t);
                self.state = EngineState::Scheduling;
                let (source, next_epsilon) =
                    self.schedule(&gen).map_err(|e| e.in_generation(gen.number, None))?;
                run.source = source;
                run.epsilon = Some(next_epsilon);
                self.state = EngineState::Persisted;
            }
        } else {
            info!("Run {} has no saved generations, starting from the prior", run_id);
        }

        self.run = Some(run);
        Ok(())
    }

    /// Produce generations until a stop condition holds.
    pub fn run(&mut self) -> ABCResult<RunSummary> {
        let mut run = self
            .run
            .take()
            .ok_or_else(|| ABCErr::ConfigError("No run started or resumed.".into()))?;

        let result = self.run_generations(&mut run);
        let summary = RunSummary {
            run_id: run.info.id,
            generations: run.next_t,
            last_epsilon: run.last_epsilon,
            total_simulations: run.total_simulations,
            state: self.state,
        };
        let t = run.next_t;
        self.run = Some(run);

        match result {
            Ok(()) => Ok(summary),
            Err(e) => {
                self.state = EngineState::Failed;
                let e = e.in_generation(t, None);
                error!("Run {} failed: {}", summary.run_id, e);
                Err(e)
            }
        }
    }

    fn run_generations(&mut self, run: &mut RunState) -> ABCResult<()> {
        if run.finished {
            self.state = EngineState::Converged;
            return Ok(());
        }

        loop {
            let t = run.next_t;
            let epsilon = match run.epsilon {
                Some(epsilon) => epsilon,
                None => {
                    self.state = EngineState::Initializing;
                    let epsilon = self.initial_epsilon(run)?;
                    run.epsilon = Some(epsilon);
                    epsilon
                }
            };

            self.state = EngineState::Sampling;
            let n = self.population_strategy.nr_particles();
            info!("Generation {}: epsilon = {}, target {} particles", t, epsilon, n);
            let proposer = Proposer {
                models: &self.models,
                source: &run.source,
                observed: &run.info.observed,
                epsilon,
                generation: t,
                max_proposal_attempts: self.max_proposal_attempts,
            };
            let sample = self
                .sampler
                .sample_until_n_accepted(n, &|rng: &mut SmallRng| proposer.trial(rng))?;

            self.state = EngineState::Weighting;
            let particles = sample
                .accepted
                .into_iter()
                .map(|result| proposer.weigh(result))
                .collect::<ABCResult<Vec<_>>>()?;
            let gen = Generation::new(t, epsilon, particles, sample.nr_evaluations, sample.nr_early_stopped)?;
            run.total_simulations += sample.nr_evaluations;

            self.store.save(run.info.id, &gen)?;
            self.state = EngineState::Persisted;
            info!(
                "Generation {} saved: acceptance rate {:.4} ({} simulations, {} stopped early), model probabilities {:?}",
                t,
                gen.acceptance_rate(),
                gen.nr_evaluations,
                gen.nr_early_stopped,
                gen.model_probabilities(self.models.len())
            );

            run.next_t = t + 1;
            run.last_epsilon = Some(epsilon);

            if let Some(reason) = self.stop.reason(&gen, run.total_simulations) {
                info!("Stopping run {}: {}", run.info.id, reason);
                run.finished = true;
                self.state = EngineState::Converged;
                return Ok(());
            }

            // Only a continuing run needs kernels fitted to the new population.
            self.state = EngineState::Scheduling;
            let (source, next_epsilon) = self.schedule(&gen)?;
            run.source = source;
            run.epsilon = Some(next_epsilon);
        }
    }

    /// epsilon_0, from configuration or a prior-only calibration sample.
    fn initial_epsilon(&mut self, run: &mut RunState) -> ABCResult<f64> {
        if !self.epsilon.requires_calibration() {
            return self.epsilon.initialize(None);
        }
        if !self.models.can_calibrate() {
            return Err(ABCErr::CalibrationError(
                "No initial epsilon given and no distance function to calibrate one with.".into(),
            ));
        }

        let n = self.population_strategy.nr_particles();
        info!("Calibrating initial epsilon from {} prior samples", n);
        let prior = GenWrapper::from_prior();
        let proposer = Proposer {
            models: &self.models,
            source: &prior,
            observed: &run.info.observed,
            epsilon: f64::INFINITY,
            generation: 0,
            max_proposal_attempts: self.max_proposal_attempts,
        };
        let sample = self
            .sampler
            .sample_until_n_accepted(n, &|rng: &mut SmallRng| proposer.trial(rng))?;
        run.total_simulations += sample.nr_evaluations;
        run.info.calibration_simulations += sample.nr_evaluations;
        self.store.update_run(&run.info)?;

        let weight = 1.0 / sample.accepted.len().max(1) as f64;
        let distances: Vec<(f64, f64)> = sample
            .accepted
            .iter()
            .filter_map(|r| r.evaluation.distance)
            .map(|d| (d, weight))
            .collect();
        self.epsilon.initialize(Some(&distances))
    }

    /// Fit the kernels, adapt the population size and derive the next epsilon.
    fn schedule(&mut self, gen: &Generation) -> ABCResult<(GenWrapper, f64)> {
        let source = GenWrapper::from_generation(
            gen,
            &self.models,
            self.transition.as_ref(),
            self.discrete_transition.as_ref(),
        )?;
        if let Some(empirical) = source.empirical() {
            let alive = empirical.alive();
            self.population_strategy.adapt_population_size(&alive, &mut self.rng)?;
        }

        let next_epsilon = self
            .epsilon
            .next(gen.number, gen.epsilon, &gen.weighted_distances())?;
        debug!("Epsilon {} -> {}", gen.epsilon, next_epsilon);
        Ok((source, next_epsilon))
    }
}
