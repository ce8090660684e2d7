use std::collections::BTreeMap;

use rand::{
    distributions::{Distribution, WeightedIndex},
    RngCore,
};

use crate::{
    error::{ABCErr, ABCResult},
    kernel::ModelPerturbationKernel,
    parameters::{Parameters, SummaryStatistics},
    prior::Prior,
    types::ModelId,
};

pub const DEFAULT_STAY_PROBABILITY: f64 = 0.7;

/// Everything a trial may read besides its parameters. Passed explicitly so
/// simulation code never has to close over the observed data.
#[derive(Debug, Clone, Copy)]
pub struct TrialContext<'a> {
    pub observed: &'a SummaryStatistics,
    pub generation: u16,
    pub model: ModelId,
}

/// Two-stage contract: simulate fully, then a [`Distance`] is applied.
pub trait SimulationModel: Send + Sync {
    fn simulate(
        &self,
        parameters: &Parameters,
        context: &TrialContext,
        rng: &mut dyn RngCore,
    ) -> ABCResult<SummaryStatistics>;
}

impl<F> SimulationModel for F
where
    F: Fn(&Parameters, &TrialContext, &mut dyn RngCore) -> ABCResult<SummaryStatistics> + Send + Sync,
{
    fn simulate(
        &self,
        parameters: &Parameters,
        context: &TrialContext,
        rng: &mut dyn RngCore,
    ) -> ABCResult<SummaryStatistics> {
        self(parameters, context, rng)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntegratedOutcome {
    /// The running distance exceeded epsilon; no distance or summary is reported.
    Rejected,
    Accepted {
        distance: f64,
        summary: Option<SummaryStatistics>,
    },
}

/// Fused contract: the model receives the current epsilon and may give up
/// as soon as its accumulating distance exceeds it.
pub trait IntegratedModel: Send + Sync {
    fn integrated_simulate(
        &self,
        parameters: &Parameters,
        epsilon: f64,
        context: &TrialContext,
        rng: &mut dyn RngCore,
    ) -> ABCResult<IntegratedOutcome>;
}

impl<F> IntegratedModel for F
where
    F: Fn(&Parameters, f64, &TrialContext, &mut dyn RngCore) -> ABCResult<IntegratedOutcome> + Send + Sync,
{
    fn integrated_simulate(
        &self,
        parameters: &Parameters,
        epsilon: f64,
        context: &TrialContext,
        rng: &mut dyn RngCore,
    ) -> ABCResult<IntegratedOutcome> {
        self(parameters, epsilon, context, rng)
    }
}

pub trait Distance: Send + Sync {
    fn distance(&self, simulated: &SummaryStatistics, observed: &SummaryStatistics) -> ABCResult<f64>;
}

impl<F> Distance for F
where
    F: Fn(&SummaryStatistics, &SummaryStatistics) -> ABCResult<f64> + Send + Sync,
{
    fn distance(&self, simulated: &SummaryStatistics, observed: &SummaryStatistics) -> ABCResult<f64> {
        self(simulated, observed)
    }
}

/// Weighted p-norm over the observed statistics.
#[derive(Debug, Clone)]
pub struct PNormDistance {
    p: f64,
    weights: BTreeMap<String, f64>,
}
impl PNormDistance {
    pub fn new(p: f64) -> ABCResult<Self> {
        if !(p >= 1.0) {
            return Err(ABCErr::ConfigError(format!("p-norm needs p >= 1, got {}", p)));
        }
        Ok(Self {
            p,
            weights: BTreeMap::new(),
        })
    }

    /// Statistics without an explicit weight get weight 1.
    pub fn with_weights(mut self, weights: BTreeMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }
}
impl Distance for PNormDistance {
    fn distance(&self, simulated: &SummaryStatistics, observed: &SummaryStatistics) -> ABCResult<f64> {
        let mut total = 0.0;
        let mut max: f64 = 0.0;
        for (key, x0) in observed {
            let x = simulated.get(key).ok_or_else(|| {
                ABCErr::ModelError(format!("Simulation did not produce statistic '{}'", key))
            })?;
            let w = self.weights.get(key).copied().unwrap_or(1.0);
            let term = (w * (x - x0)).abs();
            max = max.max(term);
            total += term.powf(self.p);
        }
        if self.p.is_infinite() {
            Ok(max)
        } else {
            Ok(total.powf(1.0 / self.p))
        }
    }
}

/// Outcome of a single trial, whichever contract produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub accepted: bool,
    pub distance: Option<f64>,
    pub summary: Option<SummaryStatistics>,
    /// Set when a fused model abandoned the simulation.
    pub early_stopped: bool,
}

/// The two simulation capabilities, consumed uniformly by the samplers.
pub enum Simulator {
    TwoStage(Box<dyn SimulationModel>),
    Integrated(Box<dyn IntegratedModel>),
}
impl Simulator {
    pub fn two_stage(model: impl SimulationModel + 'static) -> Self {
        Simulator::TwoStage(Box::new(model))
    }

    pub fn integrated(model: impl IntegratedModel + 'static) -> Self {
        Simulator::Integrated(Box::new(model))
    }

    pub fn is_integrated(&self) -> bool {
        matches!(self, Simulator::Integrated(_))
    }

    /// Run one simulation against `epsilon` and decide acceptance.
    pub fn evaluate(
        &self,
        parameters: &Parameters,
        epsilon: f64,
        distance: Option<&dyn Distance>,
        context: &TrialContext,
        rng: &mut dyn RngCore,
    ) -> ABCResult<Evaluation> {
        match self {
            Simulator::TwoStage(model) => {
                let distance = distance.ok_or_else(|| {
                    ABCErr::ConfigError("A two-stage model needs a distance function.".into())
                })?;
                let summary = model.simulate(parameters, context, rng)?;
                let d = checked_distance(distance.distance(&summary, context.observed)?)?;
                let accepted = d <= epsilon;
                Ok(Evaluation {
                    accepted,
                    distance: Some(d),
                    summary: if accepted { Some(summary) } else { None },
                    early_stopped: false,
                })
            }
            Simulator::Integrated(model) => {
                match model.integrated_simulate(parameters, epsilon, context, rng)? {
                    IntegratedOutcome::Rejected => Ok(Evaluation {
                        accepted: false,
                        distance: None,
                        summary: None,
                        early_stopped: true,
                    }),
                    IntegratedOutcome::Accepted { distance, summary } => {
                        let d = checked_distance(distance)?;
                        if d > epsilon {
                            return Err(ABCErr::ModelError(format!(
                                "Integrated model accepted with distance {} above epsilon {}",
                                d, epsilon
                            )));
                        }
                        Ok(Evaluation {
                            accepted: true,
                            distance: Some(d),
                            summary,
                            early_stopped: false,
                        })
                    }
                }
            }
        }
    }
}

fn checked_distance(d: f64) -> ABCResult<f64> {
    if d.is_nan() || d < 0.0 {
        Err(ABCErr::ModelError(format!("Distance must be a non-negative number, got {}", d)))
    } else {
        Ok(d)
    }
}

/// A named candidate model: its prior and how to simulate it.
pub struct Model {
    pub name: String,
    pub prior: Box<dyn Prior>,
    pub simulator: Simulator,
}
impl Model {
    pub fn new(name: impl Into<String>, prior: impl Prior + 'static, simulator: Simulator) -> Self {
        Self {
            name: name.into(),
            prior: Box::new(prior),
            simulator,
        }
    }
}

/// The candidate models, their prior probabilities, the kernel that moves
/// particles between them and the distance shared by two-stage models.
pub struct ModelSet {
    models: Vec<Model>,
    prior: Vec<f64>,
    prior_index: WeightedIndex<f64>,
    kernel: ModelPerturbationKernel,
    distance: Option<Box<dyn Distance>>,
}
impl ModelSet {
    /// Uniform model prior and the default stay probability.
    pub fn new(models: Vec<Model>, distance: Option<Box<dyn Distance>>) -> ABCResult<Self> {
        if models.is_empty() {
            return Err(ABCErr::ConfigError("At least one model is required.".into()));
        }
        if distance.is_none() {
            if let Some(model) = models.iter().find(|m| !m.simulator.is_integrated()) {
                return Err(ABCErr::ConfigError(format!(
                    "Model '{}' is two-stage but no distance function was given.",
                    model.name
                )));
            }
        }
        let kernel = ModelPerturbationKernel::new(models.len(), DEFAULT_STAY_PROBABILITY)?;
        let uniform = vec![1.0; models.len()];
        Ok(Self {
            models,
            prior: normalise(&uniform),
            prior_index: prior_index(&uniform)?,
            kernel,
            distance,
        })
    }

    /// Relative prior weights, one per model.
    pub fn with_prior(mut self, weights: Vec<f64>) -> ABCResult<Self> {
        if weights.len() != self.models.len() {
            return Err(ABCErr::ConfigError(format!(
                "{} model prior weights given for {} models",
                weights.len(),
                self.models.len()
            )));
        }
        self.prior_index = prior_index(&weights)?;
        self.prior = normalise(&weights);
        Ok(self)
    }

    pub fn with_stay_probability(mut self, probability_to_stay: f64) -> ABCResult<Self> {
        self.kernel = ModelPerturbationKernel::new(self.models.len(), probability_to_stay)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, model: ModelId) -> &Model {
        &self.models[model]
    }

    pub fn prior(&self) -> &[f64] {
        &self.prior
    }

    pub fn kernel(&self) -> &ModelPerturbationKernel {
        &self.kernel
    }

    pub fn distance(&self) -> Option<&dyn Distance> {
        self.distance.as_deref()
    }

    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    pub fn parameter_names(&self) -> Vec<Vec<String>> {
        self.models.iter().map(|m| m.prior.parameter_names()).collect()
    }

    pub fn sample_model(&self, rng: &mut dyn RngCore) -> ModelId {
        self.prior_index.sample(rng)
    }

    /// A prior-only calibration sample needs a distance for every model.
    pub fn can_calibrate(&self) -> bool {
        self.distance.is_some() && self.models.iter().all(|m| !m.simulator.is_integrated())
    }
}

fn prior_index(weights: &[f64]) -> ABCResult<WeightedIndex<f64>> {
    WeightedIndex::new(weights)
        .map_err(|e| ABCErr::ConfigError(format!("Invalid model prior {:?}: {}", weights, e)))
}

fn normalise(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    weights.iter().map(|w| w / total).collect()
}
