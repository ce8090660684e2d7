use std::collections::BTreeMap;

use rand::{
    distributions::{Distribution as RandDistribution, WeightedIndex},
    Rng, RngCore,
};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, Continuous, Exp, LogNormal, Normal, Uniform};

use crate::{
    error::{ABCErr, ABCResult},
    parameters::Parameters,
};

/// Initial distribution over a model's parameters.
pub trait Prior: Send + Sync {
    fn sample(&self, rng: &mut dyn RngCore) -> Parameters;

    /// Zero outside the support. Fails with `DomainError` for points that do
    /// not belong to the declared parameter space at all.
    fn density(&self, parameters: &Parameters) -> ABCResult<f64>;

    fn parameter_names(&self) -> Vec<String>;

    /// Parameters that only take integer codes and so need a discrete kernel.
    fn discrete_parameter_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Declarative description of a one-dimensional random variable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum RV {
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std_dev: f64 },
    LogNormal { location: f64, scale: f64 },
    Exponential { rate: f64 },
    Beta { alpha: f64, beta: f64 },
    DiscreteUniform { min: i64, max: i64 },
    /// Categories are coded `0..probabilities.len()`.
    Categorical { probabilities: Vec<f64> },
}
impl RV {
    pub fn uniform(low: f64, high: f64) -> Self {
        RV::Uniform { low, high }
    }

    pub fn normal(mean: f64, std_dev: f64) -> Self {
        RV::Normal { mean, std_dev }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, RV::DiscreteUniform { .. } | RV::Categorical { .. })
    }

    fn compile(&self) -> ABCResult<Marginal> {
        let marginal = match self {
            RV::Uniform { low, high } => Marginal::Uniform(Uniform::new(*low, *high)?),
            RV::Normal { mean, std_dev } => Marginal::Normal(Normal::new(*mean, *std_dev)?),
            RV::LogNormal { location, scale } => {
                Marginal::LogNormal(LogNormal::new(*location, *scale)?)
            }
            RV::Exponential { rate } => Marginal::Exponential(Exp::new(*rate)?),
            RV::Beta { alpha, beta } => Marginal::Beta(Beta::new(*alpha, *beta)?),
            RV::DiscreteUniform { min, max } => {
                if min > max {
                    return Err(ABCErr::ConfigError(format!(
                        "Discrete uniform needs min <= max, got {} > {}",
                        min, max
                    )));
                }
                Marginal::DiscreteUniform {
                    min: *min,
                    max: *max,
                }
            }
            RV::Categorical { probabilities } => {
                let total: f64 = probabilities.iter().sum();
                let index = WeightedIndex::new(probabilities).map_err(|e| {
                    ABCErr::ConfigError(format!("Invalid categorical probabilities: {}", e))
                })?;
                Marginal::Categorical {
                    index,
                    probabilities: probabilities.iter().map(|p| p / total).collect(),
                }
            }
        };
        Ok(marginal)
    }
}

#[derive(Debug, Clone)]
enum Marginal {
    Uniform(Uniform),
    Normal(Normal),
    LogNormal(LogNormal),
    Exponential(Exp),
    Beta(Beta),
    DiscreteUniform { min: i64, max: i64 },
    Categorical {
        index: WeightedIndex<f64>,
        probabilities: Vec<f64>,
    },
}
impl Marginal {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        match self {
            Marginal::Uniform(d) => d.sample(rng),
            Marginal::Normal(d) => d.sample(rng),
            Marginal::LogNormal(d) => d.sample(rng),
            Marginal::Exponential(d) => d.sample(rng),
            Marginal::Beta(d) => d.sample(rng),
            Marginal::DiscreteUniform { min, max } => rng.gen_range(*min..=*max) as f64,
            Marginal::Categorical { index, .. } => index.sample(rng) as f64,
        }
    }

    fn density(&self, x: f64) -> f64 {
        match self {
            Marginal::Uniform(d) => d.pdf(x),
            Marginal::Normal(d) => d.pdf(x),
            Marginal::LogNormal(d) => d.pdf(x),
            Marginal::Exponential(d) => d.pdf(x),
            Marginal::Beta(d) => d.pdf(x),
            Marginal::DiscreteUniform { min, max } => {
                if x.fract() == 0.0 && x >= *min as f64 && x <= *max as f64 {
                    1.0 / (max - min + 1) as f64
                } else {
                    0.0
                }
            }
            Marginal::Categorical { probabilities, .. } => {
                if x.fract() == 0.0 && x >= 0.0 && (x as usize) < probabilities.len() {
                    probabilities[x as usize]
                } else {
                    0.0
                }
            }
        }
    }
}

/// Independent marginals keyed by parameter name; the joint density is
/// their product.
#[derive(Debug, Clone)]
pub struct ProductPrior {
    marginals: BTreeMap<String, Marginal>,
    declared: BTreeMap<String, RV>,
}
impl ProductPrior {
    pub fn new<I, S>(marginals: I) -> ABCResult<Self>
    where
        I: IntoIterator<Item = (S, RV)>,
        S: Into<String>,
    {
        let declared: BTreeMap<String, RV> = marginals
            .into_iter()
            .map(|(name, rv)| (name.into(), rv))
            .collect();
        let marginals = declared
            .iter()
            .map(|(name, rv)| Ok((name.clone(), rv.compile()?)))
            .collect::<ABCResult<_>>()?;
        Ok(Self {
            marginals,
            declared,
        })
    }

    /// A prior over no parameters at all.
    pub fn empty() -> Self {
        Self {
            marginals: BTreeMap::new(),
            declared: BTreeMap::new(),
        }
    }

    pub fn declared(&self) -> &BTreeMap<String, RV> {
        &self.declared
    }
}

impl Prior for ProductPrior {
    fn sample(&self, rng: &mut dyn RngCore) -> Parameters {
        self.marginals
            .iter()
            .map(|(name, marginal)| (name.clone(), marginal.sample(rng)))
            .collect()
    }

    fn density(&self, parameters: &Parameters) -> ABCResult<f64> {
        if parameters.len() != self.marginals.len()
            || !parameters.keys().all(|k| self.marginals.contains_key(k))
        {
            return Err(ABCErr::DomainError(format!(
                "Parameters {:?} do not match declared names {:?}",
                parameters.names(),
                self.parameter_names()
            )));
        }

        let mut density = 1.0;
        for (name, value) in parameters.iter() {
            if !value.is_finite() {
                return Err(ABCErr::DomainError(format!(
                    "Parameter {} is not finite ({})",
                    name, value
                )));
            }
            density *= self.marginals[name].density(*value);
        }
        Ok(density)
    }

    fn parameter_names(&self) -> Vec<String> {
        self.marginals.keys().cloned().collect()
    }

    fn discrete_parameter_names(&self) -> Vec<String> {
        self.declared
            .iter()
            .filter(|(_, rv)| rv.is_discrete())
            .map(|(name, _)| name.clone())
            .collect()
    }
}
