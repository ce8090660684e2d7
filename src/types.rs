use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::{ABCErr, ABCResult},
    parameters::{Parameters, SummaryStatistics},
};

/// Index of a model in the list the engine was built with.
pub type ModelId = usize;

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Particle {
    pub model: ModelId,
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryStatistics>,
    pub distance: f64,
    pub weight: f64,
    pub accepted: bool,
}

/// The particles of one model within one generation.
///
/// Weights are stored normalised over the whole generation, so they sum to
/// the model's probability rather than to one.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Population {
    pub model: ModelId,
    pub probability: f64,
    particles: Vec<Particle>,
}
impl Population {
    pub fn new(model: ModelId, particles: Vec<Particle>) -> Self {
        let probability = particles.iter().map(|p| p.weight).sum();
        Self {
            model,
            probability,
            particles,
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Parameters with weights renormalised to sum to one within this model.
    pub fn weighted_parameters(&self) -> (Vec<Parameters>, Vec<f64>) {
        let parameters = self.particles.iter().map(|p| p.parameters.clone()).collect();
        let weights = self
            .particles
            .iter()
            .map(|p| {
                if self.probability > 0.0 {
                    p.weight / self.probability
                } else {
                    0.0
                }
            })
            .collect();
        (parameters, weights)
    }
}

/// One completed generation: every model's population at index `number`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Generation {
    pub number: u16,
    #[serde(with = "non_finite")]
    pub epsilon: f64,
    pub nr_evaluations: u64,
    #[serde(default)]
    pub nr_early_stopped: u64,
    pub populations: BTreeMap<ModelId, Population>,
}
impl Generation {
    /// Normalise the (unnormalised) particle weights over the whole
    /// generation and group the particles by model.
    pub fn new(
        number: u16,
        epsilon: f64,
        mut particles: Vec<Particle>,
        nr_evaluations: u64,
        nr_early_stopped: u64,
    ) -> ABCResult<Self> {
        let total_weight: f64 = particles.iter().map(|p| p.weight).sum();
        if !(total_weight.is_finite() && total_weight > 0.0) {
            return Err(ABCErr::DomainError(format!(
                "Cannot normalise particle weights, total weight was {}",
                total_weight
            )));
        }

        particles
            .iter_mut()
            .for_each(|p| p.weight /= total_weight);

        let mut grouped: BTreeMap<ModelId, Vec<Particle>> = BTreeMap::new();
        for particle in particles {
            grouped.entry(particle.model).or_default().push(particle);
        }
        let populations = grouped
            .into_iter()
            .map(|(model, particles)| (model, Population::new(model, particles)))
            .collect();

        Ok(Self {
            number,
            epsilon,
            nr_evaluations,
            nr_early_stopped,
            populations,
        })
    }

    pub fn size(&self) -> usize {
        self.populations.values().map(Population::len).sum()
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.nr_evaluations == 0 {
            0.0
        } else {
            cast::f64(self.size()) / cast::f64(self.nr_evaluations)
        }
    }

    pub fn population(&self, model: ModelId) -> Option<&Population> {
        self.populations.get(&model)
    }

    /// Probability of every model in `0..nr_models`; absent models get zero.
    pub fn model_probabilities(&self, nr_models: usize) -> Vec<f64> {
        (0..nr_models)
            .map(|m| self.population(m).map(|p| p.probability).unwrap_or(0.0))
            .collect()
    }

    /// (distance, weight) for every particle, weights normalised over the generation.
    pub fn weighted_distances(&self) -> Vec<(f64, f64)> {
        self.populations
            .values()
            .flat_map(|pop| pop.particles().iter().map(|p| (p.distance, p.weight)))
            .collect()
    }
}

/// JSON has no infinity, so non-finite values are written as strings.
mod non_finite {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => text.parse::<f64>().map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(model: ModelId, x: f64, weight: f64) -> Particle {
        Particle {
            model,
            parameters: Parameters::from([("x", x)]),
            summary: None,
            distance: x,
            weight,
            accepted: true,
        }
    }

    #[test]
    fn weights_normalised_over_generation_and_grouped_by_model() -> ABCResult<()> {
        let particles = vec![
            particle(0, 1.0, 2.0),
            particle(1, 2.0, 1.0),
            particle(0, 3.0, 1.0),
        ];
        let gen = Generation::new(1, 0.5, particles, 10, 0)?;

        assert_eq!(3, gen.size());
        assert!((gen.acceptance_rate() - 0.3).abs() < 1e-12);

        let probabilities = gen.model_probabilities(3);
        assert!((probabilities[0] - 0.75).abs() < 1e-12);
        assert!((probabilities[1] - 0.25).abs() < 1e-12);
        assert_eq!(0.0, probabilities[2]);

        let total: f64 = gen.weighted_distances().iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-12);

        let (params, weights) = gen.population(0).unwrap().weighted_parameters();
        assert_eq!(2, params.len());
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((weights[0] - 2.0 / 3.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn zero_total_weight_cannot_be_normalised() {
        let result = Generation::new(0, 1.0, vec![particle(0, 1.0, 0.0)], 1, 0);
        assert!(matches!(result, Err(ABCErr::DomainError(_))));
    }

    #[test]
    fn infinite_epsilon_survives_json() -> ABCResult<()> {
        let gen = Generation::new(0, f64::INFINITY, vec![particle(0, 1.0, 1.0)], 1, 0)?;
        let json = serde_json::to_string(&gen)?;
        let loaded: Generation = serde_json::from_str(&json)?;
        assert!(loaded.epsilon.is_infinite());
        assert_eq!(gen.populations, loaded.populations);
        Ok(())
    }
}
