use nalgebra::DVector;
use rand::RngCore;

use crate::{
    error::{ABCErr, ABCResult},
    parameters::Parameters,
};

use super::{
    floor_covariance, weighted_covariance, FittedPopulation, Gaussian, Transition,
    DEFAULT_MIN_BANDWIDTH,
};

/// Each particle gets its own covariance, estimated from its `k` nearest
/// neighbours, where `k` is a fraction of the population size.
#[derive(Debug, Clone)]
pub struct LocalTransition {
    k_fraction: f64,
    scaling: f64,
    min_bandwidth: f64,
    fitted: Option<(FittedPopulation, Vec<Gaussian>)>,
}
impl LocalTransition {
    pub fn new(k_fraction: f64, scaling: f64, min_bandwidth: f64) -> Self {
        Self {
            k_fraction,
            scaling,
            min_bandwidth,
            fitted: None,
        }
    }

    fn k_for(&self, population_size: usize) -> usize {
        let k = (self.k_fraction * population_size as f64).ceil() as usize;
        k.clamp(1, population_size.saturating_sub(1).max(1))
    }

    /// Covariances of the fitted per-particle kernels.
    pub fn local_covariances(&self) -> Vec<&nalgebra::DMatrix<f64>> {
        self.fitted
            .iter()
            .flat_map(|(_, kernels)| kernels.iter().map(Gaussian::covariance))
            .collect()
    }

    fn fitted_parts(&self) -> ABCResult<&(FittedPopulation, Vec<Gaussian>)> {
        self.fitted
            .as_ref()
            .ok_or_else(|| ABCErr::KernelFitError("Transition has not been fitted.".into()))
    }
}
impl Default for LocalTransition {
    fn default() -> Self {
        Self::new(0.25, 1.0, DEFAULT_MIN_BANDWIDTH)
    }
}

fn nearest_neighbours(points: &[DVector<f64>], of: usize, k: usize) -> Vec<usize> {
    let mut others: Vec<(usize, f64)> = points
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != of)
        .map(|(i, p)| (i, (p - &points[of]).norm_squared()))
        .collect();
    others.sort_by(|a, b| a.1.total_cmp(&b.1));
    others.into_iter().take(k).map(|(i, _)| i).collect()
}

impl Transition for LocalTransition {
    fn fit(&mut self, parameters: &[Parameters], weights: &[f64]) -> ABCResult<()> {
        let population = FittedPopulation::new(parameters, weights)?;
        let dim = population.dim();
        let k = self.k_for(population.len());
        if k < dim {
            log::debug!(
                "Local kernel uses {} neighbours in {} dimensions, degenerate directions will be floored",
                k,
                dim
            );
        }

        let kernels = (0..population.len())
            .map(|i| {
                let neighbours = nearest_neighbours(&population.points, i, k);
                let deltas: Vec<DVector<f64>> = neighbours
                    .iter()
                    .map(|j| &population.points[*j] - &population.points[i])
                    .collect();
                let local_weights = {
                    let raw: Vec<f64> = neighbours.iter().map(|j| population.weights[*j]).collect();
                    let total: f64 = raw.iter().sum();
                    if total > 0.0 {
                        raw.iter().map(|w| w / total).collect()
                    } else {
                        vec![1.0 / raw.len() as f64; raw.len()]
                    }
                };
                let covariance = weighted_covariance(&deltas, &local_weights, dim) * self.scaling;
                Gaussian::new(floor_covariance(covariance, self.min_bandwidth))
            })
            .collect::<ABCResult<Vec<_>>>()?;

        self.fitted = Some((population, kernels));
        Ok(())
    }

    fn fitted(&self) -> ABCResult<&FittedPopulation> {
        self.fitted_parts().map(|(p, _)| p)
    }

    fn perturb(&self, parent: usize, rng: &mut dyn RngCore) -> ABCResult<Parameters> {
        let (population, kernels) = self.fitted_parts()?;
        population.displaced(parent, &kernels[parent].sample(rng))
    }

    fn pert_density(&self, parent: usize, to: &Parameters) -> ABCResult<f64> {
        let (population, kernels) = self.fitted_parts()?;
        Ok(kernels[parent].pdf(&population.offset(parent, to)?))
    }

    fn box_clone(&self) -> Box<dyn Transition> {
        Box::new(self.clone())
    }
}
