use nalgebra::{DMatrix, DVector};
use rand::RngCore;

use crate::{
    error::{ABCErr, ABCResult},
    parameters::Parameters,
};

use super::{floor_covariance, FittedPopulation, Gaussian, Transition, DEFAULT_MIN_BANDWIDTH};

/// Optimal local covariance matrix kernel: the weighted population
/// covariance, biased by how far each particle sits from the weighted mean.
#[derive(Clone, Debug)]
pub struct OLCMTransition {
    min_bandwidth: f64,
    fitted: Option<Fitted>,
}

#[derive(Clone, Debug)]
struct Fitted {
    population: FittedPopulation,
    weighted_mean: DVector<f64>,
    kernels: Vec<Gaussian>,
}

impl OLCMTransition {
    pub fn new(min_bandwidth: f64) -> Self {
        Self {
            min_bandwidth,
            fitted: None,
        }
    }

    pub fn weighted_mean(&self) -> Option<&DVector<f64>> {
        self.fitted.as_ref().map(|f| &f.weighted_mean)
    }

    pub fn local_covariance(&self, parent: usize) -> Option<&DMatrix<f64>> {
        self.fitted
            .as_ref()
            .and_then(|f| f.kernels.get(parent))
            .map(Gaussian::covariance)
    }

    fn fitted_parts(&self) -> ABCResult<&Fitted> {
        self.fitted
            .as_ref()
            .ok_or_else(|| ABCErr::KernelFitError("Transition has not been fitted.".into()))
    }
}
impl Default for OLCMTransition {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BANDWIDTH)
    }
}

impl Transition for OLCMTransition {
    fn fit(&mut self, parameters: &[Parameters], weights: &[f64]) -> ABCResult<()> {
        let population = FittedPopulation::new(parameters, weights)?;
        let weighted_mean = population.weighted_mean();
        let weighted_covariance = population.weighted_covariance();

        let kernels = population
            .points
            .iter()
            .map(|particle_vector| {
                let bias = (&weighted_mean - particle_vector) * (&weighted_mean - particle_vector).transpose();
                let local_covariance = &weighted_covariance + bias;
                Gaussian::new(floor_covariance(local_covariance, self.min_bandwidth))
            })
            .collect::<ABCResult<Vec<_>>>()?;

        self.fitted = Some(Fitted {
            population,
            weighted_mean,
            kernels,
        });
        Ok(())
    }

    fn fitted(&self) -> ABCResult<&FittedPopulation> {
        self.fitted_parts().map(|f| &f.population)
    }

    fn perturb(&self, parent: usize, rng: &mut dyn RngCore) -> ABCResult<Parameters> {
        let fitted = self.fitted_parts()?;
        fitted
            .population
            .displaced(parent, &fitted.kernels[parent].sample(rng))
    }

    fn pert_density(&self, parent: usize, to: &Parameters) -> ABCResult<f64> {
        let fitted = self.fitted_parts()?;
        Ok(fitted.kernels[parent].pdf(&fitted.population.offset(parent, to)?))
    }

    fn box_clone(&self) -> Box<dyn Transition> {
        Box::new(self.clone())
    }
}
