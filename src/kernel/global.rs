use rand::RngCore;

use crate::{
    error::{ABCErr, ABCResult},
    parameters::Parameters,
};

use super::{floor_covariance, FittedPopulation, Gaussian, Transition, DEFAULT_MIN_BANDWIDTH};

/// One weighted covariance for the whole population, shrunk by Silverman's
/// rule of thumb and used to perturb every particle.
#[derive(Debug, Clone)]
pub struct MultivariateNormalTransition {
    scaling: f64,
    min_bandwidth: f64,
    fitted: Option<(FittedPopulation, Gaussian)>,
}
impl MultivariateNormalTransition {
    pub fn new(scaling: f64, min_bandwidth: f64) -> Self {
        Self {
            scaling,
            min_bandwidth,
            fitted: None,
        }
    }

    pub fn covariance(&self) -> Option<&nalgebra::DMatrix<f64>> {
        self.fitted.as_ref().map(|(_, g)| g.covariance())
    }
}
impl Default for MultivariateNormalTransition {
    fn default() -> Self {
        Self::new(1.0, DEFAULT_MIN_BANDWIDTH)
    }
}

/// Silverman's bandwidth factor for `n` effective samples in `dim` dimensions.
pub fn silverman_rule_of_thumb(n: f64, dim: usize) -> f64 {
    let d = dim as f64;
    (4.0 / (n * (d + 2.0))).powf(1.0 / (d + 4.0))
}

impl Transition for MultivariateNormalTransition {
    fn fit(&mut self, parameters: &[Parameters], weights: &[f64]) -> ABCResult<()> {
        let population = FittedPopulation::new(parameters, weights)?;
        let bandwidth = silverman_rule_of_thumb(population.effective_sample_size(), population.dim());
        let covariance = population.weighted_covariance() * (bandwidth * bandwidth * self.scaling);
        let gaussian = Gaussian::new(floor_covariance(covariance, self.min_bandwidth))?;

        self.fitted = Some((population, gaussian));
        Ok(())
    }

    fn fitted(&self) -> ABCResult<&FittedPopulation> {
        self.fitted
            .as_ref()
            .map(|(p, _)| p)
            .ok_or_else(|| ABCErr::KernelFitError("Transition has not been fitted.".into()))
    }

    fn perturb(&self, parent: usize, rng: &mut dyn RngCore) -> ABCResult<Parameters> {
        let (population, gaussian) = self
            .fitted
            .as_ref()
            .ok_or_else(|| ABCErr::KernelFitError("Transition has not been fitted.".into()))?;
        population.displaced(parent, &gaussian.sample(rng))
    }

    fn pert_density(&self, parent: usize, to: &Parameters) -> ABCResult<f64> {
        let (population, gaussian) = self
            .fitted
            .as_ref()
            .ok_or_else(|| ABCErr::KernelFitError("Transition has not been fitted.".into()))?;
        Ok(gaussian.pdf(&population.offset(parent, to)?))
    }

    fn box_clone(&self) -> Box<dyn Transition> {
        Box::new(self.clone())
    }
}
