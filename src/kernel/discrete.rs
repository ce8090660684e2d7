use nalgebra::DVector;
use rand::{Rng, RngCore};

use crate::{
    error::{ABCErr, ABCResult},
    parameters::Parameters,
};

use super::{FittedPopulation, Transition};

/// Moves every coordinate of the parent by an integer step drawn uniformly
/// from `-n_steps..=n_steps`. For integer-coded parameters (discrete uniform
/// or categorical) a Gaussian would never land on the support.
#[derive(Debug, Clone)]
pub struct DiscreteRandomWalkTransition {
    n_steps: u32,
    fitted: Option<FittedPopulation>,
}
impl DiscreteRandomWalkTransition {
    pub fn new(n_steps: u32) -> ABCResult<Self> {
        if n_steps == 0 {
            return Err(ABCErr::ConfigError("Discrete random walk needs at least one step.".into()));
        }
        Ok(Self { n_steps, fitted: None })
    }

    pub fn n_steps(&self) -> u32 {
        self.n_steps
    }

    fn step_probability(&self) -> f64 {
        1.0 / f64::from(2 * self.n_steps + 1)
    }

    fn population(&self) -> ABCResult<&FittedPopulation> {
        self.fitted
            .as_ref()
            .ok_or_else(|| ABCErr::KernelFitError("Transition has not been fitted.".into()))
    }
}
impl Default for DiscreteRandomWalkTransition {
    fn default() -> Self {
        Self {
            n_steps: 1,
            fitted: None,
        }
    }
}

impl Transition for DiscreteRandomWalkTransition {
    fn fit(&mut self, parameters: &[Parameters], weights: &[f64]) -> ABCResult<()> {
        self.fitted = Some(FittedPopulation::allowing_repeats(parameters, weights)?);
        Ok(())
    }

    fn fitted(&self) -> ABCResult<&FittedPopulation> {
        self.population()
    }

    fn perturb(&self, parent: usize, rng: &mut dyn RngCore) -> ABCResult<Parameters> {
        let population = self.population()?;
        let steps = i64::from(self.n_steps);
        let delta = DVector::from_iterator(
            population.dim(),
            (0..population.dim()).map(|_| rng.gen_range(-steps..=steps) as f64),
        );
        population.displaced(parent, &delta)
    }

    fn pert_density(&self, parent: usize, to: &Parameters) -> ABCResult<f64> {
        let offset = self.population()?.offset(parent, to)?;
        let reachable = offset
            .iter()
            .all(|d| d.fract() == 0.0 && d.abs() <= f64::from(self.n_steps));
        if reachable {
            Ok(self.step_probability().powi(offset.len() as i32))
        } else {
            Ok(0.0)
        }
    }

    fn box_clone(&self) -> Box<dyn Transition> {
        Box::new(self.clone())
    }
}
