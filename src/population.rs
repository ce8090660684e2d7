use rand::RngCore;

use crate::{
    error::{ABCErr, ABCResult},
    kernel::Transition,
    parameters::Parameters,
};

/// Decides how many particles the next generation should hold.
///
/// Implementations must not modify the transitions they are shown.
pub trait PopulationStrategy: Send + Sync {
    fn nr_particles(&self) -> usize;

    /// `transitions` holds the fitted kernel and probability of every model
    /// still alive.
    fn adapt_population_size(
        &mut self,
        transitions: &[(&dyn Transition, f64)],
        rng: &mut dyn RngCore,
    ) -> ABCResult<()>;
}

#[derive(Debug, Clone)]
pub struct ConstantPopulationSize {
    nr_particles: usize,
}
impl ConstantPopulationSize {
    pub fn new(nr_particles: usize) -> ABCResult<Self> {
        if nr_particles == 0 {
            return Err(ABCErr::ConfigError("Population size must be positive.".into()));
        }
        Ok(Self { nr_particles })
    }
}
impl PopulationStrategy for ConstantPopulationSize {
    fn nr_particles(&self) -> usize {
        self.nr_particles
    }

    fn adapt_population_size(&mut self, _: &[(&dyn Transition, f64)], _: &mut dyn RngCore) -> ABCResult<()> {
        Ok(())
    }
}

/// Chooses the population size so that the bootstrapped coefficient of
/// variation of the kernel density estimate reaches `mean_cv`.
#[derive(Debug, Clone)]
pub struct AdaptivePopulationSize {
    nr_particles: usize,
    mean_cv: f64,
    min_population_size: usize,
    max_population_size: usize,
    n_bootstrap: usize,
}
impl AdaptivePopulationSize {
    pub fn new(
        start_nr_particles: usize,
        mean_cv: f64,
        min_population_size: usize,
        max_population_size: usize,
        n_bootstrap: usize,
    ) -> ABCResult<Self> {
        if min_population_size == 0 || min_population_size > max_population_size {
            return Err(ABCErr::ConfigError(format!(
                "Invalid population bounds [{}, {}]",
                min_population_size, max_population_size
            )));
        }
        if !(mean_cv > 0.0) || n_bootstrap < 2 {
            return Err(ABCErr::ConfigError(
                "Adaptive population needs a positive target CV and at least 2 bootstraps.".into(),
            ));
        }
        Ok(Self {
            nr_particles: start_nr_particles.clamp(min_population_size, max_population_size),
            mean_cv,
            min_population_size,
            max_population_size,
            n_bootstrap,
        })
    }

    /// Mean coefficient of variation of the density at the fitted points,
    /// over kernels refitted to `n * probability` fresh draws.
    fn coefficient_of_variation(
        &self,
        n: usize,
        transitions: &[(&dyn Transition, f64)],
        rng: &mut dyn RngCore,
    ) -> ABCResult<f64> {
        let mut weighted_cv = 0.0;
        for (transition, probability) in transitions {
            let fitted = transition.fitted()?;
            if fitted.dim() == 0 {
                continue;
            }
            let test_points: Vec<Parameters> = fitted
                .points
                .iter()
                .map(|p| Parameters::from_vector(&fitted.names, p))
                .collect::<ABCResult<_>>()?;
            let n_model = ((n as f64 * probability).ceil() as usize).max(2);

            let mut densities = vec![Vec::with_capacity(self.n_bootstrap); test_points.len()];
            for _ in 0..self.n_bootstrap {
                let draws = (0..n_model)
                    .map(|_| transition.rvs(rng))
                    .collect::<ABCResult<Vec<_>>>()?;
                let mut bootstrap = transition.box_clone();
                bootstrap.fit(&draws, &vec![1.0 / n_model as f64; n_model])?;
                for (point, acc) in test_points.iter().zip(densities.iter_mut()) {
                    acc.push(bootstrap.density(point)?);
                }
            }

            let cvs: Vec<f64> = densities
                .iter()
                .filter_map(|d| {
                    let mean = d.iter().sum::<f64>() / d.len() as f64;
                    if mean > 0.0 {
                        let var = d.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / d.len() as f64;
                        Some(var.sqrt() / mean)
                    } else {
                        None
                    }
                })
                .collect();
            if !cvs.is_empty() {
                weighted_cv += probability * cvs.iter().sum::<f64>() / cvs.len() as f64;
            }
        }
        Ok(weighted_cv)
    }
}
impl PopulationStrategy for AdaptivePopulationSize {
    fn nr_particles(&self) -> usize {
        self.nr_particles
    }

    fn adapt_population_size(
        &mut self,
        transitions: &[(&dyn Transition, f64)],
        rng: &mut dyn RngCore,
    ) -> ABCResult<()> {
        let cv = match self.coefficient_of_variation(self.nr_particles, transitions, rng) {
            Ok(cv) => cv,
            Err(e) => {
                log::warn!("Could not estimate density CV, keeping population size: {}", e);
                return Ok(());
            }
        };

        // CV shrinks like 1/sqrt(n)
        let proposed = if cv > 0.0 {
            (self.nr_particles as f64 * (cv / self.mean_cv).powi(2)).ceil() as usize
        } else {
            self.min_population_size
        };
        self.nr_particles = proposed.clamp(self.min_population_size, self.max_population_size);
        log::info!("Estimated CV {:.4}, population size now {}", cv, self.nr_particles);
        Ok(())
    }
}
