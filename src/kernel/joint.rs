use rand::RngCore;

use crate::{
    error::{ABCErr, ABCResult},
    parameters::Parameters,
};

use super::{FittedPopulation, Transition};

/// Hands disjoint groups of parameters to their own kernels. A proposal
/// perturbs every group of the same parent, so the density for a parent is
/// the product of the group densities.
#[derive(Debug, Clone)]
pub struct JointTransition {
    parts: Vec<(Vec<String>, Box<dyn Transition>)>,
    fitted: Option<FittedPopulation>,
}
impl JointTransition {
    pub fn new(parts: Vec<(Vec<String>, Box<dyn Transition>)>) -> ABCResult<Self> {
        let mut seen: Vec<&String> = Vec::new();
        for name in parts.iter().flat_map(|(names, _)| names) {
            if seen.contains(&name) {
                return Err(ABCErr::ConfigError(format!("Parameter {} is in more than one group", name)));
            }
            seen.push(name);
        }
        Ok(Self { parts, fitted: None })
    }

    fn population(&self) -> ABCResult<&FittedPopulation> {
        self.fitted
            .as_ref()
            .ok_or_else(|| ABCErr::KernelFitError("Transition has not been fitted.".into()))
    }
}

fn project(parameters: &Parameters, names: &[String]) -> ABCResult<Parameters> {
    names
        .iter()
        .map(|name| {
            parameters
                .get(name)
                .map(|v| (name.clone(), *v))
                .ok_or_else(|| ABCErr::DomainError(format!("Parameter {} missing from {:?}", name, parameters.names())))
        })
        .collect()
}

impl Transition for JointTransition {
    fn fit(&mut self, parameters: &[Parameters], weights: &[f64]) -> ABCResult<()> {
        let population = FittedPopulation::allowing_repeats(parameters, weights)?;
        let grouped: usize = self.parts.iter().map(|(names, _)| names.len()).sum();
        if grouped != population.dim() {
            return Err(ABCErr::KernelFitError(format!(
                "Kernel groups cover {} parameters, population has {}",
                grouped,
                population.dim()
            )));
        }

        for (names, transition) in self.parts.iter_mut() {
            let projected = parameters
                .iter()
                .map(|p| project(p, names))
                .collect::<ABCResult<Vec<_>>>()
                .map_err(|e| ABCErr::KernelFitError(e.to_string()))?;
            transition.fit(&projected, weights)?;
        }
        self.fitted = Some(population);
        Ok(())
    }

    fn fitted(&self) -> ABCResult<&FittedPopulation> {
        self.population()
    }

    fn perturb(&self, parent: usize, rng: &mut dyn RngCore) -> ABCResult<Parameters> {
        self.population()?;
        let mut proposal = Parameters::new();
        for (_, transition) in &self.parts {
            let mut part = transition.perturb(parent, rng)?;
            proposal.append(&mut part);
        }
        Ok(proposal)
    }

    fn pert_density(&self, parent: usize, to: &Parameters) -> ABCResult<f64> {
        let population = self.population()?;
        if to.names() != population.names {
            return Err(ABCErr::DomainError(format!(
                "Candidate {:?} does not match fitted names {:?}",
                to.names(),
                population.names
            )));
        }
        let mut density = 1.0;
        for (names, transition) in &self.parts {
            density *= transition.pert_density(parent, &project(to, names)?)?;
            if density == 0.0 {
                break;
            }
        }
        Ok(density)
    }

    fn box_clone(&self) -> Box<dyn Transition> {
        Box::new(self.clone())
    }
}

/// The kernel for a model whose `discrete` parameters are integer coded:
/// `continuous` alone, `discrete` alone, or the two joined.
pub fn transition_for(
    parameter_names: &[String],
    discrete_names: &[String],
    continuous: &dyn Transition,
    discrete: &dyn Transition,
) -> ABCResult<Box<dyn Transition>> {
    let continuous_names: Vec<String> = parameter_names
        .iter()
        .filter(|n| !discrete_names.contains(*n))
        .cloned()
        .collect();
    if discrete_names.is_empty() {
        Ok(continuous.box_clone())
    } else if continuous_names.is_empty() {
        Ok(discrete.box_clone())
    } else {
        Ok(Box::new(JointTransition::new(vec![
            (continuous_names, continuous.box_clone()),
            (discrete_names.to_vec(), discrete.box_clone()),
        ])?))
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::kernel::{test_helper::uniform_weights, DiscreteRandomWalkTransition, MultivariateNormalTransition};

    fn mixed() -> Vec<Parameters> {
        [(0.1, 2.0), (0.4, 2.0), (0.7, 3.0), (0.9, 5.0)]
            .iter()
            .map(|(x, k)| Parameters::from([("x", *x), ("k", *k)]))
            .collect()
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn fitted_kernel() -> ABCResult<Box<dyn Transition>> {
        let mut kernel = transition_for(
            &names(&["k", "x"]),
            &names(&["k"]),
            &MultivariateNormalTransition::default(),
            &DiscreteRandomWalkTransition::default(),
        )?;
        kernel.fit(&mixed(), &uniform_weights(4))?;
        Ok(kernel)
    }

    #[test]
    fn discrete_part_stays_integer() -> ABCResult<()> {
        let kernel = fitted_kernel()?;
        let mut rng = SmallRng::seed_from_u64(4);
        for _ in 0..100 {
            let proposal = kernel.rvs(&mut rng)?;
            assert_eq!(names(&["k", "x"]), proposal.names());
            assert_eq!(0.0, proposal["k"].fract());
            assert!(kernel.density(&proposal)? > 0.0);
        }
        Ok(())
    }

    #[test]
    fn density_is_product_of_group_densities() -> ABCResult<()> {
        let kernel = fitted_kernel()?;
        let candidate = Parameters::from([("x", 0.5), ("k", 3.0)]);
        // k = 3 is reachable from the parents at 2 and 3 only.
        let mut continuous = MultivariateNormalTransition::default();
        let xs: Vec<Parameters> = mixed().iter().map(|p| Parameters::from([("x", p["x"])])).collect();
        continuous.fit(&xs, &uniform_weights(4))?;
        let x = Parameters::from([("x", 0.5)]);
        let expected = (0..3)
            .map(|parent| 0.25 * continuous.pert_density(parent, &x).unwrap_or(0.0) / 3.0)
            .sum::<f64>();
        assert!((kernel.density(&candidate)? - expected).abs() < 1e-12 * expected.max(1.0));

        assert_eq!(0.0, kernel.density(&Parameters::from([("x", 0.5), ("k", 3.5)]))?);
        Ok(())
    }

    #[test]
    fn continuous_only_models_keep_their_kernel() -> ABCResult<()> {
        let mut kernel = transition_for(
            &names(&["x"]),
            &[],
            &MultivariateNormalTransition::default(),
            &DiscreteRandomWalkTransition::default(),
        )?;
        let xs: Vec<Parameters> = mixed().iter().map(|p| Parameters::from([("x", p["x"])])).collect();
        kernel.fit(&xs, &uniform_weights(4))?;
        assert!(format!("{:?}", kernel).starts_with("MultivariateNormalTransition"));
        Ok(())
    }

    #[test]
    fn overlapping_groups_rejected() {
        let result = JointTransition::new(vec![
            (names(&["x"]), Box::new(MultivariateNormalTransition::default()) as Box<dyn Transition>),
            (names(&["x"]), Box::new(DiscreteRandomWalkTransition::default()) as Box<dyn Transition>),
        ]);
        assert!(matches!(result, Err(ABCErr::ConfigError(_))));
    }
}
