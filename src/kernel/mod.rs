use std::fmt::Debug;

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::{
    distributions::{Distribution, WeightedIndex},
    RngCore,
};
use statrs::distribution::Normal;

use crate::{
    error::{ABCErr, ABCResult},
    parameters::Parameters,
};

pub mod discrete;
pub mod global;
pub mod joint;
pub mod local;
pub mod model;
pub mod olcm;

pub use discrete::DiscreteRandomWalkTransition;
pub use global::MultivariateNormalTransition;
pub use joint::JointTransition;
pub use local::LocalTransition;
pub use model::ModelPerturbationKernel;
pub use olcm::OLCMTransition;

/// Variance floor used when a fitted covariance has a degenerate direction.
pub const DEFAULT_MIN_BANDWIDTH: f64 = 1e-6;

/// Perturbation distribution fitted to a weighted population.
///
/// Proposals are drawn by picking a parent by weight and perturbing it, and
/// the proposal density is the weighted mixture of the per-parent densities.
pub trait Transition: Send + Sync + Debug {
    fn fit(&mut self, parameters: &[Parameters], weights: &[f64]) -> ABCResult<()>;

    fn fitted(&self) -> ABCResult<&FittedPopulation>;

    fn perturb(&self, parent: usize, rng: &mut dyn RngCore) -> ABCResult<Parameters>;

    /// Density of proposing `to` when perturbing `parent`.
    fn pert_density(&self, parent: usize, to: &Parameters) -> ABCResult<f64>;

    fn box_clone(&self) -> Box<dyn Transition>;

    fn rvs(&self, rng: &mut dyn RngCore) -> ABCResult<Parameters> {
        let parent = self.fitted()?.sample_parent(rng);
        self.perturb(parent, rng)
    }

    fn density(&self, candidate: &Parameters) -> ABCResult<f64> {
        let fitted = self.fitted()?;
        let mut density = 0.0;
        for (parent, weight) in fitted.weights.iter().enumerate() {
            if *weight > 0.0 {
                density += weight * self.pert_density(parent, candidate)?;
            }
        }
        Ok(density)
    }
}

impl Clone for Box<dyn Transition> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// A population prepared for kernel fitting: vector form, normalised
/// weights and a weighted index for drawing parents.
#[derive(Debug, Clone)]
pub struct FittedPopulation {
    pub names: Vec<String>,
    pub points: Vec<DVector<f64>>,
    pub weights: Vec<f64>,
    parent_index: WeightedIndex<f64>,
}
impl FittedPopulation {
    /// Fails with `KernelFitError` unless there are at least two distinct
    /// points and no fewer than there are dimensions.
    pub fn new(parameters: &[Parameters], weights: &[f64]) -> ABCResult<Self> {
        Self::build(parameters, weights, true)
    }

    /// As `new`, but a population collapsed onto a single point is allowed.
    /// Used by kernels whose spread does not come from the population.
    pub fn allowing_repeats(parameters: &[Parameters], weights: &[f64]) -> ABCResult<Self> {
        Self::build(parameters, weights, false)
    }

    fn build(parameters: &[Parameters], weights: &[f64], require_spread: bool) -> ABCResult<Self> {
        if parameters.is_empty() {
            return Err(ABCErr::KernelFitError("Cannot fit on an empty population.".into()));
        }
        if parameters.len() != weights.len() {
            return Err(ABCErr::KernelFitError(format!(
                "Got {} parameter sets but {} weights.",
                parameters.len(),
                weights.len()
            )));
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(ABCErr::KernelFitError(format!("Invalid particle weight {}", w)));
        }

        let names = parameters[0].names();
        if parameters.iter().any(|p| p.names() != names) {
            return Err(ABCErr::KernelFitError(
                "Particles do not share the same parameter names.".into(),
            ));
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(ABCErr::KernelFitError(
                "Population has zero effective sample size.".into(),
            ));
        }
        let weights: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let points: Vec<DVector<f64>> = parameters.iter().map(Parameters::to_vector).collect();

        if require_spread && !names.is_empty() {
            let distinct = count_distinct(&points, &weights);
            if distinct < 2 || distinct < names.len() {
                return Err(ABCErr::KernelFitError(format!(
                    "Population has {} distinct point(s) in {} dimension(s).",
                    distinct,
                    names.len()
                )));
            }
        }

        let parent_index = WeightedIndex::new(&weights)
            .map_err(|e| ABCErr::KernelFitError(format!("Cannot index weights: {}", e)))?;

        Ok(Self {
            names,
            points,
            weights,
            parent_index,
        })
    }

    pub fn dim(&self) -> usize {
        self.names.len()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.weights)
    }

    pub fn sample_parent(&self, rng: &mut dyn RngCore) -> usize {
        self.parent_index.sample(rng)
    }

    pub fn weighted_mean(&self) -> DVector<f64> {
        weighted_mean(&self.points, &self.weights, self.dim())
    }

    pub fn weighted_covariance(&self) -> DMatrix<f64> {
        weighted_covariance(&self.points, &self.weights, self.dim())
    }

    /// `parent` displaced by `delta`, as named parameters.
    pub(crate) fn displaced(&self, parent: usize, delta: &DVector<f64>) -> ABCResult<Parameters> {
        Parameters::from_vector(&self.names, &(&self.points[parent] + delta))
    }

    pub(crate) fn offset(&self, parent: usize, to: &Parameters) -> ABCResult<DVector<f64>> {
        if to.names() != self.names {
            return Err(ABCErr::DomainError(format!(
                "Candidate {:?} does not match fitted names {:?}",
                to.names(),
                self.names
            )));
        }
        Ok(to.to_vector() - &self.points[parent])
    }
}

/// Zero-mean multivariate normal held as a Cholesky factor.
#[derive(Clone)]
pub struct Gaussian {
    covariance: DMatrix<f64>,
    cholesky_l: DMatrix<f64>,
    log_normaliser: f64,
    standard: Normal,
}
impl Gaussian {
    pub fn new(covariance: DMatrix<f64>) -> ABCResult<Self> {
        let dim = covariance.nrows();
        let cholesky_l = if dim == 0 {
            DMatrix::zeros(0, 0)
        } else {
            covariance
                .clone()
                .cholesky()
                .ok_or_else(|| {
                    ABCErr::KernelFitError("Covariance is not positive definite.".into())
                })?
                .l()
        };
        let log_det: f64 = 2.0 * cholesky_l.diagonal().iter().map(|d| d.ln()).sum::<f64>();
        let log_normaliser =
            -0.5 * (dim as f64 * (2.0 * std::f64::consts::PI).ln() + log_det);

        Ok(Self {
            covariance,
            cholesky_l,
            log_normaliser,
            standard: Normal::new(0.0, 1.0)?,
        })
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn sample(&self, rng: &mut dyn RngCore) -> DVector<f64> {
        let dim = self.covariance.nrows();
        let z = DVector::from_iterator(dim, (0..dim).map(|_| self.standard.sample(rng)));
        &self.cholesky_l * z
    }

    pub fn pdf(&self, delta: &DVector<f64>) -> f64 {
        if delta.is_empty() {
            return 1.0;
        }
        match self.cholesky_l.solve_lower_triangular(delta) {
            Some(y) => (self.log_normaliser - 0.5 * y.norm_squared()).exp(),
            None => 0.0,
        }
    }
}
impl Debug for Gaussian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gaussian")
            .field("covariance", &self.covariance)
            .finish()
    }
}

pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum: f64 = weights.iter().sum();
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        sum * sum / sum_sq
    } else {
        0.0
    }
}

pub fn weighted_mean(points: &[DVector<f64>], weights: &[f64], dim: usize) -> DVector<f64> {
    points
        .iter()
        .zip(weights)
        .fold(DVector::zeros(dim), |acc, (p, w)| acc + *w * p)
}

/// Weighted covariance about the weighted mean, weights assumed normalised.
pub fn weighted_covariance(points: &[DVector<f64>], weights: &[f64], dim: usize) -> DMatrix<f64> {
    let mean = weighted_mean(points, weights, dim);
    let mut covariance = points
        .iter()
        .zip(weights)
        .fold(DMatrix::zeros(dim, dim), |acc, (p, w)| {
            let centred = p - &mean;
            acc + *w * &centred * centred.transpose()
        });
    make_symmetric(&mut covariance);
    covariance
}

/// Replace eigenvalues below `min_bandwidth^2` (or numerically negligible
/// relative to the largest) by that floor, so the covariance is usable for
/// sampling and has a finite, non-zero density everywhere.
pub fn floor_covariance(covariance: DMatrix<f64>, min_bandwidth: f64) -> DMatrix<f64> {
    if covariance.nrows() == 0 {
        return covariance;
    }
    let mut eigen = SymmetricEigen::new(covariance.clone());
    let largest = eigen.eigenvalues.iter().cloned().fold(0.0, f64::max);
    let floor = f64::max(min_bandwidth * min_bandwidth, largest * 1e-12);

    let mut floored = 0;
    eigen.eigenvalues.iter_mut().for_each(|v| {
        if !v.is_finite() || *v < floor {
            *v = floor;
            floored += 1;
        }
    });
    if floored == 0 {
        return covariance;
    }
    log::debug!("Floored {} degenerate covariance direction(s) to {}", floored, floor);

    let mut recomposed = eigen.recompose();
    make_symmetric(&mut recomposed);
    recomposed
}

/// Mirror the upper triangle onto the lower; products of floating point
/// values leave the two sides very slightly different.
fn make_symmetric(matrix: &mut DMatrix<f64>) {
    for i in 0..matrix.nrows() {
        for j in i..matrix.ncols() {
            matrix[(j, i)] = matrix[(i, j)];
        }
    }
}

fn count_distinct(points: &[DVector<f64>], weights: &[f64]) -> usize {
    let mut distinct: Vec<&DVector<f64>> = Vec::new();
    for (point, weight) in points.iter().zip(weights) {
        if *weight > 0.0 && !distinct.iter().any(|d| *d == point) {
            distinct.push(point);
        }
    }
    distinct.len()
}

#[cfg(test)]
pub(crate) mod test_helper {
    use crate::parameters::Parameters;

    pub fn points_2d(values: &[(f64, f64)]) -> Vec<Parameters> {
        values
            .iter()
            .map(|(x, y)| Parameters::from([("x", *x), ("y", *y)]))
            .collect()
    }

    pub fn uniform_weights(n: usize) -> Vec<f64> {
        vec![1.0 / n as f64; n]
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{DMatrix, DVector, Matrix2};
    use rand::{rngs::SmallRng, SeedableRng};

    use super::{test_helper::*, *};

    #[test]
    fn weighted_covariance_matches_hand_calculation() {
        let points = vec![
            DVector::from_column_slice(&[0.0, 0.0]),
            DVector::from_column_slice(&[2.0, 4.0]),
        ];
        let cov = weighted_covariance(&points, &[0.5, 0.5], 2);
        assert_eq!(Matrix2::new(1.0, 2.0, 2.0, 4.0), cov);
    }

    #[test]
    fn floor_replaces_degenerate_direction() {
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let floored = floor_covariance(cov, 0.1);
        assert!(floored.clone().cholesky().is_some());
        let eigen = SymmetricEigen::new(floored);
        let smallest = eigen.eigenvalues.iter().cloned().fold(f64::MAX, f64::min);
        assert!((smallest - 0.01).abs() < 1e-9);
    }

    #[test]
    fn gaussian_pdf_matches_standard_normal() -> ABCResult<()> {
        let gaussian = Gaussian::new(DMatrix::identity(2, 2))?;
        let at_origin = gaussian.pdf(&DVector::zeros(2));
        assert!((at_origin - 1.0 / (2.0 * std::f64::consts::PI)).abs() < 1e-12);

        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(2, gaussian.sample(&mut rng).len());
        Ok(())
    }

    #[test]
    fn fit_fails_on_single_distinct_point() {
        let params = points_2d(&[(1.0, 1.0), (1.0, 1.0), (1.0, 1.0)]);
        let result = FittedPopulation::new(&params, &uniform_weights(3));
        assert!(matches!(result, Err(ABCErr::KernelFitError(_))));
    }

    #[test]
    fn fit_fails_with_fewer_distinct_points_than_dimensions() {
        let params: Vec<Parameters> = [(0.0, 1.0, 2.0), (1.0, 2.0, 3.0)]
            .iter()
            .map(|(a, b, c)| Parameters::from([("a", *a), ("b", *b), ("c", *c)]))
            .collect();
        let result = FittedPopulation::new(&params, &uniform_weights(2));
        assert!(matches!(result, Err(ABCErr::KernelFitError(_))));
    }

    #[test]
    fn fit_fails_with_zero_effective_sample_size() {
        let params = points_2d(&[(0.0, 1.0), (1.0, 0.0), (2.0, 2.0)]);
        let result = FittedPopulation::new(&params, &[0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(ABCErr::KernelFitError(_))));
    }

    #[test]
    fn effective_sample_size_of_uniform_weights_is_n() {
        assert!((effective_sample_size(&uniform_weights(8)) - 8.0).abs() < 1e-9);
        assert!((effective_sample_size(&[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-12);
    }
}
