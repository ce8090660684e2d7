use statrs::statistics::{Data, OrderStatistics};

use crate::error::{ABCErr, ABCResult};

/// Acceptance threshold schedule.
///
/// `initialize` establishes epsilon_0, either from configuration or from the
/// distances of a prior-only calibration sample. `next` derives
/// epsilon_{t+1} from the accepted (distance, weight) pairs of generation `t`
/// and never returns a value above `current`.
pub trait Epsilon: Send + Sync {
    /// True when epsilon_0 can only be derived from a calibration sample.
    fn requires_calibration(&self) -> bool;

    fn initialize(&mut self, calibration: Option<&[(f64, f64)]>) -> ABCResult<f64>;

    fn next(&mut self, t: u16, current: f64, accepted: &[(f64, f64)]) -> ABCResult<f64>;
}

/// Clamp a proposed threshold so the schedule is non-increasing: a value
/// above `current` is replaced by `current`.
pub fn hold_if_increasing(proposed: f64, current: f64) -> f64 {
    if proposed > current {
        log::warn!(
            "Proposed epsilon {} exceeds current {}, holding at current value",
            proposed,
            current
        );
        current
    } else {
        proposed
    }
}

fn check_distances(accepted: &[(f64, f64)]) -> ABCResult<()> {
    if accepted.is_empty() {
        return Err(ABCErr::CalibrationError("No distances to derive epsilon from.".into()));
    }
    match accepted.iter().find(|(d, w)| !(*d >= 0.0) || !w.is_finite() || *w < 0.0) {
        Some((d, w)) => Err(ABCErr::CalibrationError(format!(
            "Encountered invalid distance ({}) or weight ({}) when calculating epsilon.",
            d, w
        ))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct ConstantEpsilon {
    value: f64,
}
impl ConstantEpsilon {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}
impl Epsilon for ConstantEpsilon {
    fn requires_calibration(&self) -> bool {
        false
    }

    fn initialize(&mut self, _: Option<&[(f64, f64)]>) -> ABCResult<f64> {
        Ok(self.value)
    }

    fn next(&mut self, _: u16, current: f64, _: &[(f64, f64)]) -> ABCResult<f64> {
        Ok(hold_if_increasing(self.value, current))
    }
}

/// An explicit schedule; the last value repeats once the list runs out.
#[derive(Debug, Clone)]
pub struct ListEpsilon {
    values: Vec<f64>,
}
impl ListEpsilon {
    pub fn new(values: Vec<f64>) -> ABCResult<Self> {
        if values.is_empty() {
            return Err(ABCErr::ConfigError("Epsilon list is empty.".into()));
        }
        Ok(Self { values })
    }
}
impl Epsilon for ListEpsilon {
    fn requires_calibration(&self) -> bool {
        false
    }

    fn initialize(&mut self, _: Option<&[(f64, f64)]>) -> ABCResult<f64> {
        Ok(self.values[0])
    }

    fn next(&mut self, t: u16, current: f64, _: &[(f64, f64)]) -> ABCResult<f64> {
        let index = (t as usize + 1).min(self.values.len() - 1);
        Ok(hold_if_increasing(self.values[index], current))
    }
}

/// Quantile of the accepted distances, scaled by a shrink factor.
#[derive(Debug, Clone)]
pub struct QuantileEpsilon {
    initial_epsilon: Option<f64>,
    alpha: f64,
    quantile_multiplier: f64,
    weighted: bool,
}
impl QuantileEpsilon {
    /// `initial_epsilon` of `None` means calibrate from a prior sample.
    pub fn new(
        initial_epsilon: Option<f64>,
        alpha: f64,
        quantile_multiplier: f64,
        weighted: bool,
    ) -> ABCResult<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ABCErr::ConfigError(format!(
                "Quantile alpha must be in (0, 1], got {}",
                alpha
            )));
        }
        if !(quantile_multiplier > 0.0) {
            return Err(ABCErr::ConfigError(format!(
                "Quantile multiplier must be positive, got {}",
                quantile_multiplier
            )));
        }
        Ok(Self {
            initial_epsilon,
            alpha,
            quantile_multiplier,
            weighted,
        })
    }

    /// Median of the distances times `quantile_multiplier`.
    pub fn median(initial_epsilon: Option<f64>, quantile_multiplier: f64) -> ABCResult<Self> {
        Self::new(initial_epsilon, 0.5, quantile_multiplier, true)
    }

    fn quantile(&self, accepted: &[(f64, f64)]) -> ABCResult<f64> {
        check_distances(accepted)?;
        let value = if self.weighted {
            weighted_quantile(accepted, self.alpha)
        } else {
            let mut data = Data::new(accepted.iter().map(|(d, _)| *d).collect::<Vec<_>>());
            data.quantile(self.alpha)
        };

        if value.is_nan() {
            Err(ABCErr::CalibrationError(
                "Epsilon (from quantile) was not a number (NaN).".into(),
            ))
        } else {
            Ok(value * self.quantile_multiplier)
        }
    }
}
impl Epsilon for QuantileEpsilon {
    fn requires_calibration(&self) -> bool {
        self.initial_epsilon.is_none()
    }

    fn initialize(&mut self, calibration: Option<&[(f64, f64)]>) -> ABCResult<f64> {
        match (self.initial_epsilon, calibration) {
            (Some(value), _) => Ok(value),
            (None, Some(sample)) => {
                let value = self.quantile(sample)?;
                log::info!("Calibrated initial epsilon: {value}");
                Ok(value)
            }
            (None, None) => Err(ABCErr::CalibrationError(
                "No initial epsilon given and no calibration sample available.".into(),
            )),
        }
    }

    fn next(&mut self, _: u16, current: f64, accepted: &[(f64, f64)]) -> ABCResult<f64> {
        let proposed = self.quantile(accepted)?;
        log::info!("New epsilon: {proposed}");
        Ok(hold_if_increasing(proposed, current))
    }
}

/// Smallest distance whose cumulative normalised weight reaches `alpha`.
pub fn weighted_quantile(accepted: &[(f64, f64)], alpha: f64) -> f64 {
    let mut sorted = accepted.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: f64 = sorted.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return f64::NAN;
    }

    let mut cumulative = 0.0;
    for (distance, weight) in &sorted {
        cumulative += weight / total;
        if cumulative >= alpha - 1e-12 {
            return *distance;
        }
    }
    sorted.last().map(|(d, _)| *d).unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(distances: &[f64]) -> Vec<(f64, f64)> {
        let w = 1.0 / distances.len() as f64;
        distances.iter().map(|d| (*d, w)).collect()
    }

    #[test]
    fn median_with_shrink_factor() -> ABCResult<()> {
        let mut eps = QuantileEpsilon::median(Some(10.0), 0.7)?;
        assert_eq!(10.0, eps.initialize(None)?);
        let next = eps.next(0, 10.0, &uniform(&[1.0, 2.0, 3.0]))?;
        assert!((next - 1.4).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn unweighted_quantile_uses_order_statistics() -> ABCResult<()> {
        let mut eps = QuantileEpsilon::new(Some(10.0), 0.5, 1.0, false)?;
        let next = eps.next(0, 10.0, &uniform(&[3.0, 1.0, 2.0]))?;
        assert!((next - 2.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn increase_is_held_at_current() -> ABCResult<()> {
        let mut eps = QuantileEpsilon::median(Some(1.0), 1.0)?;
        let next = eps.next(3, 1.0, &uniform(&[2.0, 4.0, 6.0]))?;
        assert_eq!(1.0, next);
        Ok(())
    }

    #[test]
    fn weighted_quantile_respects_weights() {
        let accepted = vec![(1.0, 0.1), (2.0, 0.1), (3.0, 0.8)];
        assert_eq!(3.0, weighted_quantile(&accepted, 0.5));
        assert_eq!(1.0, weighted_quantile(&accepted, 0.1));
    }

    #[test]
    fn calibration_from_sample() -> ABCResult<()> {
        let mut eps = QuantileEpsilon::median(None, 1.0)?;
        assert!(eps.requires_calibration());
        assert_eq!(5.0, eps.initialize(Some(&uniform(&[1.0, 5.0, 9.0])))?);
        Ok(())
    }

    #[test]
    fn calibration_without_sample_fails() -> ABCResult<()> {
        let mut eps = QuantileEpsilon::median(None, 1.0)?;
        assert!(matches!(eps.initialize(None), Err(ABCErr::CalibrationError(_))));
        Ok(())
    }

    #[test]
    fn negative_distance_rejected() -> ABCResult<()> {
        let mut eps = QuantileEpsilon::median(Some(1.0), 1.0)?;
        let result = eps.next(0, 1.0, &[(-1.0, 1.0)]);
        assert!(matches!(result, Err(ABCErr::CalibrationError(_))));
        Ok(())
    }

    #[test]
    fn list_schedule_repeats_last_value() -> ABCResult<()> {
        let mut eps = ListEpsilon::new(vec![5.0, 3.0, 1.0])?;
        assert_eq!(5.0, eps.initialize(None)?);
        assert_eq!(3.0, eps.next(0, 5.0, &[])?);
        assert_eq!(1.0, eps.next(1, 3.0, &[])?);
        assert_eq!(1.0, eps.next(7, 1.0, &[])?);
        Ok(())
    }
}
