use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{ABCErr, ABCResult};

/// Named parameter values. Categorical parameters are carried as real codes.
///
/// Keys are kept sorted so the vector form is stable for a given set of names.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, f64>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_iterator(self.0.len(), self.0.values().copied())
    }

    /// Rebuild parameters from a vector laid out in the order of `names`.
    pub fn from_vector(names: &[String], vector: &DVector<f64>) -> ABCResult<Self> {
        if names.len() != vector.len() {
            return Err(ABCErr::DomainError(format!(
                "Wrong number of values. Expected {}, got {}",
                names.len(),
                vector.len()
            )));
        }
        Ok(names
            .iter()
            .cloned()
            .zip(vector.iter().copied())
            .collect())
    }
}

impl Deref for Parameters {
    type Target = BTreeMap<String, f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Parameters {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<(String, f64)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Parameters(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, f64); N]> for Parameters {
    fn from(values: [(&str, f64); N]) -> Self {
        values
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

/// Summary statistics produced by a simulation (and the observed data).
pub type SummaryStatistics = BTreeMap<String, f64>;

#[cfg(test)]
mod tests {
    use nalgebra::DVector;

    use super::Parameters;
    use crate::error::{ABCErr, ABCResult};

    #[test]
    fn vector_layout_follows_sorted_names() -> ABCResult<()> {
        let params = Parameters::from([("beta", 2.0), ("alpha", 1.0)]);
        assert_eq!(vec!["alpha".to_string(), "beta".to_string()], params.names());
        assert_eq!(DVector::from_column_slice(&[1.0, 2.0]), params.to_vector());

        let rebuilt = Parameters::from_vector(&params.names(), &params.to_vector())?;
        assert_eq!(params, rebuilt);
        Ok(())
    }

    #[test]
    fn wrong_length_vector_is_a_domain_error() {
        let names = vec!["a".to_string()];
        let result = Parameters::from_vector(&names, &DVector::from_column_slice(&[1.0, 2.0]));
        assert!(matches!(result, Err(ABCErr::DomainError(_))));
    }
}
