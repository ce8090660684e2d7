pub mod config;
pub mod filesystem;
pub mod memory;

pub use filesystem::FileSystemStore;
pub use memory::InMemoryStore;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ABCErr, ABCResult},
    parameters::{Parameters, SummaryStatistics},
    types::{Generation, ModelId, Population},
};

pub type RunId = Uuid;

/// What was known when a run started.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub id: RunId,
    pub created_unix_secs: u64,
    pub model_names: Vec<String>,
    /// Declared parameter names, one list per model.
    pub parameter_names: Vec<Vec<String>>,
    pub observed: SummaryStatistics,
    /// Prior-only simulations spent choosing the initial epsilon.
    #[serde(default)]
    pub calibration_simulations: u64,
}
impl RunInfo {
    pub fn new(model_names: Vec<String>, parameter_names: Vec<Vec<String>>, observed: SummaryStatistics) -> Self {
        let created_unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            id: Uuid::new_v4(),
            created_unix_secs,
            model_names,
            parameter_names,
            observed,
            calibration_simulations: 0,
        }
    }
}

/// Persistent history of runs and their generations.
///
/// A generation is saved whole or not at all, and generation numbers of a run
/// are contiguous from zero.
pub trait HistoryStore: Send + Sync {
    fn create_run(&self, info: &RunInfo) -> ABCResult<()>;

    fn load_run(&self, run: RunId) -> ABCResult<RunInfo>;

    fn list_runs(&self) -> ABCResult<Vec<RunId>>;

    /// Replace the stored description of an existing run.
    fn update_run(&self, info: &RunInfo) -> ABCResult<()>;

    /// Number of the newest saved generation, `None` if there is none yet.
    fn max_t(&self, run: RunId) -> ABCResult<Option<u16>>;

    /// Fails with `GenAlreadySaved` if the number is taken and with
    /// `StorageConsistencyError` if it would leave a gap.
    fn save(&self, run: RunId, generation: &Generation) -> ABCResult<()>;

    fn load_generation(&self, run: RunId, t: u16) -> ABCResult<Generation>;

    fn load_last_generation(&self, run: RunId) -> ABCResult<Option<Generation>> {
        match self.max_t(run)? {
            Some(t) => self.load_generation(run, t).map(Some),
            None => Ok(None),
        }
    }

    /// The model's population in the newest generation it is alive in.
    fn load_last_population(&self, run: RunId, model: ModelId) -> ABCResult<Option<(u16, Population)>> {
        let Some(max_t) = self.max_t(run)? else {
            return Ok(None);
        };
        for t in (0..=max_t).rev() {
            if let Some(population) = self.load_generation(run, t)?.populations.remove(&model) {
                return Ok(Some((t, population)));
            }
        }
        Ok(None)
    }

    /// Parameters and within-model weights; empty if the model was dead at `t`.
    fn get_distribution(&self, run: RunId, model: ModelId, t: u16) -> ABCResult<(Vec<Parameters>, Vec<f64>)> {
        Ok(self
            .load_generation(run, t)?
            .population(model)
            .map(Population::weighted_parameters)
            .unwrap_or_default())
    }

    fn get_model_probabilities(&self, run: RunId, t: u16) -> ABCResult<Vec<f64>> {
        let nr_models = self.load_run(run)?.model_names.len();
        Ok(self.load_generation(run, t)?.model_probabilities(nr_models))
    }

    fn get_all_epsilons(&self, run: RunId) -> ABCResult<Vec<f64>> {
        Ok(self.generations(run)?.iter().map(|g| g.epsilon).collect())
    }

    fn get_nr_evaluations(&self, run: RunId) -> ABCResult<Vec<u64>> {
        Ok(self.generations(run)?.iter().map(|g| g.nr_evaluations).collect())
    }

    fn generations(&self, run: RunId) -> ABCResult<Vec<Generation>> {
        match self.max_t(run)? {
            Some(max_t) => (0..=max_t).map(|t| self.load_generation(run, t)).collect(),
            None => Ok(Vec::new()),
        }
    }
}

/// Decide whether generation `number` may follow `max_t`.
pub(crate) fn check_next_number(run: RunId, max_t: Option<u16>, number: u16) -> ABCResult<()> {
    let expected = max_t.map(|t| u32::from(t) + 1).unwrap_or(0);
    let number_wide = u32::from(number);
    if number_wide < expected {
        Err(ABCErr::GenAlreadySaved(format!(
            "Generation {} of run {} already saved",
            number, run
        )))
    } else if number_wide > expected {
        Err(ABCErr::StorageConsistencyError(format!(
            "Generation {} of run {} would leave a gap, expected {}",
            number, run, expected
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_helper {
    use super::*;
    use crate::types::Particle;

    pub fn make_dummy_generation(number: u16, epsilon: f64) -> Generation {
        let particle = |model, x: f64, weight| Particle {
            model,
            parameters: Parameters::from([("x", x), ("y", -x)]),
            summary: None,
            distance: x / 10.0,
            weight,
            accepted: true,
        };
        let particles = vec![
            particle(0, 1.5, 0.25),
            particle(0, 2.5, 0.25),
            particle(1, 3.5, 0.5),
        ];
        Generation::new(number, epsilon, particles, 12, 3).unwrap()
    }

    pub fn observed() -> SummaryStatistics {
        [("heads".to_string(), 7.0)].into_iter().collect()
    }

    /// The checks every store must pass.
    pub fn exercise_store(store: &dyn HistoryStore) -> ABCResult<()> {
        let info = RunInfo::new(
            vec!["a".into(), "b".into()],
            vec![vec!["x".into(), "y".into()]; 2],
            observed(),
        );
        store.create_run(&info)?;
        assert_eq!(info, store.load_run(info.id)?);
        assert!(store.list_runs()?.contains(&info.id));
        assert_eq!(None, store.max_t(info.id)?);
        assert_eq!(None, store.load_last_generation(info.id)?);

        let mut calibrated = info.clone();
        calibrated.calibration_simulations = 40;
        store.update_run(&calibrated)?;
        assert_eq!(calibrated, store.load_run(info.id)?);
        let stranger = RunInfo::new(vec!["a".into()], vec![vec!["x".into()]], observed());
        assert!(matches!(store.update_run(&stranger), Err(ABCErr::StorageError(_))));

        let gen_0 = make_dummy_generation(0, 4.0);
        let gen_1 = make_dummy_generation(1, 2.0);
        store.save(info.id, &gen_0)?;
        store.save(info.id, &gen_1)?;

        assert_eq!(Some(1), store.max_t(info.id)?);
        assert_eq!(gen_0, store.load_generation(info.id, 0)?);
        assert_eq!(Some(gen_1.clone()), store.load_last_generation(info.id)?);
        assert_eq!(vec![4.0, 2.0], store.get_all_epsilons(info.id)?);
        assert_eq!(vec![12, 12], store.get_nr_evaluations(info.id)?);

        let probabilities = store.get_model_probabilities(info.id, 1)?;
        assert!((probabilities[0] - 0.5).abs() < 1e-12);
        assert!((probabilities[1] - 0.5).abs() < 1e-12);

        let (params, weights) = store.get_distribution(info.id, 0, 1)?;
        assert_eq!(vec![1.5, 2.5], params.iter().map(|p| p["x"]).collect::<Vec<_>>());
        assert_eq!(vec![0.5, 0.5], weights);
        let loaded = store.load_generation(info.id, 1)?;
        let stored_distances: Vec<f64> = loaded.population(0).unwrap().particles().iter().map(|p| p.distance).collect();
        assert_eq!(vec![0.15, 0.25], stored_distances);

        let (t, population) = store.load_last_population(info.id, 1)?.unwrap();
        assert_eq!(1, t);
        assert_eq!(1, population.len());

        let (params, weights) = store.get_distribution(info.id, 5, 0)?;
        assert!(params.is_empty() && weights.is_empty());

        match store.save(info.id, &make_dummy_generation(1, 1.0)) {
            Err(ABCErr::GenAlreadySaved(_)) => (),
            other => panic!("Expected GenAlreadySaved, got {:?}", other),
        }
        match store.save(info.id, &make_dummy_generation(3, 1.0)) {
            Err(ABCErr::StorageConsistencyError(_)) => (),
            other => panic!("Expected StorageConsistencyError, got {:?}", other),
        }
        // Failed saves leave the history intact.
        assert_eq!(gen_1, store.load_generation(info.id, 1)?);
        Ok(())
    }
}
