use std::fmt::Debug;
use std::path::Path;

use crate::{
    epsilon::{Epsilon, ListEpsilon, QuantileEpsilon},
    error::{ABCErr, ABCResult},
    kernel::{
        DiscreteRandomWalkTransition, LocalTransition, MultivariateNormalTransition, OLCMTransition, Transition,
        DEFAULT_MIN_BANDWIDTH,
    },
    population::{AdaptivePopulationSize, ConstantPopulationSize, PopulationStrategy},
    sampler::{multicore::DEFAULT_MAX_BATCH_SIZE, MulticoreSampler, Sampler, SingleCoreSampler, DEFAULT_MAX_TRIALS},
    smc::StopConditions,
    storage::config::StorageConfig,
};

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub max_generations: u16,
    pub num_particles: usize,
    #[serde(default)]
    pub minimum_epsilon: f64,
    #[serde(default)]
    pub max_total_simulations: Option<u64>,
    #[serde(default)]
    pub min_acceptance_rate: Option<f64>,
}
impl Job {
    pub fn stop_conditions(&self) -> StopConditions {
        StopConditions {
            max_generations: self.max_generations,
            minimum_epsilon: self.minimum_epsilon,
            max_total_simulations: self.max_total_simulations,
            min_acceptance_rate: self.min_acceptance_rate,
        }
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum KernelConfig {
    Global {
        #[serde(default = "one")]
        scaling: f64,
    },
    Local {
        #[serde(default = "quarter")]
        k_fraction: f64,
        #[serde(default = "one")]
        scaling: f64,
    },
    Olcm,
}
impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig::Global { scaling: 1.0 }
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum PopulationConfig {
    Constant,
    Adaptive {
        mean_cv: f64,
        min_population_size: usize,
        max_population_size: usize,
        #[serde(default = "default_n_bootstrap")]
        n_bootstrap: usize,
    },
}
impl Default for PopulationConfig {
    fn default() -> Self {
        PopulationConfig::Constant
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Algorithm {
    /// Absent means calibrate from a prior sample.
    #[serde(default)]
    pub initial_epsilon: Option<f64>,
    /// Explicit epsilon per generation; overrides the quantile schedule.
    #[serde(default)]
    pub epsilon_schedule: Option<Vec<f64>>,
    #[serde(default = "half")]
    pub quantile: f64,
    #[serde(default = "one")]
    pub quantile_multiplier: f64,
    #[serde(default = "yes")]
    pub weighted_quantile: bool,
    #[serde(default)]
    pub kernel: KernelConfig,
    #[serde(default = "default_min_bandwidth")]
    pub min_bandwidth: f64,
    /// Largest integer step of the kernel for discrete parameters.
    #[serde(default = "default_discrete_steps")]
    pub discrete_steps: u32,
    #[serde(default = "default_stay_probability")]
    pub model_stay_probability: f64,
    #[serde(default)]
    pub population: PopulationConfig,
    #[serde(default = "default_max_proposal_attempts")]
    pub max_proposal_attempts: usize,
}
impl Default for Algorithm {
    fn default() -> Self {
        Self {
            initial_epsilon: None,
            epsilon_schedule: None,
            quantile: half(),
            quantile_multiplier: one(),
            weighted_quantile: true,
            kernel: KernelConfig::default(),
            min_bandwidth: default_min_bandwidth(),
            discrete_steps: default_discrete_steps(),
            model_stay_probability: default_stay_probability(),
            population: PopulationConfig::default(),
            max_proposal_attempts: default_max_proposal_attempts(),
        }
    }
}
impl Algorithm {
    pub fn build_epsilon(&self) -> ABCResult<Box<dyn Epsilon>> {
        match &self.epsilon_schedule {
            Some(values) => Ok(Box::new(ListEpsilon::new(values.clone())?)),
            None => Ok(Box::new(QuantileEpsilon::new(
                self.initial_epsilon,
                self.quantile,
                self.quantile_multiplier,
                self.weighted_quantile,
            )?)),
        }
    }

    pub fn build_kernel(&self) -> ABCResult<Box<dyn Transition>> {
        if !(self.min_bandwidth >= 0.0) {
            return Err(ABCErr::ConfigError(format!(
                "Minimum bandwidth must be non-negative, got {}",
                self.min_bandwidth
            )));
        }
        match self.kernel {
            KernelConfig::Global { scaling } => {
                check_scaling(scaling)?;
                Ok(Box::new(MultivariateNormalTransition::new(scaling, self.min_bandwidth)))
            }
            KernelConfig::Local { k_fraction, scaling } => {
                check_scaling(scaling)?;
                if !(k_fraction > 0.0 && k_fraction <= 1.0) {
                    return Err(ABCErr::ConfigError(format!(
                        "Neighbour fraction must be in (0, 1], got {}",
                        k_fraction
                    )));
                }
                Ok(Box::new(LocalTransition::new(k_fraction, scaling, self.min_bandwidth)))
            }
            KernelConfig::Olcm => Ok(Box::new(OLCMTransition::new(self.min_bandwidth))),
        }
    }

    pub fn build_discrete_kernel(&self) -> ABCResult<Box<dyn Transition>> {
        Ok(Box::new(DiscreteRandomWalkTransition::new(self.discrete_steps)?))
    }

    pub fn build_population(&self, num_particles: usize) -> ABCResult<Box<dyn PopulationStrategy>> {
        match self.population {
            PopulationConfig::Constant => Ok(Box::new(ConstantPopulationSize::new(num_particles)?)),
            PopulationConfig::Adaptive {
                mean_cv,
                min_population_size,
                max_population_size,
                n_bootstrap,
            } => Ok(Box::new(AdaptivePopulationSize::new(
                num_particles,
                mean_cv,
                min_population_size,
                max_population_size,
                n_bootstrap,
            )?)),
        }
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum SamplerConfig {
    SingleCore {
        #[serde(default)]
        seed: Option<u64>,
        #[serde(default = "default_max_trials")]
        max_trials_per_generation: u64,
    },
    Multicore {
        #[serde(default)]
        seed: Option<u64>,
        #[serde(default)]
        num_threads: Option<usize>,
        #[serde(default = "default_max_trials")]
        max_trials_per_generation: u64,
        #[serde(default = "default_max_batch_size")]
        max_batch_size: usize,
    },
}
impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig::SingleCore {
            seed: None,
            max_trials_per_generation: DEFAULT_MAX_TRIALS,
        }
    }
}
impl SamplerConfig {
    pub fn seed(&self) -> Option<u64> {
        match self {
            SamplerConfig::SingleCore { seed, .. } | SamplerConfig::Multicore { seed, .. } => *seed,
        }
    }

    pub fn build(&self) -> ABCResult<Box<dyn Sampler>> {
        match *self {
            SamplerConfig::SingleCore {
                seed,
                max_trials_per_generation,
            } => Ok(Box::new(SingleCoreSampler::new(seed, max_trials_per_generation)?)),
            SamplerConfig::Multicore {
                seed,
                num_threads,
                max_trials_per_generation,
                max_batch_size,
            } => Ok(Box::new(MulticoreSampler::new(
                num_threads,
                seed,
                max_trials_per_generation,
                max_batch_size,
            )?)),
        }
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct AbcConfig {
    pub job: Job,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub sampler: SamplerConfig,
    pub storage: StorageConfig,
}
impl AbcConfig {
    pub fn from_path<P>(config_path: P) -> ABCResult<Self>
    where
        P: AsRef<Path> + Debug,
    {
        let str = std::fs::read_to_string(config_path.as_ref()).map_err(|e| {
            ABCErr::ConfigError(format!("Failed to load config from {:?}: {}", config_path, e))
        })?;
        let config: AbcConfig = toml::from_str(&str)?;
        log::info!("Loading config: {:#?}", config);
        Ok(config)
    }
}

fn check_scaling(scaling: f64) -> ABCResult<()> {
    if scaling > 0.0 && scaling.is_finite() {
        Ok(())
    } else {
        Err(ABCErr::ConfigError(format!("Kernel scaling must be positive, got {}", scaling)))
    }
}

fn one() -> f64 {
    1.0
}
fn half() -> f64 {
    0.5
}
fn quarter() -> f64 {
    0.25
}
fn yes() -> bool {
    true
}
fn default_min_bandwidth() -> f64 {
    DEFAULT_MIN_BANDWIDTH
}
fn default_discrete_steps() -> u32 {
    1
}
fn default_stay_probability() -> f64 {
    0.7
}
fn default_max_proposal_attempts() -> usize {
    10_000
}
fn default_n_bootstrap() -> usize {
    5
}
fn default_max_trials() -> u64 {
    DEFAULT_MAX_TRIALS
}
fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helper::local_test_file_path;

    #[test]
    fn load_with_env_var_override() -> ABCResult<()> {
        let tmp = tempfile::tempdir()?;
        envmnt::set("ABC_SMC_OUTPUT", tmp.path().to_string_lossy().as_ref());

        let config = AbcConfig::from_path(local_test_file_path("resources/test/config_test.toml"))?;

        assert_eq!(
            Job {
                max_generations: 8,
                num_particles: 500,
                minimum_epsilon: 0.01,
                max_total_simulations: Some(1_000_000),
                min_acceptance_rate: None,
            },
            config.job
        );
        assert_eq!(None, config.algorithm.initial_epsilon);
        assert_eq!(0.8, config.algorithm.quantile_multiplier);
        assert_eq!(
            KernelConfig::Local {
                k_fraction: 0.2,
                scaling: 1.0
            },
            config.algorithm.kernel
        );
        assert_eq!(Some(42), config.sampler.seed());

        // The base path is expanded when the store is built.
        config.storage.build()?;
        assert!(tmp.path().join("runs").is_dir());
        Ok(())
    }

    #[test]
    fn minimal_config_uses_defaults() -> ABCResult<()> {
        let config: AbcConfig = toml::from_str(
            r#"
            [job]
            max_generations = 3
            num_particles = 10

            [storage]
            type = "InMemory"
            "#,
        )?;
        assert_eq!(Algorithm::default(), config.algorithm);
        assert_eq!(SamplerConfig::default(), config.sampler);
        assert!(config.algorithm.build_epsilon()?.requires_calibration());
        assert_eq!(10, config.algorithm.build_population(10)?.nr_particles());
        config.algorithm.build_kernel()?;
        config.algorithm.build_discrete_kernel()?;
        Ok(())
    }

    #[test]
    fn epsilon_schedule_needs_no_calibration() -> ABCResult<()> {
        let algorithm = Algorithm {
            epsilon_schedule: Some(vec![3.0, 2.0, 1.0]),
            ..Algorithm::default()
        };
        assert!(!algorithm.build_epsilon()?.requires_calibration());
        Ok(())
    }

    #[test]
    fn invalid_kernel_settings_rejected() {
        let algorithm = Algorithm {
            kernel: KernelConfig::Local {
                k_fraction: 1.5,
                scaling: 1.0,
            },
            ..Algorithm::default()
        };
        assert!(matches!(algorithm.build_kernel(), Err(ABCErr::ConfigError(_))));

        let algorithm = Algorithm {
            kernel: KernelConfig::Global { scaling: 0.0 },
            ..Algorithm::default()
        };
        assert!(matches!(algorithm.build_kernel(), Err(ABCErr::ConfigError(_))));

        let algorithm = Algorithm {
            discrete_steps: 0,
            ..Algorithm::default()
        };
        assert!(matches!(algorithm.build_discrete_kernel(), Err(ABCErr::ConfigError(_))));
    }

    #[test]
    fn missing_file_is_config_error() {
        let result = AbcConfig::from_path("does/not/exist.toml");
        assert!(matches!(result, Err(ABCErr::ConfigError(_))));
    }
}
