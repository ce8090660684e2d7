//! Approximate Bayesian computation by sequential Monte Carlo.
//!
//! Candidate models are described by a [`prior::Prior`] and a
//! [`model::Simulator`]. The [`ABCSMC`] engine runs successive generations of
//! weighted particles under a shrinking distance threshold and saves each
//! finished generation to a [`storage::HistoryStore`].

pub mod config;
pub mod epsilon;
pub mod error;
pub mod generation;
pub mod kernel;
pub mod model;
pub mod parameters;
pub mod population;
pub mod prior;
pub mod sampler;
pub mod smc;
pub mod storage;
pub mod types;

pub use config::AbcConfig;
pub use error::{ABCErr, ABCResult};
pub use model::{
    Distance, IntegratedModel, IntegratedOutcome, Model, PNormDistance, SimulationModel, Simulator, TrialContext,
};
pub use parameters::{Parameters, SummaryStatistics};
pub use prior::{Prior, ProductPrior, RV};
pub use smc::{EngineState, RunSummary, StopConditions, ABCSMC};
pub use types::{Generation, ModelId, Particle, Population};
