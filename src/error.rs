use std::{fmt::Display, num::TryFromIntError};

use crate::types::ModelId;

pub type ABCResult<T> = Result<T, ABCErr>;

#[derive(Debug)]
pub enum ABCErr {
    /// A point was evaluated outside the parameter space a prior declares.
    DomainError(String),
    /// No way to derive the initial epsilon automatically.
    CalibrationError(String),
    /// Degenerate or insufficient population for fitting a transition kernel.
    KernelFitError(String),
    /// Acceptance rate too low to collect the target number of particles within budget.
    SamplerExhausted(String),
    /// User model or distance code failed (distinct from a rejection).
    ModelError(String),
    StorageError(String),
    GenAlreadySaved(String),
    StorageConsistencyError(String),
    ConfigError(String),
    /// Any of the above, with the generation and model that were being worked on.
    GenerationError {
        generation: u16,
        model: Option<ModelId>,
        source: Box<ABCErr>,
    },
}
impl ABCErr {
    pub fn in_generation(self, generation: u16, model: Option<ModelId>) -> Self {
        match self {
            already @ ABCErr::GenerationError { .. } => already,
            other => ABCErr::GenerationError {
                generation,
                model,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with any generation context stripped.
    pub fn root(&self) -> &ABCErr {
        match self {
            ABCErr::GenerationError { source, .. } => source.root(),
            other => other,
        }
    }
}

impl Display for ABCErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DomainError(ref msg) => write!(f, "DomainErr: {}", msg),
            Self::CalibrationError(ref msg) => write!(f, "CalibrationErr: {}", msg),
            Self::KernelFitError(ref msg) => write!(f, "KernelFitErr: {}", msg),
            Self::SamplerExhausted(ref msg) => write!(f, "SamplerExhausted: {}", msg),
            Self::ModelError(ref msg) => write!(f, "ModelErr: {}", msg),
            Self::StorageError(ref msg) => write!(f, "StorageErr: {}", msg),
            Self::GenAlreadySaved(ref msg) => write!(f, "GenAlreadySaved: {}", msg),
            Self::StorageConsistencyError(ref msg) => write!(f, "StorageConsistencyErr: {}", msg),
            Self::ConfigError(ref msg) => write!(f, "ConfigErr: {}", msg),
            Self::GenerationError {
                generation,
                model: Some(model),
                source,
            } => write!(f, "Generation {} (model {}): {}", generation, model, source),
            Self::GenerationError {
                generation,
                model: None,
                source,
            } => write!(f, "Generation {}: {}", generation, source),
        }
    }
}

impl std::error::Error for ABCErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ABCErr::GenerationError { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ABCErr {
    fn from(value: serde_json::Error) -> Self {
        ABCErr::StorageError(format!("Serde Error: {}", value))
    }
}

impl From<std::io::Error> for ABCErr {
    fn from(value: std::io::Error) -> Self {
        ABCErr::StorageError(format!("IO Error: {}", value))
    }
}

impl From<regex::Error> for ABCErr {
    fn from(value: regex::Error) -> Self {
        ABCErr::StorageError(format!("RegEx Error: {}", value))
    }
}

impl From<uuid::Error> for ABCErr {
    fn from(value: uuid::Error) -> Self {
        ABCErr::StorageError(format!("Run id Error: {}", value))
    }
}

impl From<toml::de::Error> for ABCErr {
    fn from(value: toml::de::Error) -> Self {
        ABCErr::ConfigError(format!("TOML Error: {}", value))
    }
}

impl From<statrs::StatsError> for ABCErr {
    fn from(value: statrs::StatsError) -> Self {
        ABCErr::KernelFitError(format!("Statistics Error: {}", value))
    }
}

impl From<TryFromIntError> for ABCErr {
    fn from(value: TryFromIntError) -> Self {
        ABCErr::StorageError(format!("Cast error: {}", value))
    }
}
