//! Error types for the optimization engine
//!
//! Two families live here: configuration errors, which abort before any trial
//! runs, and evaluation errors, which the Backtest Runner returns for a single
//! trial and which are always recovered into a failed trial.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Setup-time error. Never recovered.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown objective function '{name}' (registered: {})", registered.join(", "))]
    UnknownObjective {
        name: String,
        registered: Vec<&'static str>,
    },

    #[error("unknown search algorithm '{name}' (registered: {})", registered.join(", "))]
    UnknownAlgorithm {
        name: String,
        registered: Vec<&'static str>,
    },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Classification of a failed trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Insufficient or invalid input data
    DataError,
    /// Numeric failure inside the evaluation
    CalculationError,
    /// Parameter combination violates a business rule
    ValidationError,
    /// Anything uncategorized
    UnknownError,
}

impl FailureKind {
    /// Expected failures are part of normal exploration of a space.
    pub fn is_expected(&self) -> bool {
        !matches!(self, FailureKind::UnknownError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DataError => "data_error",
            FailureKind::CalculationError => "calculation_error",
            FailureKind::ValidationError => "validation_error",
            FailureKind::UnknownError => "unknown_error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::DataError => write!(f, "Data"),
            FailureKind::CalculationError => write!(f, "Calculation"),
            FailureKind::ValidationError => write!(f, "Validation"),
            FailureKind::UnknownError => write!(f, "Unknown"),
        }
    }
}

/// Error returned by a Backtest Runner for one parameter set
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("data error: {0}")]
    Data(String),

    #[error("calculation error: {0}")]
    Calculation(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl EvaluationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EvaluationError::Data(_) => FailureKind::DataError,
            EvaluationError::Calculation(_) => FailureKind::CalculationError,
            EvaluationError::Validation(_) => FailureKind::ValidationError,
            EvaluationError::Unknown(_) => FailureKind::UnknownError,
        }
    }
}
