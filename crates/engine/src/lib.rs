//! Parameter optimization engine
//!
//! Searches a declared parameter space for the strategy configuration that
//! maximizes an objective over backtest statistics.
//! Provides:
//! - Parameter spaces with lazy grid enumeration and seeded sampling
//! - Grid and random search algorithms
//! - Registered objective functions with hold-period and trade-count constraints
//! - Trial execution with failure classification and a failure budget
//! - Cooperative Ctrl+C interruption
//! - HTTP Backtest Runner client and SQLite trial recording

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod interrupt;
pub mod objective;
pub mod result;
pub mod runner;
pub mod search;
pub mod space;
pub mod types;

// Re-exports for convenience
pub use api::HttpBacktestRunner;
pub use config::OptimizationConfig;
pub use engine::{OptimizationEngine, ProgressCallback, ProgressEvent};
pub use error::{ConfigError, EvaluationError, FailureKind};
pub use history::{compute_params_hash, SqliteTrialRecorder, TrialRecorder};
pub use interrupt::{InterruptGuard, InterruptionController};
pub use objective::{
    build_objective, ConstraintAdherence, ConstraintSpec, ObjectiveFunction, ObjectiveParams,
    ObjectiveScore, REGISTERED_OBJECTIVES,
};
pub use result::{OptimizationResult, RunOutcome, RunSummary, Timing};
pub use runner::{BacktestRunner, TrialExecution, TrialFailure, TrialRunner, TrialState};
pub use search::{
    build_search, GridSearch, RandomSearch, SearchAlgorithm, SearchSettings, DEFAULT_RANDOM_SEED,
    REGISTERED_ALGORITHMS,
};
pub use space::{NamedParameter, ParameterDefinition, ParameterSpace};
pub use types::*;
