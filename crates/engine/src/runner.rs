//! Trial execution against the external Backtest Runner
//!
//! A trial moves `Pending → Running → Succeeded | Failed(kind)`. Whatever the
//! runner does, returned errors and panics alike, ends up as a classified
//! outcome. Nothing escapes `TrialRunner::execute`.

use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::error::{EvaluationError, FailureKind};
use crate::types::{format_params, ParamSet, PerformanceStats};

/// Single-trial strategy evaluator (external collaborator)
#[async_trait]
pub trait BacktestRunner: Send + Sync {
    async fn evaluate(&self, params: &ParamSet) -> Result<PerformanceStats, EvaluationError>;
}

/// Lifecycle of one trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Pending,
    Running,
    Succeeded,
    Failed(FailureKind),
}

/// A classified trial failure
#[derive(Debug, Clone)]
pub struct TrialFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Full `{:?}` chain, unknown failures only
    pub diagnostics: Option<String>,
}

/// Outcome of running one parameter set
#[derive(Debug)]
pub struct TrialExecution {
    pub state: TrialState,
    pub outcome: Result<PerformanceStats, TrialFailure>,
    pub elapsed: Duration,
}

/// Wraps a [`BacktestRunner`] and classifies every failure
#[derive(Clone)]
pub struct TrialRunner {
    runner: Arc<dyn BacktestRunner>,
}

impl TrialRunner {
    pub fn new(runner: Arc<dyn BacktestRunner>) -> Self {
        Self { runner }
    }

    /// Run one parameter set to completion.
    pub async fn execute(&self, index: usize, params: &ParamSet) -> TrialExecution {
        let mut state = TrialState::Pending;
        debug!(trial = index, ?state, "Trial queued");

        state = TrialState::Running;
        debug!(trial = index, ?state, params = %format_params(params), "Trial started");

        let start = Instant::now();
        let result = AssertUnwindSafe(self.runner.evaluate(params))
            .catch_unwind()
            .await;
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(err)) => Err(classify(index, params, err)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    trial = index,
                    params = %format_params(params),
                    panic = %message,
                    "Backtest runner panicked"
                );
                Err(TrialFailure {
                    kind: FailureKind::UnknownError,
                    message: format!("runner panicked: {}", message),
                    diagnostics: Some(format!("panic during evaluation: {}", message)),
                })
            }
        };

        state = match &outcome {
            Ok(_) => TrialState::Succeeded,
            Err(f) => TrialState::Failed(f.kind),
        };
        debug!(trial = index, ?state, elapsed_ms = elapsed.as_millis() as u64, "Trial finished");

        TrialExecution {
            state,
            outcome,
            elapsed,
        }
    }
}

fn classify(index: usize, params: &ParamSet, err: EvaluationError) -> TrialFailure {
    let kind = err.kind();
    let message = err.to_string();

    if kind.is_expected() {
        warn!(
            trial = index,
            kind = %kind,
            params = %format_params(params),
            error = %message,
            "Trial failed"
        );
        TrialFailure {
            kind,
            message,
            diagnostics: None,
        }
    } else {
        let diagnostics = match &err {
            EvaluationError::Unknown(inner) => format!("{:?}", inner),
            other => format!("{:?}", other),
        };
        error!(
            trial = index,
            params = %format_params(params),
            error = %diagnostics,
            "Trial failed with unclassified error"
        );
        TrialFailure {
            kind,
            message,
            diagnostics: Some(diagnostics),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
