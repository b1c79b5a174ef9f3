//! Final result of an optimization run

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::FailureKind;
use crate::types::{format_params, Trial};

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The search algorithm ran out of candidates
    Completed,
    /// Stopped at a trial boundary on user request
    Interrupted,
    /// Failed trials exceeded the failure budget
    Aborted { failures: usize, max_failures: usize },
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Interrupted => "interrupted",
            RunOutcome::Aborted { .. } => "aborted",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Interrupted => write!(f, "interrupted by user"),
            RunOutcome::Aborted {
                failures,
                max_failures,
            } => write!(
                f,
                "aborted: {} failed trials exceeded the budget of {}",
                failures, max_failures
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub total: Duration,
    pub avg_per_trial: Duration,
}

/// Everything a caller needs to display or persist a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub run_id: String,
    pub algorithm: String,
    pub objective: String,
    pub best_trial: Option<Trial>,
    pub trials: Vec<Trial>,
    pub error_summary: BTreeMap<FailureKind, usize>,
    pub timing: Timing,
    pub was_interrupted: bool,
    pub outcome: RunOutcome,
    /// Every parameter had a single value, so no real search took place
    pub single_combination: bool,
}

impl OptimizationResult {
    pub fn succeeded(&self) -> usize {
        self.trials.iter().filter(|t| t.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.trials.len() - self.succeeded()
    }

    pub fn was_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }

    /// Successful trials by descending score; ties keep trial order.
    pub fn top_trials(&self, n: usize) -> Vec<&Trial> {
        let mut ranked: Vec<&Trial> = self.trials.iter().filter(|t| t.is_success()).collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(n);
        ranked
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            total_trials: self.trials.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            by_kind: self.error_summary.clone(),
            outcome: self.outcome,
            best_score: self.best_trial.as_ref().map(|t| t.score),
            best_params: self.best_trial.as_ref().map(|t| format_params(&t.params)),
            single_combination: self.single_combination,
            timing: self.timing,
        }
    }
}

/// User-facing end-of-run report
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total_trials: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub by_kind: BTreeMap<FailureKind, usize>,
    pub outcome: RunOutcome,
    pub best_score: Option<f64>,
    pub best_params: Option<String>,
    pub single_combination: bool,
    pub timing: Timing,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run {}: {}", self.run_id, self.outcome)?;
        if self.single_combination {
            writeln!(f, "  Single parameter combination: no search performed")?;
        }
        writeln!(
            f,
            "  Trials: {} total, {} succeeded, {} failed",
            self.total_trials, self.succeeded, self.failed
        )?;
        for (kind, count) in &self.by_kind {
            writeln!(f, "    {} errors: {}", kind, count)?;
        }
        match (&self.best_score, &self.best_params) {
            (Some(score), Some(params)) => writeln!(f, "  Best: {:.4} ({})", score, params)?,
            _ => writeln!(f, "  Best: none (no successful trial)")?,
        }
        write!(
            f,
            "  Time: {:.2}s total, {:.1}ms per trial",
            self.timing.total.as_secs_f64(),
            self.timing.avg_per_trial.as_secs_f64() * 1000.0
        )
    }
}
