//! Optimization engine: drives one search run end to end
//!
//! One trial is in flight at a time. For each candidate the engine runs the
//! backtest, scores the outcome, updates the best trial, appends to the
//! ledger and emits a progress event, in that order. Interruption is observed
//! only between trials.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::OptimizationConfig;
use crate::error::{ConfigError, FailureKind};
use crate::history::TrialRecorder;
use crate::interrupt::InterruptionController;
use crate::objective::{build_objective, ObjectiveFunction};
use crate::result::{OptimizationResult, RunOutcome, Timing};
use crate::runner::{BacktestRunner, TrialExecution, TrialRunner};
use crate::search::{build_search, GridSearch, SearchAlgorithm};
use crate::space::ParameterSpace;
use crate::types::{format_params, ParamSet, Trial, TrialStatus};

/// Trials between cooperative yields to the runtime
const YIELD_EVERY: usize = 10;

/// Emitted once per completed trial, in evaluation order
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub trial_index: usize,
    pub completed: usize,
    /// `None` while the algorithm cannot tell how many candidates remain
    pub total: Option<usize>,
    pub status: TrialStatus,
    pub score: f64,
    pub best_score: Option<f64>,
    pub elapsed: Duration,
    pub failures: BTreeMap<FailureKind, usize>,
    pub params: ParamSet,
}

impl ProgressEvent {
    pub fn failed_total(&self) -> usize {
        self.failures.values().sum()
    }
}

pub type ProgressCallback = Box<dyn FnMut(&ProgressEvent) + Send>;

/// Composes a search algorithm, a trial runner and an objective into one run
pub struct OptimizationEngine {
    config: OptimizationConfig,
    space: ParameterSpace,
    search: Box<dyn SearchAlgorithm>,
    objective: Box<dyn ObjectiveFunction>,
    trial_runner: TrialRunner,
    interrupt: InterruptionController,
    progress: Option<ProgressCallback>,
    recorder: Option<Arc<dyn TrialRecorder>>,
    handle_signals: bool,
}

impl OptimizationEngine {
    /// Validate the configuration and assemble the run. No trial runs here.
    pub fn new(
        config: OptimizationConfig,
        space: ParameterSpace,
        runner: Arc<dyn BacktestRunner>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let objective = build_objective(&config.objective, &config.objective_params)?;
        let mut search = build_search(&config.algorithm, &space, &config.search_settings())?;
        if space.is_degenerate() {
            // One combination exists; any algorithm would only repeat it
            search = Box::new(GridSearch::new(&space));
        }

        Ok(Self {
            config,
            space,
            search,
            objective,
            trial_runner: TrialRunner::new(runner),
            interrupt: InterruptionController::new(),
            progress: None,
            recorder: None,
            handle_signals: false,
        })
    }

    pub fn with_progress(mut self, callback: impl FnMut(&ProgressEvent) + Send + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn with_interrupt(mut self, controller: InterruptionController) -> Self {
        self.interrupt = controller;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn TrialRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Route Ctrl+C into the interruption flag for the duration of `run`.
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn interrupt_handle(&self) -> InterruptionController {
        self.interrupt.clone()
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Run until the algorithm is exhausted, the user interrupts, or the
    /// failure budget is exceeded. Always returns the trials completed so far.
    ///
    /// A stop request left on the controller by an earlier run is cleared.
    pub async fn run(mut self) -> OptimizationResult {
        let run_id = new_run_id();
        self.interrupt.reset();
        let _guard = self
            .handle_signals
            .then(|| self.interrupt.install_signal_guard());

        let single_combination = self.space.is_degenerate();
        if single_combination {
            info!("Every parameter has a single value; evaluating one combination without search");
        }

        info!(
            run_id = %run_id,
            algorithm = %self.config.algorithm,
            objective = self.objective.name(),
            combinations = self.space.cardinality(),
            max_failures = self.config.max_failures,
            "Optimization started"
        );

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.begin_run(&run_id, &self.config).await {
                warn!(run_id = %run_id, error = %e, "Failed to record run start");
            }
        }

        let started = Instant::now();
        let mut trials: Vec<Trial> = Vec::new();
        let mut best: Option<usize> = None;
        let mut error_summary: BTreeMap<FailureKind, usize> = BTreeMap::new();
        let mut failed = 0usize;
        let mut outcome = RunOutcome::Completed;

        while self.search.has_next() {
            if self.interrupt.is_requested() {
                warn!(completed = trials.len(), "Optimization interrupted");
                outcome = RunOutcome::Interrupted;
                break;
            }

            let Some(params) = self.search.next_candidate() else {
                break;
            };
            let index = trials.len();
            let execution = self.trial_runner.execute(index, &params).await;
            let trial = self.score_trial(index, params, execution);

            if trial.is_success() {
                // Strict comparison: ties keep the earliest trial
                if best.map_or(true, |b| trial.score > trials[b].score) {
                    best = Some(index);
                }
            } else {
                failed += 1;
                if let Some(kind) = trial.failure_kind {
                    *error_summary.entry(kind).or_insert(0) += 1;
                }
            }

            if let Some(recorder) = &self.recorder {
                if let Err(e) = recorder.record_trial(&run_id, &trial).await {
                    warn!(run_id = %run_id, trial = index, error = %e, "Failed to record trial");
                }
            }

            let event = ProgressEvent {
                trial_index: index,
                completed: index + 1,
                total: self.search.total_count(),
                status: trial.status,
                score: trial.score,
                best_score: best.map(|b| if b == index { trial.score } else { trials[b].score }),
                elapsed: started.elapsed(),
                failures: error_summary.clone(),
                params: trial.params.clone(),
            };
            trials.push(trial);

            if let Some(callback) = self.progress.as_mut() {
                callback(&event);
            }

            if failed > self.config.max_failures {
                error!(
                    failed,
                    max_failures = self.config.max_failures,
                    completed = trials.len(),
                    "Failure budget exceeded, aborting run"
                );
                outcome = RunOutcome::Aborted {
                    failures: failed,
                    max_failures: self.config.max_failures,
                };
                break;
            }

            if index % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        let total = started.elapsed();
        let avg_per_trial = if trials.is_empty() {
            Duration::ZERO
        } else {
            total / trials.len() as u32
        };
        let best_trial = best.map(|b| trials[b].clone());

        match &best_trial {
            Some(t) => info!(
                trial = t.index,
                score = t.score,
                params = %format_params(&t.params),
                "Best configuration found"
            ),
            None => warn!(trials = trials.len(), "No successful trial"),
        }

        let result = OptimizationResult {
            run_id,
            algorithm: self.config.algorithm.clone(),
            objective: self.objective.name().to_string(),
            best_trial,
            trials,
            error_summary,
            timing: Timing {
                total,
                avg_per_trial,
            },
            was_interrupted: outcome == RunOutcome::Interrupted,
            outcome,
            single_combination,
        };

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.finish_run(&result).await {
                warn!(run_id = %result.run_id, error = %e, "Failed to record run end");
            }
        }

        info!(
            outcome = result.outcome.as_str(),
            trials = result.trials.len(),
            failed = result.failed(),
            elapsed_ms = total.as_millis() as u64,
            "Optimization complete"
        );
        result
    }

    fn score_trial(&self, index: usize, params: ParamSet, execution: TrialExecution) -> Trial {
        let TrialExecution {
            outcome, elapsed, ..
        } = execution;

        match outcome {
            Ok(stats) => {
                let scored = self.objective.score(&stats, self.config.constraints.as_ref());
                if !scored.value.is_finite() {
                    warn!(
                        trial = index,
                        objective = self.objective.name(),
                        score = scored.value,
                        "Objective produced a non-finite score"
                    );
                    return Trial::failed(
                        index,
                        params,
                        FailureKind::CalculationError,
                        format!(
                            "{} produced a non-finite score ({})",
                            self.objective.name(),
                            scored.value
                        ),
                        None,
                        elapsed,
                    );
                }
                Trial::succeeded(index, params, scored.value, stats, scored.adherence, elapsed)
            }
            Err(failure) => Trial::failed(
                index,
                params,
                failure.kind,
                failure.message,
                failure.diagnostics,
                elapsed,
            ),
        }
    }
}

/// Timestamp plus a random suffix, unique even for runs started together
fn new_run_id() -> String {
    let suffix: u32 = rand::random();
    format!(
        "run-{}-{:08x}",
        chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f"),
        suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvaluationError;
    use crate::objective::{ConstraintAdherence, ConstraintSpec};
    use crate::space::ParameterDefinition;
    use crate::types::{PerformanceStats, FAILED_TRIAL_SCORE};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    /// Backtest runner driven by a plain closure
    struct FnRunner<F>(F);

    #[async_trait]
    impl<F> BacktestRunner for FnRunner<F>
    where
        F: Fn(&ParamSet) -> Result<PerformanceStats, EvaluationError> + Send + Sync,
    {
        async fn evaluate(&self, params: &ParamSet) -> Result<PerformanceStats, EvaluationError> {
            (self.0)(params)
        }
    }

    fn runner<F>(f: F) -> Arc<dyn BacktestRunner>
    where
        F: Fn(&ParamSet) -> Result<PerformanceStats, EvaluationError> + Send + Sync + 'static,
    {
        Arc::new(FnRunner(f))
    }

    fn returns(pct: i64) -> PerformanceStats {
        PerformanceStats {
            total_return_pct: Decimal::from(pct),
            total_trades: 10,
            winning_trades: 6,
            ..Default::default()
        }
    }

    fn param(p: &ParamSet, name: &str) -> i64 {
        p[name].as_i64().unwrap()
    }

    /// fast in {5, 10}, slow in {20, 30}
    fn fast_slow_space() -> ParameterSpace {
        ParameterSpace::new(vec![
            ("fast".to_string(), ParameterDefinition::range(5.0, 15.0, 5.0)),
            (
                "slow".to_string(),
                ParameterDefinition::choices(vec![20i64, 30]),
            ),
        ])
        .unwrap()
    }

    fn wide_space() -> ParameterSpace {
        ParameterSpace::new(vec![
            ("fast".to_string(), ParameterDefinition::range(1.0, 21.0, 1.0)),
            ("slow".to_string(), ParameterDefinition::fixed(50i64)),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_grid_run_finds_best_in_order() {
        let config = OptimizationConfig::new("GridSearch", "TotalReturn");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();

        let result = OptimizationEngine::new(
            config,
            fast_slow_space(),
            runner(|p| Ok(returns(param(p, "slow") - param(p, "fast")))),
        )
        .unwrap()
        .with_progress(move |event| {
            seen_cb
                .lock()
                .unwrap()
                .push((event.trial_index, event.best_score, event.total));
        })
        .run()
        .await;

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert!(!result.was_interrupted);
        assert_eq!(result.trials.len(), 4);
        let order: Vec<(i64, i64)> = result
            .trials
            .iter()
            .map(|t| (param(&t.params, "fast"), param(&t.params, "slow")))
            .collect();
        assert_eq!(order, vec![(5, 20), (5, 30), (10, 20), (10, 30)]);

        let best = result.best_trial.as_ref().unwrap();
        assert_eq!(best.index, 1);
        assert_eq!(best.score, 25.0);

        let events = seen.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                (0, Some(15.0), Some(4)),
                (1, Some(25.0), Some(4)),
                (2, Some(25.0), Some(4)),
                (3, Some(25.0), Some(4)),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_budget_aborts_run() {
        let mut config = OptimizationConfig::new("GridSearch", "TotalReturn");
        config.max_failures = 5;

        let result = OptimizationEngine::new(
            config,
            wide_space(),
            runner(|_| Err(EvaluationError::Data("no bars".to_string()))),
        )
        .unwrap()
        .run()
        .await;

        assert_eq!(
            result.outcome,
            RunOutcome::Aborted {
                failures: 6,
                max_failures: 5
            }
        );
        assert!(result.was_aborted());
        assert!(!result.was_interrupted);
        assert_eq!(result.trials.len(), 6);
        assert!(result.best_trial.is_none());
        assert_eq!(result.error_summary.get(&FailureKind::DataError), Some(&6));
    }

    #[tokio::test]
    async fn test_interrupt_stops_at_trial_boundary() {
        let config = OptimizationConfig::new("GridSearch", "TotalReturn");
        let controller = InterruptionController::new();
        let trigger = controller.clone();

        let result = OptimizationEngine::new(
            config,
            wide_space(),
            runner(|p| Ok(returns(param(p, "fast")))),
        )
        .unwrap()
        .with_interrupt(controller)
        .with_progress(move |event| {
            if event.completed == 7 {
                trigger.request();
            }
        })
        .run()
        .await;

        assert_eq!(result.outcome, RunOutcome::Interrupted);
        assert!(result.was_interrupted);
        assert_eq!(result.trials.len(), 7);
        assert!(result.trials.iter().all(|t| t.is_success()));
        assert_eq!(result.best_trial.as_ref().unwrap().index, 6);
    }

    #[tokio::test]
    async fn test_failed_trial_never_becomes_best() {
        let config = OptimizationConfig::new("GridSearch", "MaxDrawdown");
        let result = OptimizationEngine::new(
            config,
            fast_slow_space(),
            runner(|p| {
                if param(p, "fast") == 5 {
                    Err(EvaluationError::Calculation("zero variance".to_string()))
                } else {
                    Ok(PerformanceStats {
                        max_drawdown_pct: Decimal::from(-param(p, "slow")),
                        ..Default::default()
                    })
                }
            }),
        )
        .unwrap()
        .run()
        .await;

        assert_eq!(result.failed(), 2);
        assert_eq!(result.trials[0].score, FAILED_TRIAL_SCORE);
        let best = result.best_trial.as_ref().unwrap();
        assert!(best.is_success());
        assert_eq!(best.index, 2);
        assert_eq!(best.score, -20.0);
        assert_eq!(result.error_summary.get(&FailureKind::CalculationError), Some(&2));
    }

    #[tokio::test]
    async fn test_all_failed_run_has_no_best() {
        let config = OptimizationConfig::new("GridSearch", "SharpeRatio");
        let result = OptimizationEngine::new(
            config,
            fast_slow_space(),
            runner(|_| Err(EvaluationError::Validation("fast >= slow".to_string()))),
        )
        .unwrap()
        .run()
        .await;

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert!(result.best_trial.is_none());
        assert!(result.summary().to_string().contains("Validation errors: 4"));
    }

    #[tokio::test]
    async fn test_ties_keep_earliest_trial() {
        let config = OptimizationConfig::new("GridSearch", "WinRate");
        let result = OptimizationEngine::new(config, fast_slow_space(), runner(|_| Ok(returns(1))))
            .unwrap()
            .run()
            .await;

        assert_eq!(result.best_trial.as_ref().unwrap().index, 0);
        assert_eq!(result.best_trial.as_ref().unwrap().score, 0.6);
    }

    #[tokio::test]
    async fn test_degenerate_space_runs_one_trial() {
        let config = OptimizationConfig::new("GridSearch", "TotalReturn");
        let space = ParameterSpace::new(vec![
            ("fast".to_string(), ParameterDefinition::fixed(10i64)),
            ("slow".to_string(), ParameterDefinition::explicit(30i64)),
        ])
        .unwrap();

        let result = OptimizationEngine::new(config, space, runner(|_| Ok(returns(3))))
            .unwrap()
            .run()
            .await;

        assert!(result.single_combination);
        assert_eq!(result.trials.len(), 1);
        assert_eq!(result.best_trial.as_ref().unwrap().score, 3.0);
    }

    #[tokio::test]
    async fn test_degenerate_space_runs_one_trial_under_random_search() {
        let mut config = OptimizationConfig::new("RandomSearch", "TotalReturn");
        config.max_trials = Some(20);
        let space =
            ParameterSpace::new(vec![("fast".to_string(), ParameterDefinition::fixed(10i64))])
                .unwrap();

        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let result = OptimizationEngine::new(
            config,
            space,
            runner(move |_| {
                *counter.lock().unwrap() += 1;
                Ok(returns(4))
            }),
        )
        .unwrap()
        .run()
        .await;

        assert!(result.single_combination);
        assert_eq!(result.trials.len(), 1);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(result.algorithm, "RandomSearch");
        assert_eq!(result.outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_stale_stop_request_is_cleared() {
        let config = OptimizationConfig::new("GridSearch", "TotalReturn");
        let controller = InterruptionController::new();
        controller.request();

        let result = OptimizationEngine::new(config, fast_slow_space(), runner(|_| Ok(returns(1))))
            .unwrap()
            .with_interrupt(controller.clone())
            .run()
            .await;

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.trials.len(), 4);
        assert!(!controller.is_requested());
    }

    #[test]
    fn test_run_ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..100).map(|_| new_run_id()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_unknown_objective_rejected_before_any_trial() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let config = OptimizationConfig::new("GridSearch", "sharpe");

        let err = OptimizationEngine::new(
            config,
            fast_slow_space(),
            runner(move |_| {
                *counter.lock().unwrap() += 1;
                Ok(returns(1))
            }),
        )
        .err()
        .unwrap();

        assert!(matches!(err, ConfigError::UnknownObjective { .. }));
        assert!(err.to_string().contains("SharpeRatio"));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_random_search_is_reproducible() {
        let mut config = OptimizationConfig::new("RandomSearch", "TotalReturn");
        config.max_trials = Some(12);
        config.seed = Some(17);

        let run = |config: OptimizationConfig| async move {
            OptimizationEngine::new(config, wide_space(), runner(|p| Ok(returns(param(p, "fast")))))
                .unwrap()
                .run()
                .await
        };

        let a = run(config.clone()).await;
        let b = run(config).await;
        let params = |r: &OptimizationResult| -> Vec<ParamSet> {
            r.trials.iter().map(|t| t.params.clone()).collect()
        };
        assert_eq!(a.trials.len(), 12);
        assert_eq!(params(&a), params(&b));
        assert_eq!(params(&a), wide_space().sample(12, 17));
    }

    #[tokio::test]
    async fn test_min_trades_penalty_lowers_score() {
        let mut config = OptimizationConfig::new("GridSearch", "TotalReturn");
        config.constraints = Some(ConstraintSpec {
            target_hold_period_days: None,
            min_trades: Some(20),
        });

        let result = OptimizationEngine::new(config, fast_slow_space(), runner(|_| Ok(returns(5))))
            .unwrap()
            .run()
            .await;

        let best = result.best_trial.as_ref().unwrap();
        assert!(best.is_success());
        assert!(best.score < 5.0);
        let adherence = best.adherence.as_ref().unwrap();
        assert_eq!(adherence.min_trades_met, Some(false));
    }

    struct InfiniteObjective;

    impl ObjectiveFunction for InfiniteObjective {
        fn name(&self) -> &'static str {
            "Infinite"
        }

        fn raw_score(
            &self,
            _: &PerformanceStats,
            _: Option<&ConstraintSpec>,
            _: &mut ConstraintAdherence,
        ) -> f64 {
            f64::INFINITY
        }
    }

    #[tokio::test]
    async fn test_non_finite_score_becomes_calculation_error() {
        let config = OptimizationConfig::new("GridSearch", "TotalReturn");
        let mut engine =
            OptimizationEngine::new(config, fast_slow_space(), runner(|_| Ok(returns(1))))
                .unwrap();
        engine.objective = Box::new(InfiniteObjective);

        let result = engine.run().await;
        assert_eq!(result.failed(), 4);
        assert!(result.best_trial.is_none());
        assert_eq!(result.error_summary.get(&FailureKind::CalculationError), Some(&4));
    }

    #[tokio::test]
    async fn test_panicking_runner_is_contained() {
        let mut config = OptimizationConfig::new("GridSearch", "TotalReturn");
        config.max_failures = 100;

        let result = OptimizationEngine::new(
            config,
            fast_slow_space(),
            runner(|p| {
                if param(p, "slow") == 30 {
                    panic!("index out of bounds");
                }
                Ok(returns(param(p, "fast")))
            }),
        )
        .unwrap()
        .run()
        .await;

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.trials.len(), 4);
        assert_eq!(result.error_summary.get(&FailureKind::UnknownError), Some(&2));
        assert!(result.trials[1].diagnostics.is_some());
        assert_eq!(result.best_trial.as_ref().unwrap().score, 10.0);
    }
}
