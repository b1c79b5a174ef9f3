//! Trial persistence seam
//!
//! The engine reports run start, every trial, and run end to an optional
//! [`TrialRecorder`]. Recorder errors never affect the run.

use anyhow::Result;
use async_trait::async_trait;
use persistence::repository::{RunCompletion, RunRecord, TrialRecord, TrialRepository};
use persistence::SqlitePool;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::OptimizationConfig;
use crate::result::OptimizationResult;
use crate::search::DEFAULT_RANDOM_SEED;
use crate::types::{params_key, ParamSet, Trial};

/// Sink for a run's trial ledger
#[async_trait]
pub trait TrialRecorder: Send + Sync {
    async fn begin_run(&self, run_id: &str, config: &OptimizationConfig) -> Result<()>;

    async fn record_trial(&self, run_id: &str, trial: &Trial) -> Result<()>;

    async fn finish_run(&self, result: &OptimizationResult) -> Result<()>;
}

/// Deterministic hash of a parameter set, stable across runs
pub fn compute_params_hash(params: &ParamSet) -> String {
    let hash = Sha256::digest(params_key(params).as_bytes());
    format!("{:x}", hash)
}

/// Records runs and trials into the SQLite trial store
#[derive(Clone)]
pub struct SqliteTrialRecorder {
    pool: SqlitePool,
}

impl SqliteTrialRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn trial_to_record(run_id: &str, trial: &Trial) -> Result<TrialRecord> {
    let stats = match &trial.stats {
        Some(stats) => Some(serde_json::to_string(stats)?),
        None => None,
    };

    Ok(TrialRecord {
        id: None,
        run_id: run_id.to_string(),
        trial_index: trial.index as i64,
        params_hash: compute_params_hash(&trial.params),
        params: params_key(&trial.params),
        status: if trial.is_success() {
            "succeeded".to_string()
        } else {
            "failed".to_string()
        },
        score: trial.score.to_string(),
        failure_kind: trial.failure_kind.map(|k| k.as_str().to_string()),
        failure_message: trial.failure_message.clone(),
        diagnostics: trial.diagnostics.clone(),
        stats,
        elapsed_ms: trial.elapsed.as_millis() as i64,
    })
}

#[async_trait]
impl TrialRecorder for SqliteTrialRecorder {
    async fn begin_run(&self, run_id: &str, config: &OptimizationConfig) -> Result<()> {
        let mut run = RunRecord::new(
            run_id,
            &config.algorithm,
            &config.objective,
            serde_json::to_string(config)?,
        );
        if config.algorithm == "RandomSearch" {
            run.seed = Some(config.seed.unwrap_or(DEFAULT_RANDOM_SEED) as i64);
        }
        TrialRepository::new(&self.pool).create_run(&run).await?;
        Ok(())
    }

    async fn record_trial(&self, run_id: &str, trial: &Trial) -> Result<()> {
        let record = trial_to_record(run_id, trial)?;
        TrialRepository::new(&self.pool).save_trial(&record).await?;
        debug!(run_id, trial = trial.index, "Trial recorded");
        Ok(())
    }

    async fn finish_run(&self, result: &OptimizationResult) -> Result<()> {
        let completion = RunCompletion {
            outcome: result.outcome.as_str().to_string(),
            total_trials: result.trials.len() as i64,
            failed_trials: result.failed() as i64,
            best_score: result.best_trial.as_ref().map(|t| t.score.to_string()),
            best_params: result.best_trial.as_ref().map(|t| params_key(&t.params)),
        };
        TrialRepository::new(&self.pool)
            .finish_run(&result.run_id, &completion)
            .await?;
        Ok(())
    }
}
