//! Optimization runs and trial ledger repository

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

/// One optimization run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRecord {
    pub run_id: String,
    pub algorithm: String,
    pub objective: String,
    /// Run configuration as JSON
    pub config: String,
    pub outcome: Option<String>,
    pub total_trials: i64,
    pub failed_trials: i64,
    pub best_score: Option<String>,
    pub best_params: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub seed: Option<i64>,
}

impl RunRecord {
    pub fn new(run_id: &str, algorithm: &str, objective: &str, config: String) -> Self {
        Self {
            run_id: run_id.to_string(),
            algorithm: algorithm.to_string(),
            objective: objective.to_string(),
            config,
            outcome: None,
            total_trials: 0,
            failed_trials: 0,
            best_score: None,
            best_params: None,
            started_at: None,
            finished_at: None,
            seed: None,
        }
    }
}

/// Final figures written when a run ends
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub outcome: String,
    pub total_trials: i64,
    pub failed_trials: i64,
    pub best_score: Option<String>,
    pub best_params: Option<String>,
}

/// One recorded trial
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrialRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub trial_index: i64,
    pub params_hash: String,
    /// Parameter set as JSON
    pub params: String,
    pub status: String,
    pub score: String,
    pub failure_kind: Option<String>,
    pub failure_message: Option<String>,
    pub diagnostics: Option<String>,
    /// Performance statistics as JSON, successful trials only
    pub stats: Option<String>,
    pub elapsed_ms: i64,
}

const TRIAL_COLUMNS: &str = r#"
    id, run_id, trial_index, params_hash, params, status, score,
    failure_kind, failure_message, diagnostics, stats, elapsed_ms
"#;

const RUN_COLUMNS: &str = r#"
    run_id, algorithm, objective, config, outcome, total_trials, failed_trials,
    best_score, best_params, started_at, finished_at, seed
"#;

/// Repository for runs and trials
pub struct TrialRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TrialRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a run before its first trial
    pub async fn create_run(&self, run: &RunRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO optimization_runs (run_id, algorithm, objective, config, seed)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.algorithm)
        .bind(&run.objective)
        .bind(&run.config)
        .bind(run.seed)
        .execute(self.pool)
        .await?;

        debug!(run_id = %run.run_id, "Run registered");
        Ok(())
    }

    /// Record how a run ended
    pub async fn finish_run(&self, run_id: &str, completion: &RunCompletion) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE optimization_runs
            SET outcome = ?, total_trials = ?, failed_trials = ?,
                best_score = ?, best_params = ?, finished_at = ?
            WHERE run_id = ?
            "#,
        )
        .bind(&completion.outcome)
        .bind(completion.total_trials)
        .bind(completion.failed_trials)
        .bind(&completion.best_score)
        .bind(&completion.best_params)
        .bind(chrono::Utc::now().timestamp())
        .bind(run_id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::Query(format!("unknown run_id {}", run_id)));
        }
        Ok(())
    }

    /// Append a trial to a run's ledger
    pub async fn save_trial(&self, trial: &TrialRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO optimization_trials (
                run_id, trial_index, params_hash, params, status, score,
                failure_kind, failure_message, diagnostics, stats, elapsed_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trial.run_id)
        .bind(trial.trial_index)
        .bind(&trial.params_hash)
        .bind(&trial.params)
        .bind(&trial.status)
        .bind(&trial.score)
        .bind(&trial.failure_kind)
        .bind(&trial.failure_message)
        .bind(&trial.diagnostics)
        .bind(&trial.stats)
        .bind(trial.elapsed_ms)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_run(&self, run_id: &str) -> DbResult<Option<RunRecord>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM optimization_runs WHERE run_id = ?");
        let run = sqlx::query_as::<_, RunRecord>(&sql)
            .bind(run_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(run)
    }

    /// Most recently started runs first
    pub async fn get_recent_runs(&self, limit: i64) -> DbResult<Vec<RunRecord>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM optimization_runs ORDER BY started_at DESC, rowid DESC LIMIT ?"
        );
        let runs = sqlx::query_as::<_, RunRecord>(&sql)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;
        Ok(runs)
    }

    /// A run's ledger in evaluation order
    pub async fn get_trials(&self, run_id: &str) -> DbResult<Vec<TrialRecord>> {
        let sql = format!(
            "SELECT {TRIAL_COLUMNS} FROM optimization_trials WHERE run_id = ? ORDER BY trial_index ASC"
        );
        let trials = sqlx::query_as::<_, TrialRecord>(&sql)
            .bind(run_id)
            .fetch_all(self.pool)
            .await?;
        Ok(trials)
    }

    /// Best successful trials of a run; ties keep evaluation order
    pub async fn get_top_trials(&self, run_id: &str, limit: i64) -> DbResult<Vec<TrialRecord>> {
        let sql = format!(
            r#"
            SELECT {TRIAL_COLUMNS}
            FROM optimization_trials
            WHERE run_id = ? AND status = 'succeeded'
            ORDER BY CAST(score AS REAL) DESC, trial_index ASC
            LIMIT ?
            "#
        );
        let trials = sqlx::query_as::<_, TrialRecord>(&sql)
            .bind(run_id)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;
        Ok(trials)
    }

    /// Every earlier evaluation of the same parameter set, across runs
    pub async fn find_by_hash(&self, params_hash: &str) -> DbResult<Vec<TrialRecord>> {
        let sql = format!(
            "SELECT {TRIAL_COLUMNS} FROM optimization_trials WHERE params_hash = ? ORDER BY id ASC"
        );
        let trials = sqlx::query_as::<_, TrialRecord>(&sql)
            .bind(params_hash)
            .fetch_all(self.pool)
            .await?;
        Ok(trials)
    }
}
