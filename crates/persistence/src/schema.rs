//! Database schema definitions

/// SQL to create all tables
/// NOTE: scores are stored as TEXT so the exact value written by the engine round-trips
pub const CREATE_TABLES: &str = r#"
-- One row per optimization run
CREATE TABLE IF NOT EXISTS optimization_runs (
    run_id TEXT PRIMARY KEY,
    algorithm TEXT NOT NULL,
    objective TEXT NOT NULL,
    config TEXT NOT NULL,
    outcome TEXT,
    total_trials INTEGER NOT NULL DEFAULT 0,
    failed_trials INTEGER NOT NULL DEFAULT 0,
    best_score TEXT,
    best_params TEXT,
    started_at INTEGER DEFAULT (strftime('%s', 'now')),
    finished_at INTEGER
);

-- Trial ledger
CREATE TABLE IF NOT EXISTS optimization_trials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES optimization_runs(run_id) ON DELETE CASCADE,
    trial_index INTEGER NOT NULL,
    params_hash TEXT NOT NULL,
    params TEXT NOT NULL,
    status TEXT NOT NULL,
    score TEXT NOT NULL,
    failure_kind TEXT,
    failure_message TEXT,
    stats TEXT,
    elapsed_ms INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    UNIQUE(run_id, trial_index)
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_trials_run ON optimization_trials(run_id);
CREATE INDEX IF NOT EXISTS idx_trials_hash ON optimization_trials(params_hash);
CREATE INDEX IF NOT EXISTS idx_runs_started ON optimization_runs(started_at DESC)
"#;

/// Column additions applied after `CREATE_TABLES`. Re-running one is harmless.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE optimization_trials ADD COLUMN diagnostics TEXT",
    "ALTER TABLE optimization_runs ADD COLUMN seed INTEGER",
];

/// Individual statements of `CREATE_TABLES`, with `--` comment lines removed.
pub fn statements() -> impl Iterator<Item = &'static str> {
    CREATE_TABLES.split(';').filter_map(|chunk| {
        let start = chunk
            .lines()
            .take_while(|line| {
                let line = line.trim();
                line.is_empty() || line.starts_with("--")
            })
            .map(|line| line.len() + 1)
            .sum::<usize>()
            .min(chunk.len());
        let sql = chunk[start..].trim();
        (!sql.is_empty()).then_some(sql)
    })
}
