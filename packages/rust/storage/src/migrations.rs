//! SQL migration definitions for the run ledger.
//!
//! Migrations are applied in order on database open.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: runs, stage_runs",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per bid evaluation
CREATE TABLE IF NOT EXISTS runs (
    run_id           TEXT PRIMARY KEY,
    bid_id           TEXT NOT NULL,
    started_at       TEXT NOT NULL,
    finished_at      TEXT,
    status           TEXT NOT NULL,
    decision         TEXT,
    fit_score        REAL,
    report_json_path TEXT,
    report_md_path   TEXT,
    error            TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_bid_id ON runs(bid_id);

-- One row per stage invocation attempt
CREATE TABLE IF NOT EXISTS stage_runs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id      TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    stage       TEXT NOT NULL,
    attempt     INTEGER NOT NULL,
    cache_hit   INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    error       TEXT,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stage_runs_run_id ON stage_runs(run_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
