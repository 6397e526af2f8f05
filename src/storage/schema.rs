//! Checkpoint database schema

/// SQL schema for the checkpoint database
pub const SCHEMA_SQL: &str = r#"
-- One row per job, rewritten on every checkpoint
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    config TEXT NOT NULL,
    config_hash TEXT,
    seeds TEXT NOT NULL,
    counters TEXT NOT NULL,
    failure TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_updated ON jobs(updated_at);

-- Keys admitted to a job's frontier; only ever grows
CREATE TABLE IF NOT EXISTS visited (
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    PRIMARY KEY (job_id, url)
);

-- Work not yet finished at the last checkpoint; replaced on every save
CREATE TABLE IF NOT EXISTS pending (
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    priority INTEGER NOT NULL,
    discovered_from TEXT,
    delay_ms INTEGER NOT NULL,
    attempts INTEGER NOT NULL,
    PRIMARY KEY (job_id, seq)
);
"#;

pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Current schema version; bump when the layout changes
pub fn get_schema_version() -> u32 {
    1
}
