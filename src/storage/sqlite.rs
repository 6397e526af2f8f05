//! SQLite checkpoint store

use crate::frontier::{FrontierCheckpoint, PendingItem};
use crate::job::JobId;
use crate::state::JobStatus;
use crate::storage::schema::{get_schema_version, initialize_schema};
use crate::storage::traits::{CheckpointStore, StorageError, StorageResult};
use crate::storage::{CheckpointRecord, JobSummary};
use crate::url::UrlKey;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// SQLite storage backend
///
/// One connection behind a mutex; every save runs in a single transaction.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

/// A `jobs` row before its JSON columns are decoded
struct JobRow {
    id: String,
    status: String,
    config: String,
    config_hash: Option<String>,
    seeds: String,
    counters: String,
    failure: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    const COLUMNS: &'static str =
        "id, status, config, config_hash, seeds, counters, failure, created_at, updated_at";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            config: row.get(2)?,
            config_hash: row.get(3)?,
            seeds: row.get(4)?,
            counters: row.get(5)?,
            failure: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn job_id(&self) -> StorageResult<JobId> {
        JobId::parse_str(&self.id).map_err(|e| StorageError::Corrupt(format!("job id: {}", e)))
    }

    fn status(&self) -> StorageResult<JobStatus> {
        JobStatus::from_db_string(&self.status)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown status '{}'", self.status)))
    }
}

impl SqliteCheckpointStore {
    /// Opens or creates the checkpoint database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        Self::init(conn)
    }

    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        initialize_schema(&conn)?;
        conn.pragma_update(None, "user_version", get_schema_version())?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_time(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp '{}': {}", value, e)))
}

fn parse_key(value: &str) -> StorageResult<UrlKey> {
    UrlKey::parse(value).map_err(|e| StorageError::Corrupt(format!("url '{}': {}", value, e)))
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, record: &CheckpointRecord) -> StorageResult<()> {
        let id = record.job_id.to_string();
        let config = serde_json::to_string(&record.config)?;
        let seeds = serde_json::to_string(&record.seeds)?;
        let counters = serde_json::to_string(&record.counters)?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO jobs (id, status, config, config_hash, seeds, counters, failure, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                config = excluded.config,
                config_hash = excluded.config_hash,
                seeds = excluded.seeds,
                counters = excluded.counters,
                failure = excluded.failure,
                updated_at = excluded.updated_at",
            params![
                id,
                record.status.to_db_string(),
                config,
                record.config_hash,
                seeds,
                counters,
                record.failure,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;

        {
            let mut insert_visited =
                tx.prepare_cached("INSERT OR IGNORE INTO visited (job_id, url) VALUES (?1, ?2)")?;
            for key in &record.frontier.visited {
                insert_visited.execute(params![id, key.as_str()])?;
            }
        }

        tx.execute("DELETE FROM pending WHERE job_id = ?1", params![id])?;
        {
            let mut insert_pending = tx.prepare_cached(
                "INSERT INTO pending (job_id, seq, url, depth, priority, discovered_from, delay_ms, attempts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (seq, item) in record.frontier.pending.iter().enumerate() {
                insert_pending.execute(params![
                    id,
                    seq as i64,
                    item.key.as_str(),
                    item.depth,
                    item.priority,
                    item.discovered_from.as_ref().map(|k| k.as_str()),
                    item.delay_ms as i64,
                    item.attempts,
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            "Checkpoint saved for job {} ({} pending, {} visited)",
            record.job_id,
            record.frontier.pending.len(),
            record.frontier.visited.len()
        );
        Ok(())
    }

    fn load(&self, id: &JobId) -> StorageResult<Option<CheckpointRecord>> {
        let conn = self.conn();
        let id_str = id.to_string();

        let row = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JobRow::COLUMNS),
                params![id_str],
                JobRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare("SELECT url FROM visited WHERE job_id = ?1 ORDER BY url")?;
        let visited = stmt
            .query_map(params![id_str], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .iter()
            .map(|url| parse_key(url))
            .collect::<StorageResult<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT url, depth, priority, discovered_from, delay_ms, attempts
             FROM pending WHERE job_id = ?1 ORDER BY seq",
        )?;
        let raw_pending = stmt
            .query_map(params![id_str], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, u32>(1)?,
                    r.get::<_, i32>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, u32>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut pending = Vec::with_capacity(raw_pending.len());
        for (url, depth, priority, from, delay_ms, attempts) in raw_pending {
            pending.push(PendingItem {
                key: parse_key(&url)?,
                depth,
                priority,
                discovered_from: from.as_deref().map(parse_key).transpose()?,
                delay_ms: delay_ms.max(0) as u64,
                attempts,
            });
        }

        Ok(Some(CheckpointRecord {
            job_id: row.job_id()?,
            status: row.status()?,
            config: serde_json::from_str(&row.config)?,
            config_hash: row.config_hash,
            seeds: serde_json::from_str(&row.seeds)?,
            counters: serde_json::from_str(&row.counters)?,
            frontier: FrontierCheckpoint { pending, visited },
            failure: row.failure,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
        }))
    }

    fn list(&self) -> StorageResult<Vec<JobSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {},
                (SELECT COUNT(*) FROM pending p WHERE p.job_id = jobs.id),
                (SELECT COUNT(*) FROM visited v WHERE v.job_id = jobs.id)
             FROM jobs ORDER BY updated_at DESC",
            JobRow::COLUMNS
        ))?;

        let rows = stmt
            .query_map([], |r| {
                Ok((JobRow::from_row(r)?, r.get::<_, i64>(9)?, r.get::<_, i64>(10)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(row, pending, visited)| {
                Ok(JobSummary {
                    job_id: row.job_id()?,
                    status: row.status()?,
                    counters: serde_json::from_str(&row.counters)?,
                    pending: pending.max(0) as u64,
                    visited: visited.max(0) as u64,
                    created_at: parse_time(&row.created_at)?,
                    updated_at: parse_time(&row.updated_at)?,
                    config_hash: row.config_hash,
                    failure: row.failure,
                })
            })
            .collect()
    }

    fn delete(&self, id: &JobId) -> StorageResult<bool> {
        let mut conn = self.conn();
        let id = id.to_string();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM pending WHERE job_id = ?1", params![id])?;
        tx.execute("DELETE FROM visited WHERE job_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }
}
