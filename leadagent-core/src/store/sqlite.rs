use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde_json::Value;

use super::models::{
    AgentError, AgentRun, CheckIn, InsertOutcome, NewAgentError, NewRun, RawRecord, RunMetrics,
    RunStatus,
};
use super::{check_transition, RunStore, StoreError, StoreResult};

const AGENT_SCHEMA: &str = include_str!("../../sql/agent.sql");

fn configure_connection(conn: &Connection, flags: OpenFlags) -> rusqlite::Result<()> {
    // Journal mode cannot be switched on a read-only handle.
    if !flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY) {
        conn.execute_batch("PRAGMA journal_mode = WAL;\nPRAGMA synchronous = NORMAL;")?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;\nPRAGMA busy_timeout = 5000;")
}

#[derive(Debug, Clone)]
pub struct SqliteRunStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteRunStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteRunStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteRunStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(SqliteRunStore { path, flags })
    }
}

/// SQLite-backed [`RunStore`]. Each call opens its own connection, so the
/// store is cheap to clone into blocking tasks.
#[derive(Debug, Clone)]
pub struct SqliteRunStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteRunStore {
    pub fn builder() -> SqliteRunStoreBuilder {
        SqliteRunStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteRunStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn, self.flags).map_err(|source| StoreError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(AGENT_SCHEMA)?;
        Ok(())
    }

    pub fn insert_run(&self, run: &NewRun) -> StoreResult<String> {
        let conn = self.open()?;
        let changed = conn.execute(
            "INSERT INTO agent_runs (run_id, workflow, client_id, site, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(run_id) DO NOTHING",
            params![
                run.run_id,
                run.workflow,
                run.client_id,
                run.site,
                RunStatus::Running.as_str(),
                Utc::now(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::DuplicateRun {
                run_id: run.run_id.clone(),
            });
        }
        Ok(run.run_id.clone())
    }

    pub fn transition_run(
        &self,
        run_id: &str,
        status: RunStatus,
        metrics: Option<&RunMetrics>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.open()?;
        let current = current_status(&conn, run_id)?;
        check_transition(run_id, current, status)?;
        let metrics_json = metrics.map(serde_json::to_string).transpose()?;
        let finished_at = status.terminal().then(Utc::now);
        // The status guard keeps a concurrent writer from reopening a run
        // that was finalised between the read above and this update.
        let changed = conn.execute(
            "UPDATE agent_runs
             SET status = ?2,
                 metrics = COALESCE(?3, metrics),
                 error = COALESCE(?4, error),
                 finished_at = COALESCE(?5, finished_at)
             WHERE run_id = ?1 AND status NOT IN ('success', 'failed')",
            params![run_id, status.as_str(), metrics_json, error, finished_at],
        )?;
        if changed == 0 {
            let status = current_status(&conn, run_id)?;
            return Err(StoreError::RunFrozen {
                run_id: run_id.to_string(),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    pub fn upsert_raw_record(
        &self,
        run_id: &str,
        payload: &Value,
        content_hash: &str,
    ) -> StoreResult<InsertOutcome> {
        let conn = self.open()?;
        let changed = conn.execute(
            "INSERT INTO raw_records (run_id, payload, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(content_hash) DO NOTHING",
            params![run_id, serde_json::to_string(payload)?, content_hash, Utc::now()],
        )?;
        Ok(InsertOutcome {
            inserted: changed == 1,
        })
    }

    pub fn record_error(&self, error: &NewAgentError) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO agent_errors (
                run_id, step, kind, message, url, locator, screenshot_path, trace_path, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                error.run_id,
                error.step,
                error.kind.as_str(),
                error.message,
                error.url,
                error.locator,
                error.screenshot_path,
                error.trace_path,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn record_check_in(&self, check_in: &CheckIn) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO check_ins (
                run_id, client_id, client_name, workspace, period, region, target,
                records_found, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                check_in.run_id,
                check_in.client_id,
                check_in.client_name,
                check_in.workspace,
                check_in.period,
                check_in.region,
                check_in.target,
                check_in.records_found as i64,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn fetch_run(&self, run_id: &str) -> StoreResult<Option<AgentRun>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, workflow, client_id, site, status, started_at, finished_at, metrics, error
             FROM agent_runs WHERE run_id = ?1",
        )?;
        let row = stmt
            .query_row(params![run_id], RunRow::from_row)
            .optional()?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn list_runs(&self, limit: usize) -> StoreResult<Vec<AgentRun>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, workflow, client_id, site, status, started_at, finished_at, metrics, error
             FROM agent_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], RunRow::from_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?.into_run()?);
        }
        Ok(runs)
    }

    pub fn list_errors(&self, run_id: &str) -> StoreResult<Vec<AgentError>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, step, kind, message, url, locator, screenshot_path, trace_path, created_at
             FROM agent_errors WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(3)?, error_from_row(row)?))
        })?;
        let mut errors = Vec::new();
        for row in rows {
            let (kind, mut error) = row?;
            error.kind = kind.parse().map_err(|err: crate::browser::UnknownErrorKind| {
                StoreError::Corrupt {
                    table: "agent_errors",
                    detail: err.to_string(),
                }
            })?;
            errors.push(error);
        }
        Ok(errors)
    }

    pub fn list_raw_records(&self, run_id: &str) -> StoreResult<Vec<RawRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, payload, content_hash, created_at
             FROM raw_records WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, DateTime<Utc>>(4)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (id, run_id, payload, content_hash, created_at) = row?;
            records.push(RawRecord {
                id,
                run_id,
                payload: serde_json::from_str(&payload)?,
                content_hash,
                created_at,
            });
        }
        Ok(records)
    }

    /// Counts stored records, optionally restricted to one run.
    pub fn count_raw_records(&self, run_id: Option<&str>) -> StoreResult<u64> {
        let conn = self.open()?;
        let count: i64 = match run_id {
            Some(run_id) => conn.query_row(
                "SELECT COUNT(*) FROM raw_records WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM raw_records", [], |row| row.get(0))?,
        };
        Ok(count.max(0) as u64)
    }

    pub fn list_check_ins(&self, run_id: &str) -> StoreResult<Vec<CheckIn>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, client_id, client_name, workspace, period, region, target, records_found
             FROM check_ins WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(CheckIn {
                run_id: row.get(0)?,
                client_id: row.get(1)?,
                client_name: row.get(2)?,
                workspace: row.get(3)?,
                period: row.get(4)?,
                region: row.get(5)?,
                target: row.get(6)?,
                records_found: row.get::<_, i64>(7)?.max(0) as u64,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn blocking<T, F>(&self, task: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SqliteRunStore) -> StoreResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || task(store))
            .await
            .map_err(|err| StoreError::Io(std::io::Error::other(err)))?
    }
}

fn current_status(conn: &Connection, run_id: &str) -> StoreResult<RunStatus> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM agent_runs WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .optional()?;
    let status = status.ok_or_else(|| StoreError::RunNotFound {
        run_id: run_id.to_string(),
    })?;
    status.parse().map_err(|detail| StoreError::Corrupt {
        table: "agent_runs",
        detail,
    })
}

struct RunRow {
    run_id: String,
    workflow: String,
    client_id: i64,
    site: String,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    metrics: Option<String>,
    error: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            workflow: row.get(1)?,
            client_id: row.get(2)?,
            site: row.get(3)?,
            status: row.get(4)?,
            started_at: row.get(5)?,
            finished_at: row.get(6)?,
            metrics: row.get(7)?,
            error: row.get(8)?,
        })
    }

    fn into_run(self) -> StoreResult<AgentRun> {
        let status = self.status.parse().map_err(|detail| StoreError::Corrupt {
            table: "agent_runs",
            detail,
        })?;
        let metrics = self
            .metrics
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(AgentRun {
            run_id: self.run_id,
            workflow: self.workflow,
            client_id: self.client_id,
            site: self.site,
            status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            metrics,
            error: self.error,
        })
    }
}

fn error_from_row(row: &Row<'_>) -> rusqlite::Result<AgentError> {
    Ok(AgentError {
        id: row.get(0)?,
        run_id: row.get(1)?,
        step: row.get(2)?,
        kind: crate::browser::ErrorKind::Network,
        message: row.get(4)?,
        url: row.get(5)?,
        locator: row.get(6)?,
        screenshot_path: row.get(7)?,
        trace_path: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(&self, run: &NewRun) -> StoreResult<String> {
        let run = run.clone();
        self.blocking(move |store| store.insert_run(&run)).await
    }

    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        metrics: Option<&RunMetrics>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let run_id = run_id.to_string();
        let metrics = metrics.cloned();
        let error = error.map(str::to_string);
        self.blocking(move |store| {
            store.transition_run(&run_id, status, metrics.as_ref(), error.as_deref())
        })
        .await
    }

    async fn insert_raw_record(
        &self,
        run_id: &str,
        payload: &Value,
        content_hash: &str,
    ) -> StoreResult<InsertOutcome> {
        let run_id = run_id.to_string();
        let payload = payload.clone();
        let content_hash = content_hash.to_string();
        self.blocking(move |store| store.upsert_raw_record(&run_id, &payload, &content_hash))
            .await
    }

    async fn insert_error(&self, error: &NewAgentError) -> StoreResult<()> {
        let error = error.clone();
        self.blocking(move |store| store.record_error(&error)).await
    }

    async fn insert_check_in(&self, check_in: &CheckIn) -> StoreResult<()> {
        let check_in = check_in.clone();
        self.blocking(move |store| store.record_check_in(&check_in))
            .await
    }
}
