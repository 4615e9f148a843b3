//! Append-only deployment log backed by SQLite.
//!
//! The one-in-flight-per-environment rule lives in the schema: a partial
//! unique index over in-flight statuses makes SQLite reject a second queued
//! record for the same environment, across processes sharing the file.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::log_status;
use crate::record::{DeploymentRecord, DeploymentStatus, NewDeployment, TransitionFields};
use crate::revision::short;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

fn schema() -> String {
    format!(
        "
CREATE TABLE IF NOT EXISTS deployments (
    seq                INTEGER PRIMARY KEY AUTOINCREMENT,
    id                 TEXT NOT NULL UNIQUE,
    environment        TEXT NOT NULL,
    revision           TEXT NOT NULL,
    changed_paths      TEXT NOT NULL DEFAULT '[]',
    source_branch      TEXT,
    triggered_by       TEXT NOT NULL,
    status             TEXT NOT NULL,
    reason             TEXT,
    queued_at          TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    started_at         TEXT,
    finished_at        TEXT,
    executor_job_ref   TEXT,
    logs_url           TEXT,
    rollback_target    TEXT,
    rollback_job_ref   TEXT,
    conflict_overrides TEXT NOT NULL DEFAULT '[]'
);

CREATE UNIQUE INDEX IF NOT EXISTS deployments_one_in_flight
    ON deployments(environment)
    WHERE status IN ({in_flight});

CREATE INDEX IF NOT EXISTS deployments_by_environment
    ON deployments(environment, seq);
",
        in_flight = in_flight_list()
    )
}

/// `'queued', 'triggered', ...` for `status IN (...)`. Shared by the unique
/// index and the queries so they agree on what holds the lock.
fn in_flight_list() -> String {
    DeploymentStatus::IN_FLIGHT
        .iter()
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

const COLUMNS: &str = "seq, id, environment, revision, changed_paths, source_branch, \
    triggered_by, status, reason, queued_at, updated_at, started_at, finished_at, \
    executor_job_ref, logs_url, rollback_target, rollback_job_ref, conflict_overrides";

pub struct DeploymentStore {
    conn: Connection,
}

impl DeploymentStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
            })?;
        }
        let conn = Connection::open(path).map_err(|e| store_error(e, "open deployment store"))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| store_error(e, "open in-memory store"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| store_error(e, "set busy timeout"))?;
        conn.execute_batch(&schema())
            .map_err(|e| store_error(e, "create schema"))?;
        Ok(Self { conn })
    }

    /// Insert a `queued` record. Fails with `deploy.concurrent_deployment`
    /// when the environment already has one in flight.
    pub fn append(&self, new: NewDeployment) -> Result<DeploymentRecord> {
        let id = Uuid::new_v4().to_string();
        let queued_at = Utc::now();

        let inserted = self.conn.execute(
            "INSERT INTO deployments (id, environment, revision, changed_paths, source_branch, \
             triggered_by, status, queued_at, updated_at, conflict_overrides) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)",
            params![
                id,
                new.environment,
                new.revision,
                encode_set(&new.changed_paths)?,
                new.source_branch,
                new.triggered_by,
                DeploymentStatus::Queued.as_str(),
                queued_at.to_rfc3339(),
                encode_set(&new.conflict_overrides)?,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                let active = self.active_for(&new.environment).ok().flatten().map(|r| r.id);
                return Err(Error::concurrent_deployment(&new.environment, active));
            }
            Err(e) => return Err(store_error(e, "append deployment")),
        }

        log_status!(
            "store",
            "Queued {} for {} ({})",
            short(&new.revision),
            new.environment,
            id
        );
        self.get(&id)
    }

    /// Move a record to `next`, validating against the lifecycle table inside
    /// one `BEGIN IMMEDIATE` transaction. Nothing is written on failure.
    pub fn transition(
        &self,
        id: &str,
        next: DeploymentStatus,
        fields: TransitionFields,
    ) -> Result<DeploymentRecord> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(|e| store_error(e, "begin transition"))?;

        let current: Option<(String, String)> = tx
            .query_row(
                "SELECT status, environment FROM deployments WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| store_error(e, "read status"))?;

        let (raw_status, environment) = current.ok_or_else(|| Error::deployment_not_found(id))?;
        let from = DeploymentStatus::parse(&raw_status)?;

        if !from.can_transition_to(next) {
            return Err(Error::invalid_transition(id, from.as_str(), next.as_str()));
        }

        let now = Utc::now().to_rfc3339();
        let started_at = (next == DeploymentStatus::Running).then(|| now.clone());
        let finished_at =
            (next == DeploymentStatus::Failed || next.is_terminal()).then(|| now.clone());

        let updated = tx.execute(
            "UPDATE deployments SET \
                status = ?2, \
                updated_at = ?10, \
                reason = COALESCE(?3, reason), \
                executor_job_ref = COALESCE(?4, executor_job_ref), \
                logs_url = COALESCE(?5, logs_url), \
                rollback_target = COALESCE(?6, rollback_target), \
                rollback_job_ref = COALESCE(?7, rollback_job_ref), \
                started_at = COALESCE(?8, started_at), \
                finished_at = COALESCE(?9, finished_at) \
             WHERE id = ?1",
            params![
                id,
                next.as_str(),
                fields.reason,
                fields.executor_job_ref,
                fields.logs_url,
                fields.rollback_target,
                fields.rollback_job_ref,
                started_at,
                finished_at,
                now,
            ],
        );

        match updated {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                drop(tx);
                let active = self.active_for(&environment).ok().flatten().map(|r| r.id);
                return Err(Error::concurrent_deployment(&environment, active));
            }
            Err(e) => return Err(store_error(e, "apply transition")),
        }

        tx.commit().map_err(|e| store_error(e, "commit transition"))?;
        log_status!("store", "{} {}: {} -> {}", environment, id, from, next);
        self.get(id)
    }

    /// Write optional fields without changing status (e.g. the job ref
    /// returned once the executor accepts a trigger).
    pub fn annotate(&self, id: &str, fields: TransitionFields) -> Result<DeploymentRecord> {
        let updated = self
            .conn
            .execute(
                "UPDATE deployments SET \
                    updated_at = ?7, \
                    reason = COALESCE(?2, reason), \
                    executor_job_ref = COALESCE(?3, executor_job_ref), \
                    logs_url = COALESCE(?4, logs_url), \
                    rollback_target = COALESCE(?5, rollback_target), \
                    rollback_job_ref = COALESCE(?6, rollback_job_ref) \
                 WHERE id = ?1",
                params![
                    id,
                    fields.reason,
                    fields.executor_job_ref,
                    fields.logs_url,
                    fields.rollback_target,
                    fields.rollback_job_ref,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| store_error(e, "annotate deployment"))?;

        if updated == 0 {
            return Err(Error::deployment_not_found(id));
        }
        self.get(id)
    }

    pub fn get(&self, id: &str) -> Result<DeploymentRecord> {
        self.find(id)?.ok_or_else(|| Error::deployment_not_found(id))
    }

    pub fn find(&self, id: &str) -> Result<Option<DeploymentRecord>> {
        self.query_one(
            &format!("SELECT {} FROM deployments WHERE id = ?1", COLUMNS),
            &[&id],
        )
    }

    /// Latest `succeeded` record: what the environment is running now.
    pub fn current_for(&self, environment: &str) -> Result<Option<DeploymentRecord>> {
        self.query_one(
            &format!(
                "SELECT {} FROM deployments WHERE environment = ?1 AND status = 'succeeded' \
                 ORDER BY seq DESC LIMIT 1",
                COLUMNS
            ),
            &[&environment],
        )
    }

    /// The environment's in-flight record, if any.
    pub fn active_for(&self, environment: &str) -> Result<Option<DeploymentRecord>> {
        self.query_one(
            &format!(
                "SELECT {} FROM deployments WHERE environment = ?1 AND status IN ({}) \
                 ORDER BY seq DESC LIMIT 1",
                COLUMNS,
                in_flight_list()
            ),
            &[&environment],
        )
    }

    pub fn latest_for(&self, environment: &str) -> Result<Option<DeploymentRecord>> {
        self.query_one(
            &format!(
                "SELECT {} FROM deployments WHERE environment = ?1 ORDER BY seq DESC LIMIT 1",
                COLUMNS
            ),
            &[&environment],
        )
    }

    /// Most recent first.
    pub fn history(&self, environment: &str, limit: usize) -> Result<Vec<DeploymentRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_many(
            &format!(
                "SELECT {} FROM deployments WHERE environment = ?1 ORDER BY seq DESC LIMIT ?2",
                COLUMNS
            ),
            &[&environment, &limit],
        )
    }

    /// Every in-flight record, across environments.
    pub fn in_flight(&self) -> Result<Vec<DeploymentRecord>> {
        self.query_many(
            &format!(
                "SELECT {} FROM deployments WHERE status IN ({}) ORDER BY seq",
                COLUMNS,
                in_flight_list()
            ),
            &[],
        )
    }

    fn query_one(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<DeploymentRecord>> {
        let raw = self
            .conn
            .query_row(sql, args, RawRecord::from_row)
            .optional()
            .map_err(|e| store_error(e, "read deployment"))?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn query_many(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<DeploymentRecord>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| store_error(e, "prepare query"))?;
        let rows = stmt
            .query_map(args, RawRecord::from_row)
            .map_err(|e| store_error(e, "read deployments"))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| store_error(e, "read deployments"))?;
            records.push(raw.into_record()?);
        }
        Ok(records)
    }
}

/// Row as stored, before decoding JSON columns and timestamps.
struct RawRecord {
    seq: i64,
    id: String,
    environment: String,
    revision: String,
    changed_paths: String,
    source_branch: Option<String>,
    triggered_by: String,
    status: String,
    reason: Option<String>,
    queued_at: String,
    updated_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    executor_job_ref: Option<String>,
    logs_url: Option<String>,
    rollback_target: Option<String>,
    rollback_job_ref: Option<String>,
    conflict_overrides: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            environment: row.get(2)?,
            revision: row.get(3)?,
            changed_paths: row.get(4)?,
            source_branch: row.get(5)?,
            triggered_by: row.get(6)?,
            status: row.get(7)?,
            reason: row.get(8)?,
            queued_at: row.get(9)?,
            updated_at: row.get(10)?,
            started_at: row.get(11)?,
            finished_at: row.get(12)?,
            executor_job_ref: row.get(13)?,
            logs_url: row.get(14)?,
            rollback_target: row.get(15)?,
            rollback_job_ref: row.get(16)?,
            conflict_overrides: row.get(17)?,
        })
    }

    fn into_record(self) -> Result<DeploymentRecord> {
        Ok(DeploymentRecord {
            status: DeploymentStatus::parse(&self.status)?,
            changed_paths: decode_set(&self.changed_paths)?,
            conflict_overrides: decode_set(&self.conflict_overrides)?,
            queued_at: decode_time(&self.queued_at)?,
            updated_at: decode_time(&self.updated_at)?,
            started_at: self.started_at.as_deref().map(decode_time).transpose()?,
            finished_at: self.finished_at.as_deref().map(decode_time).transpose()?,
            seq: self.seq,
            id: self.id,
            environment: self.environment,
            revision: self.revision,
            source_branch: self.source_branch,
            triggered_by: self.triggered_by,
            reason: self.reason,
            executor_job_ref: self.executor_job_ref,
            logs_url: self.logs_url,
            rollback_target: self.rollback_target,
            rollback_job_ref: self.rollback_job_ref,
        })
    }
}

fn encode_set(set: &BTreeSet<String>) -> Result<String> {
    serde_json::to_string(set)
        .map_err(|e| Error::internal_json(e.to_string(), Some("encode path set".to_string())))
}

fn decode_set(raw: &str) -> Result<BTreeSet<String>> {
    serde_json::from_str(raw)
        .map_err(|e| Error::internal_json(e.to_string(), Some("decode path set".to_string())))
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::internal_store(e.to_string(), Some(format!("decode timestamp '{}'", raw))))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn store_error(err: rusqlite::Error, context: &str) -> Error {
    Error::internal_store(err.to_string(), Some(context.to_string()))
}
