//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Lifecycle and analytics call store methods; they never execute SQL directly.
//!
//! RULE: Timestamps are stored as RFC 3339 UTC strings with nanosecond
//! precision, so lexicographic order equals chronological order.

use crate::{
    complaint::{Category, Department, Priority, Status},
    error::DeskResult,
    timeline::TimelineAction,
    types::Timestamp,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef},
    Connection, ToSql, Transaction, TransactionBehavior,
};
use std::time::Duration;

mod agent;
mod complaint;
mod query;

pub use query::{ComplaintQuery, Page, SortField, SortOrder};

pub(crate) use agent::{
    add_membership_in, find_agent_in, is_member_in, open_workload_in, remove_membership_in,
};
pub(crate) use complaint::{complaint_exists_in, is_duplicate_code, WriteOutcome};

const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

fn connect(target: &str) -> DeskResult<Connection> {
    let conn = Connection::open_with_flags(
        target,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            | rusqlite::OpenFlags::SQLITE_OPEN_URI,
    )?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

pub struct DeskStore {
    conn: Connection,
    path: Option<String>, // None for in-memory, Some(path) for file
    /// Shared-cache URI of an in-memory database; `reopen` attaches to it.
    memory_uri: Option<String>,
}

impl DeskStore {
    pub fn open(path: &str) -> DeskResult<Self> {
        let conn = connect(path)?;
        // WAL mode only for real files (shared-memory ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self {
            conn,
            path: Some(path.to_string()),
            memory_uri: None,
        })
    }

    /// Open a private in-memory database (used in tests). Each call gets
    /// its own named shared-cache database, which lives as long as any
    /// connection to it stays open.
    pub fn in_memory() -> DeskResult<Self> {
        let uri = format!("file:desk_{}?mode=memory&cache=shared", uuid::Uuid::new_v4().simple());
        Self::attach_memory(uri)
    }

    fn attach_memory(uri: String) -> DeskResult<Self> {
        let conn = connect(&uri)?;
        Ok(Self {
            conn,
            path: None,
            memory_uri: Some(uri),
        })
    }

    /// Reopen a new connection to the same database; one connection per thread.
    pub fn reopen(&self) -> DeskResult<Self> {
        match (&self.path, &self.memory_uri) {
            (Some(p), _) => Self::open(p),
            (None, Some(uri)) => Self::attach_memory(uri.clone()),
            (None, None) => Self::in_memory(),
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order. Idempotent.
    pub fn migrate(&self) -> DeskResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_complaints.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_agents.sql"))?;
        Ok(())
    }

    /// Run `f` inside a write transaction taken with `BEGIN IMMEDIATE`,
    /// so the write lock is held from the first statement.
    pub(crate) fn write_txn<T, F>(&self, f: F) -> DeskResult<T>
    where
        F: FnOnce(&Connection) -> DeskResult<T>,
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f(&*tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` inside a read transaction: every statement sees one snapshot.
    pub(crate) fn read_txn<T, F>(&self, f: F) -> DeskResult<T>
    where
        F: FnOnce(&Connection) -> DeskResult<T>,
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Deferred)?;
        let out = f(&*tx)?;
        tx.finish()?;
        Ok(out)
    }
}

// ── Timestamps ─────────────────────────────────────────────────────

pub(crate) fn ts(t: &Timestamp) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_ts(col: usize, raw: &str) -> rusqlite::Result<Timestamp> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_ts(col: usize, raw: Option<String>) -> rusqlite::Result<Option<Timestamp>> {
    raw.map(|r| parse_ts(col, &r)).transpose()
}

/// True when `err` is a UNIQUE or PRIMARY KEY violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
    )
}

// ── Column codecs for the closed enumerations ──────────────────────

fn text_of<'a>(value: ValueRef<'a>) -> FromSqlResult<&'a str> {
    value.as_str()
}

fn unknown_code(kind: &str, code: &str) -> FromSqlError {
    FromSqlError::Other(format!("unknown {kind} code '{code}'").into())
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = text_of(value)?;
        Status::parse(code).ok_or_else(|| unknown_code("status", code))
    }
}

impl ToSql for Priority {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for Priority {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = text_of(value)?;
        Priority::parse(code).ok_or_else(|| unknown_code("priority", code))
    }
}

impl ToSql for Department {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

// Persisted rows with a code outside the closed set land in the Unknown bucket.
impl FromSql for Department {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(Department::parse_lenient(text_of(value)?))
    }
}

impl ToSql for Category {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.label()))
    }
}

impl FromSql for Category {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(Category::parse_lenient(text_of(value)?))
    }
}

impl ToSql for TimelineAction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for TimelineAction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = text_of(value)?;
        TimelineAction::from_code(code).ok_or_else(|| unknown_code("timeline action", code))
    }
}
