//! SQLite-backed durable store for guardrail violations and audit entries.
//!
//! # Storage layout
//!
//! Two tables are created (if they do not already exist) by [`SqliteGuardrailStore::open`]
//! and [`SqliteGuardrailStore::open_in_memory`]:
//!
//! `guardrail_violations`
//!
//! | column      | type    | description                                 |
//! |-------------|---------|---------------------------------------------|
//! | agent       | TEXT    | Agent identifier (`cartAgent`, ...)         |
//! | action      | TEXT    | Action type                                 |
//! | user_id     | TEXT    | Attributed user, nullable                   |
//! | reason      | TEXT    | Rejection reason                            |
//! | severity    | TEXT    | `low` / `medium` / `high` / `critical`      |
//! | payload     | TEXT    | Original action payload as JSON             |
//! | check_name  | TEXT    | Name of the check that failed               |
//! | created_at  | TEXT    | RFC-3339 time of the violation (UTC)        |
//!
//! `guardrail_audit_logs`
//!
//! | column      | type    | description                                 |
//! |-------------|---------|---------------------------------------------|
//! | id          | TEXT    | UUID v4 primary key                         |
//! | agent       | TEXT    | Agent identifier                            |
//! | action      | TEXT    | Action type                                 |
//! | user_id     | TEXT    | Attributed user, nullable                   |
//! | approved    | INTEGER | 1 when the action was approved              |
//! | reason      | TEXT    | Rejection reason, nullable                  |
//! | warnings    | TEXT    | JSON array of warnings, nullable            |
//! | payload     | TEXT    | Original action payload as JSON             |
//! | created_at  | TEXT    | RFC-3339 time of the decision (UTC)         |
//!
//! The corrected payload (`GuardrailResult::modified`) is not stored; audit
//! entries read back from SQLite always have `modified: None`.
//!
//! [`SqliteGuardrailStore::open_existing`] skips schema creation; writing to a
//! database whose tables were never created reports
//! [`StoreError::MissingTable`].
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use serde_json::json;
//! use shepherd_kernel::GuardrailStore;
//! use shepherd_memory::guardrail_store::SqliteGuardrailStore;
//! use shepherd_types::{AgentType, GuardrailViolation, Severity};
//!
//! let mut store = SqliteGuardrailStore::open_in_memory().unwrap();
//! store
//!     .insert_violation(&GuardrailViolation {
//!         agent: AgentType::CartAgent,
//!         action_type: "add_item".into(),
//!         user_id: Some("u1".into()),
//!         reason: "over budget".into(),
//!         severity: Severity::High,
//!         timestamp: Utc::now(),
//!         payload: json!({ "qty": 40 }),
//!         check_name: "budget".into(),
//!     })
//!     .unwrap();
//!
//! let stored = store.violations_for(AgentType::CartAgent, 10).unwrap();
//! assert_eq!(stored[0].check_name, "budget");
//! ```

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use shepherd_kernel::persistence::{GuardrailStore, StoreError};
use shepherd_types::{AgentType, AuditLog, GuardrailResult, GuardrailViolation, Severity};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const VIOLATIONS_TABLE: &str = "guardrail_violations";
pub const AUDIT_TABLE: &str = "guardrail_audit_logs";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from guardrail store operations.
#[derive(Error, Debug)]
pub enum SqliteStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(e: SqliteStoreError) -> Self {
        match e {
            SqliteStoreError::Sqlite(err) => match missing_table(&err) {
                Some(table) => StoreError::MissingTable(table),
                None => StoreError::Backend(err.to_string()),
            },
            SqliteStoreError::Json(err) => StoreError::Serialization(err.to_string()),
            SqliteStoreError::Corrupt(msg) => StoreError::Serialization(msg),
        }
    }
}

/// Extract the table name from SQLite's "no such table: X" failure.
fn missing_table(err: &rusqlite::Error) -> Option<String> {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg
            .strip_prefix("no such table: ")
            .map(|table| table.trim().to_string()),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteGuardrailStore
// ─────────────────────────────────────────────────────────────────────────────

pub struct SqliteGuardrailStore {
    conn: Connection,
}

impl SqliteGuardrailStore {
    /// Open (or create) a persistent SQLite database at `path` and make sure
    /// both tables exist.
    pub fn open(path: &str) -> Result<Self, SqliteStoreError> {
        let store = Self::open_existing(path)?;
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let store = Self::from_connection(Connection::open_in_memory()?);
        store.init_schema()?;
        Ok(store)
    }

    /// Open `path` without touching the schema.
    pub fn open_existing(path: &str) -> Result<Self, SqliteStoreError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// Wrap an already-open connection without touching the schema.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn init_schema(&self) -> Result<(), SqliteStoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS guardrail_violations (
                agent      TEXT NOT NULL,
                action     TEXT NOT NULL,
                user_id    TEXT,
                reason     TEXT NOT NULL,
                severity   TEXT NOT NULL,
                payload    TEXT NOT NULL,
                check_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_guardrail_violations_agent
                ON guardrail_violations (agent, created_at);
            CREATE TABLE IF NOT EXISTS guardrail_audit_logs (
                id         TEXT NOT NULL PRIMARY KEY,
                agent      TEXT NOT NULL,
                action     TEXT NOT NULL,
                user_id    TEXT,
                approved   INTEGER NOT NULL,
                reason     TEXT,
                warnings   TEXT,
                payload    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;
        debug!("guardrail store schema ready");
        Ok(())
    }

    /// The most recent `limit` violations for `agent`, newest first.
    pub fn violations_for(
        &self,
        agent: AgentType,
        limit: usize,
    ) -> Result<Vec<GuardrailViolation>, SqliteStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT agent, action, user_id, reason, severity, payload, check_name, created_at
             FROM guardrail_violations
             WHERE agent = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent.as_str(), limit as i64], RawViolation::from_row)?;
        rows.map(|raw| -> Result<GuardrailViolation, SqliteStoreError> { raw?.into_violation() })
            .collect()
    }

    /// The most recent `limit` audit entries for `agent`, newest first.
    pub fn audits_for(&self, agent: AgentType, limit: usize) -> Result<Vec<AuditLog>, SqliteStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, agent, action, user_id, approved, reason, warnings, payload, created_at
             FROM guardrail_audit_logs
             WHERE agent = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent.as_str(), limit as i64], RawAudit::from_row)?;
        rows.map(|raw| -> Result<AuditLog, SqliteStoreError> { raw?.into_audit() })
            .collect()
    }

    pub fn violation_count(&self) -> Result<u64, SqliteStoreError> {
        self.count(VIOLATIONS_TABLE)
    }

    pub fn audit_count(&self) -> Result<u64, SqliteStoreError> {
        self.count(AUDIT_TABLE)
    }

    /// Number of audit entries recording an approval.
    pub fn approved_count(&self) -> Result<u64, SqliteStoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM guardrail_audit_logs WHERE approved = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    fn count(&self, table: &str) -> Result<u64, SqliteStoreError> {
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    fn write_violation(&self, v: &GuardrailViolation) -> Result<(), SqliteStoreError> {
        self.conn.execute(
            "INSERT INTO guardrail_violations
                 (agent, action, user_id, reason, severity, payload, check_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                v.agent.as_str(),
                v.action_type,
                v.user_id,
                v.reason,
                v.severity.as_str(),
                serde_json::to_string(&v.payload)?,
                v.check_name,
                v.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn write_audit(&self, a: &AuditLog) -> Result<(), SqliteStoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO guardrail_audit_logs
                 (id, agent, action, user_id, approved, reason, warnings, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                a.id.to_string(),
                a.agent.as_str(),
                a.action_type,
                a.user_id,
                a.result.approved,
                a.result.reason,
                a.result.warnings.as_ref().map(serde_json::to_string).transpose()?,
                serde_json::to_string(&a.payload)?,
                a.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl GuardrailStore for SqliteGuardrailStore {
    fn insert_violation(&mut self, violation: &GuardrailViolation) -> Result<(), StoreError> {
        Ok(self.write_violation(violation)?)
    }

    fn insert_audit(&mut self, entry: &AuditLog) -> Result<(), StoreError> {
        Ok(self.write_audit(entry)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

struct RawViolation {
    agent: String,
    action: String,
    user_id: Option<String>,
    reason: String,
    severity: String,
    payload: String,
    check_name: String,
    created_at: String,
}

impl RawViolation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            agent: row.get(0)?,
            action: row.get(1)?,
            user_id: row.get(2)?,
            reason: row.get(3)?,
            severity: row.get(4)?,
            payload: row.get(5)?,
            check_name: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_violation(self) -> Result<GuardrailViolation, SqliteStoreError> {
        Ok(GuardrailViolation {
            agent: parse_agent(&self.agent)?,
            action_type: self.action,
            user_id: self.user_id,
            reason: self.reason,
            severity: self
                .severity
                .parse::<Severity>()
                .map_err(SqliteStoreError::Corrupt)?,
            timestamp: parse_time(&self.created_at)?,
            payload: serde_json::from_str(&self.payload)?,
            check_name: self.check_name,
        })
    }
}

struct RawAudit {
    id: String,
    agent: String,
    action: String,
    user_id: Option<String>,
    approved: bool,
    reason: Option<String>,
    warnings: Option<String>,
    payload: String,
    created_at: String,
}

impl RawAudit {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent: row.get(1)?,
            action: row.get(2)?,
            user_id: row.get(3)?,
            approved: row.get(4)?,
            reason: row.get(5)?,
            warnings: row.get(6)?,
            payload: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_audit(self) -> Result<AuditLog, SqliteStoreError> {
        Ok(AuditLog {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| SqliteStoreError::Corrupt(format!("audit id {}: {e}", self.id)))?,
            agent: parse_agent(&self.agent)?,
            action_type: self.action,
            user_id: self.user_id,
            result: GuardrailResult {
                approved: self.approved,
                reason: self.reason,
                warnings: self.warnings.as_deref().map(serde_json::from_str).transpose()?,
                modified: None,
            },
            timestamp: parse_time(&self.created_at)?,
            payload: serde_json::from_str(&self.payload)?,
        })
    }
}

fn parse_agent(s: &str) -> Result<AgentType, SqliteStoreError> {
    s.parse::<AgentType>()
        .map_err(|e| SqliteStoreError::Corrupt(e.to_string()))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, SqliteStoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SqliteStoreError::Corrupt(format!("timestamp {s}: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
