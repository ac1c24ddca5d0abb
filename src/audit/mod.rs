//! SQLite-backed audit log of gate decisions.
//!
//! Every gate evaluation the gateway performs is written to the `gate_events`
//! table: which request, which agent, which stage, what the gate decided and
//! why. The database is accessed through an [`r2d2`] connection pool
//! ([`DbPool`]) so concurrent invocations can write without coordination.
//!
//! [`AuditSink`] pairs the pool with a `tokio::sync::broadcast` channel so
//! live subscribers (the SSE endpoint) see every entry as it is written.
//! The [`export`] submodule provides JSON and CSV export.

pub mod export;

use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{HailstormError, Result};

/// Audit database pool.
pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

/// Pool of up to 4 connections to the audit database at `path`, creating
/// the `gate_events` table if needed.
pub fn open_pool(path: &std::path::Path) -> Result<DbPool> {
    let manager = r2d2_sqlite::SqliteConnectionManager::file(path);
    build_pool(manager, 4)
}

/// In-memory pool with a single connection, since every in-memory
/// connection is a separate database.
pub fn open_memory_pool() -> Result<DbPool> {
    build_pool(r2d2_sqlite::SqliteConnectionManager::memory(), 1)
}

fn build_pool(manager: r2d2_sqlite::SqliteConnectionManager, max_size: u32) -> Result<DbPool> {
    let pool = r2d2::Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| HailstormError::Pool(e.to_string()))?;
    let conn = pool.get().map_err(|e| HailstormError::Pool(e.to_string()))?;
    init_db(&conn)?;
    Ok(pool)
}

/// A single audited gate decision stored in the `gate_events` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Auto-incremented row ID (`None` before insert).
    pub id: Option<i64>,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub request_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub role: Option<String>,
    /// `"input"`, `"output"` or `"executor"`.
    pub stage: String,
    /// Check that decided; empty when the gate allowed.
    pub check_name: String,
    /// `"allow"`, `"rewrite"`, `"deny"` or `"error"`.
    pub action: String,
    pub reason: String,
}

/// Initialize the SQLite database and create the `gate_events` table if it doesn't exist.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS gate_events (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp  TEXT NOT NULL,
            request_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            agent_id   TEXT NOT NULL,
            role       TEXT,
            stage      TEXT NOT NULL,
            check_name TEXT NOT NULL,
            action     TEXT NOT NULL,
            reason     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_gate_events_timestamp ON gate_events(timestamp);
        CREATE INDEX IF NOT EXISTS idx_gate_events_agent ON gate_events(agent_id);",
    )?;
    Ok(())
}

/// Insert an entry and return its row ID.
pub fn record(conn: &Connection, entry: &AuditEntry) -> Result<i64> {
    conn.execute(
        "INSERT INTO gate_events
            (timestamp, request_id, session_id, agent_id, role, stage, check_name, action, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            entry.timestamp,
            entry.request_id,
            entry.session_id,
            entry.agent_id,
            entry.role,
            entry.stage,
            entry.check_name,
            entry.action,
            entry.reason,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Query the most recent N entries, newest first.
pub fn query_recent(conn: &Connection, limit: usize) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, request_id, session_id, agent_id, role, stage, check_name, action, reason
         FROM gate_events ORDER BY id DESC LIMIT ?1",
    )?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(rusqlite::params![limit], |row| {
        Ok(AuditEntry {
            id: Some(row.get(0)?),
            timestamp: row.get(1)?,
            request_id: row.get(2)?,
            session_id: row.get(3)?,
            agent_id: row.get(4)?,
            role: row.get(5)?,
            stage: row.get(6)?,
            check_name: row.get(7)?,
            action: row.get(8)?,
            reason: row.get(9)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

/// Aggregated counts from the `gate_events` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub allowed: usize,
    pub denied: usize,
    /// Allowed after a check rewrote the text (privacy masking).
    pub rewritten: usize,
    /// Executor failures.
    pub errors: usize,
}

/// Query aggregated counts grouped by action.
pub fn query_stats(conn: &Connection) -> Result<AuditStats> {
    let mut stmt = conn.prepare("SELECT action, COUNT(*) FROM gate_events GROUP BY action")?;
    let rows = stmt.query_map([], |row| {
        let action: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        Ok((action, count as usize))
    })?;

    let mut stats = AuditStats::default();
    for row in rows {
        let (action, count) = row?;
        stats.total += count;
        match action.as_str() {
            "allow" => stats.allowed = count,
            "deny" => stats.denied = count,
            "rewrite" => stats.rewritten = count,
            "error" => stats.errors = count,
            _ => {} // unknown actions still count in total
        }
    }
    Ok(stats)
}

/// Single connection to the audit database at `path`.
pub fn open_db(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    init_db(&conn)?;
    Ok(conn)
}

/// Single in-memory connection with the schema applied.
pub fn open_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_db(&conn)?;
    Ok(conn)
}

/// Writes entries to the pool and publishes them to live subscribers.
#[derive(Clone)]
pub struct AuditSink {
    pool: DbPool,
    events: broadcast::Sender<AuditEntry>,
}

impl AuditSink {
    pub fn new(pool: DbPool, events: broadcast::Sender<AuditEntry>) -> Self {
        Self { pool, events }
    }

    /// A sink with its own channel (capacity 256).
    pub fn with_pool(pool: DbPool) -> Self {
        let (events, _) = broadcast::channel(256);
        Self::new(pool, events)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.events.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<AuditEntry> {
        self.events.clone()
    }

    /// Persist `entry`, then broadcast it with its assigned ID.
    pub fn record(&self, mut entry: AuditEntry) -> Result<i64> {
        let conn = self
            .pool
            .get()
            .map_err(|e| HailstormError::Pool(e.to_string()))?;
        let id = record(&conn, &entry)?;
        entry.id = Some(id);
        // No receivers is not an error.
        let _ = self.events.send(entry);
        Ok(id)
    }

    /// Like [`record`](Self::record), but failures only produce a warning.
    pub fn record_or_warn(&self, entry: AuditEntry) {
        if let Err(e) = self.record(entry) {
            warn!("Failed to write audit entry: {}", e);
        }
    }
}
