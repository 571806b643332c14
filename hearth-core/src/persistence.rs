//! SQLite audit store.
//!
//! Prompts, responses and exit snapshots are appended as rows; character
//! checkpoints are upserted per character as MessagePack blobs.
//!
//! ```sql
//! CREATE TABLE prompts     (id TEXT PRIMARY KEY, character TEXT, state TEXT, kind TEXT, body TEXT, created_at TEXT);
//! CREATE TABLE responses   (id TEXT PRIMARY KEY, character TEXT, state TEXT, body TEXT, created_at TEXT);
//! CREATE TABLE snapshots   (id TEXT PRIMARY KEY, character TEXT, state TEXT, body TEXT, created_at TEXT);
//! CREATE TABLE checkpoints (character TEXT PRIMARY KEY, tick INTEGER, data BLOB, updated_at TEXT);
//! ```
//!
//! WAL mode keeps reads cheap while the simulation writes.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::character::CharacterCheckpoint;
use crate::error::{EngineError, Result};
use crate::services::{AuditEntry, AuditSink};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS prompts (
    id         TEXT PRIMARY KEY,
    character  TEXT NOT NULL,
    state      TEXT NOT NULL,
    kind       TEXT NOT NULL,
    body       TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS responses (
    id         TEXT PRIMARY KEY,
    character  TEXT NOT NULL,
    state      TEXT NOT NULL,
    body       TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS snapshots (
    id         TEXT PRIMARY KEY,
    character  TEXT NOT NULL,
    state      TEXT NOT NULL,
    body       TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS checkpoints (
    character  TEXT PRIMARY KEY,
    tick       INTEGER NOT NULL,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL
);";

/// The audit tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTable {
    /// Rendered prompts.
    Prompts,
    /// Raw responses.
    Responses,
    /// Exit snapshots.
    Snapshots,
    /// Character checkpoints.
    Checkpoints,
}

impl AuditTable {
    fn name(self) -> &'static str {
        match self {
            Self::Prompts => "prompts",
            Self::Responses => "responses",
            Self::Snapshots => "snapshots",
            Self::Checkpoints => "checkpoints",
        }
    }
}

/// SQLite-backed [`AuditSink`].
pub struct SqliteAudit {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteAudit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAudit")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteAudit {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, wal_mode: bool) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;
        if wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = wal_mode, "audit store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Open an in-memory store (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Database`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file (or `:memory:`).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Number of rows in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Database`] on SQLite failures.
    pub fn count(&self, table: AuditTable) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = self.conn.lock().query_row(&sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Bodies of the prompts recorded for `character`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Database`] on SQLite failures.
    pub fn prompts_for(&self, character: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT kind, body FROM prompts WHERE character = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![character], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(EngineError::from)
    }

    /// The latest checkpoint for `character`, with its tick.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Serialization`] if the blob does not decode,
    /// or [`EngineError::Database`] on SQLite failures.
    pub fn load_checkpoint(&self, character: &str) -> Result<Option<(u64, CharacterCheckpoint)>> {
        let row: Option<(i64, Vec<u8>)> = self
            .conn
            .lock()
            .query_row(
                "SELECT tick, data FROM checkpoints WHERE character = ?1",
                params![character],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((tick, data)) = row else {
            return Ok(None);
        };
        let checkpoint =
            rmp_serde::from_slice(&data).map_err(|e| EngineError::Serialization(e.to_string()))?;
        Ok(Some((u64::try_from(tick).unwrap_or(0), checkpoint)))
    }

    fn insert(&self, table: AuditTable, character: &str, state: &str, kind: Option<&str>, body: &str) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        match kind {
            Some(kind) => conn.execute(
                "INSERT INTO prompts (id, character, state, kind, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, character, state, kind, body, now],
            )?,
            None => conn.execute(
                &format!(
                    "INSERT INTO {} (id, character, state, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    table.name()
                ),
                params![id, character, state, body, now],
            )?,
        };
        Ok(())
    }
}

impl AuditSink for SqliteAudit {
    fn record(&self, entry: AuditEntry) -> Result<()> {
        let start = Instant::now();
        match &entry {
            AuditEntry::Prompt { character, state, kind, text } => {
                self.insert(AuditTable::Prompts, character, state.as_str(), Some(kind), text)?;
            }
            AuditEntry::Response { character, state, text } => {
                self.insert(AuditTable::Responses, character, state.as_str(), None, text)?;
            }
            AuditEntry::Snapshot { character, state, attributes } => {
                self.insert(
                    AuditTable::Snapshots,
                    character,
                    state.as_str(),
                    None,
                    &attributes.to_string(),
                )?;
            }
        }
        debug!(elapsed_us = start.elapsed().as_micros(), "audit row written");
        Ok(())
    }

    fn checkpoint(&self, character: &str, tick: u64, data: &[u8]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tick = i64::try_from(tick).unwrap_or(i64::MAX);
        self.conn.lock().execute(
            "INSERT INTO checkpoints (character, tick, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(character) DO UPDATE SET
                tick = excluded.tick,
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![character, tick, data, now],
        )?;
        debug!(character, tick, bytes = data.len(), "checkpoint saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::Character;
    use crate::types::StateTag;
    use serde_json::json;

    #[test]
    fn rows_land_in_their_tables() {
        let audit = SqliteAudit::open_in_memory().expect("open");
        audit
            .record(AuditEntry::Prompt {
                character: "Mira".into(),
                state: StateTag::Plan,
                kind: "plan".into(),
                text: "make a plan".into(),
            })
            .expect("prompt");
        audit
            .record(AuditEntry::Response {
                character: "Mira".into(),
                state: StateTag::Plan,
                text: "{}".into(),
            })
            .expect("response");
        audit
            .record(AuditEntry::Snapshot {
                character: "Mira".into(),
                state: StateTag::Plan,
                attributes: json!({"money": 3}),
            })
            .expect("snapshot");
        assert_eq!(audit.count(AuditTable::Prompts).expect("count"), 1);
        assert_eq!(audit.count(AuditTable::Responses).expect("count"), 1);
        assert_eq!(audit.count(AuditTable::Snapshots).expect("count"), 1);
        let prompts = audit.prompts_for("Mira").expect("query");
        assert_eq!(prompts, vec![("plan".to_string(), "make a plan".to_string())]);
    }

    #[test]
    fn checkpoint_upserts_per_character() {
        let audit = SqliteAudit::open_in_memory().expect("open");
        let mut ch = Character::new("Tom", "3").with_money(1);
        let first = rmp_serde::to_vec(&ch.checkpoint(None)).expect("encode");
        audit.checkpoint("Tom", 10, &first).expect("save");
        ch.money = 9;
        let second = rmp_serde::to_vec(&ch.checkpoint(Some(StateTag::Work))).expect("encode");
        audit.checkpoint("Tom", 20, &second).expect("save");

        assert_eq!(audit.count(AuditTable::Checkpoints).expect("count"), 1);
        let (tick, loaded) = audit.load_checkpoint("Tom").expect("load").expect("present");
        assert_eq!(tick, 20);
        assert_eq!(loaded.money, 9);
        assert_eq!(loaded.state, Some(StateTag::Work));
        assert!(audit.load_checkpoint("Nobody").expect("load").is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.db");
        {
            let audit = SqliteAudit::open(&path, true).expect("open");
            audit
                .record(AuditEntry::Response {
                    character: "Ann".into(),
                    state: StateTag::Sum,
                    text: "ok".into(),
                })
                .expect("write");
        }
        let reopened = SqliteAudit::open(&path, true).expect("reopen");
        assert_eq!(reopened.count(AuditTable::Responses).expect("count"), 1);
    }
}
