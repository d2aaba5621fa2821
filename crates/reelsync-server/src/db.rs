//! SQLite persistence for timeline documents and their operation history.
//!
//! One row per document holds the canonical snapshot and version; the
//! operations table is append-only and keyed by `(document, version, seq)`.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use reelsync_types::{
    ActorId, DocumentKey, DocumentState, Operation, OperationHistoryItem, TimelineSnapshot, Version,
};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Database handle for the operation log.
pub struct OpLogDb {
    conn: Connection,
}

const SCHEMA: &str = r#"
-- Canonical state per document
CREATE TABLE IF NOT EXISTS documents (
    project TEXT NOT NULL,
    sequence TEXT NOT NULL,
    version INTEGER NOT NULL,
    timeline_json TEXT NOT NULL,
    created_at INTEGER DEFAULT (unixepoch()),
    updated_at INTEGER DEFAULT (unixepoch()),
    PRIMARY KEY (project, sequence)
);

-- Applied operations (append-only, immutable)
CREATE TABLE IF NOT EXISTS operations (
    id INTEGER PRIMARY KEY,
    project TEXT NOT NULL,
    sequence TEXT NOT NULL,
    version INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    author TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    op_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_operations_doc ON operations(project, sequence, version, seq);
"#;

impl OpLogDb {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub fn create_document(
        &self,
        key: &DocumentKey,
        version: Version,
        timeline: &TimelineSnapshot,
    ) -> DbResult<()> {
        let json = serde_json::to_string(timeline)?;
        self.conn.execute(
            "INSERT INTO documents (project, sequence, version, timeline_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![key.project, key.sequence, version as i64, json],
        )?;
        Ok(())
    }

    pub fn load_document(&self, key: &DocumentKey) -> DbResult<Option<DocumentState>> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT version, timeline_json FROM documents WHERE project = ?1 AND sequence = ?2",
                params![key.project, key.sequence],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((version, json)) => Ok(Some(DocumentState {
                version: version as Version,
                timeline_data: serde_json::from_str(&json)?,
            })),
            None => Ok(None),
        }
    }

    pub fn list_documents(&self) -> DbResult<Vec<DocumentKey>> {
        let mut stmt = self
            .conn
            .prepare("SELECT project, sequence FROM documents ORDER BY project, sequence")?;
        let rows = stmt.query_map([], |row| {
            Ok(DocumentKey {
                project: row.get(0)?,
                sequence: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // =========================================================================
    // Operation log
    // =========================================================================

    /// Record an accepted batch and the resulting snapshot in one transaction.
    pub fn append_batch(
        &mut self,
        key: &DocumentKey,
        version: Version,
        author: &ActorId,
        timestamp_ms: u64,
        operations: &[Operation],
        timeline: &TimelineSnapshot,
    ) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        for (seq, op) in operations.iter().enumerate() {
            tx.execute(
                "INSERT INTO operations (project, sequence, version, seq, author, timestamp_ms, op_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    key.project,
                    key.sequence,
                    version as i64,
                    seq as i64,
                    author.as_str(),
                    timestamp_ms as i64,
                    serde_json::to_string(op)?,
                ],
            )?;
        }
        tx.execute(
            "UPDATE documents SET version = ?3, timeline_json = ?4, updated_at = unixepoch()
             WHERE project = ?1 AND sequence = ?2",
            params![
                key.project,
                key.sequence,
                version as i64,
                serde_json::to_string(timeline)?
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Operations applied after `since`, in application order.
    pub fn operations_since(
        &self,
        key: &DocumentKey,
        since: Version,
    ) -> DbResult<Vec<OperationHistoryItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT version, author, timestamp_ms, op_json FROM operations
             WHERE project = ?1 AND sequence = ?2 AND version > ?3
             ORDER BY version, seq",
        )?;
        let rows = stmt.query_map(params![key.project, key.sequence, since as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (version, author, timestamp_ms, json) = row?;
            items.push(OperationHistoryItem {
                version: version as Version,
                author: ActorId::from(author),
                timestamp_ms: timestamp_ms as u64,
                operation: serde_json::from_str(&json)?,
            });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsync_types::{Clip, ClipId, Layer};

    fn key() -> DocumentKey {
        DocumentKey::new("proj", "seq-1")
    }

    #[test]
    fn test_document_roundtrip() {
        let db = OpLogDb::in_memory().unwrap();
        let timeline = TimelineSnapshot::new()
            .with_layer(Layer::new("L1").with_clip(Clip::new("C1", 0, 100)))
            .with_duration(100);

        db.create_document(&key(), 0, &timeline).unwrap();
        let loaded = db.load_document(&key()).unwrap().unwrap();
        assert_eq!(loaded.version, 0);
        assert_eq!(loaded.timeline_data, timeline);

        assert!(db.load_document(&DocumentKey::new("proj", "other")).unwrap().is_none());
        assert_eq!(db.list_documents().unwrap(), vec![key()]);
    }

    #[test]
    fn test_duplicate_document_fails() {
        let db = OpLogDb::in_memory().unwrap();
        db.create_document(&key(), 0, &TimelineSnapshot::new()).unwrap();
        assert!(db.create_document(&key(), 0, &TimelineSnapshot::new()).is_err());
    }

    #[test]
    fn test_append_and_query_batches() {
        let mut db = OpLogDb::in_memory().unwrap();
        db.create_document(&key(), 0, &TimelineSnapshot::new()).unwrap();

        let alice = ActorId::from("alice");
        let first = vec![
            Operation::ClipRemove { clip_id: ClipId::from("a") },
            Operation::ClipRemove { clip_id: ClipId::from("b") },
        ];
        let second = vec![Operation::ClipRemove { clip_id: ClipId::from("c") }];
        let end = TimelineSnapshot::new().with_duration(7);
        db.append_batch(&key(), 1, &alice, 10, &first, &TimelineSnapshot::new()).unwrap();
        db.append_batch(&key(), 2, &alice, 20, &second, &end).unwrap();

        let all = db.operations_since(&key(), 0).unwrap();
        let targets: Vec<_> = all.iter().map(|i| (i.version, i.operation.target())).collect();
        assert_eq!(targets, vec![(1, Some("a")), (1, Some("b")), (2, Some("c"))]);
        assert_eq!(all[2].timestamp_ms, 20);
        assert_eq!(all[0].author, alice);

        assert_eq!(db.operations_since(&key(), 1).unwrap().len(), 1);
        assert!(db.operations_since(&key(), 2).unwrap().is_empty());

        let state = db.load_document(&key()).unwrap().unwrap();
        assert_eq!(state.version, 2);
        assert_eq!(state.timeline_data, end);
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog.db");
        {
            let db = OpLogDb::open(&path).unwrap();
            db.create_document(&key(), 0, &TimelineSnapshot::new().with_duration(5)).unwrap();
        }
        let db = OpLogDb::open(&path).unwrap();
        let state = db.load_document(&key()).unwrap().unwrap();
        assert_eq!(state.timeline_data.duration_ms, 5);
    }
}
