//! Read queries against the store

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, now_timestamp, EntityStore, HistoryEntry, StoreError, StoreStats, StoredEntity};
use crate::core::identity::EntityKind;

/// Column list shared by every entity table
fn select_columns(kind: EntityKind) -> String {
    let parent = kind.parent_column().unwrap_or("NULL");
    let status = match kind {
        EntityKind::RelatedDoc => "NULL",
        _ => "status",
    };
    format!(
        "key, {parent}, title, description, {status}, file_path, file_mtime, file_hash, created_at, updated_at"
    )
}

fn row_to_entity(kind: EntityKind, row: &Row<'_>) -> rusqlite::Result<StoredEntity> {
    Ok(StoredEntity {
        kind,
        key: row.get(0)?,
        parent_key: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        file_path: row.get(5)?,
        file_mtime: row.get(6)?,
        file_hash: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

impl EntityStore {
    /// Get one row by key
    pub fn get(&self, kind: EntityKind, key: &str) -> Result<Option<StoredEntity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE key = ?1",
            select_columns(kind),
            kind.table()
        );
        Ok(self
            .conn
            .query_row(&sql, params![key], |row| row_to_entity(kind, row))
            .optional()?)
    }

    /// All rows of a kind, ordered by key
    pub fn list(&self, kind: EntityKind) -> Result<Vec<StoredEntity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY key",
            select_columns(kind),
            kind.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row_to_entity(kind, row))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// History rows for a task, oldest first
    pub fn task_history(&self, task_key: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT task_key, notes, timestamp FROM task_history WHERE task_key = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![task_key], |row| {
            Ok(HistoryEntry {
                task_key: row.get(0)?,
                notes: row.get(1)?,
                timestamp: parse_datetime(&row.get::<_, String>(2)?),
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Update a task's store-only status
    pub fn set_task_status(&self, task_key: &str, status: &str) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE key = ?1",
            params![task_key, status, now_timestamp()],
        )?;
        Ok(changed > 0)
    }

    /// Row counts per kind
    pub fn statistics(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();

        for kind in EntityKind::all() {
            let count: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", kind.table()),
                [],
                |row| row.get(0),
            )?;
            stats.by_kind.insert(*kind, count as usize);
        }

        let history: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM task_history", [], |row| row.get(0))?;
        stats.history_entries = history as usize;

        stats.db_size_bytes = self
            .path()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(stats)
    }
}
