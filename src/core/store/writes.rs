//! Write operations, only reachable through a transaction

use rusqlite::{params, Transaction};

use super::{now_timestamp, StoreError};
use crate::core::entity::DiscoveredEntity;
use crate::core::identity::EntityKind;

/// The write side of the store; dropping it without `commit` rolls back
pub struct StoreTransaction<'a> {
    tx: Transaction<'a>,
}

impl<'a> StoreTransaction<'a> {
    pub(super) fn new(tx: Transaction<'a>) -> Self {
        Self { tx }
    }

    /// Insert a new row for an entity
    pub fn insert(&self, entity: &DiscoveredEntity) -> Result<(), StoreError> {
        let kind = entity.kind;
        let now = now_timestamp();
        let mtime = entity.mod_time.map(|t| t.timestamp());
        let parent = entity.parent_key.as_ref().map(|k| k.as_str());

        match kind.parent_column() {
            Some(parent_col) => {
                let sql = format!(
                    "INSERT INTO {} (key, {}, title, description, file_path, file_mtime, file_hash, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    kind.table(),
                    parent_col
                );
                self.tx.execute(
                    &sql,
                    params![
                        entity.key.as_str(),
                        parent,
                        entity.title,
                        entity.description,
                        entity.file_path,
                        mtime,
                        entity.content_hash,
                        now
                    ],
                )?;
            }
            None => {
                let sql = format!(
                    "INSERT INTO {} (key, title, description, file_path, file_mtime, file_hash, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    kind.table()
                );
                self.tx.execute(
                    &sql,
                    params![
                        entity.key.as_str(),
                        entity.title,
                        entity.description,
                        entity.file_path,
                        mtime,
                        entity.content_hash,
                        now
                    ],
                )?;
            }
        }

        Ok(())
    }

    /// Overwrite the file-backed columns of an existing row
    ///
    /// Store-only columns (status, priority, progress) are untouched.
    pub fn update(&self, entity: &DiscoveredEntity) -> Result<bool, StoreError> {
        let kind = entity.kind;
        let now = now_timestamp();
        let mtime = entity.mod_time.map(|t| t.timestamp());
        let parent = entity.parent_key.as_ref().map(|k| k.as_str());

        let changed = match kind.parent_column() {
            Some(parent_col) => {
                let sql = format!(
                    "UPDATE {} SET {} = ?2, title = ?3, description = ?4, file_path = ?5,
                            file_mtime = ?6, file_hash = ?7, updated_at = ?8
                     WHERE key = ?1",
                    kind.table(),
                    parent_col
                );
                self.tx.execute(
                    &sql,
                    params![
                        entity.key.as_str(),
                        parent,
                        entity.title,
                        entity.description,
                        entity.file_path,
                        mtime,
                        entity.content_hash,
                        now
                    ],
                )?
            }
            None => {
                let sql = format!(
                    "UPDATE {} SET title = ?2, description = ?3, file_path = ?4,
                            file_mtime = ?5, file_hash = ?6, updated_at = ?7
                     WHERE key = ?1",
                    kind.table()
                );
                self.tx.execute(
                    &sql,
                    params![
                        entity.key.as_str(),
                        entity.title,
                        entity.description,
                        entity.file_path,
                        mtime,
                        entity.content_hash,
                        now
                    ],
                )?
            }
        };

        Ok(changed > 0)
    }

    /// Delete one row
    pub fn delete(&self, kind: EntityKind, key: &str) -> Result<bool, StoreError> {
        let changed = self.tx.execute(
            &format!("DELETE FROM {} WHERE key = ?1", kind.table()),
            params![key],
        )?;
        Ok(changed > 0)
    }

    /// Number of rows (of any kind) pointing at this row as their parent
    pub fn count_children(&self, kind: EntityKind, key: &str) -> Result<usize, StoreError> {
        let mut total = 0usize;
        for child in EntityKind::all().iter().filter(|k| k.parent() == Some(kind)) {
            let Some(col) = child.parent_column() else {
                continue;
            };
            let count: i64 = self.tx.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", child.table(), col),
                params![key],
                |row| row.get(0),
            )?;
            total += count as usize;
        }
        Ok(total)
    }

    /// Append a task history row
    pub fn record_history(&self, task_key: &str, notes: &str) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO task_history (task_key, notes, timestamp) VALUES (?1, ?2, ?3)",
            params![task_key, notes, now_timestamp()],
        )?;
        Ok(())
    }

    /// Commit every write made through this transaction
    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }
}
