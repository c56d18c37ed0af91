//! Database schema initialization

use rusqlite::{params, OptionalExtension};

use super::{EntityStore, StoreError, SCHEMA_VERSION};

impl EntityStore {
    /// Initialize database schema
    pub(super) fn init_schema(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS epics (
                key TEXT PRIMARY KEY CHECK (key GLOB 'E[0-9][0-9]'),
                title TEXT NOT NULL CHECK (length(title) > 0),
                description TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                priority TEXT NOT NULL DEFAULT 'medium'
                    CHECK (priority IN ('high', 'medium', 'low')),
                file_path TEXT,
                file_mtime INTEGER,
                file_hash TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_epics_file_path ON epics(file_path);

            CREATE TABLE IF NOT EXISTS features (
                key TEXT PRIMARY KEY CHECK (key GLOB 'E[0-9][0-9]-F[0-9][0-9]'),
                epic_key TEXT NOT NULL
                    REFERENCES epics(key) DEFERRABLE INITIALLY DEFERRED,
                title TEXT NOT NULL CHECK (length(title) > 0),
                description TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                progress_pct REAL NOT NULL DEFAULT 0
                    CHECK (progress_pct BETWEEN 0 AND 100),
                file_path TEXT,
                file_mtime INTEGER,
                file_hash TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_features_epic ON features(epic_key);
            CREATE INDEX IF NOT EXISTS idx_features_file_path ON features(file_path);

            CREATE TABLE IF NOT EXISTS tasks (
                key TEXT PRIMARY KEY
                    CHECK (key GLOB 'T-E[0-9][0-9]-F[0-9][0-9]-[0-9][0-9][0-9]'),
                feature_key TEXT NOT NULL
                    REFERENCES features(key) DEFERRABLE INITIALLY DEFERRED,
                title TEXT NOT NULL CHECK (length(title) > 0),
                description TEXT,
                status TEXT NOT NULL DEFAULT 'todo',
                priority INTEGER NOT NULL DEFAULT 5
                    CHECK (priority BETWEEN 1 AND 10),
                file_path TEXT,
                file_mtime INTEGER,
                file_hash TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_feature ON tasks(feature_key);
            CREATE INDEX IF NOT EXISTS idx_tasks_file_path ON tasks(file_path);

            CREATE TABLE IF NOT EXISTS related_docs (
                key TEXT PRIMARY KEY,
                feature_key TEXT NOT NULL
                    REFERENCES features(key) DEFERRABLE INITIALLY DEFERRED,
                title TEXT NOT NULL CHECK (length(title) > 0),
                description TEXT,
                file_path TEXT,
                file_mtime INTEGER,
                file_hash TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_related_docs_feature ON related_docs(feature_key);

            CREATE TABLE IF NOT EXISTS task_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_key TEXT NOT NULL
                    REFERENCES tasks(key) ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED,
                notes TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_history_task ON task_history(task_key);
            "#,
        )?;

        let existing: Option<i32> = self
            .conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(StoreError::IncompatibleSchema {
                    found: v,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
        }

        Ok(())
    }
}
