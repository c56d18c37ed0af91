//! SQLite-backed work-item store
//!
//! The store holds one table per entity kind plus task history. All
//! synchronization writes go through a [`StoreTransaction`]; foreign keys
//! are deferred so a batch may insert children before their parents and
//! is only checked at commit.

mod queries;
mod schema;
mod types;
mod writes;

pub use types::*;
pub use writes::StoreTransaction;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use miette::Diagnostic;
use rusqlite::{Connection, ErrorCode};
use thiserror::Error;

use crate::core::project::Project;

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// The work-item store backed by SQLite
pub struct EntityStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl EntityStore {
    /// Open or create the store for a project
    pub fn open(project: &Project) -> Result<Self, StoreError> {
        Self::open_at(&project.store_path())
    }

    /// Open or create a store file at an explicit path
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let conn = Connection::open(path)?;

        // WAL lets readers run while a sync holds the write lock
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let mut store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.configure()?;
        Ok(store)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn, path: None };
        store.configure()?;
        Ok(store)
    }

    fn configure(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        self.init_schema()
    }

    /// Location of the store file (None when in memory)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Begin the single write transaction of a sync run
    pub fn transaction(&mut self) -> Result<StoreTransaction<'_>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        Ok(StoreTransaction::new(tx))
    }
}

/// Errors raised by the store
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("store is busy or locked: {0}")]
    #[diagnostic(
        code(plansync::store::busy),
        help("another plansync process is writing to the store; retry once it finishes")
    )]
    Busy(String),

    #[error("store error: {0}")]
    #[diagnostic(code(plansync::store::sqlite))]
    Sqlite(rusqlite::Error),

    #[error("store schema version {found} is newer than this build supports ({supported})")]
    #[diagnostic(code(plansync::store::schema), help("upgrade plansync"))]
    IncompatibleSchema { found: i32, supported: i32 },

    #[error("store IO error: {0}")]
    #[diagnostic(code(plansync::store::io))]
    Io(String),
}

impl StoreError {
    /// Whether running the same operation again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::Busy(err.to_string())
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

/// Current time in the store's timestamp format
fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Parse datetime string to DateTime<Utc>
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap_or_default())
}
