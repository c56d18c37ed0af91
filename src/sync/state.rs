//! Persisted sync state (the time of the last successful sync)

use std::cell::Cell;
use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::project::Project;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Captured when the last successful run started scanning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("Cannot access sync state at {path}: {source}")]
    #[diagnostic(code(plansync::state::io))]
    Io { path: PathBuf, source: io::Error },

    #[error("Sync state at {path} is corrupt: {message}")]
    #[diagnostic(
        code(plansync::state::corrupt),
        help("Delete the file to force a full scan on the next sync")
    )]
    Corrupt { path: PathBuf, message: String },
}

/// Where the last sync time is read from and written to
pub trait SyncStateStore {
    fn load(&self) -> Result<SyncState, StateError>;
    fn save(&self, state: &SyncState) -> Result<(), StateError>;
}

/// YAML file under `.plansync/`
#[derive(Debug, Clone)]
pub struct FileSyncState {
    path: PathBuf,
}

impl FileSyncState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_project(project: &Project) -> Self {
        Self::new(project.state_path())
    }
}

impl SyncStateStore for FileSyncState {
    fn load(&self) -> Result<SyncState, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SyncState::default()),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(SyncState::default());
        }
        serde_yml::from_str(&content).map_err(|e| StateError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn save(&self, state: &SyncState) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };
        let yaml = serde_yml::to_string(state).map_err(|e| StateError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, yaml).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

/// In-memory state for tests and one-off runs
#[derive(Debug, Default)]
pub struct MemorySyncState {
    state: Cell<SyncState>,
}

impl MemorySyncState {
    pub fn new(last_sync: Option<DateTime<Utc>>) -> Self {
        Self {
            state: Cell::new(SyncState { last_sync }),
        }
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.state.get().last_sync
    }
}

impl SyncStateStore for MemorySyncState {
    fn load(&self) -> Result<SyncState, StateError> {
        Ok(self.state.get())
    }

    fn save(&self, state: &SyncState) -> Result<(), StateError> {
        self.state.set(*state);
        Ok(())
    }
}
