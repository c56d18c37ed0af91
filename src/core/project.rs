//! Project discovery and structure

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::config::DEFAULT_DOCS_ROOT;

/// Name of the marker directory at the project root
pub const PROJECT_DIR: &str = ".plansync";

/// Represents a plansync project
#[derive(Debug, Clone)]
pub struct Project {
    /// Root directory of the project (parent of .plansync/)
    root: PathBuf,
}

impl Project {
    /// Find project root by walking up from the current directory
    pub fn discover() -> Result<Self, ProjectError> {
        let current =
            std::env::current_dir().map_err(|e| ProjectError::IoError(e.to_string()))?;
        Self::discover_from(&current)
    }

    /// Find project root by walking up from the given directory
    pub fn discover_from(start: &Path) -> Result<Self, ProjectError> {
        let mut current = start
            .canonicalize()
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        loop {
            if current.join(PROJECT_DIR).is_dir() {
                return Ok(Self { root: current });
            }

            if !current.pop() {
                return Err(ProjectError::NotFound {
                    searched_from: start.to_path_buf(),
                });
            }
        }
    }

    /// Create a new project structure at the given path
    pub fn init(path: &Path) -> Result<Self, ProjectError> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if root.join(PROJECT_DIR).exists() {
            return Err(ProjectError::AlreadyExists(root));
        }

        Self::create_structure(&root)?;
        Ok(Self { root })
    }

    /// Force initialization even if .plansync/ exists
    ///
    /// The config file is rewritten; the store and sync state are left alone.
    pub fn init_force(path: &Path) -> Result<Self, ProjectError> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Self::create_structure(&root)?;
        Ok(Self { root })
    }

    fn create_structure(root: &Path) -> Result<(), ProjectError> {
        let dir = root.join(PROJECT_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| ProjectError::IoError(e.to_string()))?;

        std::fs::write(dir.join("config.yaml"), Self::default_config())
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        // The store and the state file are machine-local
        std::fs::write(dir.join(".gitignore"), "plansync.db*\nstate.yaml\n")
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        std::fs::create_dir_all(root.join(DEFAULT_DOCS_ROOT))
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        Ok(())
    }

    fn default_config() -> &'static str {
        r#"# Plansync Project Configuration

# Directory holding epic folders (relative to the project root)
# docs_root: docs/plan

# Default strategy when files and the store disagree
# (file-wins, database-wins, newer-wins)
# strategy: file-wins

# Default strategy when epic-index.md and the folders disagree
# (index-precedence, folder-precedence, merge)
# index_strategy: merge

# strict, balanced or permissive
# validation_level: balanced

# Pattern overrides, by name (epic, feature, task, related_doc)
# patterns:
#   - name: related_doc
#     enabled: false
"#
    }

    /// Get the project root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the .plansync directory
    pub fn project_dir(&self) -> PathBuf {
        self.root.join(PROJECT_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.project_dir().join("config.yaml")
    }

    /// Location of the SQLite store
    pub fn store_path(&self) -> PathBuf {
        self.project_dir().join("plansync.db")
    }

    /// Location of the persisted sync state
    pub fn state_path(&self) -> PathBuf {
        self.project_dir().join("state.yaml")
    }

    /// Convert an absolute path inside the project into a `/` separated relative path
    pub fn relative_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Errors that can occur during project operations
#[derive(Debug, Error, Diagnostic)]
pub enum ProjectError {
    #[error("not a plansync project (searched from {searched_from:?}). Run 'plansync init' to create one.")]
    #[diagnostic(code(plansync::project::not_found))]
    NotFound { searched_from: PathBuf },

    #[error("plansync project already exists at {0:?}")]
    #[diagnostic(code(plansync::project::exists))]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    #[diagnostic(code(plansync::project::io))]
    IoError(String),
}
