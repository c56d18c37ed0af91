//! Configuration management with layered hierarchy

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::core::patterns::{PatternError, PatternOverride, PatternRegistry};
use crate::core::Project;

/// Default location of the plan documents, relative to the project root
pub const DEFAULT_DOCS_ROOT: &str = "docs/plan";

/// How strictly record files are held to the naming and metadata conventions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// Warnings are treated as failures
    Strict,
    #[default]
    Balanced,
    /// A record without a key in its frontmatter falls back to the key in its path
    Permissive,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Strict => "strict",
            ValidationLevel::Balanced => "balanced",
            ValidationLevel::Permissive => "permissive",
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ValidationLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(ValidationLevel::Strict),
            "balanced" => Ok(ValidationLevel::Balanced),
            "permissive" => Ok(ValidationLevel::Permissive),
            _ => Err(ConfigError::InvalidValue {
                field: "validation_level",
                value: s.to_string(),
            }),
        }
    }
}

/// Plansync configuration with layered hierarchy
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding epic folders, relative to the project root
    pub docs_root: Option<PathBuf>,

    /// Default file-vs-store resolution strategy
    pub strategy: Option<String>,

    /// Default index-vs-folder resolution strategy
    pub index_strategy: Option<String>,

    /// Validation level for record files
    pub validation_level: Option<ValidationLevel>,

    /// Pattern overrides, matched to the built-in patterns by name
    pub patterns: Vec<PatternOverride>,
}

impl Config {
    /// Load configuration from all sources, merging in priority order
    pub fn load(project: &Project) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Built-in defaults (already in Default impl)

        // 2. Global user config (~/.config/plansync/config.yaml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                config.merge(Self::read_file(&global_path)?);
            }
        }

        // 3. Project config (.plansync/config.yaml)
        let project_config_path = project.config_path();
        if project_config_path.exists() {
            config.merge(Self::read_file(&project_config_path)?);
        }

        // 4. Environment variables
        if let Ok(root) = std::env::var("PLANSYNC_DOCS_ROOT") {
            config.docs_root = Some(PathBuf::from(root));
        }
        if let Ok(strategy) = std::env::var("PLANSYNC_STRATEGY") {
            config.strategy = Some(strategy);
        }
        if let Ok(level) = std::env::var("PLANSYNC_VALIDATION_LEVEL") {
            config.validation_level = Some(level.parse()?);
        }

        Ok(config)
    }

    /// Parse a single config file
    pub fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        // An all-comment file deserializes to null
        if contents.lines().all(|l| {
            let l = l.trim();
            l.is_empty() || l.starts_with('#')
        }) {
            return Ok(Config::default());
        }

        serde_yml::from_str::<Config>(&contents).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Get the path to the global config file
    fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "plansync")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Merge another config into this one (other takes precedence)
    fn merge(&mut self, other: Config) {
        if other.docs_root.is_some() {
            self.docs_root = other.docs_root;
        }
        if other.strategy.is_some() {
            self.strategy = other.strategy;
        }
        if other.index_strategy.is_some() {
            self.index_strategy = other.index_strategy;
        }
        if other.validation_level.is_some() {
            self.validation_level = other.validation_level;
        }
        for ov in other.patterns {
            match self.patterns.iter_mut().find(|p| p.name == ov.name) {
                Some(existing) => *existing = ov,
                None => self.patterns.push(ov),
            }
        }
    }

    /// Docs root relative to the project root
    pub fn docs_root(&self) -> PathBuf {
        self.docs_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCS_ROOT))
    }

    pub fn strategy(&self) -> &str {
        self.strategy.as_deref().unwrap_or("file-wins")
    }

    pub fn index_strategy(&self) -> &str {
        self.index_strategy.as_deref().unwrap_or("merge")
    }

    pub fn validation_level(&self) -> ValidationLevel {
        self.validation_level.unwrap_or_default()
    }

    /// Build the pattern registry described by this config
    pub fn pattern_registry(&self) -> Result<PatternRegistry, ConfigError> {
        Ok(PatternRegistry::with_overrides(&self.patterns)?)
    }
}

/// Errors that can occur while loading configuration
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot read config file {path:?}: {message}")]
    #[diagnostic(code(plansync::config::unreadable))]
    Unreadable { path: PathBuf, message: String },

    #[error("invalid config file {path:?}: {message}")]
    #[diagnostic(code(plansync::config::invalid))]
    Invalid { path: PathBuf, message: String },

    #[error("invalid value '{value}' for {field}")]
    #[diagnostic(code(plansync::config::value))]
    InvalidValue { field: &'static str, value: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Pattern(#[from] PatternError),
}
