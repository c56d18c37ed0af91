//! Work-item kinds and key validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The kinds of records kept in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Top-level work item (`E01`)
    Epic,
    /// Feature inside an epic (`E01-F02`)
    Feature,
    /// Task inside a feature (`T-E01-F02-003`)
    Task,
    /// Any other markdown document kept in a feature folder
    RelatedDoc,
}

impl EntityKind {
    /// Get the string representation of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Epic => "epic",
            EntityKind::Feature => "feature",
            EntityKind::Task => "task",
            EntityKind::RelatedDoc => "related_doc",
        }
    }

    /// All kinds, parents before children
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Epic,
            EntityKind::Feature,
            EntityKind::Task,
            EntityKind::RelatedDoc,
        ]
    }

    /// The kind a record of this kind must hang under
    pub fn parent(&self) -> Option<EntityKind> {
        match self {
            EntityKind::Epic => None,
            EntityKind::Feature => Some(EntityKind::Epic),
            EntityKind::Task | EntityKind::RelatedDoc => Some(EntityKind::Feature),
        }
    }

    /// Store table holding this kind
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Epic => "epics",
            EntityKind::Feature => "features",
            EntityKind::Task => "tasks",
            EntityKind::RelatedDoc => "related_docs",
        }
    }

    /// Column referencing the parent row, if any
    pub fn parent_column(&self) -> Option<&'static str> {
        match self {
            EntityKind::Epic => None,
            EntityKind::Feature => Some("epic_key"),
            EntityKind::Task | EntityKind::RelatedDoc => Some("feature_key"),
        }
    }

    /// Human-readable shape of a valid key
    pub fn key_format(&self) -> &'static str {
        match self {
            EntityKind::Epic => "E##",
            EntityKind::Feature => "E##-F##",
            EntityKind::Task => "T-E##-F##-###",
            EntityKind::RelatedDoc => "a relative path ending in .md",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "epic" => Ok(EntityKind::Epic),
            "feature" => Ok(EntityKind::Feature),
            "task" => Ok(EntityKind::Task),
            "related_doc" | "related-doc" => Ok(EntityKind::RelatedDoc),
            _ => Err(KeyError::UnknownKind(s.to_string())),
        }
    }
}

/// A validated, immutable record key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Validate `raw` as a key of the given kind
    pub fn parse(kind: EntityKind, raw: &str) -> Result<Self, KeyError> {
        let raw = raw.trim();
        let valid = match kind {
            EntityKind::Epic => is_epic_key(raw),
            EntityKind::Feature => is_feature_key(raw),
            EntityKind::Task => is_task_key(raw),
            EntityKind::RelatedDoc => is_doc_path(raw),
        };

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(KeyError::InvalidFormat {
                kind,
                key: raw.to_string(),
                expected: kind.key_format(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent key encoded in the key itself (tasks and features only)
    pub fn derived_parent(&self, kind: EntityKind) -> Option<EntityKey> {
        match kind {
            EntityKind::Task => Some(Self(self.0[2..9].to_string())),
            EntityKind::Feature => Some(Self(self.0[..3].to_string())),
            EntityKind::Epic | EntityKind::RelatedDoc => None,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_epic_key(s: &str) -> bool {
    s.len() == 3 && s.starts_with('E') && is_digits(&s[1..])
}

fn is_feature_key(s: &str) -> bool {
    s.len() == 7 && s.is_char_boundary(3) && is_epic_key(&s[..3]) && s[3..].starts_with("-F") && is_digits(&s[5..])
}

fn is_task_key(s: &str) -> bool {
    s.len() == 13
        && s.starts_with("T-")
        && s.is_char_boundary(9)
        && is_feature_key(&s[2..9])
        && s[9..].starts_with('-')
        && is_digits(&s[10..])
}

fn is_doc_path(s: &str) -> bool {
    !s.is_empty()
        && s.ends_with(".md")
        && !s.starts_with('/')
        && !s.split('/').any(|seg| seg == ".." || seg.is_empty())
}

/// Errors that can occur when handling keys
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid {kind} key '{key}' (expected {expected})")]
    InvalidFormat {
        kind: EntityKind,
        key: String,
        expected: &'static str,
    },

    #[error("unknown entity kind '{0}' (expected epic, feature, task or related_doc)")]
    UnknownKind(String),
}
