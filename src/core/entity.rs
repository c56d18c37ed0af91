//! Entity records exchanged between the scanner, the store and the resolver

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::core::identity::{EntityKey, EntityKind};

/// Which input set produced an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    /// Parsed from a record file
    File,
    /// Read from the SQLite store
    Store,
    /// Declared in epic-index.md
    Index,
    /// Discovered from the folder layout
    Folder,
}

impl SourceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceOrigin::File => "file",
            SourceOrigin::Store => "store",
            SourceOrigin::Index => "index",
            SourceOrigin::Folder => "folder",
        }
    }

    /// Whether paths carried by this side were observed on disk
    pub fn observes_files(&self) -> bool {
        matches!(self, SourceOrigin::File | SourceOrigin::Folder)
    }
}

impl fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One epic, feature, task or related document as seen by one source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredEntity {
    pub kind: EntityKind,
    pub key: EntityKey,
    pub title: String,
    pub description: Option<String>,
    /// Project-relative, `/` separated
    pub file_path: Option<String>,
    pub origin: SourceOrigin,
    pub parent_key: Option<EntityKey>,
    pub mod_time: Option<DateTime<Utc>>,
    /// SHA-256 of the backing file
    pub content_hash: Option<String>,
}

impl DiscoveredEntity {
    pub fn new(kind: EntityKind, key: EntityKey, title: impl Into<String>, origin: SourceOrigin) -> Self {
        let parent_key = key.derived_parent(kind);
        Self {
            kind,
            key,
            title: title.into(),
            description: None,
            file_path: None,
            origin,
            parent_key,
            mod_time: None,
            content_hash: None,
        }
    }

    pub fn with_parent(mut self, parent: Option<EntityKey>) -> Self {
        self.parent_key = parent;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, mod_time: Option<DateTime<Utc>>) -> Self {
        self.file_path = Some(path.into());
        self.mod_time = mod_time;
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Minimal record for a parent that no file describes
    pub fn placeholder(kind: EntityKind, key: EntityKey) -> Self {
        let label = match kind {
            EntityKind::RelatedDoc => "related doc",
            other => other.as_str(),
        };
        let title = format!("Auto-created {} {}", label, key);
        Self::new(kind, key, title, SourceOrigin::File)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_parent_from_key() {
        let key = EntityKey::parse(EntityKind::Task, "T-E02-F03-010").unwrap();
        let entity = DiscoveredEntity::new(EntityKind::Task, key, "Task", SourceOrigin::File);
        assert_eq!(entity.parent_key.unwrap().as_str(), "E02-F03");
    }

    #[test]
    fn test_placeholder_title_names_key() {
        let key = EntityKey::parse(EntityKind::Feature, "E01-F01").unwrap();
        let entity = DiscoveredEntity::placeholder(EntityKind::Feature, key);
        assert_eq!(entity.title, "Auto-created feature E01-F01");
        assert_eq!(entity.parent_key.unwrap().as_str(), "E01");
        assert!(entity.file_path.is_none());
    }

    #[test]
    fn test_blank_description_is_dropped() {
        let key = EntityKey::parse(EntityKind::Epic, "E01").unwrap();
        let entity = DiscoveredEntity::new(EntityKind::Epic, key, "Epic", SourceOrigin::File)
            .with_description(Some("   ".to_string()));
        assert!(entity.description.is_none());
    }
}
