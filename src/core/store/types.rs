//! Type definitions for store rows

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::core::entity::{DiscoveredEntity, SourceOrigin};
use crate::core::identity::{EntityKey, EntityKind};

/// A row of one of the entity tables
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub kind: EntityKind,
    pub key: String,
    pub parent_key: Option<String>,
    pub title: String,
    pub description: Option<String>,
    /// Store-only workflow status (never written from files)
    pub status: Option<String>,
    pub file_path: Option<String>,
    pub file_mtime: Option<i64>,
    pub file_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredEntity {
    /// View this row as the store side of a reconciliation
    ///
    /// Returns None when the stored key no longer validates.
    pub fn to_entity(&self) -> Option<DiscoveredEntity> {
        let key = EntityKey::parse(self.kind, &self.key).ok()?;
        let parent = match (self.kind.parent(), &self.parent_key) {
            (Some(parent_kind), Some(raw)) => EntityKey::parse(parent_kind, raw).ok(),
            _ => None,
        };

        let mut entity = DiscoveredEntity::new(self.kind, key, self.title.clone(), SourceOrigin::Store)
            .with_parent(parent)
            .with_description(self.description.clone());
        entity.file_path = self.file_path.clone();
        entity.content_hash = self.file_hash.clone();
        entity.mod_time = Some(self.updated_at);
        Some(entity)
    }
}

/// A task history row
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub task_key: String,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
}

/// Store statistics
#[derive(Debug, Default)]
pub struct StoreStats {
    pub by_kind: BTreeMap<EntityKind, usize>,
    pub history_entries: usize,
    pub db_size_bytes: u64,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.by_kind.values().sum()
    }
}
