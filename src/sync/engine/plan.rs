//! Store mutations derived from the resolved set

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::core::entity::DiscoveredEntity;
use crate::core::identity::EntityKind;
use crate::core::store::{StoreError, StoreTransaction, StoredEntity};
use crate::sync::detector::Conflict;
use crate::sync::report::{ChangeSummary, ErrorType, RecordRef, ReportEntry};

/// Store rows read once per run, keyed by kind and key
pub type StoredIndex = HashMap<(EntityKind, String), StoredEntity>;

/// Creates and updates implied by the validated resolved set
#[derive(Debug, Default)]
pub struct ChangePlan {
    pub placeholders: Vec<DiscoveredEntity>,
    pub creates: Vec<DiscoveredEntity>,
    pub updates: Vec<DiscoveredEntity>,
    pub unchanged: usize,
}

impl ChangePlan {
    pub fn build(
        valid: Vec<DiscoveredEntity>,
        mut placeholders: Vec<DiscoveredEntity>,
        stored: &StoredIndex,
    ) -> Self {
        placeholders.sort_by(|a, b| (a.kind, &a.key).cmp(&(b.kind, &b.key)));
        let mut plan = ChangePlan {
            placeholders,
            ..Default::default()
        };

        for entity in valid {
            match stored.get(&(entity.kind, entity.key.to_string())) {
                None => plan.creates.push(entity),
                Some(row) if differs(&entity, row) => plan.updates.push(entity),
                Some(_) => plan.unchanged += 1,
            }
        }
        plan
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            created: self.creates.iter().map(record_ref).collect(),
            updated: self.updates.iter().map(record_ref).collect(),
            parents_created: self.placeholders.iter().map(record_ref).collect(),
            deleted: Vec::new(),
            unchanged: self.unchanged,
        }
    }

    /// Write every planned mutation through `tx`; parents go in before children
    pub fn apply(&self, tx: &StoreTransaction<'_>, conflicts: &[Conflict]) -> Result<(), StoreError> {
        for entity in &self.placeholders {
            tx.insert(entity)?;
        }
        for entity in &self.creates {
            tx.insert(entity)?;
            if entity.kind == EntityKind::Task {
                tx.record_history(entity.key.as_str(), "Imported from file")?;
            }
        }
        for entity in &self.updates {
            tx.update(entity)?;
            if entity.kind == EntityKind::Task {
                let resolved = conflicts
                    .iter()
                    .filter(|c| c.kind == EntityKind::Task && c.key == entity.key)
                    .count();
                let notes = if resolved > 0 {
                    format!("Updated from file ({} conflicts resolved)", resolved)
                } else {
                    "Updated from file".to_string()
                };
                tx.record_history(entity.key.as_str(), &notes)?;
            }
        }
        Ok(())
    }
}

fn differs(entity: &DiscoveredEntity, row: &StoredEntity) -> bool {
    entity.title != row.title
        || entity.description != row.description
        || entity.parent_key.as_ref().map(|k| k.as_str()) != row.parent_key.as_deref()
        || entity.file_path != row.file_path
        || entity.content_hash != row.file_hash
}

fn record_ref(entity: &DiscoveredEntity) -> RecordRef {
    RecordRef {
        kind: entity.kind,
        key: entity.key.to_string(),
        file_path: entity.file_path.clone(),
    }
}

/// Whether a project-relative path lies under the scanned folder
pub fn in_scope(path: &str, scope: &str) -> bool {
    scope.is_empty() || path == scope || path.starts_with(&format!("{}/", scope))
}

/// Parsed records of this run, keyed by their project-relative path
pub type ParsedPaths = HashMap<String, (EntityKind, String)>;

/// Stored rows whose backing file is gone
///
/// A row qualifies when its path is inside the scanned folder, no scanned
/// file declares its key, and its file either no longer exists on disk or
/// was parsed this run under a different key.
pub fn orphans<'a>(
    stored: &'a StoredIndex,
    parsed_keys: &HashSet<(EntityKind, String)>,
    parsed_paths: &ParsedPaths,
    project_root: &Path,
    scope: &str,
) -> Vec<&'a StoredEntity> {
    let mut out: Vec<&StoredEntity> = stored
        .values()
        .filter(|row| {
            let Some(path) = &row.file_path else {
                return false;
            };
            if !in_scope(path, scope) || parsed_keys.contains(&(row.kind, row.key.clone())) {
                return false;
            }
            match parsed_paths.get(path) {
                Some((kind, key)) => *kind != row.kind || *key != row.key,
                None => !project_root.join(path).exists(),
            }
        })
        .collect();
    out.sort_by(|a, b| (a.kind, &a.key).cmp(&(b.kind, &b.key)));
    out
}

/// Deletion order: children before parents
const CLEANUP_ORDER: [EntityKind; 4] = [
    EntityKind::RelatedDoc,
    EntityKind::Task,
    EntityKind::Feature,
    EntityKind::Epic,
];

#[derive(Debug, Default)]
pub struct CleanupOutcome {
    pub deleted: Vec<RecordRef>,
    pub kept: Vec<ReportEntry>,
}

fn kept_entry(row: &StoredEntity, children: usize) -> ReportEntry {
    ReportEntry::new(
        ErrorType::ValidationWarning,
        row.file_path.clone().unwrap_or_default(),
        format!(
            "{} {} was not deleted: {} child records still reference it",
            row.kind, row.key, children
        ),
    )
    .with_fix("Delete or move the children first, then run cleanup again")
}

fn deleted_ref(row: &StoredEntity) -> RecordRef {
    RecordRef {
        kind: row.kind,
        key: row.key.clone(),
        file_path: row.file_path.clone(),
    }
}

/// Delete orphaned rows inside `tx`
pub fn apply_cleanup(
    tx: &StoreTransaction<'_>,
    candidates: &[&StoredEntity],
) -> Result<CleanupOutcome, StoreError> {
    let mut outcome = CleanupOutcome::default();
    for kind in CLEANUP_ORDER {
        for row in candidates.iter().filter(|r| r.kind == kind) {
            let children = tx.count_children(kind, &row.key)?;
            if children > 0 {
                outcome.kept.push(kept_entry(row, children));
                continue;
            }
            if tx.delete(kind, &row.key)? {
                outcome.deleted.push(deleted_ref(row));
            }
        }
    }
    Ok(outcome)
}

/// What `apply_cleanup` would do, computed from the row snapshot
pub fn preview_cleanup(candidates: &[&StoredEntity], stored: &StoredIndex) -> CleanupOutcome {
    let mut outcome = CleanupOutcome::default();
    let mut gone: HashSet<(EntityKind, String)> = HashSet::new();

    for kind in CLEANUP_ORDER {
        for row in candidates.iter().filter(|r| r.kind == kind) {
            let children = stored
                .values()
                .filter(|child| {
                    child.kind.parent() == Some(kind)
                        && child.parent_key.as_deref() == Some(row.key.as_str())
                        && !gone.contains(&(child.kind, child.key.clone()))
                })
                .count();
            if children > 0 {
                outcome.kept.push(kept_entry(row, children));
                continue;
            }
            gone.insert((row.kind, row.key.clone()));
            outcome.deleted.push(deleted_ref(row));
        }
    }
    outcome
}
