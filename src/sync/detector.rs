//! Conflict detection between two entity sets
//!
//! Detection is pure: it reads both sets, never mutates them and never
//! touches the filesystem or the store.

use std::collections::HashMap;

use serde::Serialize;

use crate::core::entity::{DiscoveredEntity, SourceOrigin};
use crate::core::identity::{EntityKey, EntityKind};

/// One side of a reconciliation
#[derive(Debug, Clone)]
pub struct EntitySet {
    pub origin: SourceOrigin,
    pub entities: Vec<DiscoveredEntity>,
}

impl EntitySet {
    pub fn new(origin: SourceOrigin, entities: Vec<DiscoveredEntity>) -> Self {
        Self { origin, entities }
    }

    /// Key map; the first entity wins when a key repeats
    pub fn index(&self) -> HashMap<(EntityKind, &EntityKey), &DiscoveredEntity> {
        let mut map = HashMap::with_capacity(self.entities.len());
        for e in &self.entities {
            map.entry((e.kind, &e.key)).or_insert(e);
        }
        map
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    LeftOnly,
    RightOnly,
    RelationshipMismatch,
    FieldMismatch,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::LeftOnly => "left_only",
            ConflictType::RightOnly => "right_only",
            ConflictType::RelationshipMismatch => "relationship_mismatch",
            ConflictType::FieldMismatch => "field_mismatch",
        }
    }
}

/// A detected disagreement for one key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub kind: EntityKind,
    pub key: EntityKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub left_origin: SourceOrigin,
    pub right_origin: SourceOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_value: Option<String>,
    pub paths: Vec<String>,
    pub suggestion: String,
    /// Filled in by the resolver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl Conflict {
    /// Ordering used for every conflict listing
    pub fn sort_key(&self) -> (ConflictType, EntityKind, &str, &str) {
        (
            self.conflict_type,
            self.kind,
            self.key.as_str(),
            self.field.as_deref().unwrap_or(""),
        )
    }
}

/// Compute every conflict between `left` and `right`, sorted by type then key
pub fn detect_conflicts(left: &EntitySet, right: &EntitySet) -> Vec<Conflict> {
    let left_map = left.index();
    let right_map = right.index();
    let mut conflicts = Vec::new();

    for (id, l) in &left_map {
        match right_map.get(id) {
            None => conflicts.push(one_sided(ConflictType::LeftOnly, l, left.origin, right.origin)),
            Some(r) => {
                if let Some(c) = relationship_mismatch(l, r, left.origin, right.origin) {
                    conflicts.push(c);
                }
                conflicts.extend(field_mismatches(l, r, left.origin, right.origin));
            }
        }
    }

    for (id, r) in &right_map {
        if !left_map.contains_key(id) {
            conflicts.push(one_sided(ConflictType::RightOnly, r, left.origin, right.origin));
        }
    }

    conflicts.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    conflicts
}

fn base(
    conflict_type: ConflictType,
    entity: &DiscoveredEntity,
    left: SourceOrigin,
    right: SourceOrigin,
    suggestion: String,
) -> Conflict {
    Conflict {
        conflict_type,
        kind: entity.kind,
        key: entity.key.clone(),
        field: None,
        left_origin: left,
        right_origin: right,
        left_value: None,
        right_value: None,
        paths: entity.file_path.iter().cloned().collect(),
        suggestion,
        resolution: None,
    }
}

fn one_sided(
    conflict_type: ConflictType,
    entity: &DiscoveredEntity,
    left: SourceOrigin,
    right: SourceOrigin,
) -> Conflict {
    let kind = entity.kind;
    let key = &entity.key;
    let path = entity.file_path.as_deref().unwrap_or("(no file)");

    let suggestion = match (conflict_type, left, right) {
        (ConflictType::LeftOnly, SourceOrigin::File, SourceOrigin::Store) => format!(
            "{} {} is new in {}; sync with --strategy file-wins or newer-wins to import it",
            kind, key, path
        ),
        (ConflictType::RightOnly, SourceOrigin::File, SourceOrigin::Store) => format!(
            "{} {} is stored but {} is missing; restore the file or run 'plansync sync --cleanup' to delete the record",
            kind, key, path
        ),
        (ConflictType::LeftOnly, SourceOrigin::Index, SourceOrigin::Folder) => format!(
            "Create folder for {} {} or remove it from epic-index.md",
            kind, key
        ),
        (ConflictType::RightOnly, SourceOrigin::Index, SourceOrigin::Folder) => format!(
            "Add {} {} to epic-index.md or use --index-strategy merge or folder-precedence",
            kind, key
        ),
        (ConflictType::LeftOnly, _, _) => format!(
            "Add {} {} to the {} side or choose a strategy that drops it",
            kind, key, right
        ),
        _ => format!(
            "Add {} {} to the {} side or choose a strategy that drops it",
            kind, key, left
        ),
    };

    base(conflict_type, entity, left, right, suggestion)
}

fn relationship_mismatch(
    l: &DiscoveredEntity,
    r: &DiscoveredEntity,
    left: SourceOrigin,
    right: SourceOrigin,
) -> Option<Conflict> {
    let (Some(lp), Some(rp)) = (&l.parent_key, &r.parent_key) else {
        return None;
    };
    if lp == rp {
        return None;
    }

    let parent_kind = l.kind.parent().map(|k| k.as_str()).unwrap_or("parent");
    let suggestion = match (left, right) {
        (SourceOrigin::Index, SourceOrigin::Folder) => format!(
            "{} {} has parent {} {} in index but {} in folder structure. Move folder or update epic-index.md",
            capitalize(l.kind.as_str()),
            l.key,
            parent_kind,
            lp,
            rp
        ),
        _ => format!(
            "{} {} belongs to {} {} in the {} but {} in the {}; fix the {} or sync with the strategy whose parent should win",
            capitalize(l.kind.as_str()),
            l.key,
            parent_kind,
            lp,
            left,
            rp,
            right,
            left
        ),
    };

    let mut conflict = base(ConflictType::RelationshipMismatch, l, left, right, suggestion);
    conflict.field = Some("parent".to_string());
    conflict.left_value = Some(lp.to_string());
    conflict.right_value = Some(rp.to_string());
    merge_paths(&mut conflict, r);
    Some(conflict)
}

fn field_mismatches(
    l: &DiscoveredEntity,
    r: &DiscoveredEntity,
    left: SourceOrigin,
    right: SourceOrigin,
) -> Vec<Conflict> {
    let mut out = Vec::new();

    if !l.title.is_empty() && !r.title.is_empty() && l.title != r.title {
        out.push(field_conflict(l, r, left, right, "title", Some(&l.title), Some(&r.title)));
    }

    if let (Some(ld), Some(rd)) = (&l.description, &r.description) {
        if ld != rd {
            out.push(field_conflict(l, r, left, right, "description", Some(ld), Some(rd)));
        }
    }

    // Only a side that looked at the disk can contradict a stored path
    if left.observes_files() && !right.observes_files() {
        if let Some(lpath) = &l.file_path {
            if r.file_path.as_ref() != Some(lpath) {
                out.push(field_conflict(
                    l,
                    r,
                    left,
                    right,
                    "file_path",
                    Some(lpath),
                    r.file_path.as_ref(),
                ));
            }
        }
    }

    out
}

fn field_conflict(
    l: &DiscoveredEntity,
    r: &DiscoveredEntity,
    left: SourceOrigin,
    right: SourceOrigin,
    field: &str,
    left_value: Option<&String>,
    right_value: Option<&String>,
) -> Conflict {
    let suggestion = match (left, right) {
        (SourceOrigin::File, SourceOrigin::Store) => format!(
            "{} of {} differs between file and store; sync with --strategy file-wins to take the file value or database-wins to keep the stored one",
            field, l.key
        ),
        _ => format!(
            "{} of {} differs between {} and {}; edit one side or pick the strategy whose value should win",
            field, l.key, left, right
        ),
    };

    let mut conflict = base(ConflictType::FieldMismatch, l, left, right, suggestion);
    conflict.field = Some(field.to_string());
    conflict.left_value = left_value.cloned();
    conflict.right_value = right_value.cloned();
    merge_paths(&mut conflict, r);
    conflict
}

fn merge_paths(conflict: &mut Conflict, other: &DiscoveredEntity) {
    if let Some(p) = &other.file_path {
        if !conflict.paths.contains(p) {
            conflict.paths.push(p.clone());
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
