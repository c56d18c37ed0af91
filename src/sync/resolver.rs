//! Conflict resolution: collapse two entity sets into one under a named strategy
//!
//! Resolution is pure. Both sets are read, a new set is built and every
//! decision that discards information is reported as a warning.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use thiserror::Error;

use crate::core::entity::{DiscoveredEntity, SourceOrigin};
use crate::core::identity::{EntityKey, EntityKind};
use crate::sync::detector::{Conflict, ConflictType, EntitySet};

/// Which side's descriptive fields win in a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePrimary {
    /// The side with the later modification time (ties go left)
    Newer,
    /// Always the left side
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    LeftAuthoritative,
    RightAuthoritative,
    Merge(MergePrimary),
}

impl ResolutionStrategy {
    /// Every accepted strategy name
    pub const NAMES: &'static [&'static str] = &[
        "file-wins",
        "database-wins",
        "newer-wins",
        "index-precedence",
        "folder-precedence",
        "merge",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LeftAuthoritative => "left-authoritative",
            ResolutionStrategy::RightAuthoritative => "right-authoritative",
            ResolutionStrategy::Merge(MergePrimary::Newer) => "merge-newer",
            ResolutionStrategy::Merge(MergePrimary::Left) => "merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file-wins" | "index-precedence" => Ok(ResolutionStrategy::LeftAuthoritative),
            "database-wins" | "folder-precedence" => Ok(ResolutionStrategy::RightAuthoritative),
            "newer-wins" => Ok(ResolutionStrategy::Merge(MergePrimary::Newer)),
            "merge" => Ok(ResolutionStrategy::Merge(MergePrimary::Left)),
            _ => Err(ResolveError::UnknownStrategy {
                name: s.to_string(),
                valid: Self::NAMES.join(", "),
            }),
        }
    }
}

/// Whether a left entity needs a right counterpart under LeftAuthoritative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterpartRule {
    /// Right must be derivable from left (index vs folder)
    Required,
    /// Left-only entities are simply new (file vs store)
    Optional,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("Unknown resolution strategy '{name}'")]
    #[diagnostic(
        code(plansync::resolve::unknown_strategy),
        help("Valid strategies: {valid}")
    )]
    UnknownStrategy { name: String, valid: String },

    #[error("{kind} {key} has no {missing} counterpart but the {present} side is authoritative")]
    #[diagnostic(
        code(plansync::resolve::missing_counterpart),
        help("Create the missing {kind} or use a merge strategy")
    )]
    MissingCounterpart {
        kind: EntityKind,
        key: String,
        present: SourceOrigin,
        missing: SourceOrigin,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningReason {
    /// An entity of the losing side had no place in the resolved set
    Dropped,
    /// Both sides disagreed on the parent; the primary's parent was kept
    ParentMismatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionWarning {
    pub kind: EntityKind,
    pub key: EntityKey,
    pub origin: SourceOrigin,
    pub file_path: Option<String>,
    pub message: String,
    pub reason: WarningReason,
}

/// Output of a resolution run
#[derive(Debug, Default)]
pub struct Resolution {
    /// Sorted by kind then key
    pub entities: Vec<DiscoveredEntity>,
    pub warnings: Vec<ResolutionWarning>,
    /// Which side supplied the descriptive fields of each resolved key
    pub winners: HashMap<(EntityKind, EntityKey), SourceOrigin>,
}

impl Resolution {
    /// Record on each conflict how it was settled
    pub fn annotate(&self, conflicts: &mut [Conflict]) {
        for conflict in conflicts.iter_mut() {
            let winner = self.winners.get(&(conflict.kind, conflict.key.clone()));
            let text = match (conflict.conflict_type, winner) {
                (ConflictType::LeftOnly, Some(_)) => format!("kept from {}", conflict.left_origin),
                (ConflictType::RightOnly, Some(_)) => format!("kept from {}", conflict.right_origin),
                (ConflictType::LeftOnly | ConflictType::RightOnly, None) => "dropped".to_string(),
                (_, Some(origin)) => {
                    let what = if conflict.conflict_type == ConflictType::RelationshipMismatch {
                        "parent"
                    } else {
                        "value"
                    };
                    if *origin == conflict.right_origin && *origin == SourceOrigin::Store {
                        format!("store {} kept", what)
                    } else {
                        format!("{} {} applied", origin, what)
                    }
                }
                (_, None) => "dropped".to_string(),
            };
            conflict.resolution = Some(text);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    strategy: ResolutionStrategy,
    rule: CounterpartRule,
}

impl Resolver {
    pub fn new(strategy: ResolutionStrategy, rule: CounterpartRule) -> Self {
        Self { strategy, rule }
    }

    /// Build the resolved set for `left` and `right`
    pub fn resolve(&self, left: &EntitySet, right: &EntitySet) -> Result<Resolution, ResolveError> {
        let left_map = left.index();
        let right_map = right.index();

        let ids: BTreeSet<(EntityKind, &EntityKey)> =
            left_map.keys().chain(right_map.keys()).copied().collect();

        let mut resolution = Resolution::default();

        for id in ids {
            let l = left_map.get(&id).copied();
            let r = right_map.get(&id).copied();

            let resolved = match (self.strategy, l, r) {
                (ResolutionStrategy::LeftAuthoritative, Some(l), Some(r)) => {
                    Some((fill_observed(l.clone(), r), left.origin))
                }
                (ResolutionStrategy::LeftAuthoritative, Some(l), None) => {
                    if self.rule == CounterpartRule::Required {
                        return Err(ResolveError::MissingCounterpart {
                            kind: l.kind,
                            key: l.key.to_string(),
                            present: left.origin,
                            missing: right.origin,
                        });
                    }
                    Some((l.clone(), left.origin))
                }
                (ResolutionStrategy::LeftAuthoritative, None, Some(r)) => {
                    resolution.warnings.push(dropped(r, right.origin, left.origin));
                    None
                }
                (ResolutionStrategy::RightAuthoritative, Some(l), Some(r)) => {
                    Some((fill_observed(r.clone(), l), right.origin))
                }
                (ResolutionStrategy::RightAuthoritative, Some(l), None) => {
                    resolution.warnings.push(dropped(l, left.origin, right.origin));
                    None
                }
                (ResolutionStrategy::RightAuthoritative, None, Some(r)) => {
                    Some((r.clone(), right.origin))
                }
                (ResolutionStrategy::Merge(primary), Some(l), Some(r)) => {
                    let left_primary = match primary {
                        MergePrimary::Left => true,
                        MergePrimary::Newer => match (l.mod_time, r.mod_time) {
                            (Some(lt), Some(rt)) => lt >= rt,
                            (None, Some(_)) => false,
                            _ => true,
                        },
                    };
                    let (p, s, p_origin, s_origin) = if left_primary {
                        (l, r, left.origin, right.origin)
                    } else {
                        (r, l, right.origin, left.origin)
                    };
                    let (merged, warning) = merge(p, s, p_origin, s_origin);
                    resolution.warnings.extend(warning);
                    Some((merged, p_origin))
                }
                (ResolutionStrategy::Merge(_), Some(l), None) => Some((l.clone(), left.origin)),
                (ResolutionStrategy::Merge(_), None, Some(r)) => Some((r.clone(), right.origin)),
                (_, None, None) => None,
            };

            if let Some((entity, winner)) = resolved {
                resolution
                    .winners
                    .insert((entity.kind, entity.key.clone()), winner);
                resolution.entities.push(entity);
            }
        }

        Ok(resolution)
    }
}

/// Copy the disk-observed fields from `other` when `entity` has none
fn fill_observed(mut entity: DiscoveredEntity, other: &DiscoveredEntity) -> DiscoveredEntity {
    if entity.file_path.is_none() && other.file_path.is_some() {
        entity.file_path = other.file_path.clone();
        entity.mod_time = other.mod_time;
        entity.content_hash = other.content_hash.clone();
    }
    entity
}

fn merge(
    primary: &DiscoveredEntity,
    secondary: &DiscoveredEntity,
    primary_origin: SourceOrigin,
    secondary_origin: SourceOrigin,
) -> (DiscoveredEntity, Option<ResolutionWarning>) {
    let mut merged = primary.clone();

    if merged.title.trim().is_empty() {
        merged.title = secondary.title.clone();
    }
    if merged.description.is_none() {
        merged.description = secondary.description.clone();
    }

    // Observed file fields come from whichever side actually looked at the disk
    let observer = if secondary_origin.observes_files() && !primary_origin.observes_files() {
        secondary
    } else {
        primary
    };
    let fallback = if std::ptr::eq(observer, primary) {
        secondary
    } else {
        primary
    };
    merged.file_path = observer.file_path.clone().or_else(|| fallback.file_path.clone());
    merged.mod_time = observer.mod_time.or(fallback.mod_time);
    merged.content_hash = observer
        .content_hash
        .clone()
        .or_else(|| fallback.content_hash.clone());

    let warning = match (&primary.parent_key, &secondary.parent_key) {
        (Some(p), Some(s)) if p != s => Some(ResolutionWarning {
            kind: primary.kind,
            key: primary.key.clone(),
            origin: primary_origin,
            file_path: merged.file_path.clone(),
            message: format!(
                "{} {} has parent {} in {} but {} in {}; keeping {}",
                primary.kind, primary.key, p, primary_origin, s, secondary_origin, p
            ),
            reason: WarningReason::ParentMismatch,
        }),
        (None, Some(_)) => {
            merged.parent_key = secondary.parent_key.clone();
            None
        }
        _ => None,
    };

    (merged, warning)
}

fn dropped(entity: &DiscoveredEntity, origin: SourceOrigin, winner: SourceOrigin) -> ResolutionWarning {
    ResolutionWarning {
        kind: entity.kind,
        key: entity.key.clone(),
        origin,
        file_path: entity.file_path.clone(),
        message: format!(
            "{} {} exists only in {} and was dropped because {} is authoritative",
            entity.kind, entity.key, origin, winner
        ),
        reason: WarningReason::Dropped,
    }
}
