//! The epic index: a hand-maintained markdown list of epic and feature folders
//!
//! Each markdown link whose target is a folder path declares an entity: one
//! segment is an epic folder, two segments are an epic folder followed by a
//! feature folder.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use miette::Diagnostic;
use regex::Regex;
use thiserror::Error;

use crate::core::entity::{DiscoveredEntity, SourceOrigin};
use crate::core::identity::{EntityKey, EntityKind};
use crate::sync::parser::humanize_path;

/// File name of the index, at the top of the docs root
pub const INDEX_FILE_NAME: &str = "epic-index.md";

#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    #[error("Cannot read {path}: {source}")]
    #[diagnostic(code(plansync::index::unreadable))]
    Unreadable { path: PathBuf, source: io::Error },

    #[error("{path} does not exist")]
    #[diagnostic(
        code(plansync::index::missing),
        help("Create epic-index.md in the docs root or run without --index")
    )]
    Missing { path: PathBuf },
}

fn link_regex() -> &'static Regex {
    static LINK: OnceLock<Regex> = OnceLock::new();
    LINK.get_or_init(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").expect("link pattern is valid"))
}

/// Read and parse `<scan_root>/epic-index.md`
pub fn load_index(scan_root: &Path) -> Result<Vec<DiscoveredEntity>, IndexError> {
    let path = scan_root.join(INDEX_FILE_NAME);
    if !path.exists() {
        return Err(IndexError::Missing { path });
    }
    let content = fs::read_to_string(&path).map_err(|source| IndexError::Unreadable {
        path: path.clone(),
        source,
    })?;
    Ok(parse_index(&content))
}

/// Entities declared by the links in an index document, in document order
pub fn parse_index(content: &str) -> Vec<DiscoveredEntity> {
    let mut out: Vec<DiscoveredEntity> = Vec::new();

    for caps in link_regex().captures_iter(content) {
        let text = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let target = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        let Some(segments) = normalize_link(target) else {
            continue;
        };

        let entity = match segments.as_slice() {
            [epic_dir] => {
                let Some(key) = folder_key(EntityKind::Epic, epic_dir) else {
                    continue;
                };
                DiscoveredEntity::new(EntityKind::Epic, key, title_or(text, epic_dir), SourceOrigin::Index)
            }
            [epic_dir, feature_dir] => {
                let (Some(epic), Some(key)) = (
                    folder_key(EntityKind::Epic, epic_dir),
                    folder_key(EntityKind::Feature, feature_dir),
                ) else {
                    continue;
                };
                DiscoveredEntity::new(
                    EntityKind::Feature,
                    key,
                    title_or(text, feature_dir),
                    SourceOrigin::Index,
                )
                .with_parent(Some(epic))
            }
            _ => continue,
        };

        if !out.iter().any(|e| e.kind == entity.kind && e.key == entity.key) {
            out.push(entity);
        }
    }

    out
}

/// Epic key of the folder a feature file actually lives in
pub fn folder_parent(rel_path: &str) -> Option<EntityKey> {
    let segments: Vec<&str> = rel_path.split('/').collect();
    let feature_idx = segments
        .iter()
        .position(|s| folder_key(EntityKind::Feature, s).is_some())?;
    let epic_dir = segments.get(feature_idx.checked_sub(1)?)?;
    folder_key(EntityKind::Epic, epic_dir)
}

/// Folder path segments of a link, or None for links that are not folders
fn normalize_link(target: &str) -> Option<Vec<&str>> {
    if target.contains("://") || target.starts_with('#') {
        return None;
    }
    let target = target.split('#').next().unwrap_or(target);
    let lower = target.to_lowercase();
    if lower.ends_with(".md") || lower.ends_with(".txt") {
        return None;
    }

    let segments: Vec<&str> = target
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segments.is_empty() || segments.contains(&"..") {
        return None;
    }
    Some(segments)
}

/// Key encoded at the start of a folder name, e.g. `E01-F02-sync` for a feature
fn folder_key(kind: EntityKind, dir: &str) -> Option<EntityKey> {
    let len = match kind {
        EntityKind::Epic if folder_key(EntityKind::Feature, dir).is_some() => return None,
        EntityKind::Epic => 3,
        EntityKind::Feature => 7,
        _ => return None,
    };
    let prefix = dir.get(..len)?;
    let rest = &dir[len..];
    if !(rest.is_empty() || rest.starts_with('-')) {
        return None;
    }
    EntityKey::parse(kind, prefix).ok()
}

fn title_or(text: &str, dir: &str) -> String {
    if !text.is_empty() {
        return text.to_string();
    }
    humanize_path(&format!("{}.md", dir)).unwrap_or_else(|| dir.to_string())
}
