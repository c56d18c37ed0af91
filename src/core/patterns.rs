//! Pattern registry
//!
//! Every file classification and every key extraction goes through the
//! regexes held here. A pattern matches against the project-relative path
//! (always `/` separated) and exposes the record key through the named
//! group `key`. Related-document patterns expose their owning feature
//! through the named group `parent` instead.

use std::collections::BTreeMap;

use miette::Diagnostic;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::core::identity::EntityKind;

const EPIC_PATTERN: &str = r"(?:^|/)(?P<key>E\d{2})-[a-z0-9-]+/epic\.md$";
const FEATURE_PATTERN: &str =
    r"(?:^|/)(?P<key>E\d{2}-F\d{2})-[a-z0-9-]+/(?:prd\.md|PRD_F\d{2}-[^/]+\.md)$";
const TASK_PATTERN: &str = r"(?:^|/)(?P<key>T-E\d{2}-F\d{2}-\d{3})(?:-[^/]*)?\.md$";
const RELATED_DOC_PATTERN: &str = r"(?:^|/)(?P<parent>E\d{2}-F\d{2})-[a-z0-9-]+/[^/]+\.md$";

/// A named classification pattern
#[derive(Debug, Clone)]
pub struct PatternDef {
    pub name: String,
    pub kind: EntityKind,
    pub regex: Regex,
    pub enabled: bool,
}

impl PatternDef {
    pub fn new(name: &str, kind: EntityKind, regex: &str) -> Result<Self, PatternError> {
        let compiled = Regex::new(regex).map_err(|e| PatternError::InvalidRegex {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        let required_group = match kind {
            EntityKind::RelatedDoc => "parent",
            _ => "key",
        };
        if !compiled
            .capture_names()
            .flatten()
            .any(|group| group == required_group)
        {
            return Err(PatternError::MissingGroup {
                name: name.to_string(),
                group: required_group,
            });
        }

        Ok(Self {
            name: name.to_string(),
            kind,
            regex: compiled,
            enabled: true,
        })
    }
}

/// Result of classifying one path
#[derive(Debug, Clone)]
pub struct PatternMatch<'a> {
    pub pattern: &'a PatternDef,
    /// Key captured by the classifying regex
    pub key: Option<String>,
    /// Parent key captured by the classifying regex
    pub parent: Option<String>,
}

/// Pattern override read from configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PatternOverride {
    pub name: String,
    /// Required when the override introduces a new pattern name
    pub kind: Option<EntityKind>,
    pub regex: Option<String>,
    pub enabled: Option<bool>,
}

/// Ordered set of classification patterns; earlier entries win
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    patterns: Vec<PatternDef>,
}

impl PatternRegistry {
    pub fn new(patterns: Vec<PatternDef>) -> Self {
        Self { patterns }
    }

    /// Built-in patterns for the standard `docs/plan` layout
    pub fn defaults() -> Result<Self, PatternError> {
        Ok(Self::new(vec![
            PatternDef::new("epic", EntityKind::Epic, EPIC_PATTERN)?,
            PatternDef::new("feature", EntityKind::Feature, FEATURE_PATTERN)?,
            PatternDef::new("task", EntityKind::Task, TASK_PATTERN)?,
            PatternDef::new("related_doc", EntityKind::RelatedDoc, RELATED_DOC_PATTERN)?,
        ]))
    }

    /// Built-in patterns with configuration overrides applied by name
    pub fn with_overrides(overrides: &[PatternOverride]) -> Result<Self, PatternError> {
        let mut registry = Self::defaults()?;

        for ov in overrides {
            match registry.patterns.iter().position(|p| p.name == ov.name) {
                Some(idx) => {
                    let existing = &registry.patterns[idx];
                    let kind = ov.kind.unwrap_or(existing.kind);
                    let mut def = match &ov.regex {
                        Some(regex) => PatternDef::new(&ov.name, kind, regex)?,
                        None if kind != existing.kind => {
                            PatternDef::new(&ov.name, kind, existing.regex.as_str())?
                        }
                        None => existing.clone(),
                    };
                    def.enabled = ov.enabled.unwrap_or(existing.enabled);
                    registry.patterns[idx] = def;
                }
                None => {
                    let kind = ov.kind.ok_or_else(|| PatternError::MissingKind {
                        name: ov.name.clone(),
                    })?;
                    let regex = ov.regex.as_deref().ok_or_else(|| PatternError::MissingRegex {
                        name: ov.name.clone(),
                    })?;
                    let mut def = PatternDef::new(&ov.name, kind, regex)?;
                    def.enabled = ov.enabled.unwrap_or(true);
                    registry.patterns.push(def);
                }
            }
        }

        Ok(registry)
    }

    /// Classify a project-relative path; first enabled match wins
    pub fn classify(&self, rel_path: &str) -> Option<PatternMatch<'_>> {
        let normalized = rel_path.replace('\\', "/");

        self.patterns
            .iter()
            .filter(|p| p.enabled)
            .find_map(|pattern| {
                pattern.regex.captures(&normalized).map(|caps| PatternMatch {
                    pattern,
                    key: caps.name("key").map(|m| m.as_str().to_string()),
                    parent: caps.name("parent").map(|m| m.as_str().to_string()),
                })
            })
    }

    /// Enabled patterns, name to regex
    pub fn active(&self) -> BTreeMap<String, String> {
        self.patterns
            .iter()
            .filter(|p| p.enabled)
            .map(|p| (p.name.clone(), p.regex.as_str().to_string()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatternDef> {
        self.patterns.iter()
    }
}

/// Errors raised while building the registry
#[derive(Debug, Error, Diagnostic)]
pub enum PatternError {
    #[error("pattern '{name}' is not a valid regex: {message}")]
    #[diagnostic(code(plansync::config::pattern))]
    InvalidRegex { name: String, message: String },

    #[error("pattern '{name}' has no named group '{group}'")]
    #[diagnostic(
        code(plansync::config::pattern),
        help("record patterns capture (?P<key>...), related-doc patterns capture (?P<parent>...)")
    )]
    MissingGroup { name: String, group: &'static str },

    #[error("new pattern '{name}' needs a kind")]
    #[diagnostic(code(plansync::config::pattern))]
    MissingKind { name: String },

    #[error("new pattern '{name}' needs a regex")]
    #[diagnostic(code(plansync::config::pattern))]
    MissingRegex { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PatternRegistry {
        PatternRegistry::defaults().unwrap()
    }

    #[test]
    fn test_classify_epic() {
        let reg = registry();
        let m = reg.classify("docs/plan/E01-identity/epic.md").unwrap();
        assert_eq!(m.pattern.kind, EntityKind::Epic);
        assert_eq!(m.key.as_deref(), Some("E01"));
    }

    #[test]
    fn test_classify_feature_both_file_names() {
        let reg = registry();
        let m = reg
            .classify("docs/plan/E01-identity/E01-F02-login/prd.md")
            .unwrap();
        assert_eq!(m.pattern.kind, EntityKind::Feature);
        assert_eq!(m.key.as_deref(), Some("E01-F02"));

        let m = reg
            .classify("docs/plan/E01-identity/E01-F02-login/PRD_F02-login.md")
            .unwrap();
        assert_eq!(m.pattern.kind, EntityKind::Feature);
    }

    #[test]
    fn test_classify_task_with_and_without_slug() {
        let reg = registry();
        let m = reg
            .classify("docs/plan/E01-identity/E01-F02-login/tasks/T-E01-F02-001.md")
            .unwrap();
        assert_eq!(m.pattern.kind, EntityKind::Task);
        assert_eq!(m.key.as_deref(), Some("T-E01-F02-001"));

        let m = reg
            .classify("docs/plan/E01-identity/E01-F02-login/tasks/T-E01-F02-002-add-form.md")
            .unwrap();
        assert_eq!(m.key.as_deref(), Some("T-E01-F02-002"));
    }

    #[test]
    fn test_classify_related_doc() {
        let reg = registry();
        let m = reg
            .classify("docs/plan/E01-identity/E01-F02-login/architecture.md")
            .unwrap();
        assert_eq!(m.pattern.kind, EntityKind::RelatedDoc);
        assert_eq!(m.parent.as_deref(), Some("E01-F02"));
        assert!(m.key.is_none());
    }

    #[test]
    fn test_task_in_feature_folder_is_task_not_doc() {
        let reg = registry();
        let m = reg
            .classify("docs/plan/E01-identity/E01-F02-login/T-E01-F02-004.md")
            .unwrap();
        assert_eq!(m.pattern.kind, EntityKind::Task);
    }

    #[test]
    fn test_unmatched_paths() {
        let reg = registry();
        assert!(reg.classify("docs/plan/README.md").is_none());
        assert!(reg.classify("docs/plan/E01-identity/notes.md").is_none());
        assert!(reg
            .classify("docs/plan/E01-identity/E01-F02-login/tasks/notes.md")
            .is_none());
    }

    #[test]
    fn test_disabled_pattern_is_skipped() {
        let reg = PatternRegistry::with_overrides(&[PatternOverride {
            name: "related_doc".to_string(),
            enabled: Some(false),
            ..Default::default()
        }])
        .unwrap();

        assert!(reg
            .classify("docs/plan/E01-identity/E01-F02-login/architecture.md")
            .is_none());
        assert!(!reg.active().contains_key("related_doc"));
    }

    #[test]
    fn test_override_replaces_regex() {
        let reg = PatternRegistry::with_overrides(&[PatternOverride {
            name: "task".to_string(),
            regex: Some(r"(?:^|/)(?P<key>T-E\d{2}-F\d{2}-\d{3})\.task\.md$".to_string()),
            ..Default::default()
        }])
        .unwrap();

        let m = reg.classify("x/T-E01-F01-001.task.md").unwrap();
        assert_eq!(m.pattern.name, "task");
        assert_eq!(m.key.as_deref(), Some("T-E01-F01-001"));
    }

    #[test]
    fn test_override_rejects_pattern_without_key_group() {
        let err = PatternRegistry::with_overrides(&[PatternOverride {
            name: "task".to_string(),
            regex: Some(r"T-\d+\.md$".to_string()),
            ..Default::default()
        }])
        .unwrap_err();
        assert!(matches!(err, PatternError::MissingGroup { .. }));
    }

    #[test]
    fn test_override_rejects_invalid_regex() {
        let err = PatternRegistry::with_overrides(&[PatternOverride {
            name: "epic".to_string(),
            regex: Some("(?P<key>E\\d{2}".to_string()),
            ..Default::default()
        }])
        .unwrap_err();
        assert!(matches!(err, PatternError::InvalidRegex { .. }));
    }

    #[test]
    fn test_new_pattern_appended_after_defaults() {
        let reg = PatternRegistry::with_overrides(&[PatternOverride {
            name: "legacy_task".to_string(),
            kind: Some(EntityKind::Task),
            regex: Some(r"(?:^|/)task-(?P<key>T-E\d{2}-F\d{2}-\d{3})\.md$".to_string()),
            enabled: None,
        }])
        .unwrap();

        let names: Vec<_> = reg.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names.last(), Some(&"legacy_task"));
        let m = reg.classify("old/task-T-E02-F01-007.md").unwrap();
        assert_eq!(m.pattern.name, "legacy_task");
    }
}
