//! Record parser: turn a classified markdown file into a typed entity
//!
//! Every failure is per-file and comes back as a [`ReportEntry`]; nothing
//! here aborts a scan.

use std::fs;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::core::config::ValidationLevel;
use crate::core::entity::{DiscoveredEntity, SourceOrigin};
use crate::core::identity::{EntityKey, EntityKind};
use crate::sync::report::{ErrorType, ReportEntry};
use crate::sync::scanner::ScannedFile;
use crate::yaml::{split_frontmatter, FrontmatterError};

/// Metadata fields read from a record's frontmatter; others are ignored
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecordFrontmatter {
    #[serde(alias = "task_key")]
    key: Option<String>,
    title: Option<String>,
    description: Option<String>,
    epic_key: Option<String>,
    feature_key: Option<String>,
}

/// A successfully parsed file and the warnings raised while parsing it
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub entity: DiscoveredEntity,
    pub warnings: Vec<ReportEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct RecordParser {
    level: ValidationLevel,
}

impl RecordParser {
    pub fn new(level: ValidationLevel) -> Self {
        Self { level }
    }

    /// Read and parse a scanned file
    pub fn parse_file(&self, file: &ScannedFile) -> Result<ParsedRecord, ReportEntry> {
        let bytes = fs::read(&file.path).map_err(|e| {
            ReportEntry::new(
                ErrorType::FileAccessError,
                &file.rel_path,
                format!("Cannot read file: {}", e),
            )
            .with_fix("Check the file permissions")
        })?;

        let content = String::from_utf8(bytes).map_err(|_| {
            ReportEntry::new(ErrorType::ParseError, &file.rel_path, "File is not valid UTF-8")
                .with_fix("Re-save the file with UTF-8 encoding")
        })?;

        self.parse(file, &content)
    }

    /// Parse already-read content
    pub fn parse(&self, file: &ScannedFile, content: &str) -> Result<ParsedRecord, ReportEntry> {
        match file.kind {
            EntityKind::RelatedDoc => self.parse_related_doc(file, content),
            _ => self.parse_record(file, content),
        }
    }

    fn parse_record(&self, file: &ScannedFile, content: &str) -> Result<ParsedRecord, ReportEntry> {
        let path = file.rel_path.as_str();
        let kind = file.kind;
        let mut warnings = Vec::new();

        let meta = read_frontmatter(content).map_err(|e| frontmatter_entry(path, &e))?;

        let declared_key = meta
            .key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);

        let raw_key = match (declared_key, &file.extracted_key) {
            (Some(key), _) => key,
            (None, Some(extracted)) if self.level == ValidationLevel::Permissive => {
                warnings.push(
                    ReportEntry::new(
                        ErrorType::ValidationWarning,
                        path,
                        format!("Missing 'key' in frontmatter; using '{}' from the file name", extracted),
                    )
                    .with_fix(format!("Add 'key: {}' to the frontmatter", extracted)),
                );
                extracted.clone()
            }
            (None, extracted) => {
                let fix = match extracted {
                    Some(k) => format!("Add 'key: {}' to the frontmatter", k),
                    None => format!("Add a 'key' field ({}) to the frontmatter", kind.key_format()),
                };
                return Err(ReportEntry::new(
                    ErrorType::ParseError,
                    path,
                    "Missing required field 'key'",
                )
                .with_fix(fix));
            }
        };

        let key = EntityKey::parse(kind, &raw_key).map_err(|e| {
            ReportEntry::new(ErrorType::ValidationFailure, path, e.to_string())
                .with_fix(format!("Use a {} key of the form {}", kind, kind.key_format()))
        })?;

        if let Some(extracted) = &file.extracted_key {
            if extracted != key.as_str() {
                warnings.push(
                    ReportEntry::new(
                        ErrorType::ValidationWarning,
                        path,
                        format!(
                            "File name key '{}' differs from frontmatter key '{}'; using '{}'",
                            extracted, key, key
                        ),
                    )
                    .with_fix("Rename the file or correct the key so they agree"),
                );
            }
        }

        let title = match meta.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => {
                let title = humanize_path(path).unwrap_or_else(|| key.to_string());
                warnings.push(
                    ReportEntry::new(
                        ErrorType::ValidationWarning,
                        path,
                        format!("Missing title; using '{}'", title),
                    )
                    .with_fix("Add a 'title' field to the frontmatter"),
                );
                title
            }
        };

        let declared_parent = match kind {
            EntityKind::Feature => meta.epic_key.as_deref(),
            EntityKind::Task => meta.feature_key.as_deref(),
            _ => None,
        }
        .map(str::trim)
        .filter(|p| !p.is_empty());

        let entity = DiscoveredEntity::new(kind, key, title, SourceOrigin::File)
            .with_description(meta.description)
            .with_file(path, file.mod_time)
            .with_hash(compute_hash(content));

        if let (Some(declared), Some(derived)) = (declared_parent, &entity.parent_key) {
            if declared != derived.as_str() {
                warnings.push(
                    ReportEntry::new(
                        ErrorType::ValidationWarning,
                        path,
                        format!(
                            "Frontmatter names parent '{}' but key {} belongs to '{}'; using '{}'",
                            declared, entity.key, derived, derived
                        ),
                    )
                    .with_fix("Remove the parent field or make it match the key"),
                );
            }
        }

        if self.level == ValidationLevel::Strict {
            if let Some(first) = warnings.into_iter().next() {
                return Err(first.escalated());
            }
            return Ok(ParsedRecord {
                entity,
                warnings: Vec::new(),
            });
        }

        Ok(ParsedRecord { entity, warnings })
    }

    /// Related docs are keyed by path and never warn
    fn parse_related_doc(&self, file: &ScannedFile, content: &str) -> Result<ParsedRecord, ReportEntry> {
        let path = file.rel_path.as_str();

        let key = EntityKey::parse(EntityKind::RelatedDoc, path).map_err(|e| {
            ReportEntry::new(ErrorType::ValidationFailure, path, e.to_string())
                .with_fix("Move the document under a feature folder")
        })?;

        let parent = match &file.parent_hint {
            Some(raw) => Some(EntityKey::parse(EntityKind::Feature, raw).map_err(|e| {
                ReportEntry::new(ErrorType::ValidationFailure, path, e.to_string())
                    .with_fix("Check the related_doc pattern's 'parent' group")
            })?),
            None => {
                return Err(ReportEntry::new(
                    ErrorType::ValidationFailure,
                    path,
                    "Related document has no parent feature",
                )
                .with_fix("Move the document into a feature folder"))
            }
        };

        let meta = read_frontmatter(content).map_err(|e| frontmatter_entry(path, &e))?;
        let title = meta
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| humanize_path(path))
            .unwrap_or_else(|| path.to_string());

        let entity = DiscoveredEntity::new(EntityKind::RelatedDoc, key, title, SourceOrigin::File)
            .with_parent(parent)
            .with_description(meta.description)
            .with_file(path, file.mod_time)
            .with_hash(compute_hash(content));

        Ok(ParsedRecord {
            entity,
            warnings: Vec::new(),
        })
    }
}

fn read_frontmatter(content: &str) -> Result<RecordFrontmatter, FrontmatterError> {
    let Some(block) = split_frontmatter(content)? else {
        return Ok(RecordFrontmatter::default());
    };
    if block.yaml.trim().is_empty() {
        return Ok(RecordFrontmatter::default());
    }
    serde_yml::from_str(block.yaml).map_err(|e| FrontmatterError::from_serde_error(&e, block.first_line))
}

fn frontmatter_entry(path: &str, e: &FrontmatterError) -> ReportEntry {
    ReportEntry::new(ErrorType::ParseError, path, e.to_string())
        .with_fix(e.suggested_fix())
        .at_line(Some(e.line()))
}

/// SHA-256 of file content, hex encoded
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Title from a path: `epic.md` and `prd.md` use their folder, key prefixes are stripped
pub fn humanize_path(rel_path: &str) -> Option<String> {
    let mut segments = rel_path.rsplit('/');
    let file_name = segments.next()?;
    let stem = file_name.strip_suffix(".md").unwrap_or(file_name);

    let source = if stem.eq_ignore_ascii_case("epic") || stem.eq_ignore_ascii_case("prd") {
        segments.next()?
    } else {
        stem
    };

    let words: Vec<String> = source
        .split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .skip_while(|w| is_key_segment(w))
        .map(title_case)
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

fn is_key_segment(segment: &str) -> bool {
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    segment == "T"
        || segment == "PRD"
        || digits(segment)
        || (segment.len() == 3
            && (segment.starts_with('E') || segment.starts_with('F'))
            && digits(&segment[1..]))
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
