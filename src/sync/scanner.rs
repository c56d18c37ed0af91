//! File scanner: walk the docs tree and classify markdown files

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::{DirEntry, WalkDir};

use crate::core::identity::EntityKind;
use crate::core::patterns::PatternRegistry;
use crate::sync::index::INDEX_FILE_NAME;
use crate::sync::report::{ErrorType, ReportEntry};

/// Files larger than this are not parsed
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// A markdown file classified by the pattern registry
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Project-relative, `/` separated
    pub rel_path: String,
    /// Name of the pattern that classified the file
    pub pattern: String,
    pub kind: EntityKind,
    pub extracted_key: Option<String>,
    /// Parent key captured from the path (related docs)
    pub parent_hint: Option<String>,
    pub mod_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct ScanOutput {
    pub files: Vec<ScannedFile>,
    /// Rejected files with the kind bucket they count against
    pub skipped: Vec<(EntityKind, ReportEntry)>,
    /// Problems that did not cost a file (unreadable directories)
    pub warnings: Vec<ReportEntry>,
}

pub struct Scanner<'a> {
    registry: &'a PatternRegistry,
    project_root: &'a Path,
}

impl<'a> Scanner<'a> {
    pub fn new(registry: &'a PatternRegistry, project_root: &'a Path) -> Self {
        Self {
            registry,
            project_root,
        }
    }

    /// Walk `scan_root` in file-name order
    pub fn scan(&self, scan_root: &Path) -> ScanOutput {
        let mut output = ScanOutput::default();
        let index_path = scan_root.join(INDEX_FILE_NAME);

        let walker = WalkDir::new(scan_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| self.rel(p))
                        .unwrap_or_else(|| self.rel(scan_root));
                    tracing::warn!(%path, error = %err, "cannot read directory entry");
                    output.warnings.push(
                        ReportEntry::new(
                            ErrorType::FileAccessError,
                            path,
                            format!("Cannot read: {}", err),
                        )
                        .with_fix("Check the permissions on this directory"),
                    );
                    continue;
                }
            };

            if !is_markdown(entry.path()) || entry.path() == index_path {
                continue;
            }

            let rel_path = self.rel(entry.path());
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                output.skipped.push((
                    self.bucket(&rel_path),
                    ReportEntry::new(
                        ErrorType::FileAccessError,
                        &rel_path,
                        "Symbolic links are not followed",
                    )
                    .with_fix("Replace the link with the file it points to"),
                ));
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    output.skipped.push((
                        self.bucket(&rel_path),
                        ReportEntry::new(
                            ErrorType::FileAccessError,
                            &rel_path,
                            format!("Cannot stat file: {}", err),
                        )
                        .with_fix("Check the file permissions"),
                    ));
                    continue;
                }
            };

            if metadata.len() > MAX_FILE_SIZE {
                output.skipped.push((
                    self.bucket(&rel_path),
                    ReportEntry::new(
                        ErrorType::FileAccessError,
                        &rel_path,
                        format!(
                            "File is {} bytes, larger than the {} byte limit",
                            metadata.len(),
                            MAX_FILE_SIZE
                        ),
                    )
                    .with_fix("Split the document into smaller files"),
                ));
                continue;
            }

            let Some(matched) = self.registry.classify(&rel_path) else {
                output.skipped.push((
                    EntityKind::RelatedDoc,
                    ReportEntry::new(
                        ErrorType::PatternMismatch,
                        &rel_path,
                        "File name does not match any enabled pattern",
                    )
                    .with_fix("Rename the file to follow the epic/feature/task layout or add a pattern in .plansync/config.yaml"),
                ));
                continue;
            };

            output.files.push(ScannedFile {
                path: entry.path().to_path_buf(),
                rel_path,
                pattern: matched.pattern.name.clone(),
                kind: matched.pattern.kind,
                extracted_key: matched.key,
                parent_hint: matched.parent,
                mod_time: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        tracing::debug!(
            files = output.files.len(),
            skipped = output.skipped.len(),
            "scan complete"
        );
        output
    }

    fn rel(&self, path: &Path) -> String {
        let rel = path.strip_prefix(self.project_root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Kind bucket for a file rejected before parsing
    fn bucket(&self, rel_path: &str) -> EntityKind {
        self.registry
            .classify(rel_path)
            .map(|m| m.pattern.kind)
            .unwrap_or(EntityKind::RelatedDoc)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_markdown(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "md")
}
