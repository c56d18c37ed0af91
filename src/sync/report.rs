//! Scan report: the serializable summary of one sync run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::ValidationLevel;
use crate::core::identity::EntityKind;
use crate::sync::detector::Conflict;
use crate::sync::incremental::FilterStats;

/// Version of the report layout
pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// Classification of a report entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ParseError,
    ValidationFailure,
    ValidationWarning,
    PatternMismatch,
    FileAccessError,
    /// Skipped by the incremental filter
    Unchanged,
}

impl ErrorType {
    /// Whether an entry of this type makes the run fail
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ErrorType::ParseError | ErrorType::ValidationFailure | ErrorType::FileAccessError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ParseError => "parse_error",
            ErrorType::ValidationFailure => "validation_failure",
            ErrorType::ValidationWarning => "validation_warning",
            ErrorType::PatternMismatch => "pattern_mismatch",
            ErrorType::FileAccessError => "file_access_error",
            ErrorType::Unchanged => "unchanged",
        }
    }
}

/// One skipped file, error or warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub file_path: String,
    pub reason: String,
    pub suggested_fix: String,
    pub error_type: ErrorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<usize>,
}

impl ReportEntry {
    pub fn new(error_type: ErrorType, file_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            reason: reason.into(),
            suggested_fix: String::new(),
            error_type,
            line_number: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = fix.into();
        self
    }

    pub fn at_line(mut self, line: Option<usize>) -> Self {
        self.line_number = line;
        self
    }

    /// Same entry reclassified (used when strict validation escalates warnings)
    pub fn escalated(mut self) -> Self {
        self.error_type = ErrorType::ValidationFailure;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
    pub validation_level: ValidationLevel,
    pub documentation_root: String,
    pub patterns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub scanned: usize,
    pub matched: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub matched: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBreakdown {
    pub epics: KindCounts,
    pub features: KindCounts,
    pub tasks: KindCounts,
    pub related_docs: KindCounts,
}

impl EntityBreakdown {
    pub fn get(&self, kind: EntityKind) -> &KindCounts {
        match kind {
            EntityKind::Epic => &self.epics,
            EntityKind::Feature => &self.features,
            EntityKind::Task => &self.tasks,
            EntityKind::RelatedDoc => &self.related_docs,
        }
    }

    fn get_mut(&mut self, kind: EntityKind) -> &mut KindCounts {
        match kind {
            EntityKind::Epic => &mut self.epics,
            EntityKind::Feature => &mut self.features,
            EntityKind::Task => &mut self.tasks,
            EntityKind::RelatedDoc => &mut self.related_docs,
        }
    }

    /// Sum over all kinds
    pub fn totals(&self) -> KindCounts {
        EntityKind::all()
            .iter()
            .map(|k| self.get(*k))
            .fold(KindCounts::default(), |acc, c| KindCounts {
                matched: acc.matched + c.matched,
                skipped: acc.skipped + c.skipped,
            })
    }
}

/// A record touched (or that would be touched) by the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub kind: EntityKind,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Store mutations made by the run (planned ones for a dry run)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub created: Vec<RecordRef>,
    pub updated: Vec<RecordRef>,
    pub parents_created: Vec<RecordRef>,
    pub deleted: Vec<RecordRef>,
    pub unchanged: usize,
}

impl ChangeSummary {
    /// Number of row mutations
    pub fn mutation_count(&self) -> usize {
        self.created.len() + self.updated.len() + self.parents_created.len() + self.deleted.len()
    }
}

/// The full report
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub schema_version: String,
    pub status: ReportStatus,
    pub dry_run: bool,
    pub metadata: ReportMetadata,
    pub counts: Counts,
    pub entities: EntityBreakdown,
    pub skipped_files: Vec<ReportEntry>,
    pub errors: Vec<ReportEntry>,
    pub warnings: Vec<ReportEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
    pub changes: ChangeSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental: Option<FilterStats>,
}

impl ScanReport {
    pub fn new(dry_run: bool, metadata: ReportMetadata) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            status: ReportStatus::Success,
            dry_run,
            metadata,
            counts: Counts::default(),
            entities: EntityBreakdown::default(),
            skipped_files: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            conflicts: Vec::new(),
            changes: ChangeSummary::default(),
            incremental: None,
        }
    }

    /// Record a scanned file that made it into the resolved set
    pub fn add_matched(&mut self, kind: EntityKind) {
        self.counts.scanned += 1;
        self.counts.matched += 1;
        self.entities.get_mut(kind).matched += 1;
    }

    /// Record a scanned file that did not; error-class entries also land in `errors`
    pub fn add_skipped(&mut self, kind: EntityKind, entry: ReportEntry) {
        self.counts.scanned += 1;
        self.counts.skipped += 1;
        self.entities.get_mut(kind).skipped += 1;

        if entry.error_type.is_error() {
            self.errors.push(entry.clone());
        } else if entry.error_type == ErrorType::ValidationWarning {
            self.warnings.push(entry.clone());
        }
        self.skipped_files.push(entry);
    }

    /// Record a warning that does not affect counts
    pub fn add_warning(&mut self, entry: ReportEntry) {
        self.warnings.push(entry);
    }

    /// Record an error that does not affect counts
    pub fn add_error(&mut self, entry: ReportEntry) {
        self.errors.push(entry);
    }

    /// Sort entries deterministically and settle the status
    pub fn finalize(&mut self, duration_seconds: f64) {
        self.metadata.duration_seconds = duration_seconds;

        for list in [&mut self.skipped_files, &mut self.errors, &mut self.warnings] {
            list.sort_by(|a, b| {
                a.error_type
                    .cmp(&b.error_type)
                    .then_with(|| a.file_path.cmp(&b.file_path))
            });
        }
        self.conflicts.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        self.status = if self.errors.is_empty() {
            ReportStatus::Success
        } else {
            ReportStatus::Failure
        };
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }

    /// Check the count invariants
    pub fn counts_reconcile(&self) -> bool {
        let totals = self.entities.totals();
        self.counts.scanned == self.counts.matched + self.counts.skipped
            && totals.matched == self.counts.matched
            && totals.skipped == self.counts.skipped
            && self.skipped_files.len() == self.counts.skipped
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            timestamp: Utc::now(),
            duration_seconds: 0.0,
            validation_level: ValidationLevel::Balanced,
            documentation_root: "docs/plan".to_string(),
            patterns: BTreeMap::new(),
        }
    }

    #[test]
    fn test_counts_reconcile_after_mixed_entries() {
        let mut report = ScanReport::new(false, metadata());
        report.add_matched(EntityKind::Task);
        report.add_matched(EntityKind::Epic);
        report.add_skipped(
            EntityKind::Task,
            ReportEntry::new(ErrorType::ParseError, "a.md", "bad yaml"),
        );
        report.add_skipped(
            EntityKind::RelatedDoc,
            ReportEntry::new(ErrorType::PatternMismatch, "README.md", "no pattern"),
        );
        report.add_warning(ReportEntry::new(ErrorType::ValidationWarning, "b.md", "no title"));

        assert_eq!(report.counts.scanned, 4);
        assert_eq!(report.counts.matched, 2);
        assert_eq!(report.counts.skipped, 2);
        assert!(report.counts_reconcile());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_status_follows_errors_only() {
        let mut report = ScanReport::new(false, metadata());
        report.add_warning(ReportEntry::new(ErrorType::ValidationWarning, "b.md", "no title"));
        report.finalize(0.1);
        assert!(report.is_success());

        report.add_skipped(
            EntityKind::Task,
            ReportEntry::new(ErrorType::ValidationFailure, "a.md", "missing parent"),
        );
        report.finalize(0.1);
        assert_eq!(report.status, ReportStatus::Failure);
    }

    #[test]
    fn test_unchanged_is_not_an_error() {
        let mut report = ScanReport::new(false, metadata());
        report.add_skipped(
            EntityKind::Epic,
            ReportEntry::new(ErrorType::Unchanged, "epic.md", "unchanged since last sync"),
        );
        report.finalize(0.0);
        assert!(report.is_success());
        assert!(report.errors.is_empty());
        assert_eq!(report.skipped_files.len(), 1);
    }

    #[test]
    fn test_entries_sorted_by_type_then_path() {
        let mut report = ScanReport::new(false, metadata());
        report.add_warning(ReportEntry::new(ErrorType::ValidationWarning, "z.md", "w"));
        report.add_warning(ReportEntry::new(ErrorType::ValidationWarning, "a.md", "w"));
        report.add_warning(ReportEntry::new(ErrorType::FileAccessError, "m", "w"));
        report.finalize(0.0);

        let paths: Vec<_> = report.warnings.iter().map(|w| w.file_path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "z.md", "m"]);
    }

    #[test]
    fn test_json_uses_documented_field_names() {
        let mut report = ScanReport::new(true, metadata());
        report.add_skipped(
            EntityKind::Task,
            ReportEntry::new(ErrorType::ParseError, "t.md", "bad").at_line(Some(3)),
        );
        report.finalize(0.5);

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["schema_version"], "1.0");
        assert_eq!(value["status"], "failure");
        assert_eq!(value["dry_run"], true);
        assert_eq!(value["metadata"]["validation_level"], "balanced");
        assert_eq!(value["entities"]["tasks"]["skipped"], 1);
        assert_eq!(value["errors"][0]["error_type"], "parse_error");
        assert_eq!(value["errors"][0]["line_number"], 3);
        assert!(value["warnings"].as_array().unwrap().is_empty());
    }
}
