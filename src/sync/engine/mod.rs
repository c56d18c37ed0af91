//! The sync engine: scan, parse, filter, detect, resolve and apply
//!
//! One run walks a fixed state sequence:
//!
//! ```text
//! Idle → Scanning → Parsing → Filtering → Detecting → Resolving
//!      → { DryRunReport | Applying → Committed } → Reported
//! ```
//!
//! Nothing is written before `Applying`, and everything written during
//! `Applying` goes through one store transaction.

mod plan;

use plan::{ChangePlan, ParsedPaths, StoredIndex};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use miette::Diagnostic;
use thiserror::Error;

use crate::core::config::{Config, ConfigError, ValidationLevel};
use crate::core::entity::{DiscoveredEntity, SourceOrigin};
use crate::core::identity::{EntityKey, EntityKind};
use crate::core::patterns::PatternRegistry;
use crate::core::store::{EntityStore, StoreError};
use crate::sync::detector::{detect_conflicts, EntitySet};
use crate::sync::incremental::{IncrementalFilter, KnownRecord, KnownRecords};
use crate::sync::index::{folder_parent, load_index, IndexError};
use crate::sync::parser::RecordParser;
use crate::sync::report::{ErrorType, ReportEntry, ReportMetadata, ScanReport};
use crate::sync::resolver::{
    CounterpartRule, ResolutionStrategy, ResolutionWarning, ResolveError, Resolver, WarningReason,
};
use crate::sync::scanner::Scanner;
use crate::sync::state::{StateError, SyncState, SyncStateStore};

/// Stage of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Scanning,
    Parsing,
    Filtering,
    Detecting,
    Resolving,
    DryRunReport,
    Applying,
    Committed,
    Reported,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Scanning => "scanning",
            EngineState::Parsing => "parsing",
            EngineState::Filtering => "filtering",
            EngineState::Detecting => "detecting",
            EngineState::Resolving => "resolving",
            EngineState::DryRunReport => "dry_run_report",
            EngineState::Applying => "applying",
            EngineState::Committed => "committed",
            EngineState::Reported => "reported",
        }
    }

    /// Whether `next` may follow this state
    pub fn can_transition_to(&self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (*self, next),
            (Idle, Scanning)
                | (Scanning, Parsing)
                | (Parsing, Filtering)
                | (Filtering, Detecting)
                | (Detecting, Resolving)
                | (Resolving, DryRunReport)
                | (Resolving, Applying)
                | (Applying, Committed)
                | (DryRunReport, Reported)
                | (Committed, Reported)
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that abort a whole run
#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("Scan root {path} does not exist or is not a directory")]
    #[diagnostic(
        code(plansync::sync::invalid_root),
        help("Pass an existing folder with --folder or set docs_root in .plansync/config.yaml")
    )]
    InvalidRoot { path: PathBuf },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(#[from] IndexError),

    #[error("Illegal engine transition from {from} to {to}")]
    #[diagnostic(code(plansync::sync::transition))]
    InvalidTransition { from: EngineState, to: EngineState },
}

impl SyncError {
    /// Whether the same run may succeed if retried (busy store)
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Store(e) if e.is_retryable())
    }
}

/// Parameters of one run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Folder to scan, relative to the project root or absolute
    pub folder: PathBuf,
    pub dry_run: bool,
    /// File-vs-store strategy name
    pub strategy: String,
    pub create_missing: bool,
    pub cleanup: bool,
    pub force_full_scan: bool,
    /// Reconcile epic-index.md against the folder layout first
    pub use_index: bool,
    /// Index-vs-folder strategy name
    pub index_strategy: String,
    pub validation_level: ValidationLevel,
}

impl SyncOptions {
    /// Options taking every default from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            folder: config.docs_root(),
            dry_run: false,
            strategy: config.strategy().to_string(),
            create_missing: false,
            cleanup: false,
            force_full_scan: false,
            use_index: false,
            index_strategy: config.index_strategy().to_string(),
            validation_level: config.validation_level(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of a completed run
#[derive(Debug)]
pub struct SyncOutcome {
    pub report: ScanReport,
    /// Every state the engine passed through, in order
    pub states: Vec<EngineState>,
    /// Whether the last sync time was advanced
    pub last_sync_written: bool,
}

pub struct SyncEngine<'a> {
    project_root: &'a Path,
    registry: &'a PatternRegistry,
    store: &'a mut EntityStore,
    sync_state: &'a dyn SyncStateStore,
    state: EngineState,
    history: Vec<EngineState>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        project_root: &'a Path,
        registry: &'a PatternRegistry,
        store: &'a mut EntityStore,
        sync_state: &'a dyn SyncStateStore,
    ) -> Self {
        Self {
            project_root,
            registry,
            store,
            sync_state,
            state: EngineState::Idle,
            history: vec![EngineState::Idle],
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    fn transition(&mut self, next: EngineState) -> Result<(), SyncError> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = %self.state, to = %next, "engine transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    fn rel(&self, path: &Path) -> String {
        let rel = path.strip_prefix(self.project_root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Run one synchronization
    pub fn run(mut self, options: &SyncOptions) -> Result<SyncOutcome, SyncError> {
        let started = Instant::now();

        // Everything that can fail up front does so before the tree is touched
        let strategy: ResolutionStrategy = options.strategy.parse()?;
        let index_strategy: Option<ResolutionStrategy> = if options.use_index {
            Some(options.index_strategy.parse()?)
        } else {
            None
        };
        let scan_root = self.project_root.join(&options.folder);
        if !scan_root.is_dir() {
            return Err(SyncError::InvalidRoot { path: scan_root });
        }
        let last_sync = self.sync_state.load()?.last_sync;
        let scan_started = Utc::now();
        let scope = self.rel(&scan_root);

        // Scanning
        self.transition(EngineState::Scanning)?;
        let mut report = ScanReport::new(
            options.dry_run,
            ReportMetadata {
                timestamp: scan_started,
                duration_seconds: 0.0,
                validation_level: options.validation_level,
                documentation_root: scope.clone(),
                patterns: self.registry.active(),
            },
        );

        let scan = Scanner::new(self.registry, self.project_root).scan(&scan_root);
        for (kind, entry) in scan.skipped {
            tracing::warn!(file = %entry.file_path, reason = %entry.reason, "file skipped");
            report.add_skipped(kind, entry);
        }
        for entry in scan.warnings {
            report.add_warning(entry);
        }

        // Parsing
        self.transition(EngineState::Parsing)?;
        let parser = RecordParser::new(options.validation_level);
        let mut parsed: Vec<DiscoveredEntity> = Vec::new();
        let mut first_path: HashMap<(EntityKind, EntityKey), String> = HashMap::new();

        for file in &scan.files {
            let record = match parser.parse_file(file) {
                Ok(record) => record,
                Err(entry) => {
                    tracing::warn!(file = %entry.file_path, reason = %entry.reason, "file rejected");
                    report.add_skipped(file.kind, entry);
                    continue;
                }
            };

            let id = (record.entity.kind, record.entity.key.clone());
            if let Some(first) = first_path.get(&id) {
                report.add_skipped(
                    file.kind,
                    ReportEntry::new(
                        ErrorType::ValidationFailure,
                        &file.rel_path,
                        format!("Duplicate {} key {}: already defined in {}", id.0, id.1, first),
                    )
                    .with_fix("Give each record a unique key"),
                );
                continue;
            }

            for warning in record.warnings {
                report.add_warning(warning);
            }
            first_path.insert(id, file.rel_path.clone());
            parsed.push(record.entity);
        }

        let parsed_keys: HashSet<(EntityKind, String)> = parsed
            .iter()
            .map(|e| (e.kind, e.key.to_string()))
            .collect();
        let parsed_paths: ParsedPaths = parsed
            .iter()
            .filter_map(|e| {
                e.file_path
                    .clone()
                    .map(|p| (p, (e.kind, e.key.to_string())))
            })
            .collect();

        let mut index_only = Vec::new();
        if let Some(index_strategy) = index_strategy {
            let (kept, declared_only) =
                self.reconcile_index(&scan_root, index_strategy, parsed, &mut report)?;
            parsed = kept;
            index_only = declared_only;
        }

        // Filtering
        self.transition(EngineState::Filtering)?;
        let stored = self.load_stored()?;
        let known: KnownRecords = stored
            .iter()
            .map(|(id, row)| {
                (
                    id.clone(),
                    KnownRecord {
                        file_path: row.file_path.clone(),
                        content_hash: row.file_hash.clone(),
                    },
                )
            })
            .collect();

        let outcome = IncrementalFilter::new(last_sync, options.force_full_scan).filter(parsed, &known);
        for entity in &outcome.future_dated {
            let mtime = entity.mod_time.map(|t| t.to_rfc3339()).unwrap_or_default();
            report.add_warning(
                ReportEntry::new(
                    ErrorType::ValidationWarning,
                    entity.file_path.clone().unwrap_or_default(),
                    format!("Modification time {} is in the future", mtime),
                )
                .with_fix("Check the system clock or touch the file"),
            );
        }
        for entity in outcome.unchanged {
            report.add_skipped(
                entity.kind,
                ReportEntry::new(
                    ErrorType::Unchanged,
                    entity.file_path.clone().unwrap_or_default(),
                    "Unchanged since last sync",
                )
                .with_fix("Run with --force-full-scan to re-import"),
            );
        }
        report.incremental = Some(outcome.stats);
        tracing::debug!(stats = ?outcome.stats, "incremental filter applied");

        // Files of this run still awaiting a verdict
        let mut pending: BTreeMap<(EntityKind, EntityKey), String> = outcome
            .processed
            .iter()
            .filter_map(|e| e.file_path.clone().map(|p| ((e.kind, e.key.clone()), p)))
            .collect();

        // Detecting
        self.transition(EngineState::Detecting)?;
        let mut left_entities = outcome.processed;
        left_entities.extend(index_only);

        let mut right_entities: Vec<DiscoveredEntity> = left_entities
            .iter()
            .filter_map(|e| stored.get(&(e.kind, e.key.to_string())))
            .filter_map(|row| row.to_entity())
            .collect();
        let orphans = plan::orphans(&stored, &parsed_keys, &parsed_paths, self.project_root, &scope);
        right_entities.extend(orphans.iter().filter_map(|row| row.to_entity()));

        let left = EntitySet::new(SourceOrigin::File, left_entities);
        let right = EntitySet::new(SourceOrigin::Store, right_entities);
        let mut conflicts = detect_conflicts(&left, &right);

        // Resolving
        self.transition(EngineState::Resolving)?;
        let resolution = Resolver::new(strategy, CounterpartRule::Optional).resolve(&left, &right)?;
        resolution.annotate(&mut conflicts);
        for warning in &resolution.warnings {
            record_resolution_warning(&mut report, &mut pending, warning, SourceOrigin::File);
        }

        let (valid, placeholders) =
            validate_parents(resolution.entities, &stored, options.create_missing, &mut report, &mut pending);

        for (kind, _) in std::mem::take(&mut pending).into_keys() {
            report.add_matched(kind);
        }

        let plan = ChangePlan::build(valid, placeholders, &stored);
        report.changes = plan.summary();

        let mut last_sync_written = false;
        if options.dry_run {
            self.transition(EngineState::DryRunReport)?;
            if options.cleanup {
                let preview = plan::preview_cleanup(&orphans, &stored);
                report.changes.deleted = preview.deleted;
                for entry in preview.kept {
                    report.add_warning(entry);
                }
            }
        } else {
            self.transition(EngineState::Applying)?;
            {
                let tx = self.store.transaction()?;
                plan.apply(&tx, &conflicts)?;
                tx.commit()?;
            }
            self.transition(EngineState::Committed)?;
            tracing::info!(
                created = plan.creates.len(),
                updated = plan.updates.len(),
                parents = plan.placeholders.len(),
                "sync committed"
            );

            if options.cleanup {
                let tx = self.store.transaction()?;
                let cleaned = plan::apply_cleanup(&tx, &orphans)?;
                tx.commit()?;
                tracing::info!(deleted = cleaned.deleted.len(), "cleanup committed");
                report.changes.deleted = cleaned.deleted;
                for entry in cleaned.kept {
                    report.add_warning(entry);
                }
            }

            // A run with errors leaves the window open so rejected files are retried
            if report.errors.is_empty() {
                self.sync_state.save(&SyncState {
                    last_sync: Some(scan_started),
                })?;
                last_sync_written = true;
            }
        }

        report.conflicts.extend(conflicts);
        self.transition(EngineState::Reported)?;
        report.finalize(started.elapsed().as_secs_f64());

        Ok(SyncOutcome {
            report,
            states: self.history,
            last_sync_written,
        })
    }

    fn load_stored(&self) -> Result<StoredIndex, SyncError> {
        let mut stored = StoredIndex::new();
        for kind in EntityKind::all() {
            for row in self.store.list(*kind)? {
                stored.insert((row.kind, row.key.clone()), row);
            }
        }
        Ok(stored)
    }

    /// Reconcile epic-index.md (left) against the parsed epic and feature folders (right)
    ///
    /// Returns the parsed entities with resolved values applied, and the
    /// entities only the index declares.
    fn reconcile_index(
        &self,
        scan_root: &Path,
        strategy: ResolutionStrategy,
        parsed: Vec<DiscoveredEntity>,
        report: &mut ScanReport,
    ) -> Result<(Vec<DiscoveredEntity>, Vec<DiscoveredEntity>), SyncError> {
        let declared = load_index(scan_root)?;

        let folders: Vec<DiscoveredEntity> = parsed
            .iter()
            .filter(|e| matches!(e.kind, EntityKind::Epic | EntityKind::Feature))
            .map(|e| {
                let mut folder = e.clone();
                folder.origin = SourceOrigin::Folder;
                if e.kind == EntityKind::Feature {
                    if let Some(parent) = e.file_path.as_deref().and_then(folder_parent) {
                        folder.parent_key = Some(parent);
                    }
                }
                folder
            })
            .collect();

        let left = EntitySet::new(SourceOrigin::Index, declared);
        let right = EntitySet::new(SourceOrigin::Folder, folders);
        let mut conflicts = detect_conflicts(&left, &right);
        let resolution = Resolver::new(strategy, CounterpartRule::Required).resolve(&left, &right)?;
        resolution.annotate(&mut conflicts);
        tracing::debug!(conflicts = conflicts.len(), %strategy, "epic index reconciled");
        report.conflicts.extend(conflicts);

        let mut dropped: HashSet<(EntityKind, EntityKey)> = HashSet::new();
        for warning in &resolution.warnings {
            if warning.reason == WarningReason::Dropped && warning.origin == SourceOrigin::Folder {
                dropped.insert((warning.kind, warning.key.clone()));
                report.add_skipped(warning.kind, warning_entry(warning));
            } else {
                report.add_warning(warning_entry(warning));
            }
        }

        let mut resolved: HashMap<(EntityKind, EntityKey), DiscoveredEntity> = resolution
            .entities
            .into_iter()
            .map(|e| ((e.kind, e.key.clone()), e))
            .collect();

        let mut kept = Vec::with_capacity(parsed.len());
        for entity in parsed {
            let id = (entity.kind, entity.key.clone());
            if dropped.contains(&id) {
                continue;
            }
            match resolved.remove(&id) {
                Some(mut winner) => {
                    winner.origin = SourceOrigin::File;
                    kept.push(winner);
                }
                None => kept.push(entity),
            }
        }

        let mut declared_only: Vec<DiscoveredEntity> = resolved.into_values().collect();
        declared_only.sort_by(|a, b| (a.kind, &a.key).cmp(&(b.kind, &b.key)));
        Ok((kept, declared_only))
    }
}

fn warning_entry(warning: &ResolutionWarning) -> ReportEntry {
    let fix = match warning.reason {
        WarningReason::Dropped => "Add the record to the other source or pick a different strategy",
        WarningReason::ParentMismatch => "Move the folder or correct the parent so both sources agree",
    };
    ReportEntry::new(
        ErrorType::ValidationWarning,
        warning.file_path.clone().unwrap_or_else(|| warning.key.to_string()),
        warning.message.clone(),
    )
    .with_fix(fix)
}

/// Count a dropped file against the run; everything else is a plain warning
fn record_resolution_warning(
    report: &mut ScanReport,
    pending: &mut BTreeMap<(EntityKind, EntityKey), String>,
    warning: &ResolutionWarning,
    file_origin: SourceOrigin,
) {
    let id = (warning.kind, warning.key.clone());
    if warning.reason == WarningReason::Dropped
        && warning.origin == file_origin
        && pending.remove(&id).is_some()
    {
        report.add_skipped(warning.kind, warning_entry(warning));
        return;
    }
    report.add_warning(warning_entry(warning));
}

/// Check every resolved entity's parent, kind by kind
///
/// A parent is available when it was validated earlier in this pass or
/// already exists in the store. With `create_missing`, absent parents are
/// synthesized (recursively up to the epic).
fn validate_parents(
    resolved: Vec<DiscoveredEntity>,
    stored: &StoredIndex,
    create_missing: bool,
    report: &mut ScanReport,
    pending: &mut BTreeMap<(EntityKind, EntityKey), String>,
) -> (Vec<DiscoveredEntity>, Vec<DiscoveredEntity>) {
    let mut available: HashSet<(EntityKind, String)> = stored.keys().cloned().collect();
    let mut valid = Vec::with_capacity(resolved.len());
    let mut placeholders = Vec::new();

    let mut by_kind: BTreeMap<EntityKind, Vec<DiscoveredEntity>> = BTreeMap::new();
    for entity in resolved {
        by_kind.entry(entity.kind).or_default().push(entity);
    }

    for kind in EntityKind::all() {
        for entity in by_kind.remove(kind).unwrap_or_default() {
            if let (Some(parent_kind), Some(parent)) = (kind.parent(), entity.parent_key.clone()) {
                if !available.contains(&(parent_kind, parent.to_string())) {
                    if create_missing {
                        synthesize_chain(parent_kind, parent, &mut available, &mut placeholders);
                    } else {
                        let entry = ReportEntry::new(
                            ErrorType::ValidationFailure,
                            entity.file_path.clone().unwrap_or_else(|| entity.key.to_string()),
                            format!(
                                "Parent {} {} of {} {} does not exist",
                                parent_kind, parent, kind, entity.key
                            ),
                        )
                        .with_fix(format!(
                            "Create {} {} first or re-run with --create-missing",
                            parent_kind, parent
                        ));
                        tracing::warn!(key = %entity.key, parent = %parent, "missing parent");
                        if pending.remove(&(entity.kind, entity.key.clone())).is_some() {
                            report.add_skipped(entity.kind, entry);
                        } else {
                            report.add_error(entry);
                        }
                        continue;
                    }
                }
            }
            available.insert((entity.kind, entity.key.to_string()));
            valid.push(entity);
        }
    }

    (valid, placeholders)
}

fn synthesize_chain(
    kind: EntityKind,
    key: EntityKey,
    available: &mut HashSet<(EntityKind, String)>,
    placeholders: &mut Vec<DiscoveredEntity>,
) {
    let mut next = Some((kind, key));
    while let Some((kind, key)) = next.take() {
        if !available.insert((kind, key.to_string())) {
            break;
        }
        let placeholder = DiscoveredEntity::placeholder(kind, key);
        next = kind.parent().zip(placeholder.parent_key.clone());
        placeholders.push(placeholder);
    }
}

#[cfg(test)]
mod tests;
