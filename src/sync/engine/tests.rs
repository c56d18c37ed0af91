use std::fs;
use std::path::Path;
use std::time::{Duration as StdDuration, SystemTime};

use tempfile::{tempdir, TempDir};

use super::*;
use crate::core::store::EntityStore;
use crate::sync::detector::ConflictType;
use crate::sync::state::MemorySyncState;

const FEATURE_DIR: &str = "docs/plan/E01-core/E01-F01-sync";

fn create_test_project() -> TempDir {
    let tmp = tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("docs/plan")).unwrap();
    tmp
}

fn write_test_entity(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn age_file(root: &Path, rel: &str, age: StdDuration) {
    let file = fs::File::options().write(true).open(root.join(rel)).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn task_rel(n: u32) -> String {
    format!("{}/tasks/T-E01-F01-{:03}.md", FEATURE_DIR, n)
}

fn task_doc(n: u32, title: &str) -> String {
    format!("---\nkey: T-E01-F01-{:03}\ntitle: {}\n---\n\nBody\n", n, title)
}

fn write_hierarchy(root: &Path) {
    write_test_entity(root, "docs/plan/E01-core/epic.md", "---\nkey: E01\ntitle: Core\n---\n");
    write_test_entity(
        root,
        &format!("{}/prd.md", FEATURE_DIR),
        "---\nkey: E01-F01\ntitle: Sync\n---\n",
    );
}

fn key(kind: EntityKind, raw: &str) -> EntityKey {
    EntityKey::parse(kind, raw).unwrap()
}

fn seed_parents(store: &mut EntityStore) {
    let tx = store.transaction().unwrap();
    tx.insert(&DiscoveredEntity::new(
        EntityKind::Epic,
        key(EntityKind::Epic, "E01"),
        "Core",
        SourceOrigin::Store,
    ))
    .unwrap();
    tx.insert(&DiscoveredEntity::new(
        EntityKind::Feature,
        key(EntityKind::Feature, "E01-F01"),
        "Sync",
        SourceOrigin::Store,
    ))
    .unwrap();
    tx.commit().unwrap();
}

fn run(
    root: &Path,
    store: &mut EntityStore,
    state: &MemorySyncState,
    options: &SyncOptions,
) -> Result<SyncOutcome, SyncError> {
    let registry = PatternRegistry::defaults().unwrap();
    SyncEngine::new(root, &registry, store, state).run(options)
}

fn options() -> SyncOptions {
    SyncOptions::default()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_single_task_with_existing_parent() {
    let project = create_test_project();
    let root = project.path();
    write_test_entity(root, &task_rel(1), &task_doc(1, "Set up store"));

    let mut store = EntityStore::open_in_memory().unwrap();
    seed_parents(&mut store);
    let state = MemorySyncState::new(None);

    let outcome = run(root, &mut store, &state, &options()).unwrap();
    let report = &outcome.report;

    assert_eq!(report.counts.scanned, 1);
    assert_eq!(report.counts.matched, 1);
    assert_eq!(report.counts.skipped, 0);
    assert!(report.counts_reconcile());
    assert!(report.is_success());
    assert_eq!(report.changes.created.len(), 1);

    let row = store.get(EntityKind::Task, "T-E01-F01-001").unwrap().unwrap();
    assert_eq!(row.title, "Set up store");
    assert_eq!(row.file_path.as_deref(), Some(task_rel(1).as_str()));
    assert_eq!(store.task_history("T-E01-F01-001").unwrap()[0].notes, "Imported from file");
    assert!(outcome.last_sync_written);
    assert!(state.last_sync().is_some());
}

#[test]
fn test_missing_parent_is_validation_failure() {
    let project = create_test_project();
    let root = project.path();
    write_test_entity(root, &task_rel(1), &task_doc(1, "Orphan task"));

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);

    let outcome = run(root, &mut store, &state, &options()).unwrap();
    let report = &outcome.report;

    assert_eq!(report.counts.skipped, 1);
    assert_eq!(report.counts.matched, 0);
    assert!(report.counts_reconcile());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].error_type, ErrorType::ValidationFailure);
    assert!(report.errors[0].reason.contains("E01-F01"));
    assert!(!report.is_success());
    assert!(store.get(EntityKind::Task, "T-E01-F01-001").unwrap().is_none());
    assert!(!outcome.last_sync_written);
}

#[test]
fn test_file_title_wins_under_file_wins() {
    let project = create_test_project();
    let root = project.path();
    write_test_entity(root, &task_rel(1), &task_doc(1, "New Title"));

    let mut store = EntityStore::open_in_memory().unwrap();
    seed_parents(&mut store);
    {
        let tx = store.transaction().unwrap();
        tx.insert(
            &DiscoveredEntity::new(
                EntityKind::Task,
                key(EntityKind::Task, "T-E01-F01-001"),
                "Old Title",
                SourceOrigin::Store,
            )
            .with_file(task_rel(1), None),
        )
        .unwrap();
        tx.commit().unwrap();
    }
    let state = MemorySyncState::new(None);

    let mut opts = options();
    opts.strategy = "file-wins".to_string();
    let outcome = run(root, &mut store, &state, &opts).unwrap();
    let report = &outcome.report;

    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::FieldMismatch);
    assert_eq!(conflict.field.as_deref(), Some("title"));
    assert_eq!(conflict.resolution.as_deref(), Some("file value applied"));

    let row = store.get(EntityKind::Task, "T-E01-F01-001").unwrap().unwrap();
    assert_eq!(row.title, "New Title");
    assert_eq!(report.changes.updated.len(), 1);
    assert_eq!(
        store.task_history("T-E01-F01-001").unwrap()[0].notes,
        "Updated from file (1 conflicts resolved)"
    );
}

#[test]
fn test_store_title_kept_under_database_wins() {
    let project = create_test_project();
    let root = project.path();
    write_test_entity(root, &task_rel(1), &task_doc(1, "New Title"));

    let mut store = EntityStore::open_in_memory().unwrap();
    seed_parents(&mut store);
    {
        let tx = store.transaction().unwrap();
        tx.insert(
            &DiscoveredEntity::new(
                EntityKind::Task,
                key(EntityKind::Task, "T-E01-F01-001"),
                "Old Title",
                SourceOrigin::Store,
            )
            .with_file(task_rel(1), None),
        )
        .unwrap();
        tx.commit().unwrap();
    }
    let state = MemorySyncState::new(None);

    let mut opts = options();
    opts.strategy = "database-wins".to_string();
    let outcome = run(root, &mut store, &state, &opts).unwrap();

    let row = store.get(EntityKind::Task, "T-E01-F01-001").unwrap().unwrap();
    assert_eq!(row.title, "Old Title");
    assert_eq!(
        outcome.report.conflicts[0].resolution.as_deref(),
        Some("store value kept")
    );
}

#[test]
fn test_old_files_are_unchanged_on_incremental_run() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(root, &task_rel(1), &task_doc(1, "One"));
    write_test_entity(root, &task_rel(2), &task_doc(2, "Two"));
    for rel in [
        "docs/plan/E01-core/epic.md".to_string(),
        format!("{}/prd.md", FEATURE_DIR),
        task_rel(1),
        task_rel(2),
    ] {
        age_file(root, &rel, StdDuration::from_secs(3600));
    }

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let first = run(root, &mut store, &state, &options()).unwrap();
    assert_eq!(first.report.counts.matched, 4);
    assert!(first.last_sync_written);

    let second = run(root, &mut store, &state, &options()).unwrap();
    let report = &second.report;
    let stats = report.incremental.unwrap();
    assert_eq!(stats.processed, 0);
    assert_eq!(report.counts.skipped, 4);
    assert!(report
        .skipped_files
        .iter()
        .all(|e| e.error_type == ErrorType::Unchanged));
    assert!(report.counts_reconcile());
}

#[test]
fn test_rerun_makes_no_mutations() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(root, &task_rel(1), &task_doc(1, "One"));

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let first = run(root, &mut store, &state, &options()).unwrap();
    assert_eq!(first.report.changes.created.len(), 3);

    // Fresh mtimes fall inside the window; the content hash settles it
    let second = run(root, &mut store, &state, &options()).unwrap();
    assert_eq!(second.report.changes.mutation_count(), 0);
    assert_eq!(second.report.counts.matched, 0);
    assert_eq!(second.report.counts.skipped, 3);
    assert!(second
        .report
        .skipped_files
        .iter()
        .all(|e| e.error_type == ErrorType::Unchanged));
    assert_eq!(store.task_history("T-E01-F01-001").unwrap().len(), 1);
}

// ============================================================================
// Dry run, atomicity, state machine
// ============================================================================

#[test]
fn test_dry_run_writes_nothing() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(root, &task_rel(1), &task_doc(1, "One"));

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let mut opts = options();
    opts.dry_run = true;

    let outcome = run(root, &mut store, &state, &opts).unwrap();
    assert!(outcome.report.dry_run);
    assert_eq!(outcome.report.changes.created.len(), 3);
    assert_eq!(store.statistics().unwrap().total(), 0);
    assert!(!outcome.last_sync_written);
    assert!(state.last_sync().is_none());
    assert!(outcome.states.contains(&EngineState::DryRunReport));
    assert!(!outcome.states.contains(&EngineState::Applying));
}

#[test]
fn test_state_sequence_for_apply() {
    let project = create_test_project();
    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);

    let outcome = run(project.path(), &mut store, &state, &options()).unwrap();
    assert_eq!(
        outcome.states,
        vec![
            EngineState::Idle,
            EngineState::Scanning,
            EngineState::Parsing,
            EngineState::Filtering,
            EngineState::Detecting,
            EngineState::Resolving,
            EngineState::Applying,
            EngineState::Committed,
            EngineState::Reported,
        ]
    );
}

#[test]
fn test_illegal_transition_is_error() {
    let project = create_test_project();
    let registry = PatternRegistry::defaults().unwrap();
    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);

    let mut engine = SyncEngine::new(project.path(), &registry, &mut store, &state);
    let err = engine.transition(EngineState::Applying).unwrap_err();
    assert!(matches!(
        err,
        SyncError::InvalidTransition {
            from: EngineState::Idle,
            to: EngineState::Applying
        }
    ));
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn test_constraint_violation_rolls_back_whole_plan() {
    let mut store = EntityStore::open_in_memory().unwrap();
    let epic = DiscoveredEntity::new(
        EntityKind::Epic,
        key(EntityKind::Epic, "E01"),
        "Core",
        SourceOrigin::File,
    );
    let mut bad = DiscoveredEntity::new(
        EntityKind::Feature,
        key(EntityKind::Feature, "E01-F01"),
        "Sync",
        SourceOrigin::File,
    );
    bad.title = String::new();

    let plan = ChangePlan::build(vec![epic, bad], Vec::new(), &StoredIndex::new());
    {
        let tx = store.transaction().unwrap();
        assert!(plan.apply(&tx, &[]).is_err());
        // dropped without commit
    }

    let stats = store.statistics().unwrap();
    assert_eq!(stats.total(), 0);
    assert_eq!(stats.history_entries, 0);
}

#[test]
fn test_failed_apply_keeps_last_sync_and_store() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(root, &task_rel(1), &task_doc(1, "One"));

    let db = root.join("plansync.db");
    let mut store = EntityStore::open_at(&db).unwrap();
    {
        let conn = rusqlite::Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_tasks BEFORE INSERT ON tasks
             BEGIN SELECT RAISE(ABORT, 'tasks are read-only'); END;",
        )
        .unwrap();
    }
    let previous = Utc::now() - chrono::Duration::days(1);
    let state = MemorySyncState::new(Some(previous));

    let err = run(root, &mut store, &state, &options()).unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));
    assert_eq!(state.last_sync(), Some(previous));

    let stats = store.statistics().unwrap();
    assert_eq!(stats.total(), 0);
    assert_eq!(stats.history_entries, 0);
}

// ============================================================================
// Policies
// ============================================================================

#[test]
fn test_create_missing_synthesizes_parent_chain() {
    let project = create_test_project();
    let root = project.path();
    write_test_entity(root, &task_rel(1), &task_doc(1, "Orphan task"));

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let mut opts = options();
    opts.create_missing = true;

    let outcome = run(root, &mut store, &state, &opts).unwrap();
    let report = &outcome.report;
    assert!(report.is_success());
    assert_eq!(report.counts.matched, 1);
    assert_eq!(report.changes.parents_created.len(), 2);

    let feature = store.get(EntityKind::Feature, "E01-F01").unwrap().unwrap();
    assert_eq!(feature.title, "Auto-created feature E01-F01");
    assert!(store.get(EntityKind::Epic, "E01").unwrap().is_some());
}

#[test]
fn test_deleted_file_reported_then_cleaned_up() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(root, &task_rel(1), &task_doc(1, "One"));
    write_test_entity(root, &task_rel(2), &task_doc(2, "Two"));

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    run(root, &mut store, &state, &options()).unwrap();

    fs::remove_file(root.join(task_rel(2))).unwrap();

    let without_cleanup = run(root, &mut store, &state, &options()).unwrap();
    let right_only: Vec<_> = without_cleanup
        .report
        .conflicts
        .iter()
        .filter(|c| c.conflict_type == ConflictType::RightOnly)
        .collect();
    assert_eq!(right_only.len(), 1);
    assert_eq!(right_only[0].key.as_str(), "T-E01-F01-002");
    assert!(right_only[0].suggestion.contains("--cleanup"));
    assert!(store.get(EntityKind::Task, "T-E01-F01-002").unwrap().is_some());

    let mut opts = options();
    opts.cleanup = true;
    let with_cleanup = run(root, &mut store, &state, &opts).unwrap();
    assert_eq!(with_cleanup.report.changes.deleted.len(), 1);
    assert_eq!(with_cleanup.report.changes.deleted[0].key, "T-E01-F01-002");
    assert!(store.get(EntityKind::Task, "T-E01-F01-002").unwrap().is_none());
    assert!(store.get(EntityKind::Task, "T-E01-F01-001").unwrap().is_some());
}

#[test]
fn test_rekeyed_file_orphans_previous_row() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(root, &task_rel(1), &task_doc(1, "One"));

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    run(root, &mut store, &state, &options()).unwrap();

    // Same path, new key in the frontmatter
    write_test_entity(root, &task_rel(1), &task_doc(2, "One"));

    let without_cleanup = run(root, &mut store, &state, &options()).unwrap();
    assert!(without_cleanup
        .report
        .conflicts
        .iter()
        .any(|c| c.conflict_type == ConflictType::RightOnly && c.key.as_str() == "T-E01-F01-001"));
    assert!(store.get(EntityKind::Task, "T-E01-F01-001").unwrap().is_some());

    let mut opts = options();
    opts.cleanup = true;
    opts.force_full_scan = true;
    let outcome = run(root, &mut store, &state, &opts).unwrap();
    assert_eq!(outcome.report.changes.deleted.len(), 1);
    assert_eq!(outcome.report.changes.deleted[0].key, "T-E01-F01-001");

    assert!(store.get(EntityKind::Task, "T-E01-F01-001").unwrap().is_none());
    let tasks = store.list(EntityKind::Task).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].key, "T-E01-F01-002");
    assert_eq!(tasks[0].file_path.as_deref(), Some(task_rel(1).as_str()));
}

#[test]
fn test_cleanup_keeps_parents_with_children() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(root, &task_rel(1), &task_doc(1, "One"));

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    run(root, &mut store, &state, &options()).unwrap();

    // The feature document goes away but its task file stays
    fs::remove_file(root.join(format!("{}/prd.md", FEATURE_DIR))).unwrap();

    let mut opts = options();
    opts.cleanup = true;
    let outcome = run(root, &mut store, &state, &opts).unwrap();
    assert!(outcome.report.changes.deleted.is_empty());
    assert!(outcome
        .report
        .warnings
        .iter()
        .any(|w| w.reason.contains("E01-F01")));
    assert!(store.get(EntityKind::Feature, "E01-F01").unwrap().is_some());
}

#[test]
fn test_dry_run_cleanup_lists_candidates() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(root, &task_rel(1), &task_doc(1, "One"));

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    run(root, &mut store, &state, &options()).unwrap();
    fs::remove_file(root.join(task_rel(1))).unwrap();

    let mut opts = options();
    opts.cleanup = true;
    opts.dry_run = true;
    let outcome = run(root, &mut store, &state, &opts).unwrap();
    assert_eq!(outcome.report.changes.deleted.len(), 1);
    assert!(store.get(EntityKind::Task, "T-E01-F01-001").unwrap().is_some());
}

#[test]
fn test_unknown_strategy_fails_before_scanning() {
    let project = create_test_project();
    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let mut opts = options();
    opts.strategy = "last-writer-wins".to_string();

    let err = run(project.path(), &mut store, &state, &opts).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Resolve(ResolveError::UnknownStrategy { .. })
    ));
    assert!(!err.is_retryable());
}

#[test]
fn test_missing_root_is_invalid_root() {
    let project = create_test_project();
    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let mut opts = options();
    opts.folder = PathBuf::from("does/not/exist");

    let err = run(project.path(), &mut store, &state, &opts).unwrap_err();
    assert!(matches!(err, SyncError::InvalidRoot { .. }));
}

#[test]
fn test_bad_file_does_not_abort_scan() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(root, &task_rel(1), &task_doc(1, "Good"));
    write_test_entity(root, &task_rel(2), "---\ntitle: no key here\n---\n");
    write_test_entity(root, "docs/plan/README.md", "# Plan\n");

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let outcome = run(root, &mut store, &state, &options()).unwrap();
    let report = &outcome.report;

    assert_eq!(report.counts.scanned, 5);
    assert_eq!(report.counts.matched, 3);
    assert_eq!(report.counts.skipped, 2);
    assert_eq!(report.entities.tasks.skipped, 1);
    assert_eq!(report.entities.related_docs.skipped, 1);
    assert!(report.counts_reconcile());
    assert!(store.get(EntityKind::Task, "T-E01-F01-001").unwrap().is_some());
}

#[test]
fn test_duplicate_key_keeps_first_file() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(root, &task_rel(1), &task_doc(1, "First"));
    write_test_entity(
        root,
        &format!("{}/tasks/zz-archive/T-E01-F01-001.md", FEATURE_DIR),
        &task_doc(1, "Copy"),
    );

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let outcome = run(root, &mut store, &state, &options()).unwrap();

    assert_eq!(outcome.report.errors.len(), 1);
    assert!(outcome.report.errors[0].reason.contains("Duplicate"));
    let row = store.get(EntityKind::Task, "T-E01-F01-001").unwrap().unwrap();
    assert_eq!(row.title, "First");
}

// ============================================================================
// Epic index
// ============================================================================

#[test]
fn test_index_merge_applies_index_titles() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(
        root,
        "docs/plan/epic-index.md",
        "- [Core Platform](E01-core/)\n  - [Sync Engine](E01-core/E01-F01-sync/)\n",
    );

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let mut opts = options();
    opts.use_index = true;
    opts.index_strategy = "merge".to_string();

    let outcome = run(root, &mut store, &state, &opts).unwrap();
    assert!(outcome.report.is_success());
    let epic = store.get(EntityKind::Epic, "E01").unwrap().unwrap();
    assert_eq!(epic.title, "Core Platform");
    assert_eq!(epic.file_path.as_deref(), Some("docs/plan/E01-core/epic.md"));
    assert!(outcome
        .report
        .conflicts
        .iter()
        .any(|c| c.left_origin == SourceOrigin::Index && c.field.as_deref() == Some("title")));
}

#[test]
fn test_index_precedence_requires_folders() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(
        root,
        "docs/plan/epic-index.md",
        "- [Core](E01-core/)\n- [Billing](E02-billing/)\n",
    );

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let mut opts = options();
    opts.use_index = true;
    opts.index_strategy = "index-precedence".to_string();

    let err = run(root, &mut store, &state, &opts).unwrap_err();
    assert!(err.to_string().contains("E02"));
    assert_eq!(store.statistics().unwrap().total(), 0);
}

#[test]
fn test_folder_precedence_drops_index_only_epics() {
    let project = create_test_project();
    let root = project.path();
    write_hierarchy(root);
    write_test_entity(
        root,
        "docs/plan/epic-index.md",
        "- [Core](E01-core/)\n- [Billing](E02-billing/)\n",
    );

    let mut store = EntityStore::open_in_memory().unwrap();
    let state = MemorySyncState::new(None);
    let mut opts = options();
    opts.use_index = true;
    opts.index_strategy = "folder-precedence".to_string();

    let outcome = run(root, &mut store, &state, &opts).unwrap();
    assert!(store.get(EntityKind::Epic, "E02").unwrap().is_none());
    assert!(outcome
        .report
        .conflicts
        .iter()
        .any(|c| c.key.as_str() == "E02" && c.resolution.as_deref() == Some("dropped")));
    assert!(outcome.report.counts_reconcile());
}
