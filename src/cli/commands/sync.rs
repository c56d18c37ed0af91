//! `plansync sync` command - reconcile plan documents with the store

use console::style;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use tabled::{builder::Builder, settings::Style};

use crate::cli::helpers::{open_project, plural, truncate_str};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::config::{Config, ValidationLevel};
use crate::core::store::EntityStore;
use crate::sync::detector::Conflict;
use crate::sync::engine::{SyncEngine, SyncOptions};
use crate::sync::report::{RecordRef, ReportEntry, ScanReport};
use crate::sync::state::FileSyncState;

#[derive(clap::Args, Debug)]
pub struct SyncArgs {
    /// Folder to scan, relative to the project root (default: docs_root from config)
    #[arg(long)]
    pub folder: Option<PathBuf>,

    /// Report what would change without writing to the store
    #[arg(long)]
    pub dry_run: bool,

    /// Strategy when files and the store disagree (file-wins, database-wins, newer-wins)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Create placeholder parents for records whose epic or feature is missing
    #[arg(long)]
    pub create_missing: bool,

    /// Delete store records whose file no longer exists
    #[arg(long)]
    pub cleanup: bool,

    /// Ignore the last sync time and process every file
    #[arg(long)]
    pub force_full_scan: bool,

    /// Reconcile epic-index.md against the folder layout first
    #[arg(long)]
    pub index: bool,

    /// Strategy when epic-index.md and the folders disagree (index-precedence, folder-precedence, merge)
    #[arg(long, requires = "index")]
    pub index_strategy: Option<String>,

    /// Validation level (strict, balanced, permissive)
    #[arg(long)]
    pub validation_level: Option<ValidationLevel>,
}

impl SyncArgs {
    /// Layer the command line over the configured defaults
    fn options(&self, config: &Config) -> SyncOptions {
        let mut options = SyncOptions::from_config(config);
        if let Some(folder) = &self.folder {
            options.folder = folder.clone();
        }
        if let Some(strategy) = &self.strategy {
            options.strategy = strategy.clone();
        }
        if let Some(strategy) = &self.index_strategy {
            options.index_strategy = strategy.clone();
        }
        if let Some(level) = self.validation_level {
            options.validation_level = level;
        }
        options.dry_run = self.dry_run;
        options.create_missing = self.create_missing;
        options.cleanup = self.cleanup;
        options.force_full_scan = self.force_full_scan;
        options.use_index = self.index;
        options
    }
}

pub fn run(args: SyncArgs, global: &GlobalOpts) -> Result<()> {
    let project = open_project(global)?;
    let config = Config::load(&project)?;
    let registry = config.pattern_registry()?;
    let options = args.options(&config);

    let mut store = EntityStore::open(&project)?;
    let state = FileSyncState::for_project(&project);

    let outcome = SyncEngine::new(project.root(), &registry, &mut store, &state).run(&options)?;
    let report = outcome.report;

    match global.format {
        OutputFormat::Json => println!("{}", report.to_json().into_diagnostic()?),
        OutputFormat::Auto => print_report(&report, global),
    }

    if !report.is_success() {
        return Err(miette::miette!(
            "Sync finished with {}",
            plural(report.errors.len(), "error")
        ));
    }
    Ok(())
}

fn print_report(report: &ScanReport, global: &GlobalOpts) {
    if !global.quiet {
        let mode = if report.dry_run {
            style(" (dry run)").yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "{} Scanned {}{} in {:.2}s",
            style("→").blue(),
            style(&report.metadata.documentation_root).cyan(),
            mode,
            report.metadata.duration_seconds
        );
        println!(
            "  Files:     {} scanned, {} matched, {} skipped",
            report.counts.scanned,
            style(report.counts.matched).green(),
            style(report.counts.skipped).yellow()
        );
        if let Some(stats) = &report.incremental {
            println!(
                "  Changed:   {} of {} ({} new)",
                stats.processed, stats.total, stats.new
            );
        }

        print_changes(report);

        if !report.conflicts.is_empty() {
            println!();
            println!(
                "{} {}",
                style("Conflicts").bold(),
                style(format!("({})", report.conflicts.len())).dim()
            );
            println!("{}", conflict_table(&report.conflicts));
        }

        if !report.warnings.is_empty() {
            println!();
            println!("{}", style("Warnings").yellow().bold());
            for entry in &report.warnings {
                print_entry(entry, global.verbose);
            }
        }
    }

    if !report.errors.is_empty() {
        eprintln!();
        eprintln!("{}", style("Errors").red().bold());
        for entry in &report.errors {
            eprint_entry(entry);
        }
    }

    if !global.quiet && report.is_success() {
        println!();
        let verb = if report.dry_run { "Would apply" } else { "Applied" };
        println!(
            "{} {} {}",
            style("✓").green(),
            verb,
            plural(report.changes.mutation_count(), "change")
        );
    }
}

fn print_changes(report: &ScanReport) {
    let changes = &report.changes;
    if changes.mutation_count() == 0 {
        println!("  Store:     up to date ({} unchanged)", changes.unchanged);
        return;
    }

    let groups: [(&str, &[RecordRef]); 4] = [
        ("Created", changes.created.as_slice()),
        ("Updated", changes.updated.as_slice()),
        ("Parents", changes.parents_created.as_slice()),
        ("Deleted", changes.deleted.as_slice()),
    ];
    for (label, records) in groups {
        if records.is_empty() {
            continue;
        }
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        println!(
            "  {:<10} {}",
            format!("{}:", label),
            truncate_str(&keys.join(", "), 60)
        );
    }
}

fn conflict_table(conflicts: &[Conflict]) -> String {
    let mut builder = Builder::default();
    builder.push_record(["TYPE", "KIND", "KEY", "FIELD", "RESOLUTION"]);
    for c in conflicts {
        builder.push_record([
            c.conflict_type.as_str().to_string(),
            c.kind.to_string(),
            c.key.to_string(),
            c.field.clone().unwrap_or_default(),
            truncate_str(c.resolution.as_deref().unwrap_or(&c.suggestion), 50),
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}

fn location(entry: &ReportEntry) -> String {
    match entry.line_number {
        Some(line) => format!("{}:{}", entry.file_path, line),
        None => entry.file_path.clone(),
    }
}

fn print_entry(entry: &ReportEntry, verbose: bool) {
    println!("  {} {}", style(location(entry)).cyan(), entry.reason);
    if verbose && !entry.suggested_fix.is_empty() {
        println!("    {} {}", style("fix:").dim(), entry.suggested_fix);
    }
}

fn eprint_entry(entry: &ReportEntry) {
    eprintln!(
        "  {} [{}] {}",
        style(location(entry)).cyan(),
        entry.error_type.as_str(),
        entry.reason
    );
    if !entry.suggested_fix.is_empty() {
        eprintln!("    {} {}", style("fix:").dim(), entry.suggested_fix);
    }
}
