//! `plansync status` command - store contents and sync state

use console::style;
use miette::{IntoDiagnostic, Result};
use tabled::{builder::Builder, settings::Style};

use crate::cli::helpers::{open_project, truncate_str};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::config::Config;
use crate::core::identity::EntityKind;
use crate::core::store::EntityStore;
use crate::sync::state::{FileSyncState, SyncStateStore};

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// List the stored records of one kind (epic, feature, task, related_doc)
    #[arg(long)]
    pub kind: Option<EntityKind>,

    /// Show the import history of a task
    #[arg(long, value_name = "TASK_KEY", conflicts_with = "kind")]
    pub task: Option<String>,
}

pub fn run(args: StatusArgs, global: &GlobalOpts) -> Result<()> {
    let project = open_project(global)?;
    let config = Config::load(&project)?;
    let store = EntityStore::open(&project)?;

    if let Some(kind) = args.kind {
        return list_kind(&store, kind, global);
    }
    if let Some(task) = args.task {
        return show_history(&store, &task, global);
    }

    let stats = store.statistics()?;
    let last_sync = FileSyncState::for_project(&project).load()?.last_sync;

    if global.format == OutputFormat::Json {
        let counts: serde_json::Map<String, serde_json::Value> = stats
            .by_kind
            .iter()
            .map(|(kind, n)| (kind.table().to_string(), serde_json::json!(n)))
            .collect();
        let out = serde_json::json!({
            "project_root": project.root().display().to_string(),
            "docs_root": config.docs_root().display().to_string(),
            "last_sync": last_sync,
            "records": counts,
            "history_entries": stats.history_entries,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
        return Ok(());
    }

    println!("{}", style("Plansync Status").bold());
    println!("{}", style("─".repeat(40)).dim());
    println!("  Project:         {}", project.root().display());
    println!("  Docs root:       {}", config.docs_root().display());
    println!("  Store:           {}", project.store_path().display());
    match last_sync {
        Some(ts) => println!("  Last sync:       {}", style(ts.to_rfc3339()).cyan()),
        None => println!("  Last sync:       {}", style("never").yellow()),
    }
    println!("  Total records:   {}", style(stats.total()).cyan());
    println!("  History entries: {}", style(stats.history_entries).cyan());
    println!(
        "  Database size:   {} KB",
        style(stats.db_size_bytes / 1024).cyan()
    );

    println!();
    println!("  {}", style("By Kind:").bold());
    for (kind, count) in &stats.by_kind {
        println!("    {:<12} {}", kind.as_str(), count);
    }

    Ok(())
}

fn list_kind(store: &EntityStore, kind: EntityKind, global: &GlobalOpts) -> Result<()> {
    let rows = store.list(kind)?;

    if global.format == OutputFormat::Json {
        let out: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "key": row.key,
                    "parent_key": row.parent_key,
                    "title": row.title,
                    "status": row.status,
                    "file_path": row.file_path,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No {} records in the store", kind);
        return Ok(());
    }

    let mut builder = Builder::default();
    builder.push_record(["KEY", "PARENT", "TITLE", "STATUS", "FILE"]);
    for row in &rows {
        builder.push_record([
            row.key.clone(),
            row.parent_key.clone().unwrap_or_default(),
            truncate_str(&row.title, 40),
            row.status.clone().unwrap_or_default(),
            row.file_path.clone().unwrap_or_default(),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
    if !global.quiet {
        println!("{} {} record(s)", style(rows.len()).cyan(), kind);
    }
    Ok(())
}

fn show_history(store: &EntityStore, task: &str, global: &GlobalOpts) -> Result<()> {
    if store.get(EntityKind::Task, task)?.is_none() {
        return Err(miette::miette!("Task {} is not in the store", task));
    }
    let entries = store.task_history(task)?;

    if global.format == OutputFormat::Json {
        let out: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| serde_json::json!({ "timestamp": e.timestamp, "notes": e.notes }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
        return Ok(());
    }

    println!("{}", style(format!("History of {}", task)).bold());
    for entry in &entries {
        println!(
            "  {}  {}",
            style(entry.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            entry.notes
        );
    }
    Ok(())
}
