//! `plansync init` command - Initialize a new plansync project

use console::style;
use miette::{IntoDiagnostic, Result};
use std::path::Path;

use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::project::{Project, ProjectError};

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (default: current directory)
    #[arg(default_value = ".")]
    pub path: std::path::PathBuf,

    /// Rewrite the config even if .plansync/ already exists
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs, global: &GlobalOpts) -> Result<()> {
    let path = if args.path.as_os_str() == "." {
        std::env::current_dir().into_diagnostic()?
    } else {
        args.path.clone()
    };

    if !path.exists() {
        std::fs::create_dir_all(&path).into_diagnostic()?;
        if !global.quiet && global.format != OutputFormat::Json {
            println!(
                "{} Created directory {}",
                style("✓").green(),
                style(path.display()).cyan()
            );
        }
    }

    let project = if args.force {
        Project::init_force(&path)
    } else {
        Project::init(&path)
    };

    match project {
        Ok(project) => {
            tracing::info!(root = %project.root().display(), "initialized project");
            if global.format == OutputFormat::Json {
                let out = serde_json::json!({
                    "root": project.root().display().to_string(),
                    "initialized": true,
                });
                println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
                return Ok(());
            }
            if global.quiet {
                return Ok(());
            }
            println!(
                "{} Initialized plansync project at {}",
                style("✓").green(),
                style(project.root().display()).cyan()
            );
            println!();
            println!("Created project structure:");
            print_structure(project.root());
            println!();
            println!("Next steps:");
            println!(
                "  {} Add epic folders under docs/plan/",
                style("mkdir docs/plan/E01-my-epic").yellow()
            );
            println!(
                "  {} Import the plan into the store",
                style("plansync sync").yellow()
            );
            Ok(())
        }
        Err(ProjectError::AlreadyExists(path)) => {
            if global.format == OutputFormat::Json {
                let out = serde_json::json!({
                    "root": path.display().to_string(),
                    "initialized": false,
                });
                println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
                return Ok(());
            }
            println!(
                "{} plansync project already exists at {}",
                style("!").yellow(),
                style(path.display()).cyan()
            );
            println!();
            println!(
                "Use {} to rewrite the config",
                style("plansync init --force").yellow()
            );
            Ok(())
        }
        Err(e) => Err(miette::miette!("{}", e)),
    }
}

fn print_structure(root: &Path) {
    let entries = [
        ".plansync/",
        ".plansync/config.yaml",
        ".plansync/.gitignore",
        "docs/plan/",
    ];

    for entry in entries {
        if root.join(entry).exists() {
            let prefix = if entry.ends_with('/') { "📁" } else { "📄" };
            println!("  {} {}", prefix, style(entry).dim());
        }
    }
}
