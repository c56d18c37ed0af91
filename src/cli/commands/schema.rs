//! `plansync schema` command - print the scan report schema
//!
//! With `--check`, a saved report (e.g. from `plansync sync --format json`)
//! is validated against the schema instead.

use console::style;
use miette::{IntoDiagnostic, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::schema::{report_schema, ReportValidator};

#[derive(clap::Args, Debug)]
pub struct SchemaArgs {
    /// Validate this report file instead of printing the schema
    #[arg(long, value_name = "REPORT")]
    pub check: Option<PathBuf>,
}

pub fn run(args: SchemaArgs) -> Result<()> {
    match args.check {
        Some(path) => check_report(&path),
        None => {
            let schema =
                report_schema().ok_or_else(|| miette::miette!("report schema is not embedded"))?;
            print!("{}", schema);
            Ok(())
        }
    }
}

fn check_report(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read {}: {}", path.display(), e))?;
    let value: Value = serde_json::from_str(&content).into_diagnostic()?;

    let validator = ReportValidator::new()?;
    validator.validate(&value)?;

    println!(
        "{} {} matches the scan report schema",
        style("✓").green(),
        style(path.display()).cyan()
    );
    Ok(())
}
