//! The scan report JSON schema, embedded in the binary

pub mod validator;

use rust_embed::Embed;

pub use validator::{ReportValidator, SchemaViolation, ValidationError};

/// File name of the report schema under `schemas/`
pub const REPORT_SCHEMA_FILE: &str = "scan-report.schema.json";

#[derive(Embed)]
#[folder = "schemas/"]
struct EmbeddedSchemas;

/// Raw text of the report schema
pub fn report_schema() -> Option<String> {
    let file = EmbeddedSchemas::get(REPORT_SCHEMA_FILE)?;
    String::from_utf8(file.data.into_owned()).ok()
}

/// Names of every embedded schema
pub fn schema_names() -> Vec<String> {
    let mut names: Vec<String> = EmbeddedSchemas::iter().map(|f| f.to_string()).collect();
    names.sort();
    names
}
