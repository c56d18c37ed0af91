//! Report validation against the embedded schema

use jsonschema::{validator_for, ValidationError as JsonSchemaError, Validator as JsonValidator};
use miette::Diagnostic;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::schema::report_schema;
use crate::sync::report::ScanReport;

#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("The report schema is not embedded in this build")]
    #[diagnostic(code(plansync::schema::missing))]
    Missing,

    #[error("The report schema does not compile: {0}")]
    #[diagnostic(code(plansync::schema::invalid))]
    InvalidSchema(String),

    #[error("Report could not be serialized: {0}")]
    #[diagnostic(code(plansync::schema::serialize))]
    Serialize(#[from] serde_json::Error),

    #[error("Report does not match the schema: {summary}")]
    #[diagnostic(code(plansync::schema::violation))]
    Violations {
        summary: String,
        #[related]
        violations: Vec<SchemaViolation>,
    },
}

/// A single schema violation
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
    #[help]
    pub help: Option<String>,
}

impl ValidationError {
    fn from_violations(violations: Vec<SchemaViolation>) -> Self {
        let summary = if violations.len() == 1 {
            "1 error".to_string()
        } else {
            format!("{} errors", violations.len())
        };
        ValidationError::Violations {
            summary,
            violations,
        }
    }

    /// Number of violations, zero for the other variants
    pub fn violation_count(&self) -> usize {
        match self {
            ValidationError::Violations { violations, .. } => violations.len(),
            _ => 0,
        }
    }
}

/// The compiled report schema
pub struct ReportValidator {
    compiled: JsonValidator,
}

impl ReportValidator {
    pub fn new() -> Result<Self, ValidationError> {
        let text = report_schema().ok_or(ValidationError::Missing)?;
        let schema: JsonValue = serde_json::from_str(&text)
            .map_err(|e| ValidationError::InvalidSchema(e.to_string()))?;
        let compiled =
            validator_for(&schema).map_err(|e| ValidationError::InvalidSchema(e.to_string()))?;
        Ok(Self { compiled })
    }

    pub fn is_valid(&self, value: &JsonValue) -> bool {
        self.compiled.is_valid(value)
    }

    /// Validate a JSON value, collecting every violation
    pub fn validate(&self, value: &JsonValue) -> Result<(), ValidationError> {
        let violations: Vec<SchemaViolation> = self
            .compiled
            .iter_errors(value)
            .map(|e| to_violation(&e))
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::from_violations(violations))
        }
    }

    /// Serialize a report and validate the result
    pub fn validate_report(&self, report: &ScanReport) -> Result<(), ValidationError> {
        let value = serde_json::to_value(report)?;
        self.validate(&value)
    }
}

fn to_violation(error: &JsonSchemaError) -> SchemaViolation {
    let path = error.instance_path.to_string();
    SchemaViolation {
        message: format_schema_error(error),
        help: generate_help_message(error),
        path,
    }
}

/// Format a JSON Schema error into a user-friendly message
fn format_schema_error(error: &JsonSchemaError) -> String {
    let path = if error.instance_path.as_str().is_empty() {
        "report root".to_string()
    } else {
        format!("'{}'", error.instance_path)
    };

    match &error.kind {
        jsonschema::error::ValidationErrorKind::Required { property } => {
            let prop_str = property
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| property.to_string());
            format!("Missing required field: {} at {}", prop_str, path)
        }
        jsonschema::error::ValidationErrorKind::Type { kind } => {
            format!("Wrong type at {}: expected {:?}", path, kind)
        }
        jsonschema::error::ValidationErrorKind::Enum { options } => {
            format!(
                "Invalid value at {}: must be one of: {}",
                path,
                format_enum_options(options)
            )
        }
        jsonschema::error::ValidationErrorKind::AdditionalProperties { unexpected } => {
            format!("Unknown field(s) at {}: {}", path, unexpected.join(", "))
        }
        _ => format!("Validation error at {}: {}", path, error),
    }
}

fn format_enum_options(options: &JsonValue) -> String {
    match options.as_array() {
        Some(arr) => arr
            .iter()
            .map(|v| v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join(", "),
        None => options.to_string(),
    }
}

fn generate_help_message(error: &JsonSchemaError) -> Option<String> {
    match &error.kind {
        jsonschema::error::ValidationErrorKind::AdditionalProperties { .. } => Some(
            "The report layout changed; bump schema_version and update the schema together"
                .to_string(),
        ),
        jsonschema::error::ValidationErrorKind::Enum { .. }
            if error.instance_path.as_str().ends_with("/error_type") =>
        {
            Some("Add the new error type to the entry definition in the schema".to_string())
        }
        _ => None,
    }
}
