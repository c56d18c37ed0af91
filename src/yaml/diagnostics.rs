//! Frontmatter error diagnostics with actionable help text

use miette::Diagnostic;
use thiserror::Error;

/// A frontmatter block that could not be read
#[derive(Debug, Error, Diagnostic)]
pub enum FrontmatterError {
    #[error("Frontmatter opened at line {line} is never closed")]
    #[diagnostic(
        code(plansync::frontmatter::unterminated),
        help("Add a line containing only '---' after the last metadata field")
    )]
    Unterminated { line: usize },

    #[error("Invalid YAML in frontmatter at line {line}: {message}")]
    #[diagnostic(code(plansync::frontmatter::syntax))]
    Syntax {
        line: usize,
        message: String,
        #[help]
        help: Option<String>,
    },
}

impl FrontmatterError {
    /// Build a syntax error from a serde_yml error
    ///
    /// `first_line` is the file line holding the first YAML line, so the
    /// reported line points into the markdown file rather than the block.
    pub fn from_serde_error(err: &serde_yml::Error, first_line: usize) -> Self {
        let block_line = err.location().map(|loc| loc.line()).unwrap_or(1);
        let message = err.to_string();
        let help = generate_help(&message);

        FrontmatterError::Syntax {
            line: first_line + block_line.saturating_sub(1),
            message,
            help,
        }
    }

    /// File line the error points at
    pub fn line(&self) -> usize {
        match self {
            FrontmatterError::Unterminated { line } => *line,
            FrontmatterError::Syntax { line, .. } => *line,
        }
    }

    /// Suggested fix for the scan report
    pub fn suggested_fix(&self) -> String {
        match self {
            FrontmatterError::Unterminated { .. } => {
                "Close the frontmatter with a '---' line".to_string()
            }
            FrontmatterError::Syntax { help, .. } => help
                .clone()
                .unwrap_or_else(|| "Fix the YAML syntax in the frontmatter".to_string()),
        }
    }
}

/// Generate helpful suggestions based on error message
pub fn generate_help(message: &str) -> Option<String> {
    let msg_lower = message.to_lowercase();

    if msg_lower.contains("tab") {
        return Some(
            "YAML requires spaces for indentation, not tabs. Replace tabs with spaces.".to_string(),
        );
    }

    if msg_lower.contains("duplicate") {
        return Some("Each key can only appear once. Remove or rename the duplicate key.".to_string());
    }

    if msg_lower.contains("quoted scalar") || msg_lower.contains("unterminated") {
        return Some("A quoted value is missing its closing quote.".to_string());
    }

    if msg_lower.contains("expected block end") {
        return Some("Check your indentation, it may be inconsistent.".to_string());
    }

    if msg_lower.contains("mapping values are not allowed") {
        return Some("You may be missing a space after ':' or have incorrect indentation.".to_string());
    }

    if msg_lower.contains("found unexpected ':'") {
        return Some("Colons in values need to be quoted: \"value:with:colons\"".to_string());
    }

    if msg_lower.contains("invalid type") {
        return Some("Metadata fields must be plain strings, e.g. title: \"My task\"".to_string());
    }

    if msg_lower.contains('@') || msg_lower.contains("special character") {
        return Some("Special characters like @ need to be quoted: \"@value\"".to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_generation() {
        assert!(generate_help("found tab character").is_some());
        assert!(generate_help("duplicate entry with key \"title\"").is_some());
        assert!(generate_help("some random error").is_none());
    }

    #[test]
    fn test_syntax_line_is_offset_into_file() {
        let err = serde_yml::from_str::<serde_yml::Value>("title: ok\nkey: \"open\n").unwrap_err();
        let diag = FrontmatterError::from_serde_error(&err, 2);
        assert!(diag.line() >= 3);
        assert!(!diag.suggested_fix().is_empty());
    }
}
