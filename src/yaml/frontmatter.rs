//! Split a markdown file into its `---` delimited metadata block and body

use super::FrontmatterError;

const DELIMITER: &str = "---";

/// The metadata block of a markdown file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frontmatter<'a> {
    pub yaml: &'a str,
    pub body: &'a str,
    /// 1-based file line of the first YAML line
    pub first_line: usize,
}

/// Locate the frontmatter block; `Ok(None)` when the file has none
pub fn split_frontmatter(content: &str) -> Result<Option<Frontmatter<'_>>, FrontmatterError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut lines = content.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return Ok(None);
    };
    if first.trim_end() != DELIMITER {
        return Ok(None);
    }

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if line.trim_end() == DELIMITER {
            return Ok(Some(Frontmatter {
                yaml: &content[yaml_start..offset],
                body: &content[offset + line.len()..],
                first_line: 2,
            }));
        }
        offset += line.len();
    }

    Err(FrontmatterError::Unterminated { line: 1 })
}
