//! Markdown frontmatter handling

pub mod diagnostics;
pub mod frontmatter;

pub use diagnostics::FrontmatterError;
pub use frontmatter::{split_frontmatter, Frontmatter};
