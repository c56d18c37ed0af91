//! Plansync: epic, feature and task documents kept in step with a work-item store
//!
//! Plan records live as markdown files with YAML frontmatter and as rows in
//! a SQLite store. The sync engine scans the files, reconciles them against
//! the store under a named strategy, and applies the result in one
//! transaction.

pub mod cli;
pub mod core;
pub mod schema;
pub mod sync;
pub mod yaml;
