//! Core module - record identity, configuration, project layout and the store

pub mod config;
pub mod entity;
pub mod identity;
pub mod patterns;
pub mod project;
pub mod store;

pub use config::{Config, ConfigError, ValidationLevel};
pub use entity::{DiscoveredEntity, SourceOrigin};
pub use identity::{EntityKey, EntityKind, KeyError};
pub use patterns::{PatternError, PatternRegistry};
pub use project::{Project, ProjectError};
pub use store::{EntityStore, StoreError, StoredEntity};
