//! Synchronization between plan documents and the store

pub mod detector;
pub mod engine;
pub mod incremental;
pub mod index;
pub mod parser;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod state;

pub use detector::{detect_conflicts, Conflict, ConflictType, EntitySet};
pub use engine::{EngineState, SyncEngine, SyncError, SyncOptions, SyncOutcome};
pub use report::{ErrorType, ReportEntry, ReportStatus, ScanReport};
pub use resolver::{ResolutionStrategy, Resolver};
pub use state::{FileSyncState, MemorySyncState, SyncState, SyncStateStore};
