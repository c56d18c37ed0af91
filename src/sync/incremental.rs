//! Incremental filtering: decide which parsed files need reconciling
//!
//! A file is reconsidered when its mtime falls inside the window since the
//! last successful sync (widened by the clock-skew tolerance) or when the
//! store has never seen its key. Inside the window the stored content hash
//! gets the final say, so touching a file without editing it is free.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::core::entity::DiscoveredEntity;
use crate::core::identity::EntityKind;

/// Slack applied on both sides of the mtime comparison
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 60;

/// What the store remembers about a file-backed row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownRecord {
    pub file_path: Option<String>,
    pub content_hash: Option<String>,
}

/// Store rows keyed by kind and key
pub type KnownRecords = HashMap<(EntityKind, String), KnownRecord>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    /// Processed because the store had never seen the key
    pub new: usize,
}

#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub processed: Vec<DiscoveredEntity>,
    pub unchanged: Vec<DiscoveredEntity>,
    /// Files whose mtime lies beyond now + tolerance (also in one of the lists above)
    pub future_dated: Vec<DiscoveredEntity>,
    pub stats: FilterStats,
}

#[derive(Debug, Clone)]
pub struct IncrementalFilter {
    last_sync: Option<DateTime<Utc>>,
    force_full_scan: bool,
    now: DateTime<Utc>,
}

impl IncrementalFilter {
    pub fn new(last_sync: Option<DateTime<Utc>>, force_full_scan: bool) -> Self {
        Self {
            last_sync,
            force_full_scan,
            now: Utc::now(),
        }
    }

    /// Pin the clock used for future-date detection
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Whether every candidate will be processed regardless of mtime
    pub fn is_full_scan(&self) -> bool {
        self.force_full_scan || self.last_sync.is_none()
    }

    /// Partition candidates into processed and unchanged
    pub fn filter(&self, candidates: Vec<DiscoveredEntity>, known: &KnownRecords) -> FilterOutcome {
        let tolerance = Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS);
        let future_limit = self.now + tolerance;
        let window_start = self.last_sync.map(|t| t - tolerance);
        let full = self.is_full_scan();

        let mut outcome = FilterOutcome::default();
        outcome.stats.total = candidates.len();

        for entity in candidates {
            if entity.mod_time.is_some_and(|m| m > future_limit) {
                outcome.future_dated.push(entity.clone());
            }

            let stored = known.get(&(entity.kind, entity.key.as_str().to_string()));
            let process = match (stored, window_start) {
                (None, _) => {
                    outcome.stats.new += 1;
                    true
                }
                _ if full => true,
                (Some(record), Some(start)) => match entity.mod_time {
                    Some(mtime) if mtime > start => !same_content(&entity, record),
                    Some(_) => !same_path(&entity, record),
                    None => true,
                },
                (Some(_), None) => true,
            };

            if process {
                outcome.processed.push(entity);
            } else {
                outcome.unchanged.push(entity);
            }
        }

        outcome.stats.processed = outcome.processed.len();
        outcome.stats.skipped = outcome.unchanged.len();
        outcome
    }
}

fn same_path(entity: &DiscoveredEntity, record: &KnownRecord) -> bool {
    entity.file_path.is_some() && entity.file_path == record.file_path
}

fn same_content(entity: &DiscoveredEntity, record: &KnownRecord) -> bool {
    same_path(entity, record)
        && entity.content_hash.is_some()
        && entity.content_hash == record.content_hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::SourceOrigin;
    use crate::core::identity::EntityKey;

    fn candidate(key: &str, mtime: DateTime<Utc>, hash: &str) -> DiscoveredEntity {
        let k = EntityKey::parse(EntityKind::Task, key).unwrap();
        DiscoveredEntity::new(EntityKind::Task, k, "Task", SourceOrigin::File)
            .with_file(format!("docs/plan/{}.md", key), Some(mtime))
            .with_hash(hash)
    }

    fn known(entries: &[(&str, &str)]) -> KnownRecords {
        entries
            .iter()
            .map(|(key, hash)| {
                (
                    (EntityKind::Task, key.to_string()),
                    KnownRecord {
                        file_path: Some(format!("docs/plan/{}.md", key)),
                        content_hash: Some(hash.to_string()),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_no_last_sync_processes_everything() {
        let now = Utc::now();
        let candidates = vec![
            candidate("T-E01-F01-001", now - Duration::days(30), "a"),
            candidate("T-E01-F01-002", now - Duration::days(30), "b"),
        ];
        let outcome = IncrementalFilter::new(None, false)
            .with_now(now)
            .filter(candidates, &known(&[("T-E01-F01-001", "a"), ("T-E01-F01-002", "b")]));

        assert_eq!(outcome.stats.processed, 2);
        assert_eq!(outcome.stats.skipped, 0);
    }

    #[test]
    fn test_old_known_file_is_unchanged() {
        let now = Utc::now();
        let last_sync = now - Duration::hours(1);
        let candidates = vec![candidate("T-E01-F01-001", now - Duration::days(2), "a")];

        let outcome = IncrementalFilter::new(Some(last_sync), false)
            .with_now(now)
            .filter(candidates, &known(&[("T-E01-F01-001", "a")]));

        assert_eq!(outcome.stats.skipped, 1);
        assert!(outcome.processed.is_empty());
    }

    #[test]
    fn test_unknown_key_is_processed_even_when_old() {
        let now = Utc::now();
        let last_sync = now - Duration::hours(1);
        let candidates = vec![candidate("T-E01-F01-007", now - Duration::days(2), "a")];

        let outcome = IncrementalFilter::new(Some(last_sync), false)
            .with_now(now)
            .filter(candidates, &KnownRecords::new());

        assert_eq!(outcome.stats.processed, 1);
        assert_eq!(outcome.stats.new, 1);
    }

    #[test]
    fn test_recent_edit_is_processed() {
        let now = Utc::now();
        let last_sync = now - Duration::hours(1);
        let candidates = vec![candidate("T-E01-F01-001", now - Duration::minutes(5), "edited")];

        let outcome = IncrementalFilter::new(Some(last_sync), false)
            .with_now(now)
            .filter(candidates, &known(&[("T-E01-F01-001", "original")]));

        assert_eq!(outcome.stats.processed, 1);
        assert_eq!(outcome.stats.new, 0);
    }

    #[test]
    fn test_touched_file_with_same_hash_is_unchanged() {
        let now = Utc::now();
        let last_sync = now - Duration::hours(1);
        let candidates = vec![candidate("T-E01-F01-001", now - Duration::minutes(5), "same")];

        let outcome = IncrementalFilter::new(Some(last_sync), false)
            .with_now(now)
            .filter(candidates, &known(&[("T-E01-F01-001", "same")]));

        assert_eq!(outcome.stats.skipped, 1);
    }

    #[test]
    fn test_mtime_within_tolerance_before_last_sync_is_processed() {
        let now = Utc::now();
        let last_sync = now - Duration::hours(1);
        let mtime = last_sync - Duration::seconds(30);
        let candidates = vec![candidate("T-E01-F01-001", mtime, "edited")];

        let outcome = IncrementalFilter::new(Some(last_sync), false)
            .with_now(now)
            .filter(candidates, &known(&[("T-E01-F01-001", "original")]));

        assert_eq!(outcome.stats.processed, 1);
    }

    #[test]
    fn test_force_full_scan_overrides_window() {
        let now = Utc::now();
        let last_sync = now - Duration::hours(1);
        let candidates = vec![candidate("T-E01-F01-001", now - Duration::days(2), "a")];

        let outcome = IncrementalFilter::new(Some(last_sync), true)
            .with_now(now)
            .filter(candidates, &known(&[("T-E01-F01-001", "a")]));

        assert_eq!(outcome.stats.processed, 1);
    }

    #[test]
    fn test_moved_file_is_processed() {
        let now = Utc::now();
        let last_sync = now - Duration::hours(1);
        let moved = candidate("T-E01-F01-001", now - Duration::days(2), "a")
            .with_file("docs/plan/elsewhere/T-E01-F01-001.md", Some(now - Duration::days(2)));

        let outcome = IncrementalFilter::new(Some(last_sync), false)
            .with_now(now)
            .filter(vec![moved], &known(&[("T-E01-F01-001", "a")]));

        assert_eq!(outcome.stats.processed, 1);
    }

    #[test]
    fn test_future_mtime_is_flagged() {
        let now = Utc::now();
        let candidates = vec![
            candidate("T-E01-F01-001", now + Duration::hours(3), "a"),
            candidate("T-E01-F01-002", now + Duration::seconds(30), "b"),
        ];

        let outcome = IncrementalFilter::new(None, false)
            .with_now(now)
            .filter(candidates, &KnownRecords::new());

        assert_eq!(outcome.future_dated.len(), 1);
        assert_eq!(outcome.future_dated[0].key.as_str(), "T-E01-F01-001");
        assert_eq!(outcome.stats.processed, 2);
    }

    #[test]
    fn test_stats_reconcile() {
        let now = Utc::now();
        let last_sync = now - Duration::hours(1);
        let candidates = vec![
            candidate("T-E01-F01-001", now - Duration::days(2), "a"),
            candidate("T-E01-F01-002", now - Duration::minutes(1), "changed"),
            candidate("T-E01-F01-003", now - Duration::days(2), "c"),
        ];

        let outcome = IncrementalFilter::new(Some(last_sync), false)
            .with_now(now)
            .filter(candidates, &known(&[("T-E01-F01-001", "a"), ("T-E01-F01-002", "b")]));

        let s = outcome.stats;
        assert_eq!(s.total, 3);
        assert_eq!(s.processed + s.skipped, s.total);
        assert_eq!(s.new, 1);
        assert_eq!(s.skipped, 1);
    }
}
