// src/pipeline/error_tracker.rs
//! Counts recurring failure categories across cycles
//!
//! Counts only grow until a repair for the category is applied. Every update
//! happens under one lock together with its snapshot write, so concurrent
//! reporters can neither lose an increment nor persist an older state over a
//! newer one.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::FsOps;

pub const DETAIL_HISTORY: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub details: VecDeque<String>,
}

impl ErrorEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            first_seen: now,
            last_seen: now,
            details: VecDeque::with_capacity(DETAIL_HISTORY),
        }
    }
}

pub struct ErrorTracker {
    entries: Mutex<BTreeMap<String, ErrorEntry>>,
    path: Option<PathBuf>,
}

impl ErrorTracker {
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Load the tracker snapshot at `path`; a missing or unreadable snapshot
    /// starts empty
    pub async fn load(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let raw = FsOps::read_file_safe(&path).await?;
            match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "Error tracker at {} is unreadable, starting empty: {}",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            entries: Mutex::new(entries),
            path: Some(path),
        })
    }

    /// Record one occurrence and return the new count for the category
    pub async fn record(&self, category: &str, detail: &str) -> u32 {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();

        let entry = entries
            .entry(category.to_string())
            .or_insert_with(|| ErrorEntry::new(now));
        entry.count = entry.count.saturating_add(1);
        entry.last_seen = now;
        entry.details.push_back(detail.to_string());
        while entry.details.len() > DETAIL_HISTORY {
            entry.details.pop_front();
        }
        let count = entry.count;

        self.persist(&entries).await;
        count
    }

    /// Re-arm the threshold for a category after a successful repair
    pub async fn reset(&self, category: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(category) {
            entry.count = 0;
            info!("Error counter reset for {}", category);
            self.persist(&entries).await;
        }
    }

    pub async fn count(&self, category: &str) -> u32 {
        self.entries
            .lock()
            .await
            .get(category)
            .map(|e| e.count)
            .unwrap_or(0)
    }

    /// Category with the highest live count among those `include` accepts;
    /// the most recently seen wins ties
    pub async fn most_frequent(
        &self,
        include: impl Fn(&str) -> bool,
    ) -> Option<(String, ErrorEntry)> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|(k, e)| e.count > 0 && include(k.as_str()))
            .max_by(|(_, a), (_, b)| a.count.cmp(&b.count).then(a.last_seen.cmp(&b.last_seen)))
            .map(|(k, e)| (k.clone(), e.clone()))
    }

    pub async fn snapshot(&self) -> BTreeMap<String, ErrorEntry> {
        self.entries.lock().await.clone()
    }

    async fn persist(&self, entries: &BTreeMap<String, ErrorEntry>) {
        let Some(path) = &self.path else {
            return;
        };

        let result = serde_json::to_string_pretty(entries)
            .context("Failed to serialize error tracker");
        let result = match result {
            Ok(json) => FsOps::write_file_atomic(path, &json).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("Failed to persist error tracker: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_counts_grow_and_details_are_bounded() {
        let tracker = ErrorTracker::in_memory();
        for i in 1..=7 {
            assert_eq!(tracker.record("missing_title", &format!("detail {}", i)).await, i);
        }

        let snapshot = tracker.snapshot().await;
        let entry = &snapshot["missing_title"];
        assert_eq!(entry.details.len(), DETAIL_HISTORY);
        assert_eq!(entry.details.front().unwrap(), "detail 3");
        assert_eq!(entry.details.back().unwrap(), "detail 7");
        assert!(entry.first_seen <= entry.last_seen);
    }

    #[tokio::test]
    async fn test_reset_rearms_category_only() {
        let tracker = ErrorTracker::in_memory();
        tracker.record("a", "x").await;
        tracker.record("a", "x").await;
        tracker.record("b", "y").await;

        tracker.reset("a").await;
        assert_eq!(tracker.count("a").await, 0);
        assert_eq!(tracker.count("b").await, 1);
        assert_eq!(tracker.record("a", "x").await, 1);
    }

    #[tokio::test]
    async fn test_most_frequent_ignores_reset_categories() {
        let tracker = ErrorTracker::in_memory();
        let any = |_: &str| true;
        assert!(tracker.most_frequent(any).await.is_none());

        tracker.record("a", "x").await;
        tracker.record("a", "x").await;
        tracker.record("b", "y").await;
        assert_eq!(tracker.most_frequent(any).await.unwrap().0, "a");
        assert_eq!(tracker.most_frequent(|c| c != "a").await.unwrap().0, "b");

        tracker.reset("a").await;
        assert_eq!(tracker.most_frequent(any).await.unwrap().0, "b");
    }

    #[tokio::test]
    async fn test_concurrent_records_are_not_lost() {
        let tracker = Arc::new(ErrorTracker::in_memory());
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.record("fetch_failed:reed", "boom").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tracker.count("fetch_failed:reed").await, 20);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("error_tracker.json");

        let tracker = ErrorTracker::load(path.clone()).await.unwrap();
        tracker.record("missing_title", "reed: https://r/1").await;
        tracker.record("missing_title", "reed: https://r/2").await;

        let reloaded = ErrorTracker::load(path).await.unwrap();
        assert_eq!(reloaded.count("missing_title").await, 2);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("error_tracker.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let tracker = ErrorTracker::load(path).await.unwrap();
        assert!(tracker.snapshot().await.is_empty());
    }
}
