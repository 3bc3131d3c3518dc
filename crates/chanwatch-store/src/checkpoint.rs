use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use chanwatch_core::{Analyzer, Checkpoint, Post};

/// Result of partitioning parent items by age against the update window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPartition {
    /// Older than the window; no longer polled for new comments.
    pub settled: BTreeSet<String>,
    /// Within the window; still eligible for new-comment fetches.
    pub open: BTreeSet<String>,
}

/// Partition posts into settled/open by `published_at` age. Every post lands
/// in exactly one set: strictly older than `window_days` means settled.
#[must_use]
pub fn partition_by_age(posts: &[Post], now: DateTime<Utc>, window_days: i64) -> WindowPartition {
    let cutoff = now - Duration::days(window_days);
    let mut settled = BTreeSet::new();
    let mut open = BTreeSet::new();
    for post in posts {
        if post.published_at < cutoff {
            settled.insert(post.id.clone());
        } else {
            open.insert(post.id.clone());
        }
    }
    WindowPartition { settled, open }
}

/// In-memory view of a channel's [`Checkpoint`] with idempotent mutators.
///
/// The tracker itself never touches disk; the orchestrator flushes it via
/// `ChannelStore::save_checkpoint` after the records it tracks are durably
/// written (records first, checkpoint second).
#[derive(Debug)]
pub struct CheckpointTracker {
    checkpoint: Checkpoint,
    dirty: bool,
}

impl CheckpointTracker {
    #[must_use]
    pub fn new(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint,
            dirty: false,
        }
    }

    #[must_use]
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// True when a mutator changed state since the last [`Self::mark_flushed`].
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_flushed(&mut self) {
        self.dirty = false;
    }

    /// Move an item to the settled set. Safe to call repeatedly; an already
    /// settled item stays settled.
    pub fn mark_settled(&mut self, post_id: &str) {
        let removed = self.checkpoint.open.remove(post_id);
        let inserted = self.checkpoint.settled.insert(post_id.to_string());
        if removed || inserted {
            self.dirty = true;
        }
    }

    /// Register an item as open (eligible for comment updates) unless it has
    /// already settled.
    pub fn mark_open(&mut self, post_id: &str) {
        if self.checkpoint.settled.contains(post_id) {
            return;
        }
        if self.checkpoint.open.insert(post_id.to_string()) {
            self.dirty = true;
        }
    }

    #[must_use]
    pub fn is_settled(&self, post_id: &str) -> bool {
        self.checkpoint.settled.contains(post_id)
    }

    /// Record that a comment carries the given analyzer's verdict.
    pub fn record_analysis(&mut self, comment_id: &str, analyzer: Analyzer) {
        let set = self
            .checkpoint
            .analyzed
            .entry(analyzer.as_str().to_string())
            .or_default();
        if set.insert(comment_id.to_string()) {
            self.dirty = true;
        }
    }

    #[must_use]
    pub fn is_analyzed(&self, comment_id: &str, analyzer: Analyzer) -> bool {
        self.checkpoint
            .analyzed
            .get(analyzer.as_str())
            .is_some_and(|set| set.contains(comment_id))
    }

    #[must_use]
    pub fn analyzed_count(&self, analyzer: Analyzer) -> usize {
        self.checkpoint
            .analyzed
            .get(analyzer.as_str())
            .map_or(0, BTreeSet::len)
    }

    /// Clear every analyzer's analyzed-set for this channel. Post and comment
    /// data are untouched; used by force-reanalysis.
    pub fn reset_all_analysis(&mut self) {
        if self
            .checkpoint
            .analyzed
            .values()
            .any(|set| !set.is_empty())
        {
            self.dirty = true;
        }
        self.checkpoint.analyzed.clear();
    }
}
