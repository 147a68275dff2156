//! Retention-bounded buffer, non-destructive replay for late-joining
//! readers, and the broadcast-to-open-channels policy.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::log_entry::{BufferedEntry, LogEntry};

/// Entries older than this (measured against enqueue time) are evicted on
/// every insert and on every read.
pub const RETENTION_WINDOW: Duration = Duration::from_secs(60);

/// Private to the delivery layer; never shared outside it.
#[derive(Default)]
pub struct Delivery {
    buffer: RwLock<VecDeque<BufferedEntry>>,
}

impl Delivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry` to the retention buffer unconditionally, aging out
    /// anything older than [`RETENTION_WINDOW`] in the same pass. Returns
    /// the entry unchanged so the caller can go on to broadcast it.
    pub async fn record(&self, entry: LogEntry) -> LogEntry {
        let mut buffer = self.buffer.write().await;
        buffer.push_back(BufferedEntry {
            entry: entry.clone(),
            enqueued_at: Instant::now(),
        });
        evict_expired(&mut buffer);
        entry
    }

    /// A non-destructive snapshot of everything currently within the
    /// retention window, in enqueue order. Intentionally non-clearing:
    /// multiple readers connecting at different times each see the same
    /// recent window.
    pub async fn snapshot(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.write().await;
        evict_expired(&mut buffer);
        buffer.iter().map(|buffered| buffered.entry.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        let mut buffer = self.buffer.write().await;
        evict_expired(&mut buffer);
        buffer.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Purge is a prefix-trim since enqueue order equals arrival order.
fn evict_expired(buffer: &mut VecDeque<BufferedEntry>) {
    let now = Instant::now();
    while let Some(front) = buffer.front() {
        if now.duration_since(front.enqueued_at) >= RETENTION_WINDOW {
            buffer.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_entry::Severity;
    use serde_json::Map;

    fn sample(message: &str) -> LogEntry {
        LogEntry {
            severity: Severity::Info,
            message: message.to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            extra: Map::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn late_reader_sees_all_entries_in_order() {
        let delivery = Delivery::new();
        delivery.record(sample("one")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        delivery.record(sample("two")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        delivery.record(sample("three")).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        let snapshot = delivery.snapshot().await;
        let messages: Vec<_> = snapshot.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_age_out_after_retention_window() {
        let delivery = Delivery::new();
        delivery.record(sample("stale")).await;
        tokio::time::advance(RETENTION_WINDOW + Duration::from_secs(5)).await;

        assert!(delivery.snapshot().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn non_destructive_replay_across_two_readers() {
        let delivery = Delivery::new();
        delivery.record(sample("a")).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let first = delivery.snapshot().await;
        assert_eq!(first.len(), 1);

        delivery.record(sample("b")).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let second = delivery.snapshot().await;
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].message, "a");
        assert_eq!(second[1].message, "b");
    }
}
