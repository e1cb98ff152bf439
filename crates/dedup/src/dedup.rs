// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded-TTL dedup set (spec §4.3, component C3).
//!
//! Same shape as the registry's entry map: an `RwLock<HashMap<..>>` plus a
//! background sweep, here keyed by `msg_id` with a TTL instead of a lease.
//! `check_and_mark` takes the write lock directly rather than check-then-set
//! so two racing callers for the same id can never both observe `false`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Typical operator retention window (spec §4.3: "7 days is typical").
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct Shared {
    seen: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
}

/// An in-process dedup set. Memory is bounded by
/// `peak_msgs_per_second * ttl * record_size`; operators size `ttl`
/// to their retention requirement.
#[derive(Clone)]
pub struct DedupSet {
    shared: Arc<Shared>,
}

impl DedupSet {
    pub fn new(ttl: Duration) -> Self {
        Self { shared: Arc::new(Shared { seen: RwLock::new(HashMap::new()), ttl }) }
    }

    /// Returns `true` iff `msg_id` was already present (and thus a
    /// duplicate); otherwise inserts it with a fresh TTL and returns
    /// `false`. Concurrent calls for the same id serialize on the write
    /// lock, so exactly one caller ever sees `false`.
    pub async fn check_and_mark(&self, msg_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.shared.seen.write().await;
        match seen.get(msg_id) {
            Some(expires_at) if *expires_at > now => true,
            _ => {
                seen.insert(msg_id.to_owned(), now + self.shared.ttl);
                false
            }
        }
    }

    /// Read-only check; may race with a concurrent `check_and_mark` for the
    /// same id (spec permits eventual consistency here).
    pub async fn is_duplicate(&self, msg_id: &str) -> bool {
        let now = Instant::now();
        self.shared.seen.read().await.get(msg_id).is_some_and(|expires_at| *expires_at > now)
    }

    /// Runs the TTL expiry sweep until `cancel` fires.
    pub async fn run_sweep(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("dedup sweep shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep_expired().await;
                }
            }
        }
    }

    async fn sweep_expired(&self) {
        let now = Instant::now();
        let mut seen = self.shared.seen.write().await;
        let before = seen.len();
        seen.retain(|_, expires_at| *expires_at > now);
        let evicted = before - seen.len();
        if evicted > 0 {
            debug!(evicted, remaining = seen.len(), "dedup sweep evicted expired ids");
        }
    }
}

/// Fail-closed fallback used by callers when the dedup backend itself is
/// unreachable (e.g. a future networked backend): treats the id as
/// "unknown, not a duplicate" so the message is processed, while logging
/// that dedup protection was weakened for this call. Per spec §4.3 this
/// never blocks durability, only dedup strength.
pub fn fail_open(msg_id: &str) -> bool {
    warn!(msg_id, "dedup backend unavailable, proceeding without dedup protection");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_caller_sees_false_second_sees_true() {
        let set = DedupSet::new(Duration::from_secs(60));
        assert!(!set.check_and_mark("m1").await);
        assert!(set.check_and_mark("m1").await);
    }

    #[tokio::test]
    async fn is_duplicate_does_not_insert() {
        let set = DedupSet::new(Duration::from_secs(60));
        assert!(!set.is_duplicate("m1").await);
        assert!(!set.is_duplicate("m1").await);
        assert!(!set.check_and_mark("m1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let set = DedupSet::new(Duration::from_millis(10));
        assert!(!set.check_and_mark("m1").await);
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(!set.check_and_mark("m1").await, "expired id should be treated as fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_expired_entries() {
        let set = DedupSet::new(Duration::from_millis(10));
        set.check_and_mark("m1").await;
        tokio::time::advance(Duration::from_millis(20)).await;
        set.sweep_expired().await;
        assert_eq!(set.shared.seen.read().await.len(), 0);
    }

    #[tokio::test]
    async fn concurrent_racers_only_one_sees_false() {
        let set = Arc::new(DedupSet::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let set = set.clone();
            handles.push(tokio::spawn(async move { set.check_and_mark("race").await }));
        }
        let mut falses = 0;
        for handle in handles {
            if !handle.await.unwrap() {
                falses += 1;
            }
        }
        assert_eq!(falses, 1);
    }
}
