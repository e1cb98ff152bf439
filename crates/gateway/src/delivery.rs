// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound delivery and ack tracking (spec §4.6 delivery protocol).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use durablelog::{LogRecord, NatsDurableLog, Publisher, Topic};
use imcore::Frame;

use crate::session::SessionHandle;

struct PendingDeliver {
    record: LogRecord,
    attempts: u32,
    sent_at: Instant,
}

/// Tracks in-flight DELIVER frames awaiting a client ack for one session.
/// A dedicated supervisor task scans this periodically (spec §5: "one
/// reader, one writer, one ack-timeout supervisor" per session).
pub struct AckTracker {
    pending: Mutex<HashMap<String, PendingDeliver>>,
    ack_timeout: Duration,
    ack_retries: u32,
}

impl AckTracker {
    pub fn new(ack_timeout: Duration, ack_retries: u32) -> Self {
        Self { pending: Mutex::new(HashMap::new()), ack_timeout, ack_retries }
    }

    pub async fn track(&self, record: LogRecord) {
        let msg_id = record.msg_id.clone();
        self.pending.lock().await.insert(msg_id, PendingDeliver { record, attempts: 0, sent_at: Instant::now() });
    }

    /// Removes `msg_id` from the pending table. Idempotent: a duplicate ack
    /// for an already-acked id is a silent no-op (spec §4.6 step 5).
    pub async fn ack(&self, msg_id: &str) {
        self.pending.lock().await.remove(msg_id);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Runs until `session.cancel` fires: retries expired DELIVERs up to
    /// `ack_retries` times, then falls back to the slow path.
    pub async fn run(self: Arc<Self>, session: SessionHandle, durable_log: Arc<NatsDurableLog>) {
        let mut ticker = tokio::time::interval(self.ack_timeout / 2);
        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => {
                    debug!(user = %session.user, device = %session.device, "ack supervisor shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep_expired(&session, &durable_log).await;
                }
            }
        }
    }

    async fn sweep_expired(&self, session: &SessionHandle, durable_log: &NatsDurableLog) {
        let now = Instant::now();
        let mut retry = Vec::new();
        let mut undelivered = Vec::new();

        {
            let mut pending = self.pending.lock().await;
            let mut undelivered_ids = Vec::new();
            for (msg_id, entry) in pending.iter_mut() {
                if now.duration_since(entry.sent_at) < self.ack_timeout {
                    continue;
                }
                if entry.attempts < self.ack_retries {
                    entry.attempts += 1;
                    entry.sent_at = now;
                    retry.push(entry.record.clone());
                } else {
                    undelivered.push(entry.record.clone());
                    undelivered_ids.push(msg_id.clone());
                }
            }
            for msg_id in undelivered_ids {
                pending.remove(&msg_id);
            }
        }

        for record in retry {
            let frame = Frame::Deliver {
                msg_id: record.msg_id.clone(),
                sequence: record.sequence,
                sender: record.sender.clone(),
                conversation_id: record.conversation_id.clone(),
                content: record.content.clone(),
                server_ts: record.server_ts,
            };
            if session.try_enqueue(frame).is_err() {
                warn!(user = %session.user, device = %session.device, "outbound queue full on ack retry");
            }
        }

        for record in undelivered {
            debug!(msg_id = %record.msg_id, "delivery unacked after retries, spooling to offline_msg");
            if let Err(err) = durable_log.publish(Topic::OfflineMsg, &record.recipient, &record).await {
                warn!(%err, msg_id = %record.msg_id, "failed to spool undelivered message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imcore::Content;

    fn sample_record(msg_id: &str) -> LogRecord {
        LogRecord {
            msg_id: msg_id.to_owned(),
            sequence: 1,
            sender: "alice".into(),
            recipient: "bob".into(),
            conversation_id: "private:alice:bob".into(),
            content: Content::text("hi"),
            client_ts: 1000,
            server_ts: 1001,
        }
    }

    #[tokio::test]
    async fn ack_removes_from_pending() {
        let tracker = AckTracker::new(Duration::from_secs(3), 2);
        tracker.track(sample_record("m1")).await;
        assert_eq!(tracker.pending_count().await, 1);
        tracker.ack("m1").await;
        assert_eq!(tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn ack_for_unknown_id_is_a_no_op() {
        let tracker = AckTracker::new(Duration::from_secs(3), 2);
        tracker.track(sample_record("m1")).await;
        tracker.ack("does-not-exist").await;
        assert_eq!(tracker.pending_count().await, 1);
    }
}
