// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drains `offline_msg` into the Message Store (spec §4.7, component C7).
//!
//! The batch-processing steps (dedup filter, retrying persist) are free
//! functions so they can be exercised without a live NATS consumer; `run`
//! wires them to a real `LogConsumer` and owns the pull/ack loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dedup::DedupSet;
use durablelog::{Delivery, LogConsumer, LogRecord, NatsDurableLog, Topic};
use imcore::{ConversationType, Message};
use store::{InsertBatchOutcome, MessageStore};

use crate::error::OfflineWorkerError;

/// Default batch size and timeout (spec §6 `offline_batch_size`,
/// `offline_batch_timeout_ms`).
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Default retry schedule (spec §6 `retry_backoff`).
pub fn default_retry_backoff() -> Vec<Duration> {
    [1, 2, 4, 8, 16].into_iter().map(Duration::from_secs).collect()
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub retry_backoff: Vec<Duration>,
    pub consumer_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            retry_backoff: default_retry_backoff(),
            consumer_name: "offline-worker".to_owned(),
        }
    }
}

fn to_message(record: &LogRecord) -> Message {
    Message {
        msg_id: record.msg_id.clone(),
        conversation_type: ConversationType::Private,
        conversation_id: imcore::ConversationId(record.conversation_id.clone()),
        sender_id: record.sender.clone(),
        recipient_id: Some(record.recipient.clone()),
        group_id: None,
        content: record.content.clone(),
        client_ts: record.client_ts,
        server_ts: record.server_ts,
        sequence: record.sequence,
    }
}

/// Step 2 of the algorithm: drops already-seen ids, counting them.
async fn dedup_filter(records: Vec<LogRecord>, dedup: &DedupSet) -> (Vec<LogRecord>, usize) {
    let mut survivors = Vec::with_capacity(records.len());
    let mut duplicates = 0;
    for record in records {
        if dedup.check_and_mark(&record.msg_id).await {
            duplicates += 1;
        } else {
            survivors.push(record);
        }
    }
    (survivors, duplicates)
}

/// Steps 3 and 5: batch-insert with exponential backoff on transient
/// failure. Returns `Err` only after the retry budget is exhausted.
async fn persist_with_retry(
    store: &MessageStore,
    messages: &[Message],
    backoff: &[Duration],
) -> Result<InsertBatchOutcome, store::StoreError> {
    let mut result = store.insert_batch(messages).await;
    for delay in backoff {
        let err = match &result {
            Ok(_) => break,
            Err(e) => e,
        };
        if !err.is_retryable() {
            warn!(%err, "offline worker batch insert failed non-retryably, skipping remaining backoff");
            break;
        }
        tokio::time::sleep(*delay).await;
        result = store.insert_batch(messages).await;
        if let Err(ref e) = result {
            warn!(delay = ?delay, %e, "offline worker batch insert retry failed");
        }
    }
    result
}

pub struct OfflineWorker {
    log: NatsDurableLog,
    store: MessageStore,
    dedup: DedupSet,
    config: WorkerConfig,
}

impl OfflineWorker {
    pub fn new(log: NatsDurableLog, store: MessageStore, dedup: DedupSet, config: WorkerConfig) -> Self {
        Self { log, store, dedup, config }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<(), OfflineWorkerError> {
        let consumer = self.log.consumer(Topic::OfflineMsg, &self.config.consumer_name).await?;
        loop {
            if cancel.is_cancelled() {
                info!("offline worker shutting down");
                return Ok(());
            }
            let batch = match tokio::time::timeout(
                self.config.batch_timeout,
                consumer.next_batch(self.config.batch_size),
            )
            .await
            {
                Ok(result) => result?,
                Err(_elapsed) => Vec::new(),
            };
            if batch.is_empty() {
                continue;
            }
            self.process_batch(&consumer, batch).await?;
        }
    }

    async fn process_batch(
        &self,
        consumer: &LogConsumer,
        deliveries: Vec<Delivery>,
    ) -> Result<(), OfflineWorkerError> {
        let _ = consumer;
        let records: Vec<LogRecord> = deliveries.iter().map(|d| d.record.clone()).collect();
        let (survivors, duplicates) = dedup_filter(records, &self.dedup).await;
        let messages: Vec<Message> = survivors.iter().map(to_message).collect();

        if messages.is_empty() {
            debug!(duplicates, "offline worker batch was entirely duplicates");
            for delivery in deliveries {
                let _ = delivery.ack().await;
            }
            return Ok(());
        }

        match persist_with_retry(&self.store, &messages, &self.config.retry_backoff).await {
            Ok(outcome) => {
                debug!(
                    inserted = outcome.inserted,
                    store_duplicates = outcome.duplicates,
                    dedup_duplicates = duplicates,
                    "offline worker persisted batch"
                );
                for delivery in deliveries {
                    let _ = delivery.ack().await;
                }
            }
            Err(err) => {
                error!(%err, n = messages.len(), "offline worker exhausted retries, routing to dlq");
                for message in &messages {
                    let dlq_record = LogRecord {
                        msg_id: message.msg_id.clone(),
                        sequence: message.sequence,
                        sender: message.sender_id.clone(),
                        recipient: message.recipient_id.clone().unwrap_or_default(),
                        conversation_id: message.conversation_id.as_str().to_owned(),
                        content: message.content.clone(),
                        client_ts: message.client_ts,
                        server_ts: message.server_ts,
                    };
                    if let Err(publish_err) =
                        self.log.publish(Topic::Dlq, &dlq_record.recipient, &dlq_record).await
                    {
                        error!(%publish_err, msg_id = %dlq_record.msg_id, "failed to publish dlq record");
                    }
                }
                // Offset commit follows the DLQ publish, not the failed DB
                // write: per spec §4.7 step 5, an unrecoverable batch is
                // never replayed forever once it's in the DLQ.
                for delivery in deliveries {
                    let _ = delivery.ack().await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imcore::Content;

    fn sample(msg_id: &str) -> LogRecord {
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
    async fn dedup_filter_drops_seen_ids() {
        let dedup = DedupSet::new(Duration::from_secs(60));
        dedup.check_and_mark("m1").await;
        let (survivors, duplicates) =
            dedup_filter(vec![sample("m1"), sample("m2")], &dedup).await;
        assert_eq!(duplicates, 1);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].msg_id, "m2");
    }

    #[tokio::test]
    async fn persist_with_retry_succeeds_on_first_try() {
        let store = MessageStore::connect("sqlite::memory:").await.unwrap();
        let messages = vec![to_message(&sample("m1"))];
        let outcome = persist_with_retry(&store, &messages, &[]).await.unwrap();
        assert_eq!(outcome.inserted, 1);
    }

    #[test]
    fn to_message_preserves_identity_fields() {
        let record = sample("m1");
        let message = to_message(&record);
        assert_eq!(message.msg_id, "m1");
        assert_eq!(message.sequence, 1);
        assert_eq!(message.recipient_id.as_deref(), Some("bob"));
    }
}
