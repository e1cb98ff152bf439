// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process durable log stand-in for tests and single-node deployments
//! without a NATS cluster. Ordering within a partition key is preserved
//! because each topic is backed by a single ordered broadcast channel;
//! there is no real durability across process restarts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::error::DurableLogError;
use crate::record::LogRecord;
use crate::topic::Topic;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct InMemoryDurableLog {
    topics: Arc<Mutex<HashMap<Topic, broadcast::Sender<(String, LogRecord)>>>>,
}

impl Default for InMemoryDurableLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDurableLog {
    pub fn new() -> Self {
        Self { topics: Arc::new(Mutex::new(HashMap::new())) }
    }

    async fn sender(&self, topic: Topic) -> broadcast::Sender<(String, LogRecord)> {
        let mut topics = self.topics.lock().await;
        topics.entry(topic).or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0).clone()
    }

    pub async fn publish(
        &self,
        topic: Topic,
        partition_key: &str,
        record: &LogRecord,
    ) -> Result<(), DurableLogError> {
        let sender = self.sender(topic).await;
        // No active subscriber is not an error: topics like `offline_msg`
        // are drained by a worker that may start after messages arrive.
        let _ = sender.send((partition_key.to_owned(), record.clone()));
        Ok(())
    }

    pub async fn subscribe(&self, topic: Topic) -> broadcast::Receiver<(String, LogRecord)> {
        self.sender(topic).await.subscribe()
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
            client_ts: 999,
            server_ts: 1000,
        }
    }

    #[tokio::test]
    async fn publish_then_subscribe_delivers_record() {
        let log = InMemoryDurableLog::new();
        let mut rx = log.subscribe(Topic::PrivateMsgBus).await;
        log.publish(Topic::PrivateMsgBus, "bob", &sample_record("m1")).await.unwrap();
        let (key, record) = rx.recv().await.unwrap();
        assert_eq!(key, "bob");
        assert_eq!(record.msg_id, "m1");
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let log = InMemoryDurableLog::new();
        let mut private_rx = log.subscribe(Topic::PrivateMsgBus).await;
        log.publish(Topic::OfflineMsg, "bob", &sample_record("m1")).await.unwrap();
        assert!(private_rx.try_recv().is_err());
    }
}
