// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routing algorithm (spec §4.5, component C5): dedup, sequence, then
//! fast-path or slow-path publish for private sends; always-durable
//! fan-out publish for group sends.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex as StdMutex;

use imcore::{message::validate_msg_id, Content};
use tracing::{debug, warn};

use durablelog::{GroupFanoutRecord, LogRecord, Publisher, Topic};
use registry::Registry;
use sequencer::{BlockBackend, Sequencer};
use dedup::DedupSet;

use crate::error::RouterError;

/// Cap on the local duplicate-outcome cache; beyond this, a cache miss on
/// an already-deduped id falls back to the synthesized ack (spec §4.5 step 2).
const OUTCOME_CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    Fast,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePrivateOutcome {
    pub sequence: u64,
    pub path: DeliveryPath,
    pub was_duplicate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteGroupOutcome {
    pub sequence: u64,
    pub was_duplicate: bool,
}

struct OutcomeCache {
    map: HashMap<String, RoutePrivateOutcome>,
    order: VecDeque<String>,
}

impl OutcomeCache {
    fn new() -> Self {
        Self { map: HashMap::new(), order: VecDeque::new() }
    }

    fn insert(&mut self, msg_id: &str, outcome: RoutePrivateOutcome) {
        if self.map.insert(msg_id.to_owned(), outcome).is_none() {
            self.order.push_back(msg_id.to_owned());
            if self.order.len() > OUTCOME_CACHE_CAPACITY {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
    }

    fn get(&self, msg_id: &str) -> Option<RoutePrivateOutcome> {
        self.map.get(msg_id).copied()
    }
}

pub struct Router<B: BlockBackend, L: Publisher> {
    registry: Registry,
    sequencer: Sequencer<B>,
    dedup: DedupSet,
    log: L,
    outcome_cache: StdMutex<OutcomeCache>,
}

impl<B: BlockBackend, L: Publisher> Router<B, L> {
    pub fn new(registry: Registry, sequencer: Sequencer<B>, dedup: DedupSet, log: L) -> Self {
        Self { registry, sequencer, dedup, log, outcome_cache: StdMutex::new(OutcomeCache::new()) }
    }

    /// Routes a private send (spec §4.5 algorithm, steps 1-6).
    pub async fn route_private(
        &self,
        sender: &str,
        recipient: &str,
        conversation_id: &str,
        content: &Content,
        msg_id: &str,
        client_ts: u64,
    ) -> Result<RoutePrivateOutcome, RouterError> {
        if !validate_msg_id(msg_id) {
            return Err(RouterError::InvalidMsgId);
        }

        if self.dedup.check_and_mark(msg_id).await {
            return Ok(self.duplicate_outcome(msg_id));
        }

        let sequence = self.sequencer.next(conversation_id).await?;
        let endpoints = self.registry.lookup(recipient).await;

        let record = LogRecord {
            msg_id: msg_id.to_owned(),
            sequence,
            sender: sender.to_owned(),
            recipient: recipient.to_owned(),
            conversation_id: conversation_id.to_owned(),
            content: content.clone(),
            client_ts,
            server_ts: imcore::epoch_ms(),
        };

        let path = if endpoints.is_empty() {
            self.log.publish(Topic::OfflineMsg, recipient, &record).await?;
            DeliveryPath::Slow
        } else {
            self.log.publish(Topic::PrivateMsgBus, recipient, &record).await?;
            DeliveryPath::Fast
        };

        let outcome = RoutePrivateOutcome { sequence, path, was_duplicate: false };
        self.outcome_cache.lock().unwrap_or_else(|e| e.into_inner()).insert(msg_id, outcome);
        debug!(msg_id, sequence, ?path, "routed private message");
        Ok(outcome)
    }

    /// Routes a group send (spec §4.5: "MUST NOT enumerate members online
    /// synchronously"): always a single publish to `group_msg_bus`.
    pub async fn route_group(
        &self,
        sender: &str,
        group_id: &str,
        content: &Content,
        msg_id: &str,
        client_ts: u64,
    ) -> Result<RouteGroupOutcome, RouterError> {
        if !validate_msg_id(msg_id) {
            return Err(RouterError::InvalidMsgId);
        }

        if self.dedup.check_and_mark(msg_id).await {
            if let Some(outcome) = self.outcome_cache.lock().unwrap_or_else(|e| e.into_inner()).get(msg_id) {
                return Ok(RouteGroupOutcome { sequence: outcome.sequence, was_duplicate: true });
            }
            return Ok(RouteGroupOutcome { sequence: 0, was_duplicate: true });
        }

        let conversation_id = imcore::ConversationId::group(group_id).0;
        let sequence = self.sequencer.next(&conversation_id).await?;

        let record = GroupFanoutRecord {
            msg_id: msg_id.to_owned(),
            sequence,
            sender: sender.to_owned(),
            group_id: group_id.to_owned(),
            content: content.clone(),
            client_ts,
            server_ts: imcore::epoch_ms(),
        };
        // group_msg_bus carries GroupFanoutRecord, not LogRecord; publish
        // it as a private-shaped record addressed to the group so the
        // single `Publisher` surface covers both without a second trait.
        let as_private = LogRecord {
            msg_id: record.msg_id,
            sequence: record.sequence,
            sender: record.sender,
            recipient: group_id.to_owned(),
            conversation_id,
            content: record.content,
            client_ts: record.client_ts,
            server_ts: record.server_ts,
        };
        self.log.publish(Topic::GroupMsgBus, group_id, &as_private).await?;

        let outcome = RoutePrivateOutcome {
            sequence,
            path: DeliveryPath::Slow,
            was_duplicate: false,
        };
        self.outcome_cache.lock().unwrap_or_else(|e| e.into_inner()).insert(msg_id, outcome);

        debug!(msg_id, sequence, group_id, "routed group message");
        Ok(RouteGroupOutcome { sequence, was_duplicate: false })
    }

    fn duplicate_outcome(&self, msg_id: &str) -> RoutePrivateOutcome {
        let cache = self.outcome_cache.lock().unwrap_or_else(|e| e.into_inner());
        match cache.get(msg_id) {
            Some(mut outcome) => {
                outcome.was_duplicate = true;
                outcome
            }
            None => {
                warn!(msg_id, "duplicate msg_id not in local outcome cache, synthesizing ack");
                RoutePrivateOutcome { sequence: 0, path: DeliveryPath::Fast, was_duplicate: true }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedup::DEFAULT_TTL;
    use durablelog::InMemoryDurableLog;
    use registry::DEFAULT_MAX_DEVICES_PER_USER;
    use sequencer::{InMemoryBlockBackend, DEFAULT_BLOCK_SIZE};
    use std::time::Duration;

    fn make_router() -> Router<InMemoryBlockBackend, InMemoryDurableLog> {
        Router::new(
            Registry::new(DEFAULT_MAX_DEVICES_PER_USER),
            Sequencer::new(InMemoryBlockBackend::default(), DEFAULT_BLOCK_SIZE),
            DedupSet::new(DEFAULT_TTL),
            InMemoryDurableLog::new(),
        )
    }

    #[tokio::test]
    async fn private_send_to_offline_recipient_takes_slow_path() {
        let router = make_router();
        let outcome = router
            .route_private("alice", "bob", "private:alice:bob", &Content::text("hi"), "m1", 1000)
            .await
            .unwrap();
        assert_eq!(outcome.path, DeliveryPath::Slow);
        assert!(!outcome.was_duplicate);
    }

    #[tokio::test]
    async fn private_send_to_online_recipient_takes_fast_path() {
        let router = make_router();
        router.registry.register("bob", "dB", "gw-1", None, Duration::from_secs(90)).await.unwrap();
        let outcome = router
            .route_private("alice", "bob", "private:alice:bob", &Content::text("hi"), "m1", 1000)
            .await
            .unwrap();
        assert_eq!(outcome.path, DeliveryPath::Fast);
    }

    #[tokio::test]
    async fn duplicate_msg_id_returns_cached_outcome() {
        let router = make_router();
        let first = router
            .route_private("alice", "bob", "private:alice:bob", &Content::text("hi"), "m1", 1000)
            .await
            .unwrap();
        let second = router
            .route_private("alice", "bob", "private:alice:bob", &Content::text("hi"), "m1", 1000)
            .await
            .unwrap();
        assert_eq!(first.sequence, second.sequence);
        assert!(second.was_duplicate);
    }

    #[tokio::test]
    async fn empty_msg_id_is_invalid_argument() {
        let router = make_router();
        let err = router
            .route_private("alice", "bob", "private:alice:bob", &Content::text("hi"), "", 1000)
            .await;
        assert!(matches!(err, Err(RouterError::InvalidMsgId)));
    }

    #[tokio::test]
    async fn group_send_allocates_once_and_publishes_once() {
        let router = make_router();
        let mut rx = router.log.subscribe(Topic::GroupMsgBus).await;
        let outcome = router.route_group("alice", "G1", &Content::text("hi"), "m1", 1000).await.unwrap();
        assert!(!outcome.was_duplicate);
        let (key, record) = rx.recv().await.unwrap();
        assert_eq!(key, "G1");
        assert_eq!(record.sequence, outcome.sequence);
    }
}
