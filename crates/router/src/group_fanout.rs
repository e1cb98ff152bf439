// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Group fan-out consumer (spec §4.5): resolves membership for a
//! `group_msg_bus` record and re-injects one record per recipient into
//! `private_msg_bus` or `offline_msg`, carrying the same group sequence.
//!
//! Membership resolution is intentionally pluggable: the Router itself must
//! not resolve it synchronously inline with routing.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use durablelog::{Delivery, LogRecord, NatsDurableLog, Publisher, Topic};
use registry::Registry;

pub trait GroupMembership: Send + Sync {
    fn members(
        &self,
        group_id: &str,
    ) -> impl std::future::Future<Output = Vec<String>> + Send;
}

/// In-process membership directory for tests and small deployments.
#[derive(Default, Clone)]
pub struct InMemoryGroupMembership {
    groups: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl InMemoryGroupMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_members(&self, group_id: &str, members: Vec<String>) {
        self.groups.write().await.insert(group_id.to_owned(), members);
    }
}

impl GroupMembership for InMemoryGroupMembership {
    async fn members(&self, group_id: &str) -> Vec<String> {
        self.groups.read().await.get(group_id).cloned().unwrap_or_default()
    }
}

/// SQLite-backed membership directory (spec §4.5): persists the
/// `group_members` roster so fan-out survives restarts, mirroring the
/// sequencer's block backend's table-per-concern layout.
pub struct SqliteGroupMembership {
    pool: SqlitePool,
}

impl SqliteGroupMembership {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (group_id, member)
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn add_member(&self, group_id: &str, member: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO group_members (group_id, member) VALUES (?1, ?2)
             ON CONFLICT(group_id, member) DO NOTHING",
        )
        .bind(group_id)
        .bind(member)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_member(&self, group_id: &str, member: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM group_members WHERE group_id = ?1 AND member = ?2")
            .bind(group_id)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl GroupMembership for SqliteGroupMembership {
    async fn members(&self, group_id: &str) -> Vec<String> {
        let rows: Result<Vec<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT member FROM group_members WHERE group_id = ?1")
                .bind(group_id)
                .fetch_all(&self.pool)
                .await;
        match rows {
            Ok(rows) => rows.into_iter().map(|(member,)| member).collect(),
            Err(err) => {
                warn!(%err, group_id, "failed to resolve group membership");
                Vec::new()
            }
        }
    }
}

/// For one fan-out record and resolved membership, computes the
/// per-recipient records and which topic each should land on. Pure and
/// independent of any consumer/ack machinery, so it's directly testable.
pub async fn plan_fanout(
    record: &LogRecord,
    members: &[String],
    registry: &Registry,
) -> Vec<(Topic, String, LogRecord)> {
    let mut plan = Vec::with_capacity(members.len());
    for member in members {
        let endpoints = registry.lookup(member).await;
        let topic = if endpoints.is_empty() { Topic::OfflineMsg } else { Topic::PrivateMsgBus };
        let per_recipient = LogRecord {
            msg_id: record.msg_id.clone(),
            sequence: record.sequence,
            sender: record.sender.clone(),
            recipient: member.clone(),
            conversation_id: record.conversation_id.clone(),
            content: record.content.clone(),
            client_ts: record.client_ts,
            server_ts: record.server_ts,
        };
        plan.push((topic, member.clone(), per_recipient));
    }
    plan
}

/// Runs the fan-out consumer loop until `cancel` fires: pulls from
/// `group_msg_bus`, resolves membership, re-publishes per recipient, and
/// acks only after every re-publish succeeds.
pub async fn run<L, M>(
    source: &NatsDurableLog,
    sink: &L,
    membership: &M,
    registry: &Registry,
    cancel: CancellationToken,
) -> Result<(), durablelog::DurableLogError>
where
    L: Publisher,
    M: GroupMembership,
{
    let consumer = source.consumer(Topic::GroupMsgBus, "group-fanout").await?;
    loop {
        if cancel.is_cancelled() {
            info!("group fan-out consumer shutting down");
            return Ok(());
        }
        let batch = consumer.next_batch(50).await?;
        if batch.is_empty() {
            continue;
        }
        process_batch(sink, membership, registry, batch).await?;
    }
}

async fn process_batch<L: Publisher, M: GroupMembership>(
    sink: &L,
    membership: &M,
    registry: &Registry,
    deliveries: Vec<Delivery>,
) -> Result<(), durablelog::DurableLogError> {
    for delivery in deliveries {
        let members = membership.members(&delivery.record.recipient).await;
        let plan = plan_fanout(&delivery.record, &members, registry).await;
        for (topic, key, per_recipient) in &plan {
            sink.publish(*topic, key, per_recipient).await?;
        }
        debug!(group_id = %delivery.record.recipient, n = plan.len(), "fanned out group message");
        delivery.ack().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use imcore::Content;
    use registry::DEFAULT_MAX_DEVICES_PER_USER;
    use std::time::Duration;

    fn sample_record() -> LogRecord {
        LogRecord {
            msg_id: "m1".into(),
            sequence: 7,
            sender: "alice".into(),
            recipient: "G1".into(),
            conversation_id: "group:G1".into(),
            content: Content::text("hi"),
            client_ts: 1000,
            server_ts: 1001,
        }
    }

    #[tokio::test]
    async fn online_member_goes_fast_path_offline_goes_slow() {
        let registry = Registry::new(DEFAULT_MAX_DEVICES_PER_USER);
        registry.register("bob", "dB", "gw-1", None, Duration::from_secs(90)).await.unwrap();
        let members = vec!["bob".to_owned(), "carol".to_owned()];
        let plan = plan_fanout(&sample_record(), &members, &registry).await;
        let bob = plan.iter().find(|(_, recipient, _)| recipient == "bob").unwrap();
        let carol = plan.iter().find(|(_, recipient, _)| recipient == "carol").unwrap();
        assert_eq!(bob.0, Topic::PrivateMsgBus);
        assert_eq!(carol.0, Topic::OfflineMsg);
    }

    #[tokio::test]
    async fn every_member_carries_the_same_group_sequence() {
        let registry = Registry::new(DEFAULT_MAX_DEVICES_PER_USER);
        let members = vec!["bob".to_owned(), "carol".to_owned(), "dave".to_owned()];
        let plan = plan_fanout(&sample_record(), &members, &registry).await;
        assert!(plan.iter().all(|(_, _, record)| record.sequence == 7));
    }
}
