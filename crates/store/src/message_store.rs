// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed message store (spec §4.8, component C8).
//!
//! Schema and migration style follow the jwilger-caxton storage module:
//! table creation lives in `migrate`, SQL text is kept in named constants,
//! and row parsing is a free function kept apart from the I/O methods.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use imcore::{Content, ConversationId, ConversationType, Message};

use crate::error::StoreError;

const CREATE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS messages (
    msg_id TEXT PRIMARY KEY,
    conversation_type TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    group_id TEXT,
    content_type TEXT NOT NULL,
    content_bytes BLOB NOT NULL,
    client_ts INTEGER NOT NULL,
    server_ts INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    delivered_devices TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL
);
";

const CREATE_RECIPIENT_SEQUENCE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_messages_recipient_sequence
ON messages (recipient_id, sequence);
";

const CREATE_CREATED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages (created_at);
";

const INSERT_MESSAGE: &str = r"
INSERT OR IGNORE INTO messages (
    msg_id, conversation_type, conversation_id, sender_id, recipient_id, group_id,
    content_type, content_bytes, client_ts, server_ts, sequence, delivered_devices, created_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, '[]', ?12);
";

const SELECT_UNDELIVERED: &str = r"
SELECT msg_id, conversation_type, conversation_id, sender_id, recipient_id, group_id,
       content_type, content_bytes, client_ts, server_ts, sequence, delivered_devices
FROM messages
WHERE recipient_id = ?1
  AND NOT EXISTS (
    SELECT 1 FROM json_each(delivered_devices) WHERE json_each.value = ?2
  )
ORDER BY sequence ASC
LIMIT ?3;
";

const SELECT_DELIVERED_DEVICES: &str = "SELECT delivered_devices FROM messages WHERE msg_id = ?1;";

const UPDATE_DELIVERED_DEVICES: &str =
    "UPDATE messages SET delivered_devices = ?2 WHERE msg_id = ?1;";

const PURGE_EXPIRED: &str = "DELETE FROM messages WHERE created_at < ?1;";

/// Row-level outcome of a batch insert: how many rows were new vs. already
/// present (duplicate `msg_id`, skipped without failing the batch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertBatchOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Durable status of a persisted message, as exposed over the Router's
/// `GetMessageStatus` RPC (spec §6). A message that never reached the
/// store (still in flight on the fast path) has no status here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Routed,
    Delivered,
}

#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new().max_connections(8).connect(database_url).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await.map_err(StoreError::Migration)?;
        sqlx::query(CREATE_RECIPIENT_SEQUENCE_INDEX)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Migration)?;
        sqlx::query(CREATE_CREATED_AT_INDEX)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Migration)?;
        Ok(())
    }

    /// Atomically inserts a batch of messages ordered by `(recipient_id,
    /// sequence)` to exploit index locality. A unique-on-`msg_id` conflict
    /// is a row-level skip, never a batch failure.
    pub async fn insert_batch(
        &self,
        messages: &[Message],
    ) -> Result<InsertBatchOutcome, StoreError> {
        let mut ordered: Vec<&Message> = messages.iter().collect();
        ordered.sort_by(|a, b| {
            a.recipient_id.as_deref().unwrap_or_default().cmp(b.recipient_id.as_deref().unwrap_or_default())
                .then(a.sequence.cmp(&b.sequence))
        });

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for message in &ordered {
            let recipient = message.recipient_id.as_deref().unwrap_or_default();
            let result = sqlx::query(INSERT_MESSAGE)
                .bind(&message.msg_id)
                .bind(conversation_type_str(message.conversation_type))
                .bind(message.conversation_id.as_str())
                .bind(&message.sender_id)
                .bind(recipient)
                .bind(&message.group_id)
                .bind(&message.content.content_type)
                .bind(&message.content.bytes)
                .bind(message.client_ts as i64)
                .bind(message.server_ts as i64)
                .bind(message.sequence as i64)
                .bind(message.server_ts as i64)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }
        tx.commit().await?;

        let duplicates = ordered.len() - inserted;
        if duplicates > 0 {
            debug!(inserted, duplicates, "insert_batch skipped duplicate msg_ids");
        }
        Ok(InsertBatchOutcome { inserted, duplicates })
    }

    /// Returns messages for `recipient` not yet acked by `device`, ordered
    /// by sequence, oldest first.
    pub async fn scan_undelivered(
        &self,
        recipient: &str,
        device: &str,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(SELECT_UNDELIVERED)
            .bind(recipient)
            .bind(device)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_message_row).collect()
    }

    /// Marks `msg_id` delivered to `device`. Idempotent: adding an already
    /// present device id is a no-op.
    pub async fn mark_delivered(&self, msg_id: &str, device: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(SELECT_DELIVERED_DEVICES).bind(msg_id).fetch_optional(&mut *tx).await?;
        let Some(row) = row else {
            warn!(msg_id, "mark_delivered called for unknown message");
            return Ok(());
        };
        let raw: String = row.get(0);
        let mut devices: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
        if !devices.iter().any(|d| d == device) {
            devices.push(device.to_owned());
        }
        let updated = serde_json::to_string(&devices).unwrap_or_else(|_| "[]".to_owned());
        sqlx::query(UPDATE_DELIVERED_DEVICES).bind(msg_id).bind(updated).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Looks up whether `msg_id` has been persisted, and if so whether it
    /// has been delivered to at least one device. `None` means this store
    /// never saw the message, which is expected for a fast-path delivery
    /// that hasn't spooled to the offline store.
    pub async fn message_status(&self, msg_id: &str) -> Result<Option<DeliveryStatus>, StoreError> {
        let row = sqlx::query(SELECT_DELIVERED_DEVICES).bind(msg_id).fetch_optional(&self.pool).await?;
        let Some(row) = row else { return Ok(None) };
        let raw: String = row.get(0);
        let devices: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
        Ok(Some(if devices.is_empty() { DeliveryStatus::Routed } else { DeliveryStatus::Delivered }))
    }

    /// Background sweep: deletes rows created before `older_than` (epoch
    /// ms). Default TTL is 7 days (spec §4.8).
    pub async fn purge_expired(&self, older_than_epoch_ms: u64) -> Result<u64, StoreError> {
        let result =
            sqlx::query(PURGE_EXPIRED).bind(older_than_epoch_ms as i64).execute(&self.pool).await?;
        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged, "purge_expired removed stale messages");
        }
        Ok(purged)
    }
}

fn conversation_type_str(t: ConversationType) -> &'static str {
    match t {
        ConversationType::Private => "private",
        ConversationType::Group => "group",
    }
}

fn parse_message_row(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
    let conversation_type: String = row.get("conversation_type");
    let conversation_type =
        if conversation_type == "group" { ConversationType::Group } else { ConversationType::Private };
    Ok(Message {
        msg_id: row.get("msg_id"),
        conversation_type,
        conversation_id: ConversationId(row.get::<String, _>("conversation_id")),
        sender_id: row.get("sender_id"),
        recipient_id: Some(row.get("recipient_id")),
        group_id: row.get("group_id"),
        content: Content { content_type: row.get("content_type"), bytes: row.get("content_bytes") },
        client_ts: row.get::<i64, _>("client_ts") as u64,
        server_ts: row.get::<i64, _>("server_ts") as u64,
        sequence: row.get::<i64, _>("sequence") as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use imcore::ConversationId;

    async fn test_store() -> MessageStore {
        MessageStore::connect("sqlite::memory:").await.unwrap()
    }

    fn sample(msg_id: &str, recipient: &str, sequence: u64) -> Message {
        Message {
            msg_id: msg_id.into(),
            conversation_type: ConversationType::Private,
            conversation_id: ConversationId::private("alice", recipient),
            sender_id: "alice".into(),
            recipient_id: Some(recipient.into()),
            group_id: None,
            content: Content::text("hi"),
            client_ts: 1000,
            server_ts: 1001,
            sequence,
        }
    }

    #[tokio::test]
    async fn insert_then_scan_returns_in_sequence_order() {
        let store = test_store().await;
        store
            .insert_batch(&[sample("m2", "bob", 2), sample("m1", "bob", 1)])
            .await
            .unwrap();
        let rows = store.scan_undelivered("bob", "dB", 10).await.unwrap();
        assert_eq!(rows.iter().map(|m| m.msg_id.as_str()).collect::<Vec<_>>(), vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn duplicate_msg_id_is_row_level_skip() {
        let store = test_store().await;
        let outcome = store.insert_batch(&[sample("m1", "bob", 1)]).await.unwrap();
        assert_eq!(outcome.inserted, 1);
        let outcome = store.insert_batch(&[sample("m1", "bob", 1)]).await.unwrap();
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.duplicates, 1);
    }

    #[tokio::test]
    async fn mark_delivered_excludes_from_future_scans() {
        let store = test_store().await;
        store.insert_batch(&[sample("m1", "bob", 1)]).await.unwrap();
        store.mark_delivered("m1", "dB").await.unwrap();
        let rows = store.scan_undelivered("bob", "dB", 10).await.unwrap();
        assert!(rows.is_empty());
        let rows = store.scan_undelivered("bob", "dOther", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn mark_delivered_is_idempotent() {
        let store = test_store().await;
        store.insert_batch(&[sample("m1", "bob", 1)]).await.unwrap();
        store.mark_delivered("m1", "dB").await.unwrap();
        store.mark_delivered("m1", "dB").await.unwrap();
        let rows = store.scan_undelivered("bob", "dB", 10).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn purge_expired_removes_old_rows_only() {
        let store = test_store().await;
        let mut old = sample("m1", "bob", 1);
        old.server_ts = 1_000;
        store.insert_batch(&[old]).await.unwrap();
        let purged = store.purge_expired(2_000).await.unwrap();
        assert_eq!(purged, 1);
    }
}
