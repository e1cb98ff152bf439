// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable block-reservation backends for the sequencer (spec §4.2).
//!
//! `reserve_block` hands out a disjoint `[start, start+size)` range of ids
//! for a conversation, persisting the new high-water mark before returning
//! so a crash after the call never hands out an id twice.

use std::collections::HashMap;
use std::sync::Mutex;

use sqlx::SqlitePool;

use crate::error::SequencerError;

pub trait BlockBackend: Send + Sync {
    fn reserve_block(
        &self,
        conversation_id: &str,
        size: u64,
    ) -> impl std::future::Future<Output = Result<u64, SequencerError>> + Send;
}

/// Persists high-water marks in a `sequence_blocks` table. One row per
/// conversation; reservation is a single atomic upsert-and-return.
pub struct SqliteBlockBackend {
    pool: SqlitePool,
}

impl SqliteBlockBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sequence_blocks (
                conversation_id TEXT PRIMARY KEY,
                high_water INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

impl BlockBackend for SqliteBlockBackend {
    async fn reserve_block(&self, conversation_id: &str, size: u64) -> Result<u64, SequencerError> {
        let size = size as i64;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO sequence_blocks (conversation_id, high_water) VALUES (?1, ?2)
             ON CONFLICT(conversation_id) DO UPDATE SET high_water = high_water + ?2
             RETURNING high_water - ?2",
        )
        .bind(conversation_id)
        .bind(size)
        .fetch_one(&self.pool)
        .await
        .map_err(|source| SequencerError::BackendUnavailable {
            conversation_id: conversation_id.to_owned(),
            source,
        })?;
        Ok(row.0 as u64)
    }
}

/// In-process backend for tests and single-node deployments without a
/// SQLite file; high-water marks are lost on restart.
#[derive(Default)]
pub struct InMemoryBlockBackend {
    high_water: Mutex<HashMap<String, u64>>,
}

impl BlockBackend for InMemoryBlockBackend {
    async fn reserve_block(&self, conversation_id: &str, size: u64) -> Result<u64, SequencerError> {
        let mut map = self.high_water.lock().unwrap_or_else(|e| e.into_inner());
        let start = *map.get(conversation_id).unwrap_or(&0);
        map.insert(conversation_id.to_owned(), start + size);
        Ok(start)
    }
}
