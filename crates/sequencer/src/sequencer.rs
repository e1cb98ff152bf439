// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monotonic per-conversation sequence allocation (spec §4.2, component C2).
//!
//! In-memory allocation from a reserved block is lock-free once the block
//! is held; refilling a block takes the map lock only for the conversation
//! being refilled. Concurrent `next()` calls for the same conversation are
//! totally ordered by the lock around block refill and the atomic-style
//! increment within it.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::BlockBackend;
use crate::error::SequencerError;

/// Default block size reserved from the durable backend per refill
/// (spec §6 `sequence_block_size`).
pub const DEFAULT_BLOCK_SIZE: u64 = 100;

struct Block {
    next: u64,
    end_exclusive: u64,
}

pub struct Sequencer<B: BlockBackend> {
    backend: B,
    block_size: u64,
    blocks: Mutex<HashMap<String, Block>>,
}

impl<B: BlockBackend> Sequencer<B> {
    pub fn new(backend: B, block_size: u64) -> Self {
        Self { backend, block_size, blocks: Mutex::new(HashMap::new()) }
    }

    /// Returns the next sequence number for `conversation_id`. Fails loudly
    /// if a block refill is needed and the durable backend is unreachable;
    /// never fabricates a value.
    pub async fn next(&self, conversation_id: &str) -> Result<u64, SequencerError> {
        let mut blocks = self.blocks.lock().await;
        if let Some(block) = blocks.get_mut(conversation_id) {
            if block.next < block.end_exclusive {
                let value = block.next;
                block.next += 1;
                return Ok(value);
            }
        }
        let start = self.backend.reserve_block(conversation_id, self.block_size).await?;
        debug!(conversation_id, start, size = self.block_size, "reserved sequence block");
        blocks.insert(
            conversation_id.to_owned(),
            Block { next: start + 1, end_exclusive: start + self.block_size },
        );
        Ok(start)
    }

    /// Flushes nothing by itself: blocks are committed durably at reserve
    /// time, so clean shutdown has no pending state. Exposed so callers
    /// have a place to hang shutdown logging without special-casing it.
    pub async fn shutdown(&self) {
        let blocks = self.blocks.lock().await;
        for (conversation_id, block) in blocks.iter() {
            if block.next < block.end_exclusive {
                debug!(
                    conversation_id,
                    unused = block.end_exclusive - block.next,
                    "discarding unused tail of sequence block on shutdown"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBlockBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn next_is_monotonic_within_a_conversation() {
        let seq = Sequencer::new(InMemoryBlockBackend::default(), 4);
        let values: Vec<u64> =
            futures_collect(&seq, "conv:alice:bob", 10).await;
        for pair in values.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[tokio::test]
    async fn conversations_have_independent_sequences() {
        let seq = Sequencer::new(InMemoryBlockBackend::default(), 4);
        assert_eq!(seq.next("conv:a").await.unwrap(), 0);
        assert_eq!(seq.next("conv:b").await.unwrap(), 0);
        assert_eq!(seq.next("conv:a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_next_calls_are_totally_ordered() {
        let seq = Arc::new(Sequencer::new(InMemoryBlockBackend::default(), 100));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let seq = seq.clone();
            handles.push(tokio::spawn(async move { seq.next("conv:shared").await.unwrap() }));
        }
        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 20, "no two callers observed the same sequence");
    }

    async fn futures_collect<B: BlockBackend>(
        seq: &Sequencer<B>,
        conversation_id: &str,
        n: usize,
    ) -> Vec<u64> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(seq.next(conversation_id).await.unwrap());
        }
        out
    }
}
