// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline worker (spec §4.7, component C7): drains `offline_msg` into the
//! Message Store with deduplication, batching, and DLQ routing for
//! unrecoverable batches.

mod error;
mod worker;

pub use error::OfflineWorkerError;
pub use worker::{OfflineWorker, WorkerConfig, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT};
