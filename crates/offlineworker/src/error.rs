// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline worker errors (spec §4.7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OfflineWorkerError {
    #[error("durable log error: {0}")]
    DurableLog(#[from] durablelog::DurableLogError),
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}
