// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router errors (spec §4.5) — the union of every component it calls,
//! collapsed to the abstract taxonomy at the boundary (spec §6-7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("msg_id is empty or malformed")]
    InvalidMsgId,
    #[error("registry unavailable: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("sequencer unavailable: {0}")]
    Sequencer(#[from] sequencer::SequencerError),
    #[error("durable log unavailable: {0}")]
    DurableLog(#[from] durablelog::DurableLogError),
}

impl From<&RouterError> for imcore::ApiError {
    fn from(err: &RouterError) -> Self {
        match err {
            RouterError::InvalidMsgId => imcore::ApiError::InvalidArgument,
            RouterError::Registry(e) => e.clone().into(),
            RouterError::Sequencer(_) => imcore::ApiError::Unavailable,
            RouterError::DurableLog(_) => imcore::ApiError::Unavailable,
        }
    }
}
