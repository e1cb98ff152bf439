// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sequencer errors (spec §4.2).

use thiserror::Error;

/// `next()` MUST fail loudly rather than fabricate a sequence when the
/// durable block backend is unreachable.
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("durable sequence backend unavailable for conversation {conversation_id}: {source}")]
    BackendUnavailable {
        conversation_id: String,
        #[source]
        source: sqlx::Error,
    },
}

impl From<SequencerError> for imcore::ApiError {
    fn from(_: SequencerError) -> Self {
        imcore::ApiError::Unavailable
    }
}
