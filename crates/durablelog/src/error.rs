// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable log errors (spec §4.4).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DurableLogError {
    #[error("connect to durable log backend failed: {0}")]
    Connect(#[source] anyhow::Error),
    #[error("publish to {subject} failed: {source}")]
    Publish { subject: String, #[source] source: anyhow::Error },
    #[error("stream/consumer setup failed: {0}")]
    Setup(#[source] anyhow::Error),
    #[error("consume failed: {0}")]
    Consume(#[source] anyhow::Error),
    #[error("malformed record on {subject}: {source}")]
    Decode { subject: String, #[source] source: serde_json::Error },
}

impl From<DurableLogError> for imcore::ApiError {
    fn from(_: DurableLogError) -> Self {
        imcore::ApiError::Unavailable
    }
}
