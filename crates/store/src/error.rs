// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message store errors (spec §4.8).

use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::Error),
}

impl StoreError {
    /// Whether retrying the same operation could plausibly succeed (spec
    /// §4.7: "Transient DB error -> retry"). Schema mismatches, decode
    /// failures, and constraint violations are never transient: retrying
    /// just burns the backoff ladder before the batch reaches the DLQ.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Migration(_) => false,
            StoreError::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.kind(), ErrorKind::Other)
            }
            StoreError::Database(
                sqlx::Error::ColumnDecode { .. }
                | sqlx::Error::Decode(_)
                | sqlx::Error::TypeNotFound { .. }
                | sqlx::Error::ColumnNotFound(_),
            ) => false,
            StoreError::Database(_) => true,
        }
    }
}

impl From<StoreError> for imcore::ApiError {
    fn from(_: StoreError) -> Self {
        imcore::ApiError::Unavailable
    }
}
