// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed message store (spec §4.8, component C8): row-per-message
//! persistence with a `(recipient_id, sequence)` index for ordered offline
//! scans and a unique `msg_id` index for idempotent batch inserts.

mod error;
mod message_store;

pub use error::StoreError;
pub use message_store::{DeliveryStatus, InsertBatchOutcome, MessageStore};
