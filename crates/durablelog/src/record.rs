// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire payload carried on every durable-log topic.

use serde::{Deserialize, Serialize};

use imcore::Content;

/// A single routed message as published to `private_msg_bus`, `offline_msg`,
/// or re-injected from a group fan-out consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub msg_id: String,
    pub sequence: u64,
    pub sender: String,
    pub recipient: String,
    pub conversation_id: String,
    pub content: Content,
    pub client_ts: u64,
    pub server_ts: u64,
}

/// Published once per group send to `group_msg_bus`; membership resolution
/// and per-recipient re-injection happen downstream (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupFanoutRecord {
    pub msg_id: String,
    pub sequence: u64,
    pub sender: String,
    pub group_id: String,
    pub content: Content,
    pub client_ts: u64,
    pub server_ts: u64,
}

/// Routed to `dlq` in place of any record this service could not process
/// (spec §4.7 step 5, spec §7 "Poison message"): the raw bytes it couldn't
/// make sense of, why, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoisonRecord {
    pub payload: Vec<u8>,
    pub error: String,
    pub timestamp: u64,
}
