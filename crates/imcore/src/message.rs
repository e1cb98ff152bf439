// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain types shared by every component: the `Message` envelope, its
//! conversation addressing, and small validation helpers.

use serde::{Deserialize, Serialize};

/// Whether a message belongs to a private (1:1) or group conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Private,
    Group,
}

/// Opaque message payload: raw bytes tagged with a content-type string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub content_type: String,
    /// Payload bytes, base64 encoded on the wire via serde_json's default
    /// `Vec<u8>` representation is wasteful; callers that need base64 text
    /// should tag `content_type` accordingly and stuff it in `bytes`.
    pub bytes: Vec<u8>,
}

impl Content {
    pub fn text(s: impl Into<String>) -> Self {
        Self { content_type: "text/plain".to_owned(), bytes: s.into().into_bytes() }
    }
}

/// Canonical per-conversation identifier.
///
/// For private conversations this is the two user ids joined in a stable
/// (lexicographic) order so that `conversation_id(a, b) == conversation_id(b,
/// a)` — required for the per-conversation monotonicity invariant (spec §3)
/// to mean the same thing regardless of who is "sender" in a given message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn private(a: &str, b: &str) -> Self {
        if a <= b {
            Self(format!("private:{a}:{b}"))
        } else {
            Self(format!("private:{b}:{a}"))
        }
    }

    pub fn group(group_id: &str) -> Self {
        Self(format!("group:{group_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A fully sequenced message, as stored and delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub msg_id: String,
    pub conversation_type: ConversationType,
    pub conversation_id: ConversationId,
    pub sender_id: String,
    /// Recipient user id for private conversations.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recipient_id: Option<String>,
    /// Group id for group conversations.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub group_id: Option<String>,
    pub content: Content,
    pub client_ts: u64,
    pub server_ts: u64,
    pub sequence: u64,
}

/// Validate a `msg_id` per the Router's contract (spec §4.5 step 1):
/// rejected if empty or containing characters that would break it as a
/// dedup/log partition key.
pub fn validate_msg_id(msg_id: &str) -> bool {
    !msg_id.is_empty() && msg_id.len() <= 256 && msg_id.chars().all(|c| !c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_conversation_id_is_order_independent() {
        assert_eq!(ConversationId::private("alice", "bob"), ConversationId::private("bob", "alice"));
    }

    #[test]
    fn validate_msg_id_rejects_empty() {
        assert!(!validate_msg_id(""));
        assert!(validate_msg_id("m1"));
    }

    #[test]
    fn validate_msg_id_rejects_control_chars() {
        assert!(!validate_msg_id("bad\nid"));
    }
}
