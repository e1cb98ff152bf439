// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client <-> Gateway wire protocol (spec §6).
//!
//! Frames are tagged JSON objects (`#[serde(tag = "type", rename_all =
//! "snake_case")]`), so a downstream consumer can match on `"type"` without
//! a schema registry.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationType, Content};

/// A frame exchanged between a client and its Gateway over the persistent
/// connection. `Hello` must be first; `Ack` flows in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Hello {
        user: String,
        device: String,
        auth_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_from_seq: Option<u64>,
    },
    Heartbeat {},
    Send {
        msg_id: String,
        conversation_type: ConversationType,
        /// Conversation/group target: recipient user id for private sends,
        /// group id for group sends.
        conversation_id_or_group: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
        content: Content,
        client_ts: u64,
    },
    Deliver {
        msg_id: String,
        sequence: u64,
        sender: String,
        conversation_id: String,
        content: Content,
        server_ts: u64,
    },
    Ack {
        msg_id: String,
    },
    Bye {
        reason: String,
    },
}

impl Frame {
    /// The frame's `"type"` discriminant, for logging without serializing.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Heartbeat {} => "heartbeat",
            Frame::Send { .. } => "send",
            Frame::Deliver { .. } => "deliver",
            Frame::Ack { .. } => "ack",
            Frame::Bye { .. } => "bye",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_json() {
        let frame = Frame::Send {
            msg_id: "m1".into(),
            conversation_type: ConversationType::Private,
            conversation_id_or_group: "bob".into(),
            recipient: Some("bob".into()),
            content: Content::text("hi"),
            client_ts: 1000,
        };
        let json = serde_json::to_string(&frame).expect("serialize");
        assert!(json.contains("\"type\":\"send\""));
        let back: Frame = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.kind(), "send");
    }

    #[test]
    fn hello_must_parse_without_resume() {
        let json = r#"{"type":"hello","user":"alice","device":"dA","auth_token":"t"}"#;
        let frame: Frame = serde_json::from_str(json).expect("deserialize");
        assert!(matches!(frame, Frame::Hello { resume_from_seq: None, .. }));
    }
}
