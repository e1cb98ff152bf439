// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The four required durable-log topics (spec §4.4).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Online fast-path fan-in, partitioned by recipient user id.
    PrivateMsgBus,
    /// Group fan-out, partitioned by group id.
    GroupMsgBus,
    /// Persistence queue for recipients offline at routing time.
    OfflineMsg,
    /// Poison messages; lower throughput, longer retention.
    Dlq,
}

impl Topic {
    pub fn stream_name(&self) -> &'static str {
        match self {
            Topic::PrivateMsgBus => "private_msg_bus",
            Topic::GroupMsgBus => "group_msg_bus",
            Topic::OfflineMsg => "offline_msg",
            Topic::Dlq => "dlq",
        }
    }

    /// Wildcard subject covering every partition of this topic, used when
    /// declaring the backing JetStream stream.
    pub fn wildcard_subject(&self) -> String {
        format!("{}.>", self.stream_name())
    }

    /// Partitioned subject for a single publish/subscribe, e.g.
    /// `private_msg_bus.bob` — the partition key gives per-partition
    /// ordering without the publisher needing to know partition counts.
    pub fn subject(&self, partition_key: &str) -> String {
        format!("{}.{}", self.stream_name(), partition_key)
    }

    pub fn all() -> [Topic; 4] {
        [Topic::PrivateMsgBus, Topic::GroupMsgBus, Topic::OfflineMsg, Topic::Dlq]
    }
}
