// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable log (spec §4.4, component C4): partitioned append-only topics
//! with at-least-once consumer semantics, per-partition ordering, and
//! consumer-offset commit. `nats` is the production backend (JetStream);
//! `memory` is an in-process stand-in for tests and single-node use.

mod error;
mod memory;
mod nats;
mod publisher;
mod record;
mod topic;

pub use error::DurableLogError;
pub use memory::InMemoryDurableLog;
pub use nats::{Delivery, LogConsumer, NatsConfig, NatsDurableLog};
pub use publisher::Publisher;
pub use record::{GroupFanoutRecord, LogRecord};
pub use topic::Topic;
