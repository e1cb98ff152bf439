// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Common publish surface shared by the NATS and in-memory backends, so
//! callers like the Router can stay generic over which one they're given.

use crate::error::DurableLogError;
use crate::record::LogRecord;
use crate::topic::Topic;

pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        topic: Topic,
        partition_key: &str,
        record: &LogRecord,
    ) -> impl std::future::Future<Output = Result<(), DurableLogError>> + Send;
}

impl Publisher for crate::nats::NatsDurableLog {
    async fn publish(
        &self,
        topic: Topic,
        partition_key: &str,
        record: &LogRecord,
    ) -> Result<(), DurableLogError> {
        crate::nats::NatsDurableLog::publish(self, topic, partition_key, record).await
    }
}

impl Publisher for crate::memory::InMemoryDurableLog {
    async fn publish(
        &self,
        topic: Topic,
        partition_key: &str,
        record: &LogRecord,
    ) -> Result<(), DurableLogError> {
        crate::memory::InMemoryDurableLog::publish(self, topic, partition_key, record).await
    }
}
