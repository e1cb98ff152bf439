// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JetStream-backed durable log (spec §4.4): partitioned append-only
//! streams with at-least-once consumer semantics and offset commit.
//!
//! Connection setup uses `ConnectOptions` with optional token auth and
//! `retry_on_initial_connect`; publishing and consuming are built on top
//! of `async-nats`'s JetStream API since core pub/sub has no
//! consumer-offset commit.

use async_nats::jetstream::{self, consumer::pull, stream};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::error::DurableLogError;
use crate::record::{LogRecord, PoisonRecord};
use crate::topic::Topic;

#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub token: Option<String>,
    /// Retention for `dlq`, which is long relative to the other topics.
    pub dlq_retention_secs: u64,
    /// Retention for the other three topics, bounded by the offline
    /// delivery window (spec §4.4: "Retention >= TTL of the offline
    /// delivery window").
    pub default_retention_secs: u64,
}

#[derive(Clone)]
pub struct NatsDurableLog {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsDurableLog {
    pub async fn connect(config: &NatsConfig) -> Result<Self, DurableLogError> {
        let mut opts = async_nats::ConnectOptions::new();
        if let Some(ref token) = config.token {
            opts = opts.token(token.clone());
        }
        opts = opts.retry_on_initial_connect();

        info!(url = %config.url, "connecting durable log");
        let client = opts.connect(&config.url).await.map_err(|e| DurableLogError::Connect(e.into()))?;
        let jetstream = jetstream::new(client.clone());

        let log = Self { client, jetstream };
        log.ensure_streams(config).await?;
        info!("durable log connected");
        Ok(log)
    }

    async fn ensure_streams(&self, config: &NatsConfig) -> Result<(), DurableLogError> {
        for topic in Topic::all() {
            let retention_secs = match topic {
                Topic::Dlq => config.dlq_retention_secs,
                _ => config.default_retention_secs,
            };
            self.jetstream
                .get_or_create_stream(stream::Config {
                    name: topic.stream_name().to_owned(),
                    subjects: vec![topic.wildcard_subject()],
                    max_age: std::time::Duration::from_secs(retention_secs),
                    retention: stream::RetentionPolicy::Limits,
                    num_replicas: 1,
                    ..Default::default()
                })
                .await
                .map_err(|e| DurableLogError::Setup(e.into()))?;
        }
        Ok(())
    }

    /// Publishes one record to `topic`, keyed for per-partition ordering.
    /// Returns once the broker has durably acknowledged the write.
    pub async fn publish(
        &self,
        topic: Topic,
        partition_key: &str,
        record: &LogRecord,
    ) -> Result<(), DurableLogError> {
        let subject = topic.subject(partition_key);
        let payload = serde_json::to_vec(record)
            .map_err(|e| DurableLogError::Decode { subject: subject.clone(), source: e })?;
        let ack = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| DurableLogError::Publish { subject: subject.clone(), source: e.into() })?;
        ack.await.map_err(|e| DurableLogError::Publish { subject, source: e.into() })?;
        Ok(())
    }

    /// Opens (creating if absent) a durable pull consumer for `topic`.
    pub async fn consumer(
        &self,
        topic: Topic,
        durable_name: &str,
    ) -> Result<LogConsumer, DurableLogError> {
        let stream = self
            .jetstream
            .get_stream(topic.stream_name())
            .await
            .map_err(|e| DurableLogError::Setup(e.into()))?;
        let consumer = stream
            .get_or_create_consumer(
                durable_name,
                pull::Config {
                    durable_name: Some(durable_name.to_owned()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| DurableLogError::Setup(e.into()))?;
        Ok(LogConsumer { topic, consumer, jetstream: self.jetstream.clone() })
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}

/// A durable pull consumer. Messages are at-least-once: `ack()` commits the
/// offset, and unacked messages redeliver after the consumer's ack wait.
pub struct LogConsumer {
    topic: Topic,
    consumer: jetstream::consumer::Consumer<pull::Config>,
    jetstream: jetstream::Context,
}

pub struct Delivery {
    pub record: LogRecord,
    message: jetstream::Message,
}

impl Delivery {
    pub async fn ack(self) -> Result<(), DurableLogError> {
        self.message.ack().await.map_err(|e| DurableLogError::Consume(anyhow::anyhow!(e)))
    }
}

impl LogConsumer {
    /// Pulls and decodes the next batch of messages. Malformed payloads are
    /// routed to `dlq` with full context before being acked, rather than
    /// redelivered forever (they can never become parseable) or silently
    /// dropped (spec §4.7 step 5, spec §7 "Poison message").
    pub async fn next_batch(&self, max: usize) -> Result<Vec<Delivery>, DurableLogError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max)
            .messages()
            .await
            .map_err(|e| DurableLogError::Consume(e.into()))?;

        let mut out = Vec::with_capacity(max);
        while let Some(message) = messages.next().await {
            let message = message.map_err(|e| DurableLogError::Consume(anyhow::Error::from_boxed(e)))?;
            match serde_json::from_slice::<LogRecord>(&message.payload) {
                Ok(record) => out.push(Delivery { record, message }),
                Err(source) => {
                    warn!(subject = %message.subject, %source, "routing malformed durable log record to dlq");
                    self.publish_poison(&message.subject, source.to_string(), message.payload.to_vec()).await;
                    let _ = message.ack().await;
                }
            }
        }
        debug!(topic = ?self.topic, n = out.len(), "pulled durable log batch");
        Ok(out)
    }

    async fn publish_poison(&self, source_subject: &str, error: String, payload: Vec<u8>) {
        let poison = PoisonRecord { payload, error, timestamp: imcore::epoch_ms() };
        let subject = Topic::Dlq.subject(source_subject);
        let bytes = match serde_json::to_vec(&poison) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "failed to serialize poison record");
                return;
            }
        };
        if let Err(err) = self.jetstream.publish(subject, bytes.into()).await {
            warn!(%err, "failed to publish poison record to dlq");
        }
    }
}
