// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway configuration (spec §6 "every option and its effect").

use std::time::Duration;

/// Configuration for the `imd` gateway process.
#[derive(Debug, Clone, clap::Parser)]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "IMD_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 7900, env = "IMD_PORT")]
    pub port: u16,

    /// This gateway's own address as advertised to the Registry, e.g.
    /// `10.0.1.4:7900`. Defaults to `host:port` when unset.
    #[arg(long, env = "IMD_ADVERTISE_ADDR")]
    pub advertise_addr: Option<String>,

    /// NATS URL backing the durable log.
    #[arg(long, default_value = "nats://127.0.0.1:4222", env = "IMD_NATS_URL")]
    pub nats_url: String,

    /// NATS auth token, if required.
    #[arg(long, env = "IMD_NATS_TOKEN")]
    pub nats_token: Option<String>,

    /// SQLite database URL backing the Message Store and Sequencer.
    #[arg(long, default_value = "sqlite://imd.db", env = "IMD_DATABASE_URL")]
    pub database_url: String,

    /// Inbound wait for a client ack before retrying a DELIVER (spec
    /// `ack_timeout_ms`).
    #[arg(long, default_value_t = 3_000, env = "IMD_ACK_TIMEOUT_MS")]
    pub ack_timeout_ms: u64,

    /// Retries before a DELIVER is spooled to `offline_msg` (spec
    /// `ack_retries`).
    #[arg(long, default_value_t = 2, env = "IMD_ACK_RETRIES")]
    pub ack_retries: u32,

    /// Client heartbeat interval; two misses close the session (spec
    /// `heartbeat_interval_ms`).
    #[arg(long, default_value_t = 30_000, env = "IMD_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: u64,

    /// Registry lease TTL; auto-evicts sessions on gateway crash (spec
    /// `registry_lease_ttl_ms`).
    #[arg(long, default_value_t = 90_000, env = "IMD_REGISTRY_LEASE_TTL_MS")]
    pub registry_lease_ttl_ms: u64,

    /// Dedup set retention (spec `dedup_ttl`).
    #[arg(long, default_value_t = 7 * 24 * 60 * 60, env = "IMD_DEDUP_TTL_SECS")]
    pub dedup_ttl_secs: u64,

    /// Sequencer durable-reservation batch (spec `sequence_block_size`).
    #[arg(long, default_value_t = 100, env = "IMD_SEQUENCE_BLOCK_SIZE")]
    pub sequence_block_size: u64,

    /// Offline worker batch size (spec `offline_batch_size`).
    #[arg(long, default_value_t = 100, env = "IMD_OFFLINE_BATCH_SIZE")]
    pub offline_batch_size: usize,

    /// Offline worker batch timeout (spec `offline_batch_timeout_ms`).
    #[arg(long, default_value_t = 5_000, env = "IMD_OFFLINE_BATCH_TIMEOUT_MS")]
    pub offline_batch_timeout_ms: u64,

    /// Max concurrently registered devices per user; beyond this the
    /// oldest is evicted (spec `max_devices_per_user`).
    #[arg(long, default_value_t = 5, env = "IMD_MAX_DEVICES_PER_USER")]
    pub max_devices_per_user: usize,

    /// Per-session outbound queue capacity (spec `outbound_queue_cap`).
    #[arg(long, default_value_t = 256, env = "IMD_OUTBOUND_QUEUE_CAP")]
    pub outbound_queue_cap: usize,

    /// Offline message store retention (spec `message_ttl`).
    #[arg(long, default_value_t = 7 * 24 * 60 * 60, env = "IMD_MESSAGE_TTL_SECS")]
    pub message_ttl_secs: u64,

    /// Registry lease sweep interval.
    #[arg(long, default_value_t = 15_000, env = "IMD_REGISTRY_SWEEP_MS")]
    pub registry_sweep_ms: u64,

    /// Message store purge sweep interval.
    #[arg(long, default_value_t = 3_600_000, env = "IMD_STORE_PURGE_INTERVAL_MS")]
    pub store_purge_interval_ms: u64,
}

impl GatewayConfig {
    pub fn advertise_addr(&self) -> String {
        self.advertise_addr.clone().unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn registry_lease_ttl(&self) -> Duration {
        Duration::from_millis(self.registry_lease_ttl_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn offline_batch_timeout(&self) -> Duration {
        Duration::from_millis(self.offline_batch_timeout_ms)
    }

    pub fn registry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.registry_sweep_ms)
    }

    pub fn store_purge_interval(&self) -> Duration {
        Duration::from_millis(self.store_purge_interval_ms)
    }

    pub fn message_ttl_ms(&self) -> u64 {
        self.message_ttl_secs * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn advertise_addr_defaults_to_host_and_port() {
        let config = GatewayConfig::parse_from(["imd", "--host", "10.0.0.1", "--port", "7901"]);
        assert_eq!(config.advertise_addr(), "10.0.0.1:7901");
    }

    #[test]
    fn explicit_advertise_addr_overrides_default() {
        let config = GatewayConfig::parse_from(["imd", "--advertise-addr", "lb.internal:443"]);
        assert_eq!(config.advertise_addr(), "lb.internal:443");
    }
}
