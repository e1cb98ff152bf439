// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `imd`: the message-plane gateway (spec §4.6, component C6). Terminates
//! client WebSocket connections, runs the session state machine, and wires
//! together the Registry, Sequencer, Dedup Set, Durable Log, Router, and
//! Message Store into one process.

pub mod config;
pub mod delivery;
pub mod error;
pub mod fanin;
pub mod http;
pub mod offline_flush;
pub mod session;
pub mod state;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use dedup::DedupSet;
use durablelog::{NatsConfig, NatsDurableLog};
use offlineworker::{OfflineWorker, WorkerConfig};
use registry::Registry;
use router::{run_group_fanout, Router as CoreRouterImpl, SqliteGroupMembership};
use sequencer::SqliteBlockBackend;
use sqlx::sqlite::SqlitePoolOptions;
use store::MessageStore;

use crate::config::GatewayConfig;
use crate::state::GatewayState;

/// Brings up every background task and serves the gateway until `shutdown`
/// fires (ctrl-c, by default).
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let nats_config = NatsConfig {
        url: config.nats_url.clone(),
        token: config.nats_token.clone(),
        default_retention_secs: config.message_ttl_secs,
        dlq_retention_secs: config.message_ttl_secs * 4,
    };
    let durable_log = Arc::new(NatsDurableLog::connect(&nats_config).await?);

    let store = MessageStore::connect(&config.database_url).await?;
    let sequencer_pool = SqlitePoolOptions::new().max_connections(8).connect(&config.database_url).await?;
    SqliteBlockBackend::migrate(&sequencer_pool).await?;
    let block_backend = SqliteBlockBackend::new(sequencer_pool);

    let membership_pool = SqlitePoolOptions::new().max_connections(8).connect(&config.database_url).await?;
    SqliteGroupMembership::migrate(&membership_pool).await?;
    let membership = Arc::new(SqliteGroupMembership::new(membership_pool));

    let registry = Registry::new(config.max_devices_per_user);
    let dedup = DedupSet::new(config.dedup_ttl());
    let sequencer = sequencer::Sequencer::new(block_backend, config.sequence_block_size);
    let router =
        Arc::new(CoreRouterImpl::new(registry.clone(), sequencer, dedup.clone(), (*durable_log).clone()));

    let state = Arc::new(GatewayState {
        config: config.clone(),
        sessions: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        registry: registry.clone(),
        dedup: dedup.clone(),
        store: store.clone(),
        router: Arc::clone(&router),
        durable_log: Arc::clone(&durable_log),
        shutdown: shutdown.clone(),
    });

    spawn_background_tasks(&state, Arc::clone(&durable_log), store, registry, dedup, membership, shutdown.clone());

    info!("imd listening on {addr}");
    let http_router = http::build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, http_router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

fn spawn_background_tasks(
    state: &Arc<GatewayState>,
    durable_log: Arc<NatsDurableLog>,
    store: MessageStore,
    registry: Registry,
    dedup: DedupSet,
    membership: Arc<SqliteGroupMembership>,
    shutdown: CancellationToken,
) {
    let config = state.config.clone();

    tokio::spawn({
        let registry = registry.clone();
        let cancel = shutdown.clone();
        let interval = config.registry_sweep_interval();
        async move { registry.run_sweep(interval, cancel).await }
    });

    tokio::spawn({
        let dedup = dedup.clone();
        let cancel = shutdown.clone();
        async move { dedup.run_sweep(Duration::from_secs(60), cancel).await }
    });

    tokio::spawn({
        let store = store.clone();
        let cancel = shutdown.clone();
        let interval = config.store_purge_interval();
        let ttl_ms = config.message_ttl_ms();
        async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let cutoff = imcore::epoch_ms().saturating_sub(ttl_ms);
                        if let Err(err) = store.purge_expired(cutoff).await {
                            tracing::warn!(%err, "message store purge failed");
                        }
                    }
                }
            }
        }
    });

    tokio::spawn({
        let durable_log = Arc::clone(&durable_log);
        let registry = registry.clone();
        let membership = Arc::clone(&membership);
        let cancel = shutdown.clone();
        async move {
            if let Err(err) =
                run_group_fanout(&durable_log, &durable_log, membership.as_ref(), &registry, cancel).await
            {
                tracing::error!(%err, "group fanout consumer exited");
            }
        }
    });

    tokio::spawn({
        let state = Arc::clone(state);
        let cancel = shutdown.clone();
        async move { crate::fanin::run_private_fanin(state, cancel).await }
    });

    tokio::spawn({
        let worker_config = WorkerConfig {
            batch_size: config.offline_batch_size,
            batch_timeout: config.offline_batch_timeout(),
            ..Default::default()
        };
        let worker = OfflineWorker::new((*durable_log).clone(), store, dedup, worker_config);
        let cancel = shutdown.clone();
        async move { worker.run(cancel).await.map(|_| ()).unwrap_or_else(|err| tracing::error!(%err, "offline worker exited")) }
    });
}
