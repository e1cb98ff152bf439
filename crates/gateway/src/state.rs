// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared gateway state (spec §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use dedup::DedupSet;
use durablelog::NatsDurableLog;
use registry::Registry;
use router::Router;
use sequencer::SqliteBlockBackend;
use store::MessageStore;

use crate::config::GatewayConfig;
use crate::session::SessionHandle;

pub type CoreRouter = Router<SqliteBlockBackend, NatsDurableLog>;

/// Process-wide state, shared across every connection handler.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub sessions: RwLock<HashMap<(String, String), SessionHandle>>,
    pub registry: Registry,
    pub dedup: DedupSet,
    pub store: MessageStore,
    pub router: Arc<CoreRouter>,
    pub durable_log: Arc<NatsDurableLog>,
    pub shutdown: CancellationToken,
}

impl GatewayState {
    /// Returns every live local session for `user` (multi-device fan-out,
    /// spec §4.6).
    pub async fn local_sessions(&self, user: &str) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|((u, _), _)| u == user)
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    pub async fn insert_session(&self, handle: SessionHandle) {
        self.sessions.write().await.insert((handle.user.clone(), handle.device.clone()), handle);
    }

    pub async fn remove_session(&self, user: &str, device: &str) {
        self.sessions.write().await.remove(&(user.to_owned(), device.to_owned()));
    }
}
