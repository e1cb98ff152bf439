// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed session registry (spec §4.1, component C1).
//!
//! Tracks which gateway endpoint owns which `(user, device)` session, with a
//! lease that must be renewed periodically: an `RwLock<HashMap<..>>`
//! guarding entries, a generation counter per entry to invalidate stale
//! handles, and a background sweep that evicts expired leases on a timer
//! rather than on every read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RegistryError;

const WATCH_CHANNEL_CAPACITY: usize = 256;

/// Default cap on concurrently registered devices per user (spec §4.1).
pub const DEFAULT_MAX_DEVICES_PER_USER: usize = 5;

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub user: String,
    pub device: String,
    pub kind: WatchEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Removed,
}

/// Opaque capability returned by `register`. Carries the generation the
/// entry had at registration time; `renew`/`release` calls made with a
/// generation older than the entry's current generation are rejected as
/// stale, preventing a lagging handle from reviving a torn-down session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    pub user: String,
    pub device: String,
    generation: u64,
}

impl Handle {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

struct Entry {
    endpoint: String,
    session_metadata: Option<String>,
    connected_at: Instant,
    lease_expires_at: Instant,
    generation: u64,
}

/// A live `(user, device) -> endpoint` session directory entry, as returned
/// by `lookup`.
#[derive(Debug, Clone)]
pub struct Binding {
    pub device: String,
    pub endpoint: String,
    pub session_metadata: Option<String>,
}

struct Shared {
    entries: RwLock<HashMap<(String, String), Entry>>,
    watchers: RwLock<HashMap<String, broadcast::Sender<WatchEvent>>>,
    max_devices_per_user: usize,
}

/// The distributed registry. Cheap to clone; all clones share the same
/// backing map and sweep task.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Registry {
    pub fn new(max_devices_per_user: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: RwLock::new(HashMap::new()),
                watchers: RwLock::new(HashMap::new()),
                max_devices_per_user,
            }),
        }
    }

    /// Registers (or refreshes, if already present) a device's session.
    /// Idempotent: re-registering the same `(user, device)` refreshes the
    /// endpoint, lease, and metadata and bumps the generation, invalidating
    /// any handle issued by a prior registration.
    ///
    /// Returns `DeviceCapExceeded` without evicting anything when the user
    /// is already at `max_devices_per_user` on a *new* device; per spec the
    /// caller is expected to call `evict_oldest` and retry once.
    pub async fn register(
        &self,
        user: &str,
        device: &str,
        endpoint: &str,
        session_metadata: Option<String>,
        lease_ttl: Duration,
    ) -> Result<Handle, RegistryError> {
        let mut entries = self.shared.entries.write().await;
        let key = (user.to_owned(), device.to_owned());
        let now = Instant::now();

        if !entries.contains_key(&key) {
            let count = entries.keys().filter(|(u, _)| u == user).count();
            if count >= self.shared.max_devices_per_user {
                return Err(RegistryError::DeviceCapExceeded {
                    user: user.to_owned(),
                    max: self.shared.max_devices_per_user,
                });
            }
        }

        let generation = entries.get(&key).map(|e| e.generation + 1).unwrap_or(0);
        entries.insert(
            key,
            Entry {
                endpoint: endpoint.to_owned(),
                session_metadata,
                connected_at: now,
                lease_expires_at: now + lease_ttl,
                generation,
            },
        );
        drop(entries);

        self.notify(user, device, WatchEventKind::Added).await;
        debug!(user, device, endpoint, "registered session");

        Ok(Handle { user: user.to_owned(), device: device.to_owned(), generation })
    }

    /// Extends a handle's lease. Fails with `StaleHandle` if a later
    /// registration has superseded it, or `Expired` if the lease already
    /// lapsed and was swept — in either case the caller must re-register.
    pub async fn renew(&self, handle: &Handle, lease_ttl: Duration) -> Result<(), RegistryError> {
        let mut entries = self.shared.entries.write().await;
        let key = (handle.user.clone(), handle.device.clone());
        let entry = entries.get_mut(&key).ok_or_else(|| RegistryError::Expired {
            user: handle.user.clone(),
            device: handle.device.clone(),
        })?;
        if entry.generation != handle.generation {
            return Err(RegistryError::StaleHandle {
                user: handle.user.clone(),
                device: handle.device.clone(),
            });
        }
        entry.lease_expires_at = Instant::now() + lease_ttl;
        Ok(())
    }

    /// Releases a session immediately, regardless of lease expiry.
    pub async fn release(&self, handle: &Handle) -> Result<(), RegistryError> {
        let mut entries = self.shared.entries.write().await;
        let key = (handle.user.clone(), handle.device.clone());
        match entries.get(&key) {
            Some(entry) if entry.generation == handle.generation => {
                entries.remove(&key);
            }
            Some(_) => {
                return Err(RegistryError::StaleHandle {
                    user: handle.user.clone(),
                    device: handle.device.clone(),
                })
            }
            None => {}
        }
        drop(entries);
        self.notify(&handle.user, &handle.device, WatchEventKind::Removed).await;
        Ok(())
    }

    /// Returns all live bindings for a user. Never returns entries whose
    /// lease has lapsed, even if the sweep hasn't run yet.
    pub async fn lookup(&self, user: &str) -> Vec<Binding> {
        let now = Instant::now();
        let entries = self.shared.entries.read().await;
        entries
            .iter()
            .filter(|((u, _), e)| u == user && e.lease_expires_at > now)
            .map(|((_, device), e)| Binding {
                device: device.clone(),
                endpoint: e.endpoint.clone(),
                session_metadata: e.session_metadata.clone(),
            })
            .collect()
    }

    /// Evicts the oldest (by `connected_at`) device for a user, returning
    /// its id. Used by callers reacting to `DeviceCapExceeded`.
    pub async fn evict_oldest(&self, user: &str) -> Option<String> {
        let mut entries = self.shared.entries.write().await;
        let oldest = entries
            .iter()
            .filter(|((u, _), _)| u == user)
            .min_by_key(|(_, e)| e.connected_at)
            .map(|((_, device), _)| device.clone());
        if let Some(device) = &oldest {
            entries.remove(&(user.to_owned(), device.clone()));
        }
        drop(entries);
        if let Some(device) = &oldest {
            self.notify(user, device, WatchEventKind::Removed).await;
            info!(user, device, "evicted oldest device for cap");
        }
        oldest
    }

    /// Subscribes to added/removed events for a single user's devices.
    pub async fn watch(&self, user: &str) -> broadcast::Receiver<WatchEvent> {
        let mut watchers = self.shared.watchers.write().await;
        watchers
            .entry(user.to_owned())
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    async fn notify(&self, user: &str, device: &str, kind: WatchEventKind) {
        let watchers = self.shared.watchers.read().await;
        if let Some(tx) = watchers.get(user) {
            let _ = tx.send(WatchEvent { user: user.to_owned(), device: device.to_owned(), kind });
        }
    }

    /// Runs the lease-expiry sweep until `cancel` fires. Spawn once per
    /// process; all `Registry` clones observe the same sweep.
    pub async fn run_sweep(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("registry sweep shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep_expired().await;
                }
            }
        }
    }

    async fn sweep_expired(&self) {
        let now = Instant::now();
        let mut entries = self.shared.entries.write().await;
        let expired: Vec<(String, String)> = entries
            .iter()
            .filter(|(_, e)| e.lease_expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        drop(entries);
        for (user, device) in expired {
            warn!(user, device, "lease expired, evicted by sweep");
            self.notify(&user, &device, WatchEventKind::Removed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_lookup_returns_binding() {
        let reg = Registry::new(DEFAULT_MAX_DEVICES_PER_USER);
        reg.register("alice", "d1", "gw-1:9000", None, Duration::from_secs(30)).await.unwrap();
        let bindings = reg.lookup("alice").await;
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].endpoint, "gw-1:9000");
    }

    #[tokio::test]
    async fn register_is_idempotent_and_bumps_generation() {
        let reg = Registry::new(DEFAULT_MAX_DEVICES_PER_USER);
        let h1 = reg.register("alice", "d1", "gw-1", None, Duration::from_secs(30)).await.unwrap();
        let h2 = reg.register("alice", "d1", "gw-2", None, Duration::from_secs(30)).await.unwrap();
        assert_eq!(reg.lookup("alice").await.len(), 1);
        assert!(reg.renew(&h1, Duration::from_secs(30)).await.is_err());
        assert!(reg.renew(&h2, Duration::from_secs(30)).await.is_ok());
    }

    #[tokio::test]
    async fn device_cap_exceeded_without_auto_eviction() {
        let reg = Registry::new(1);
        reg.register("alice", "d1", "gw-1", None, Duration::from_secs(30)).await.unwrap();
        let err = reg.register("alice", "d2", "gw-1", None, Duration::from_secs(30)).await;
        assert!(matches!(err, Err(RegistryError::DeviceCapExceeded { .. })));
        assert_eq!(reg.lookup("alice").await.len(), 1);

        let evicted = reg.evict_oldest("alice").await;
        assert_eq!(evicted.as_deref(), Some("d1"));
        reg.register("alice", "d2", "gw-1", None, Duration::from_secs(30)).await.unwrap();
        assert_eq!(reg.lookup("alice").await.len(), 1);
    }

    #[tokio::test]
    async fn release_removes_entry_and_notifies_watchers() {
        let reg = Registry::new(DEFAULT_MAX_DEVICES_PER_USER);
        let mut rx = reg.watch("alice").await;
        let handle =
            reg.register("alice", "d1", "gw-1", None, Duration::from_secs(30)).await.unwrap();
        let added = rx.recv().await.unwrap();
        assert_eq!(added.kind, WatchEventKind::Added);

        reg.release(&handle).await.unwrap();
        let removed = rx.recv().await.unwrap();
        assert_eq!(removed.kind, WatchEventKind::Removed);
        assert!(reg.lookup("alice").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_expired_leases() {
        let reg = Registry::new(DEFAULT_MAX_DEVICES_PER_USER);
        reg.register("alice", "d1", "gw-1", None, Duration::from_millis(10)).await.unwrap();
        tokio::time::advance(Duration::from_millis(20)).await;
        reg.sweep_expired().await;
        assert!(reg.lookup("alice").await.is_empty());
    }
}
