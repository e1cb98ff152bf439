// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection session state (spec §4.6 state machine:
//! `Connecting -> Authenticated -> Active <-> Draining -> Closed`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use imcore::Frame;

use crate::delivery::AckTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Draining,
    Closed,
}

/// A live client session: one per `(user, device)` connection on this
/// gateway. Cheap to clone; outbound delivery holds a clone to push frames
/// without touching the session registry.
#[derive(Clone)]
pub struct SessionHandle {
    pub user: String,
    pub device: String,
    pub outbound_tx: mpsc::Sender<Frame>,
    pub cancel: CancellationToken,
    /// Owned by this session; other sessions' senders reach it through
    /// `GatewayState::local_sessions` to register DELIVERs they push here.
    pub ack_tracker: Arc<AckTracker>,
    state: Arc<RwLock<SessionState>>,
}

impl SessionHandle {
    pub fn new(
        user: String,
        device: String,
        outbound_cap: usize,
        ack_timeout: Duration,
        ack_retries: u32,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound_tx, rx) = mpsc::channel(outbound_cap);
        let handle = Self {
            user,
            device,
            outbound_tx,
            cancel: CancellationToken::new(),
            ack_tracker: Arc::new(AckTracker::new(ack_timeout, ack_retries)),
            state: Arc::new(RwLock::new(SessionState::Connecting)),
        };
        (handle, rx)
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, next: SessionState) {
        *self.state.write().await = next;
    }

    /// Enqueues an outbound frame. Per spec §5's backpressure rule, a full
    /// queue means "slow consumer": the caller is expected to transition
    /// the session to `Draining` and re-route pending work through the
    /// offline store rather than block or grow the queue unboundedly.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), Frame> {
        self.outbound_tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(f) => f,
            mpsc::error::TrySendError::Closed(f) => f,
        })
    }

    /// Whether the outbound queue currently has room. Used to decide when a
    /// `Draining` session can resume live delivery (spec §4.6).
    pub fn has_queue_capacity(&self) -> bool {
        self.outbound_tx.capacity() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bye() -> Frame {
        Frame::Bye { reason: "test".to_owned() }
    }

    #[tokio::test]
    async fn full_queue_is_rejected_not_blocked() {
        let (session, _rx) = SessionHandle::new("alice".into(), "d1".into(), 1, Duration::from_secs(1), 2);
        session.try_enqueue(bye()).unwrap();
        assert!(session.try_enqueue(bye()).is_err());
    }

    #[tokio::test]
    async fn queue_capacity_reflects_pending_frames() {
        let (session, mut rx) = SessionHandle::new("alice".into(), "d1".into(), 1, Duration::from_secs(1), 2);
        assert!(session.has_queue_capacity());
        session.try_enqueue(bye()).unwrap();
        assert!(!session.has_queue_capacity());
        rx.recv().await.unwrap();
        assert!(session.has_queue_capacity());
    }

    #[tokio::test]
    async fn state_transitions_are_visible_to_clones() {
        let (session, _rx) = SessionHandle::new("alice".into(), "d1".into(), 8, Duration::from_secs(1), 2);
        let clone = session.clone();
        session.set_state(SessionState::Active).await;
        assert_eq!(clone.state().await, SessionState::Active);
    }
}
