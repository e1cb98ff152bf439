// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Downstream WebSocket handler (spec §4.6, component C6): the client
//! protocol's single select loop, mirroring one `Frame` per WS text
//! message.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

use durablelog::{Publisher, Topic};
use imcore::{ApiError, ConversationType, Frame};
use registry::Handle;

use crate::offline_flush::flush_offline;
use crate::session::{SessionHandle, SessionState};
use crate::state::GatewayState;

pub async fn ws_handler(State(state): State<Arc<GatewayState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let hello = match await_hello(&mut ws_rx).await {
        Some(frame) => frame,
        None => return,
    };
    let Frame::Hello { user, device, auth_token, resume_from_seq } = hello else {
        unreachable!("await_hello only returns Hello frames");
    };

    if !valid_auth_token(&auth_token) {
        let _ = send_bye(&mut ws_tx, "invalid auth_token").await;
        return;
    }

    let handle = match state
        .registry
        .register(&user, &device, &state.config.advertise_addr(), None, state.config.registry_lease_ttl())
        .await
    {
        Ok(h) => h,
        Err(registry::RegistryError::DeviceCapExceeded { .. }) => {
            state.registry.evict_oldest(&user).await;
            match state
                .registry
                .register(&user, &device, &state.config.advertise_addr(), None, state.config.registry_lease_ttl())
                .await
            {
                Ok(h) => h,
                Err(err) => {
                    let api: ApiError = err.into();
                    let _ = send_bye(&mut ws_tx, api.as_str()).await;
                    return;
                }
            }
        }
        Err(err) => {
            let api: ApiError = err.into();
            let _ = send_bye(&mut ws_tx, api.as_str()).await;
            return;
        }
    };

    let (session, outbound_rx) = SessionHandle::new(
        user.clone(),
        device.clone(),
        state.config.outbound_queue_cap,
        state.config.ack_timeout(),
        state.config.ack_retries,
    );
    session.set_state(SessionState::Authenticated).await;
    state.insert_session(session.clone()).await;
    info!(%user, %device, "session established");

    let writer_handle = tokio::spawn(run_writer(ws_tx, outbound_rx, session.clone()));
    let ack_handle = tokio::spawn(
        Arc::clone(&session.ack_tracker).run(session.clone(), Arc::clone(&state.durable_log)),
    );

    session.set_state(SessionState::Active).await;
    if let Err(err) = flush_offline(&state, &session, resume_from_seq).await {
        warn!(%err, %user, %device, "offline flush failed");
    }

    run_reader(&state, &session, &handle, ws_rx).await;

    session.cancel.cancel();
    let _ = writer_handle.await;
    let _ = ack_handle.await;
    session.set_state(SessionState::Closed).await;
    state.remove_session(&user, &device).await;
    if let Err(err) = state.registry.release(&handle).await {
        debug!(%err, %user, %device, "registry release on teardown");
    }
    info!(%user, %device, "session closed");
}

async fn await_hello(
    ws_rx: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<Frame> {
    loop {
        match ws_rx.next().await {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                Ok(frame @ Frame::Hello { .. }) => return Some(frame),
                Ok(_) => continue,
                Err(err) => {
                    warn!(%err, "malformed HELLO frame");
                    return None;
                }
            },
            Some(Ok(WsMessage::Close(_))) | None => return None,
            Some(Ok(_)) => continue,
            Some(Err(_)) => return None,
        }
    }
}

fn valid_auth_token(token: &str) -> bool {
    !token.is_empty()
}

async fn send_bye(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>,
    reason: &str,
) -> Result<(), axum::Error> {
    let frame = Frame::Bye { reason: reason.to_owned() };
    let text = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_owned());
    ws_tx.send(WsMessage::Text(text.into())).await
}

async fn run_writer(
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, WsMessage>,
    mut outbound_rx: tokio::sync::mpsc::Receiver<Frame>,
    session: SessionHandle,
) {
    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break,
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(t) => t,
                    Err(err) => {
                        warn!(%err, "failed to encode outbound frame");
                        continue;
                    }
                };
                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
                // Spec §4.6 "Active <-> Draining": once the queue has room
                // again, a session parked in Draining resumes live delivery.
                if session.has_queue_capacity() && session.state().await == SessionState::Draining {
                    session.set_state(SessionState::Active).await;
                    debug!(user = %session.user, device = %session.device, "outbound queue drained, resuming");
                }
            }
        }
    }
}

async fn run_reader(
    state: &Arc<GatewayState>,
    session: &SessionHandle,
    handle: &Handle,
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
) {
    let last_heartbeat = TokioMutex::new(Instant::now());
    let heartbeat_interval = state.config.heartbeat_interval();
    let mut heartbeat_ticker = tokio::time::interval(heartbeat_interval);
    heartbeat_ticker.tick().await;
    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => return,
            _ = heartbeat_ticker.tick() => {
                let elapsed = last_heartbeat.lock().await.elapsed();
                // Spec §4.6: two consecutive missed heartbeats tear the
                // session down.
                if elapsed >= heartbeat_interval * 2 {
                    warn!(
                        user = %session.user, device = %session.device, ?elapsed,
                        "missed 2 consecutive heartbeats, tearing down session"
                    );
                    session.set_state(SessionState::Draining).await;
                    return;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => {
                                if !handle_frame(state, session, handle, frame, &last_heartbeat).await {
                                    return;
                                }
                            }
                            Err(err) => warn!(%err, "malformed frame, ignoring"),
                        }
                    }
                    // Socket errors are always fatal for the session (spec §4.6).
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Returns `false` when the session should close.
async fn handle_frame(
    state: &Arc<GatewayState>,
    session: &SessionHandle,
    handle: &Handle,
    frame: Frame,
    last_heartbeat: &TokioMutex<Instant>,
) -> bool {
    match frame {
        Frame::Heartbeat {} => {
            *last_heartbeat.lock().await = Instant::now();
            if let Err(err) = state.registry.renew(handle, state.config.registry_lease_ttl()).await {
                warn!(%err, "heartbeat renew failed, session lease may have lapsed");
                return false;
            }
            true
        }
        Frame::Ack { msg_id } => {
            session.ack_tracker.ack(&msg_id).await;
            if let Err(err) = state.store.mark_delivered(&msg_id, &session.device).await {
                warn!(%err, %msg_id, "mark_delivered failed");
            }
            true
        }
        Frame::Send { msg_id, conversation_type, conversation_id_or_group, recipient, content, client_ts } => {
            handle_send(state, session, msg_id, conversation_type, conversation_id_or_group, recipient, content, client_ts)
                .await;
            true
        }
        Frame::Bye { .. } => false,
        Frame::Hello { .. } => {
            warn!("unexpected second HELLO, ignoring");
            true
        }
    }
}

async fn handle_send(
    state: &Arc<GatewayState>,
    session: &SessionHandle,
    msg_id: String,
    conversation_type: ConversationType,
    conversation_id_or_group: String,
    recipient: Option<String>,
    content: imcore::Content,
    client_ts: u64,
) {
    match conversation_type {
        ConversationType::Private => {
            let Some(recipient) = recipient else {
                warn!(%msg_id, "private send missing recipient");
                return;
            };
            let conversation_id = imcore::ConversationId::private(&session.user, &recipient).0;
            match state
                .router
                .route_private(&session.user, &recipient, &conversation_id, &content, &msg_id, client_ts)
                .await
            {
                Ok(outcome) => {
                    ack_sender(session, &msg_id);
                    if !outcome.was_duplicate {
                        let record = durablelog::LogRecord {
                            msg_id,
                            sequence: outcome.sequence,
                            sender: session.user.clone(),
                            recipient: recipient.clone(),
                            conversation_id,
                            content,
                            client_ts,
                            server_ts: imcore::epoch_ms(),
                        };
                        deliver_to_recipient(state, &recipient, record).await;
                    } else {
                        debug!(%msg_id, "duplicate send, skipping re-delivery");
                    }
                }
                Err(err) => warn!(%err, %msg_id, "route_private failed"),
            }
        }
        ConversationType::Group => {
            match state
                .router
                .route_group(&session.user, &conversation_id_or_group, &content, &msg_id, client_ts)
                .await
            {
                Ok(_) => ack_sender(session, &msg_id),
                Err(err) => warn!(%err, %msg_id, "route_group failed"),
            }
        }
    }
}

/// Confirms a SEND was accepted (spec §6: "A SEND without an ACK from the
/// server within 5s MUST be retried"). Best-effort: a full outbound queue
/// just means the client will retry the SEND, which the Router's dedup
/// check already makes safe.
fn ack_sender(session: &SessionHandle, msg_id: &str) {
    let _ = session.try_enqueue(Frame::Ack { msg_id: msg_id.to_owned() });
}

/// Delivers `record` to every local session for `recipient`. Used both for
/// sends that originate on this gateway and for records re-injected from
/// `private_msg_bus` by another gateway's fan-out (spec §4.6, §4.5
/// cross-gateway fast path). Callers whose recipient has no local session
/// are expected to fall back to `offline_msg` themselves.
pub(crate) async fn deliver_to_recipient(
    state: &Arc<GatewayState>,
    recipient: &str,
    record: durablelog::LogRecord,
) {
    let sessions = state.local_sessions(recipient).await;
    if sessions.is_empty() {
        return;
    }
    for target in sessions {
        let frame = Frame::Deliver {
            msg_id: record.msg_id.clone(),
            sequence: record.sequence,
            sender: record.sender.clone(),
            conversation_id: record.conversation_id.clone(),
            content: record.content.clone(),
            server_ts: record.server_ts,
        };
        if target.try_enqueue(frame).is_err() {
            warn!(user = %target.user, device = %target.device, "outbound queue full, draining to offline_msg");
            target.set_state(SessionState::Draining).await;
            if let Err(err) = state.durable_log.publish(Topic::OfflineMsg, recipient, &record).await {
                warn!(%err, msg_id = %record.msg_id, "failed to spool overflow delivery to offline_msg");
            }
            continue;
        }
        target.ack_tracker.track(record.clone()).await;
    }
}
