// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-handshake offline replay (spec §4.6 step 2): query the Message Store
//! for everything this device hasn't acked, and resume in sequence order.

use std::sync::Arc;

use tracing::debug;

use imcore::Frame;
use store::StoreError;

use crate::session::SessionHandle;
use crate::state::GatewayState;

const FLUSH_BATCH_LIMIT: i64 = 500;

/// Transmits undelivered messages for `session`'s user to this device,
/// oldest first. `resume_from_seq`, if the client supplied one in HELLO,
/// additionally skips anything at or below a sequence it already has.
pub async fn flush_offline(
    state: &Arc<GatewayState>,
    session: &SessionHandle,
    resume_from_seq: Option<u64>,
) -> Result<(), StoreError> {
    let messages = state.store.scan_undelivered(&session.user, &session.device, FLUSH_BATCH_LIMIT).await?;
    let floor = resume_from_seq.unwrap_or(0);
    let mut flushed = 0usize;

    for message in messages.into_iter().filter(|m| m.sequence > floor) {
        let frame = Frame::Deliver {
            msg_id: message.msg_id.clone(),
            sequence: message.sequence,
            sender: message.sender_id.clone(),
            conversation_id: message.conversation_id.as_str().to_owned(),
            content: message.content.clone(),
            server_ts: message.server_ts,
        };
        let record = durablelog::LogRecord {
            msg_id: message.msg_id,
            sequence: message.sequence,
            sender: message.sender_id,
            recipient: session.user.clone(),
            conversation_id: message.conversation_id.as_str().to_owned(),
            content: message.content,
            client_ts: message.client_ts,
            server_ts: message.server_ts,
        };
        if session.try_enqueue(frame).is_err() {
            debug!(user = %session.user, device = %session.device, "outbound queue full during offline flush, stopping");
            break;
        }
        session.ack_tracker.track(record).await;
        flushed += 1;
    }

    if flushed > 0 {
        debug!(user = %session.user, device = %session.device, flushed, "flushed offline messages");
    }
    Ok(())
}
