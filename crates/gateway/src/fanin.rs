// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-gateway fast-path consumer (spec §4.5, §4.6): each gateway process
//! drains its own full copy of `private_msg_bus` and delivers to whichever
//! local sessions it holds, so a message routed fast-path by the gateway
//! that received the SEND still reaches a recipient connected to a
//! *different* gateway.
//!
//! Every gateway needs its own durable consumer name on this stream --
//! sharing one would split deliveries round-robin across gateways instead
//! of giving each an independent full copy, mirroring how
//! `group_fanout::run` and the offline worker each hold a dedicated
//! durable consumer on their own topic.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use durablelog::{Delivery, Publisher, Topic};

use crate::state::GatewayState;
use crate::ws::deliver_to_recipient;

fn consumer_name(advertise_addr: &str) -> String {
    let sanitized: String = advertise_addr
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    format!("private-fanin-{sanitized}")
}

/// Runs the per-gateway `private_msg_bus` consumer loop until `cancel` fires.
pub async fn run_private_fanin(state: Arc<GatewayState>, cancel: CancellationToken) {
    let durable_name = consumer_name(&state.config.advertise_addr());
    let consumer = match state.durable_log.consumer(Topic::PrivateMsgBus, &durable_name).await {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(%err, "failed to open private_msg_bus consumer, cross-gateway fast path disabled");
            return;
        }
    };
    info!(durable_name, "private_msg_bus fan-in consumer started");
    loop {
        if cancel.is_cancelled() {
            info!("private_msg_bus fan-in consumer shutting down");
            return;
        }
        let batch = match consumer.next_batch(100).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(%err, "private_msg_bus fan-in fetch failed");
                continue;
            }
        };
        if batch.is_empty() {
            continue;
        }
        process_batch(&state, batch).await;
    }
}

async fn process_batch(state: &Arc<GatewayState>, deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        let record = delivery.record.clone();
        let recipient = record.recipient.clone();
        let had_local_session = !state.local_sessions(&recipient).await.is_empty();
        if had_local_session {
            deliver_to_recipient(state, &recipient, record).await;
        } else {
            // Another gateway published this expecting a local session here;
            // the recipient has since disconnected. Fall back to durable
            // offline delivery rather than drop it.
            if let Err(err) = state.durable_log.publish(Topic::OfflineMsg, &recipient, &record).await {
                warn!(%err, msg_id = %record.msg_id, "failed to spool fan-in miss to offline_msg");
            }
        }
        if let Err(err) = delivery.ack().await {
            warn!(%err, "failed to ack private_msg_bus delivery");
        }
    }
}
