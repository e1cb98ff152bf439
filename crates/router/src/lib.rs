// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router (spec §4.5, component C5): chooses fast path vs. slow path for
//! private sends, always-durable fan-out for group sends, and exposes both
//! over the `im.v1.IMService` gRPC surface.

mod core;
mod error;
mod grpc;
mod group_fanout;

pub use core::{DeliveryPath, Router, RouteGroupOutcome, RoutePrivateOutcome};
pub use error::RouterError;
pub use grpc::{proto, RouterGrpc};
pub use group_fanout::{
    plan_fanout, run as run_group_fanout, GroupMembership, InMemoryGroupMembership,
    SqliteGroupMembership,
};
