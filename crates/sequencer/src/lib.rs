// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monotonic per-conversation sequence allocation (spec §4.2, component
//! C2): reserves durable blocks of ids and hands them out lock-free until
//! exhausted.

mod backend;
mod error;
mod sequencer;

pub use backend::{BlockBackend, InMemoryBlockBackend, SqliteBlockBackend};
pub use error::SequencerError;
pub use sequencer::{Sequencer, DEFAULT_BLOCK_SIZE};
