// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort persistence of coordinator state

mod snapshot;

pub use snapshot::{
    SnapshotError, SnapshotStore, StorableInstance, StorableNode, StorableQueueEntry,
    StorableState, CURRENT_VERSION,
};
