// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! doorman-daemon: the long-running door coordinator process
//!
//! Callers reach the coordinator through the request socket; see [`protocol`].

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod lifecycle;
pub mod protocol;
mod server;
mod sink;
mod ticks;

pub use lifecycle::{startup, Config, DaemonState, LifecycleError};
pub use protocol::{Caller, Request, Response};
pub use server::{Server, ServerError};
pub use sink::TracingSink;
pub use ticks::Workers;
