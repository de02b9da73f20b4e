// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI command implementations

pub mod access;
pub mod check;
pub mod daemon;
pub mod status;
