// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Synchronization primitives, plugin variants and the Unix-socket transport

pub mod barrier;
pub mod error_aggregator;
pub mod plugins;
pub mod transport;
