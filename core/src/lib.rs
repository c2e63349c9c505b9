// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `callcred-core`: Per-Call Credential Invocation
//!
//! Runs user-supplied credential plugins off the RPC call path while carrying
//! the caller's ambient context across the execution-context boundary.
//!
//! ## Crate Layout
//!
//! - [`domain`]: `Snapshot`, `AmbientContext`, `CredentialPlugin`,
//!   `PendingInvocation`, config manifest.
//! - [`application`]: `CredentialInvoker`, concurrent load runner.
//! - [`infrastructure`]: `ConcurrencyBarrier`, `ErrorAggregator`, plugin
//!   variants, Unix-socket transport.
//!
//! ## Key Concepts
//!
//! - **Snapshot**: immutable capture of the ambient key/value state at one point in time.
//! - **Invocation**: one scheduled, single-outcome execution of a plugin for one call.
//!   The first callback wins; later ones are logged and ignored.
//! - **Propagation**: always explicit. The invoker installs the captured snapshot on the
//!   worker before the plugin runs; nothing relies on thread or task inheritance.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
pub use application::invoker::{CredentialInvoker, SchedulingMode};
