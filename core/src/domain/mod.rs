// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer
//!
//! Pure types for credential invocation. No I/O besides config file loading.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`context`] | `Snapshot`, `AmbientContext`, `ContextKey` |
//! | [`plugin`] | `CredentialPlugin`, `CallContext`, `AuthMetadata` |
//! | [`invocation`] | `PendingInvocation`, `MetadataCallback` |
//! | [`error`] | `CredentialError` |
//! | [`config`] | `ClientConfigManifest` |

pub mod context;
pub mod plugin;
pub mod invocation;
pub mod error;
pub mod config;

pub use context::{AmbientContext, ContextKey, Snapshot};
pub use error::CredentialError;
pub use invocation::{InvocationOutcome, MetadataCallback, PendingInvocation};
pub use plugin::{AuthMetadata, CallContext, CallId, CredentialPlugin};
