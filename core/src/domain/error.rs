// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use thiserror::Error;

/// Terminal failure of one credential invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Ambient state seen by the plugin differs from what the caller had
    /// active when the invocation was scheduled. Never retried.
    #[error("ambient context propagation violated: {0}")]
    PropagationViolation(String),

    /// The plugin reported a failure of its own, or panicked.
    #[error("credential plugin failed: {0}")]
    PluginFailure(String),

    /// The callback contract was broken, e.g. every callback handle was
    /// dropped without delivering a result.
    #[error("credential plugin protocol violation: {0}")]
    ProtocolViolation(String),

    /// No execution context could be obtained for the plugin.
    #[error("failed to schedule credential plugin: {0}")]
    Scheduling(String),
}

impl CredentialError {
    pub fn plugin(message: impl Into<String>) -> Self {
        Self::PluginFailure(message.into())
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PropagationViolation(_) => "propagation_violation",
            Self::PluginFailure(_) => "plugin_failure",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Scheduling(_) => "scheduling",
        }
    }
}
