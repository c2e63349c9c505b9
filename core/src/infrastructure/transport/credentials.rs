// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Client- and server-side credential configuration for the transport.

use std::fmt;
use std::sync::Arc;

use super::frame::Status;
use crate::domain::plugin::{AuthMetadata, CredentialPlugin};

/// Per-call credentials backed by a [`CredentialPlugin`].
#[derive(Clone)]
pub struct CallCredentials {
    name: String,
    plugin: Arc<dyn CredentialPlugin>,
}

impl CallCredentials {
    pub fn from_plugin(plugin: Arc<dyn CredentialPlugin>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &Arc<dyn CredentialPlugin> {
        &self.plugin
    }
}

impl fmt::Debug for CallCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCredentials")
            .field("name", &self.name)
            .field("plugin", &self.plugin.name())
            .finish()
    }
}

/// Credentials for a whole channel. Local connections need no handshake, so
/// the only configurable part is the optional per-call plugin.
#[derive(Debug, Clone, Default)]
pub struct ChannelCredentials {
    call: Option<CallCredentials>,
}

impl ChannelCredentials {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn with_call_credentials(mut self, call: CallCredentials) -> Self {
        self.call = Some(call);
        self
    }

    pub fn call_credentials(&self) -> Option<&CallCredentials> {
        self.call.as_ref()
    }
}

/// What the server demands of incoming calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CredentialPolicy {
    /// Any peer able to reach the socket.
    #[default]
    Local,
    /// Calls must carry metadata under `key`.
    RequireMetadata { key: String },
}

impl CredentialPolicy {
    pub fn require_metadata(key: impl Into<String>) -> Self {
        Self::RequireMetadata { key: key.into() }
    }

    pub fn check(&self, metadata: &AuthMetadata) -> Result<(), Status> {
        match self {
            Self::Local => Ok(()),
            Self::RequireMetadata { key } => match metadata.get(key) {
                Some(value) if !value.is_empty() => Ok(()),
                _ => Err(Status::unauthenticated(format!(
                    "call is missing required metadata '{}'",
                    key
                ))),
            },
        }
    }
}

impl From<Option<String>> for CredentialPolicy {
    fn from(key: Option<String>) -> Self {
        key.map(Self::require_metadata).unwrap_or_default()
    }
}
