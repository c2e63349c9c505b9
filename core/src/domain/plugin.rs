// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Credential Plugin Contract
//!
//! A [`CredentialPlugin`] turns a [`CallContext`] into [`AuthMetadata`] for one
//! outgoing call. Completion is reported through the [`MetadataCallback`]
//! handed to [`CredentialPlugin::invoke`], which may be called from any thread
//! at any later time. Exactly one result per invocation is expected.
//!
//! Plugins are shared across concurrent calls (`Send + Sync`). Per-call state
//! must come from the `CallContext` or the ambient snapshot installed for the
//! invocation, never from mutable fields on the plugin.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::error::CredentialError;
use crate::domain::invocation::MetadataCallback;

/// Unique identifier for one outgoing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the plugin knows about the call it authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub call_id: CallId,
    /// Target of the call, e.g. `unix:/tmp/callcred-x/echo.sock/test`.
    pub service_url: String,
    pub method_name: String,
}

impl CallContext {
    pub fn new(service_url: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            call_id: CallId::new(),
            service_url: service_url.into(),
            method_name: method_name.into(),
        }
    }
}

/// Ordered authentication metadata attached to one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMetadata(Vec<(String, String)>);

impl AuthMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// First value bound to `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn extend(&mut self, other: AuthMetadata) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AuthMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// User-supplied capability producing per-call authentication metadata.
pub trait CredentialPlugin: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Start producing metadata for `context` and report it through
    /// `callback`, now or later.
    ///
    /// Returning `Err` counts as the terminal outcome when no callback has
    /// fired yet.
    fn invoke(&self, context: CallContext, callback: MetadataCallback)
        -> Result<(), CredentialError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_lookup_returns_first_binding() {
        let metadata = AuthMetadata::new()
            .with("authorization", "Bearer a")
            .with("authorization", "Bearer b")
            .with("x-test-var", "24601");

        assert_eq!(metadata.get("authorization"), Some("Bearer a"));
        assert_eq!(metadata.get("x-test-var"), Some("24601"));
        assert_eq!(metadata.get("missing"), None);
        assert_eq!(metadata.len(), 3);
    }

    #[test]
    fn test_metadata_from_pairs() {
        let metadata: AuthMetadata = vec![("k1", "v1"), ("k2", "v2")].into_iter().collect();
        let pairs: Vec<_> = metadata.iter().collect();
        assert_eq!(pairs, vec![("k1", "v1"), ("k2", "v2")]);
    }

    #[test]
    fn test_metadata_serializes_as_ordered_pairs() {
        let metadata = AuthMetadata::new().with("b", "2").with("a", "1");
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, r#"[["b","2"],["a","1"]]"#);
    }

    #[test]
    fn test_call_ids_are_unique() {
        let a = CallContext::new("unix:/tmp/a.sock/test", "UnaryUnary");
        let b = CallContext::new("unix:/tmp/a.sock/test", "UnaryUnary");
        assert_ne!(a.call_id, b.call_id);
    }
}
