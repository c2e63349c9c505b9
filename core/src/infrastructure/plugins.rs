// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Credential Plugin Variants
//!
//! Ready-made [`CredentialPlugin`] implementations:
//!
//! - [`StaticMetadataPlugin`]: fixed metadata for every call.
//! - [`FnPlugin`]: wraps a closure.
//! - [`AmbientEchoPlugin`]: emits an ambient value as metadata and can
//!   assert it matches an expected value.
//! - [`FailingPlugin`]: always delivers an error.
//! - [`CompositePlugin`]: runs several plugins and concatenates their metadata.

use std::any::Any;
use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::application::invoker::{CredentialInvoker, SchedulingMode};
use crate::domain::context::ContextKey;
use crate::domain::error::CredentialError;
use crate::domain::invocation::MetadataCallback;
use crate::domain::plugin::{AuthMetadata, CallContext, CredentialPlugin};

#[derive(Debug, Clone)]
pub struct StaticMetadataPlugin {
    metadata: AuthMetadata,
}

impl StaticMetadataPlugin {
    pub fn new(metadata: AuthMetadata) -> Self {
        Self { metadata }
    }

    /// `authorization: Bearer <token>`
    pub fn bearer(token: impl Display) -> Self {
        Self::new(AuthMetadata::new().with("authorization", format!("Bearer {}", token)))
    }
}

impl CredentialPlugin for StaticMetadataPlugin {
    fn name(&self) -> &str {
        "static"
    }

    fn invoke(
        &self,
        _context: CallContext,
        callback: MetadataCallback,
    ) -> Result<(), CredentialError> {
        callback.succeed(self.metadata.clone());
        Ok(())
    }
}

pub struct FnPlugin<F> {
    name: String,
    func: F,
}

impl<F> FnPlugin<F>
where
    F: Fn(CallContext, MetadataCallback) -> Result<(), CredentialError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> CredentialPlugin for FnPlugin<F>
where
    F: Fn(CallContext, MetadataCallback) -> Result<(), CredentialError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        context: CallContext,
        callback: MetadataCallback,
    ) -> Result<(), CredentialError> {
        (self.func)(context, callback)
    }
}

/// Reads `key` from the ambient snapshot installed for the invocation and
/// emits it under `metadata_key`.
///
/// With an expected value configured, a mismatch fails the invocation with
/// [`CredentialError::PropagationViolation`] instead of emitting metadata.
pub struct AmbientEchoPlugin<T: 'static> {
    key: &'static ContextKey<T>,
    expected: Option<T>,
    metadata_key: String,
    invocations: AtomicUsize,
}

impl<T> AmbientEchoPlugin<T>
where
    T: Any + Clone + Debug + Display + PartialEq + Send + Sync,
{
    pub fn new(key: &'static ContextKey<T>, metadata_key: impl Into<String>) -> Self {
        Self {
            key,
            expected: None,
            metadata_key: metadata_key.into(),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn expecting(mut self, value: T) -> Self {
        self.expected = Some(value);
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Acquire)
    }
}

impl<T> CredentialPlugin for AmbientEchoPlugin<T>
where
    T: Any + Clone + Debug + Display + PartialEq + Send + Sync,
{
    fn name(&self) -> &str {
        "ambient-echo"
    }

    fn invoke(
        &self,
        _context: CallContext,
        callback: MetadataCallback,
    ) -> Result<(), CredentialError> {
        self.invocations.fetch_add(1, Ordering::AcqRel);
        let observed = self.key.get();

        if let Some(expected) = &self.expected {
            if observed.as_ref() != Some(expected) {
                return Err(CredentialError::PropagationViolation(format!(
                    "{} = {:?}, expected {:?}",
                    self.key.name(),
                    observed,
                    expected
                )));
            }
        }

        let mut metadata = AuthMetadata::new();
        if let Some(value) = observed {
            metadata.push(self.metadata_key.clone(), value.to_string());
        }
        callback.succeed(metadata);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FailingPlugin {
    message: String,
}

impl FailingPlugin {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl CredentialPlugin for FailingPlugin {
    fn name(&self) -> &str {
        "failing"
    }

    fn invoke(
        &self,
        _context: CallContext,
        callback: MetadataCallback,
    ) -> Result<(), CredentialError> {
        callback.fail(CredentialError::PluginFailure(self.message.clone()));
        Ok(())
    }
}

/// Runs each inner plugin in order and concatenates their metadata.
///
/// Every inner plugin goes through its own invocation, so it sees the same
/// ambient snapshot the composite was invoked with. The first inner failure
/// fails the whole invocation. The composite occupies its execution context
/// until all inner plugins resolve.
pub struct CompositePlugin {
    plugins: Vec<Arc<dyn CredentialPlugin>>,
    invoker: CredentialInvoker,
}

impl CompositePlugin {
    pub fn new(plugins: Vec<Arc<dyn CredentialPlugin>>) -> Self {
        Self {
            plugins,
            invoker: CredentialInvoker::new(SchedulingMode::Thread),
        }
    }

    pub fn push(mut self, plugin: Arc<dyn CredentialPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }
}

impl CredentialPlugin for CompositePlugin {
    fn name(&self) -> &str {
        "composite"
    }

    fn invoke(
        &self,
        context: CallContext,
        callback: MetadataCallback,
    ) -> Result<(), CredentialError> {
        let mut combined = AuthMetadata::new();
        for plugin in &self.plugins {
            let metadata = self.invoker.invoke_blocking(Arc::clone(plugin), context.clone())?;
            combined.extend(metadata);
        }
        callback.succeed(combined);
        Ok(())
    }
}
