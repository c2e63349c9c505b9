// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Credential Invoker
//!
//! Schedules one [`CredentialPlugin`] invocation per outstanding call on an
//! independent execution context and funnels exactly one outcome back to the
//! call path.
//!
//! ## Invocation Steps
//!
//! 1. Capture the caller's active [`Snapshot`](crate::Snapshot).
//! 2. Create a [`PendingInvocation`] and hand the plugin off to the execution
//!    context selected by [`SchedulingMode`], installing the snapshot there.
//! 3. On the worker, confirm the installed snapshot is the captured one, then
//!    call the plugin with a fresh [`MetadataCallback`].
//! 4. The caller waits on its own invocation only and returns the first
//!    delivered outcome.
//!
//! No timeout is imposed here. A plugin that keeps its callback alive without
//! ever calling it stalls the caller until the transport deadline fires.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub use crate::domain::config::SchedulingMode;
use crate::domain::context::AmbientContext;
use crate::domain::error::CredentialError;
use crate::domain::invocation::{InvocationOutcome, MetadataCallback, PendingInvocation};
use crate::domain::plugin::{AuthMetadata, CallContext, CredentialPlugin};

#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialInvoker {
    mode: SchedulingMode,
}

impl CredentialInvoker {
    pub fn new(mode: SchedulingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    /// Obtain metadata for one call, waiting until the plugin resolves.
    pub async fn invoke(
        &self,
        plugin: Arc<dyn CredentialPlugin>,
        context: CallContext,
    ) -> Result<AuthMetadata, CredentialError> {
        let snapshot = AmbientContext::capture();
        let started = Instant::now();
        let call_id = context.call_id;
        let plugin_name = plugin.name().to_string();
        let (pending, receiver) = PendingInvocation::new(call_id, snapshot);

        debug!(
            call_id = %call_id,
            plugin = %plugin_name,
            mode = %self.mode,
            snapshot = pending.snapshot().id(),
            "Scheduling credential plugin"
        );

        let outcome = match self.schedule(pending, plugin, context) {
            Ok(()) => wait_for(receiver).await,
            Err(error) => Err(error),
        };
        record_outcome(&plugin_name, &outcome, started);
        outcome
    }

    /// Blocking variant for callers on plain threads.
    ///
    /// The plugin always runs on a dedicated OS thread, whatever the
    /// configured mode, and the calling thread blocks until it resolves.
    pub fn invoke_blocking(
        &self,
        plugin: Arc<dyn CredentialPlugin>,
        context: CallContext,
    ) -> Result<AuthMetadata, CredentialError> {
        let snapshot = AmbientContext::capture();
        let started = Instant::now();
        let plugin_name = plugin.name().to_string();
        let (pending, receiver) = PendingInvocation::new(context.call_id, snapshot);

        let outcome = match spawn_thread(pending, plugin, context) {
            Ok(()) => futures::executor::block_on(wait_for(receiver)),
            Err(error) => Err(error),
        };
        record_outcome(&plugin_name, &outcome, started);
        outcome
    }

    fn schedule(
        &self,
        pending: Arc<PendingInvocation>,
        plugin: Arc<dyn CredentialPlugin>,
        context: CallContext,
    ) -> Result<(), CredentialError> {
        match self.mode {
            SchedulingMode::BlockingPool => {
                let handle = current_runtime()?;
                handle.spawn_blocking(move || {
                    AmbientContext::with_snapshot(pending.snapshot().clone(), || {
                        run_plugin(&pending, plugin.as_ref(), context)
                    })
                });
            }
            SchedulingMode::Task => {
                let handle = current_runtime()?;
                handle.spawn(async move {
                    let snapshot = pending.snapshot().clone();
                    AmbientContext::scope(snapshot, async move {
                        run_plugin(&pending, plugin.as_ref(), context)
                    })
                    .await
                });
            }
            SchedulingMode::Thread => spawn_thread(pending, plugin, context)?,
        }
        Ok(())
    }
}

fn current_runtime() -> Result<Handle, CredentialError> {
    Handle::try_current().map_err(|e| CredentialError::Scheduling(e.to_string()))
}

fn spawn_thread(
    pending: Arc<PendingInvocation>,
    plugin: Arc<dyn CredentialPlugin>,
    context: CallContext,
) -> Result<(), CredentialError> {
    std::thread::Builder::new()
        .name("callcred-plugin".to_string())
        .spawn(move || {
            AmbientContext::with_snapshot(pending.snapshot().clone(), || {
                run_plugin(&pending, plugin.as_ref(), context)
            })
        })
        .map(|_| ())
        .map_err(|e| CredentialError::Scheduling(e.to_string()))
}

/// Body of every scheduled invocation. Runs with the captured snapshot installed.
fn run_plugin(
    pending: &Arc<PendingInvocation>,
    plugin: &dyn CredentialPlugin,
    context: CallContext,
) {
    let observed = AmbientContext::capture();
    if !observed.same_as(pending.snapshot()) {
        pending.resolve(Err(CredentialError::PropagationViolation(format!(
            "worker observed snapshot {} but snapshot {} was captured for call {}",
            observed.id(),
            pending.snapshot().id(),
            pending.call_id()
        ))));
        return;
    }

    let callback = MetadataCallback::new(Arc::clone(pending));
    match panic::catch_unwind(AssertUnwindSafe(|| plugin.invoke(context, callback))) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            pending.resolve(Err(error));
        }
        Err(payload) => {
            pending.resolve(Err(CredentialError::PluginFailure(format!(
                "plugin '{}' panicked: {}",
                plugin.name(),
                panic_message(&*payload)
            ))));
        }
    }
}

async fn wait_for(receiver: oneshot::Receiver<InvocationOutcome>) -> InvocationOutcome {
    receiver.await.unwrap_or_else(|_| {
        Err(CredentialError::ProtocolViolation(
            "plugin released its callback without delivering a result".to_string(),
        ))
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn record_outcome(plugin: &str, outcome: &InvocationOutcome, started: Instant) {
    let label = match outcome {
        Ok(_) => "ok",
        Err(error) => error.kind(),
    };
    metrics::counter!("callcred_invocations_total", "outcome" => label).increment(1);
    metrics::histogram!("callcred_invocation_seconds").record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(metadata) => debug!(plugin, entries = metadata.len(), "Credential plugin resolved"),
        Err(error) => warn!(plugin, error = %error, "Credential plugin failed"),
    }
}
