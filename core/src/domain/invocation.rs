// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pending Invocations
//!
//! A [`PendingInvocation`] is one in-flight credential request. It owns the
//! snapshot captured for the call and a single-use result slot. The slot is
//! filled by the first [`MetadataCallback`] that fires; every later delivery
//! is a protocol violation that is logged and dropped so the canonical
//! outcome stays intact.
//!
//! When the last callback handle is dropped without delivering, the result
//! slot's sender goes with it and the waiting caller observes the closure.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::warn;

use crate::domain::context::Snapshot;
use crate::domain::error::CredentialError;
use crate::domain::plugin::{AuthMetadata, CallId};

pub type InvocationOutcome = Result<AuthMetadata, CredentialError>;

pub struct PendingInvocation {
    call_id: CallId,
    snapshot: Snapshot,
    completed: AtomicBool,
    deliveries: AtomicUsize,
    slot: Mutex<Option<oneshot::Sender<InvocationOutcome>>>,
}

impl PendingInvocation {
    /// Create the invocation together with the receiver the caller waits on.
    pub fn new(
        call_id: CallId,
        snapshot: Snapshot,
    ) -> (Arc<Self>, oneshot::Receiver<InvocationOutcome>) {
        let (sender, receiver) = oneshot::channel();
        let pending = Arc::new(Self {
            call_id,
            snapshot,
            completed: AtomicBool::new(false),
            deliveries: AtomicUsize::new(0),
            slot: Mutex::new(Some(sender)),
        });
        (pending, receiver)
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Snapshot captured when the invocation was scheduled.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Number of outcomes reported so far, canonical or not.
    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::Acquire)
    }

    /// Record `outcome`. Returns `true` when it became the canonical result.
    pub fn resolve(&self, outcome: InvocationOutcome) -> bool {
        self.deliveries.fetch_add(1, Ordering::AcqRel);
        let sender = self.slot.lock().take();
        match sender {
            Some(sender) => {
                self.completed.store(true, Ordering::Release);
                if sender.send(outcome).is_err() {
                    tracing::debug!(
                        call_id = %self.call_id,
                        "caller stopped waiting before credentials resolved"
                    );
                }
                true
            }
            None => {
                let rejected = match &outcome {
                    Ok(_) => "metadata",
                    Err(error) => error.kind(),
                };
                warn!(
                    call_id = %self.call_id,
                    rejected,
                    "ignoring repeated credential callback"
                );
                metrics::counter!("callcred_protocol_violations_total").increment(1);
                false
            }
        }
    }
}

impl fmt::Debug for PendingInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingInvocation")
            .field("call_id", &self.call_id)
            .field("snapshot", &self.snapshot)
            .field("completed", &self.is_completed())
            .field("deliveries", &self.deliveries())
            .finish()
    }
}

/// Completion handle passed to [`CredentialPlugin::invoke`](crate::CredentialPlugin::invoke).
///
/// Clones share the same invocation; only the first delivery across all of
/// them counts.
#[derive(Clone)]
pub struct MetadataCallback {
    pending: Arc<PendingInvocation>,
}

impl MetadataCallback {
    pub fn new(pending: Arc<PendingInvocation>) -> Self {
        Self { pending }
    }

    pub fn call_id(&self) -> CallId {
        self.pending.call_id()
    }

    /// Deliver the outcome. Returns `true` if it was accepted as canonical.
    pub fn call(&self, outcome: InvocationOutcome) -> bool {
        self.pending.resolve(outcome)
    }

    pub fn succeed(&self, metadata: AuthMetadata) -> bool {
        self.call(Ok(metadata))
    }

    pub fn fail(&self, error: CredentialError) -> bool {
        self.call(Err(error))
    }
}

impl fmt::Debug for MetadataCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCallback")
            .field("call_id", &self.pending.call_id())
            .finish()
    }
}
