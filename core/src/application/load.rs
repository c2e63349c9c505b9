// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Concurrent Load Runner
//!
//! Drives many workers against one shared [`Channel`] and reports failures
//! only after every worker has finished.
//!
//! Each worker runs as its own Tokio task inside an
//! [`AmbientContext::scope`] seeded with the controller's snapshot, so
//! values the controller set are visible to every worker, while values a
//! worker sets stay private to it.
//!
//! No worker body is polled until every worker task has been spawned and has
//! reached the start rendezvous, so all workers begin together and a body
//! may fail at any point without stranding the others.
//!
//! [`WorkerContext::barrier`] is for further phases inside the bodies. A
//! worker that returns early while others wait there still strands them.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use crate::domain::config::ClientConfigManifest;
use crate::domain::context::AmbientContext;
use crate::infrastructure::barrier::ConcurrencyBarrier;
use crate::infrastructure::error_aggregator::{AggregateFailure, ErrorAggregator, WorkerId};
use crate::infrastructure::transport::{CallOptions, Channel};

/// Handed to every worker body.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub id: WorkerId,
    /// Shared by all workers of one run, sized to the worker count. Separate
    /// from the start rendezvous.
    pub barrier: Arc<ConcurrencyBarrier>,
}

/// Run `workers` copies of `body` concurrently and join them all.
///
/// Bodies start together once every worker has reached the start
/// rendezvous. Returns the first recorded failure once every worker is done.
/// A worker task that panics counts as a failure.
pub async fn run_concurrently<F, Fut>(workers: usize, body: F) -> Result<(), AggregateFailure>
where
    F: Fn(WorkerContext) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let start = Arc::new(ConcurrencyBarrier::new(workers));
    let barrier = Arc::new(ConcurrencyBarrier::new(workers));
    let aggregator = ErrorAggregator::new();
    let snapshot = AmbientContext::capture();

    let handles: Vec<_> = (0..workers)
        .map(|n| {
            let id = WorkerId(n);
            let work = body(WorkerContext {
                id,
                barrier: barrier.clone(),
            });
            let start = start.clone();
            let task = async move {
                if start.arrive().await.is_leader {
                    debug!(worker = %id, "All workers released");
                }
                work.await
            };
            (id, tokio::spawn(AmbientContext::scope(snapshot.clone(), task)))
        })
        .collect();

    for (id, handle) in handles {
        match handle.await {
            Ok(Ok(())) => debug!(worker = %id, "Worker finished"),
            Ok(Err(error)) => aggregator.record(id, error),
            Err(join_error) => {
                aggregator.record(id, anyhow::anyhow!("worker task aborted: {}", join_error))
            }
        }
    }

    aggregator.raise()
}

/// Parameters of an echo load run.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub workers: usize,
    pub calls_per_worker: usize,
    pub service: String,
    pub method: String,
    pub payload: Bytes,
    pub call_options: CallOptions,
}

impl LoadPlan {
    pub fn from_manifest(manifest: &ClientConfigManifest, service: &str, method: &str) -> Self {
        let load = &manifest.spec.load;
        Self {
            workers: load.workers,
            calls_per_worker: load.calls_per_worker,
            service: service.to_string(),
            method: method.to_string(),
            payload: Bytes::from(load.payload.clone().into_bytes()),
            call_options: CallOptions {
                timeout: manifest.spec.transport.call_timeout(),
            },
        }
    }

    pub fn total_calls(&self) -> usize {
        self.workers * self.calls_per_worker
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub workers: usize,
    pub calls_completed: usize,
    pub elapsed: Duration,
}

/// Workers start together, then issue their calls back to back and check that
/// each response echoes the payload.
pub async fn run_echo_load(
    channel: &Channel,
    plan: &LoadPlan,
) -> Result<LoadReport, AggregateFailure> {
    info!(
        workers = plan.workers,
        calls_per_worker = plan.calls_per_worker,
        service = %plan.service,
        method = %plan.method,
        "Starting echo load"
    );
    let started = Instant::now();

    let plan_shared = Arc::new(plan.clone());
    run_concurrently(plan.workers, |worker| {
        let channel = channel.clone();
        let plan = plan_shared.clone();
        async move {
            for call in 0..plan.calls_per_worker {
                let response = channel
                    .unary_call(
                        &plan.service,
                        &plan.method,
                        plan.payload.clone(),
                        plan.call_options,
                    )
                    .await?;
                anyhow::ensure!(
                    response == plan.payload,
                    "{} call {} returned {:?}, expected {:?}",
                    worker.id,
                    call,
                    response,
                    plan.payload
                );
            }
            Ok(())
        }
    })
    .await?;

    let report = LoadReport {
        workers: plan.workers,
        calls_completed: plan.total_calls(),
        elapsed: started.elapsed(),
    };
    info!(
        calls = report.calls_completed,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Echo load finished"
    );
    Ok(report)
}
