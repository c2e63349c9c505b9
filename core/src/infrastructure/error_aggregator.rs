// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Error Aggregator
//!
//! Collects failures raised by independent concurrent workers so one
//! controller can surface them after every worker has been joined.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Identity of one concurrent worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[derive(Debug)]
pub struct WorkerFailure {
    pub worker: WorkerId,
    pub error: anyhow::Error,
    pub recorded_at: DateTime<Utc>,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {:#}", self.worker, self.error)
    }
}

/// The failure a controller re-raises once all workers are joined.
#[derive(Debug, Error)]
#[error("{first} ({total} worker failure(s) in total)")]
pub struct AggregateFailure {
    /// Earliest recorded failure.
    pub first: WorkerFailure,
    pub total: usize,
    /// Failures after the first, in record order.
    pub rest: Vec<WorkerFailure>,
}

#[derive(Debug, Default)]
pub struct ErrorAggregator {
    failures: Mutex<Vec<WorkerFailure>>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, worker: WorkerId, error: impl Into<anyhow::Error>) {
        let error = error.into();
        warn!(worker = %worker, error = %format!("{:#}", error), "Worker failed");
        self.failures.lock().push(WorkerFailure {
            worker,
            error,
            recorded_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }

    /// Take every recorded failure, leaving the aggregator empty.
    pub fn drain(&self) -> Vec<WorkerFailure> {
        std::mem::take(&mut *self.failures.lock())
    }

    /// Drain and fail with the first failure if any were recorded.
    pub fn raise(&self) -> Result<(), AggregateFailure> {
        let mut failures = self.drain().into_iter();
        match failures.next() {
            None => Ok(()),
            Some(first) => {
                let rest: Vec<_> = failures.collect();
                Err(AggregateFailure {
                    first,
                    total: rest.len() + 1,
                    rest,
                })
            }
        }
    }
}
