// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Concurrency Barrier
//!
//! Reusable rendezvous for a fixed number of participants. Nobody leaves
//! [`ConcurrencyBarrier::arrive`] until every participant of the current
//! generation has arrived; the last arrival advances the generation and
//! releases the others together.
//!
//! Waiters block on the generation number rather than a flag, so a fast
//! participant that re-enters for phase N+1 cannot be confused with a slow one
//! still leaving phase N.
//!
//! `arrive` is cancel-safe: dropping a waiting `arrive` future before its
//! generation is released withdraws that arrival.

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarrierError {
    #[error("cannot reset barrier while {arrived} participant(s) are waiting")]
    PhaseInProgress { arrived: usize },
}

/// What one participant learns when it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    /// Generation that was just completed.
    pub generation: u64,
    /// Exactly one participant per generation (the last to arrive) is leader.
    pub is_leader: bool,
}

#[derive(Debug)]
struct BarrierState {
    required: usize,
    arrived: usize,
    generation: u64,
}

#[derive(Debug)]
pub struct ConcurrencyBarrier {
    state: Mutex<BarrierState>,
    released: watch::Sender<u64>,
}

impl ConcurrencyBarrier {
    /// Barrier for `required` participants. Zero is treated as one.
    pub fn new(required: usize) -> Self {
        let (released, _) = watch::channel(0);
        Self {
            state: Mutex::new(BarrierState {
                required: required.max(1),
                arrived: 0,
                generation: 0,
            }),
            released,
        }
    }

    pub fn required(&self) -> usize {
        self.state.lock().required
    }

    /// Participants waiting in the current generation.
    pub fn arrived(&self) -> usize {
        self.state.lock().arrived
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Wait until all participants of the current generation have arrived.
    pub async fn arrive(&self) -> BarrierWaitResult {
        let (generation, mut receiver) = {
            let mut state = self.state.lock();
            state.arrived += 1;
            if state.arrived >= state.required {
                let generation = state.generation;
                state.arrived = 0;
                state.generation += 1;
                self.released.send_replace(state.generation);
                return BarrierWaitResult {
                    generation,
                    is_leader: true,
                };
            }
            // Subscribe under the lock so the release cannot slip past us.
            let receiver = self.released.subscribe();
            (state.generation, receiver)
        };

        let mut pending = PendingArrival {
            barrier: self,
            generation,
            armed: true,
        };
        // The sender lives as long as `self`, so the wait cannot observe a closed channel.
        let _ = receiver.wait_for(|released| *released > generation).await;
        pending.armed = false;
        BarrierWaitResult {
            generation,
            is_leader: false,
        }
    }

    /// Blocking form of [`arrive`](Self::arrive) for participants on plain threads.
    pub fn arrive_blocking(&self) -> BarrierWaitResult {
        futures::executor::block_on(self.arrive())
    }

    /// Reconfigure for the next phase. Refused while participants are waiting.
    pub fn reset(&self, required: usize) -> Result<(), BarrierError> {
        let mut state = self.state.lock();
        if state.arrived > 0 {
            return Err(BarrierError::PhaseInProgress {
                arrived: state.arrived,
            });
        }
        state.required = required.max(1);
        Ok(())
    }
}

/// Withdraws an arrival whose waiter is dropped before release.
struct PendingArrival<'a> {
    barrier: &'a ConcurrencyBarrier,
    generation: u64,
    armed: bool,
}

impl Drop for PendingArrival<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.barrier.state.lock();
        if state.generation == self.generation && state.arrived > 0 {
            state.arrived -= 1;
        }
    }
}
