#![forbid(unsafe_code)]

//! Mutation batching.
//!
//! Structural changes are the most disruptive work class. They run
//! immediately only when no protection window is open, no transition is in
//! flight, no flush is running, and nothing is already waiting ahead of them.
//! Otherwise they queue and run together in the next flush pass.
//!
//! # Flush pass
//!
//! 1. Snapshot the queue and clear the live queue.
//! 2. Run every snapshotted block in FIFO order with the flush flag set.
//! 3. Clear the flush flag, then fulfil every snapshotted completion.
//!
//! Mutations requested during step 2 land in the live queue and run in the
//! following pass, never in the current one.
//!
//! # Failure Modes
//!
//! - A panicking block propagates. The flush flag is cleared, blocks that
//!   already ran (and the one that panicked) are fulfilled, and blocks that
//!   had not run go back to the front of the queue in order. A recovery pump
//!   is scheduled on the host.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::completion::{Completion, Resolver};
use crate::gate::PendingMutation;
use crate::host::Host;
use crate::scheduler::{Inner, Scheduler, schedule_recovery};

impl<H: Host> Scheduler<H> {
    /// Run a structural change now if nothing else is in the way, otherwise
    /// queue it for the next flush.
    pub fn mutation(&self, block: impl FnOnce() + 'static) -> Completion {
        if self.inner.mutation_must_queue() {
            let (completion, resolver) = Completion::pending();
            let queued = {
                let mut gate = self.inner.gate.borrow_mut();
                gate.mutations.push_back(PendingMutation {
                    block: Box::new(block),
                    resolver,
                });
                gate.mutations.len()
            };
            tracing::trace!(queued, "mutation deferred");
            return completion;
        }
        block();
        Completion::ready()
    }
}

/// Run one flush pass if the gate allows it.
///
/// Returns whether a pass ran.
pub(crate) fn flush_mutations<H: Host>(inner: &Rc<Inner<H>>) -> bool {
    if inner.mutation_gated() {
        return false;
    }
    let batch = {
        let mut gate = inner.gate.borrow_mut();
        if gate.mutations.is_empty() {
            return false;
        }
        gate.flushing = true;
        std::mem::take(&mut gate.mutations)
    };

    #[cfg(feature = "tracing")]
    let _span = tracing::debug_span!("sched_flush", batch = batch.len()).entered();
    tracing::debug!(batch = batch.len(), "flushing mutations");

    let mut pass = FlushPass {
        inner,
        remaining: batch,
        finished: Vec::new(),
    };
    while let Some(PendingMutation { block, resolver }) = pass.remaining.pop_front() {
        pass.finished.push(resolver);
        block();
    }
    true
}

/// Ends a flush pass on every exit path.
struct FlushPass<'a, H: Host> {
    inner: &'a Rc<Inner<H>>,
    remaining: VecDeque<PendingMutation>,
    finished: Vec<Resolver>,
}

impl<H: Host> Drop for FlushPass<'_, H> {
    fn drop(&mut self) {
        let unwinding = std::thread::panicking();
        {
            let mut gate = self.inner.gate.borrow_mut();
            gate.flushing = false;
            if unwinding {
                while let Some(entry) = self.remaining.pop_back() {
                    gate.mutations.push_front(entry);
                }
            }
        }
        for resolver in self.finished.drain(..) {
            resolver.resolve();
        }
        if unwinding {
            tracing::warn!("mutation block panicked during flush");
            schedule_recovery(self.inner);
        }
    }
}
