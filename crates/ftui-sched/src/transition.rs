#![forbid(unsafe_code)]

//! Transition coordination.
//!
//! Transition blocks start an animated change and report completion through
//! a host signal (e.g. `"transitionend"` on the animated target). Each started
//! transition holds the ongoing counter up until its signal arrives or its
//! timeout elapses, whichever comes first.
//!
//! Two entry points differ only in gating:
//!
//! - [`Scheduler::feedback`] always starts immediately. Acknowledging user
//!   input must not wait for the protection window.
//! - [`Scheduler::transition`] is queued while a protection window is open,
//!   a mutation flush is running, or earlier transitions are still queued,
//!   and released in submission order.

use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::completion::{Completion, Resolver};
use crate::gate::{Block, QueuedTransition};
use crate::host::{EventKind, Host};
use crate::race::{RaceOutcome, first_of};
use crate::scheduler::{Inner, Scheduler, pump, schedule_recovery};

/// Completion signal a transition waits for.
#[derive(Clone, PartialEq, Eq)]
pub struct CompletionSignal<T> {
    /// Target expected to emit the signal.
    pub target: T,
    /// Signal name, e.g. `"transitionend"`.
    pub kind: EventKind,
    /// Per-call fallback; `None` uses the scheduler's transition timeout.
    pub timeout: Option<Duration>,
}

impl<T> CompletionSignal<T> {
    /// Wait for `kind` on `target`, with the scheduler's default timeout.
    pub fn new(target: T, kind: impl Into<EventKind>) -> Self {
        Self {
            target,
            kind: kind.into(),
            timeout: None,
        }
    }

    /// Override the fallback timeout for this call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<T: fmt::Debug> fmt::Debug for CompletionSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("target", &self.target)
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<H: Host> Scheduler<H> {
    /// Start a feedback transition now, regardless of protection or flushing.
    ///
    /// `block` runs synchronously. The returned completion is fulfilled when
    /// `until` is signaled or times out, or immediately if `until` is `None`.
    pub fn feedback(
        &self,
        block: impl FnOnce() + 'static,
        until: Option<CompletionSignal<H::Target>>,
    ) -> Completion {
        let (completion, resolver) = Completion::pending();
        start_transition(&self.inner, Box::new(block), until, resolver);
        completion
    }

    /// Start a transition, or queue it while input protection or a flush is
    /// active or earlier transitions are still waiting.
    pub fn transition(
        &self,
        block: impl FnOnce() + 'static,
        until: Option<CompletionSignal<H::Target>>,
    ) -> Completion {
        let (completion, resolver) = Completion::pending();
        if self.inner.transition_must_queue() {
            let queued = {
                let mut gate = self.inner.gate.borrow_mut();
                gate.transitions.push_back(QueuedTransition {
                    block: Box::new(block),
                    signal: until,
                    resolver,
                });
                gate.transitions.len()
            };
            tracing::debug!(queued, "transition deferred");
            return completion;
        }
        start_transition(&self.inner, Box::new(block), until, resolver);
        completion
    }
}

/// Count the transition in, run its block, and arrange for its completion.
pub(crate) fn start_transition<H: Host>(
    inner: &Rc<Inner<H>>,
    block: Block,
    signal: Option<CompletionSignal<H::Target>>,
    resolver: Resolver,
) {
    inner.gate.borrow_mut().begin_transition();
    let mut guard = StartGuard {
        inner,
        resolver: Some(resolver),
    };
    block();
    let Some(resolver) = guard.resolver.take() else {
        return;
    };
    drop(guard);

    match signal {
        None => finish_transition(inner, resolver, None),
        Some(signal) => {
            let timeout = signal.timeout.unwrap_or(inner.config.transition_timeout);
            let weak: Weak<Inner<H>> = Rc::downgrade(inner);
            first_of(&inner.host, &signal.target, &signal.kind, timeout, move |outcome| {
                match weak.upgrade() {
                    Some(inner) => finish_transition(&inner, resolver, Some(outcome)),
                    None => resolver.resolve(),
                }
            });
        }
    }
}

fn finish_transition<H: Host>(
    inner: &Rc<Inner<H>>,
    resolver: Resolver,
    outcome: Option<RaceOutcome>,
) {
    let remaining = inner.gate.borrow_mut().end_transition();
    tracing::trace!(?outcome, remaining, "transition finished");
    resolver.resolve();
    if remaining == 0 {
        pump(inner);
    }
}

/// Restores the counter and fulfils the completion if a block panics.
struct StartGuard<'a, H: Host> {
    inner: &'a Rc<Inner<H>>,
    resolver: Option<Resolver>,
}

impl<H: Host> Drop for StartGuard<'_, H> {
    fn drop(&mut self) {
        let Some(resolver) = self.resolver.take() else {
            return;
        };
        self.inner.gate.borrow_mut().end_transition();
        resolver.resolve();
        tracing::warn!("transition block panicked");
        schedule_recovery(self.inner);
    }
}

/// Start queued transitions in FIFO order while the gate is open.
///
/// Returns whether any transition was started.
pub(crate) fn drain_transitions<H: Host>(inner: &Rc<Inner<H>>) -> bool {
    #[cfg(feature = "tracing")]
    let _span = tracing::debug_span!("sched_drain").entered();

    let mut started = 0usize;
    loop {
        if inner.transition_gated() {
            break;
        }
        let next = inner.gate.borrow_mut().transitions.pop_front();
        let Some(queued) = next else {
            break;
        };
        started += 1;
        start_transition(inner, queued.block, queued.signal, queued.resolver);
    }
    if started > 0 {
        tracing::debug!(started, "queued transitions released");
    }
    started > 0
}
