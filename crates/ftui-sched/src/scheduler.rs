#![forbid(unsafe_code)]

//! The scheduler handle and the drain/flush pump.
//!
//! A [`Scheduler`] is a cheap, clonable handle to one scheduler instance.
//! Construct one per UI thread (or per test) and hand clones to the views
//! that need to schedule work.
//!
//! # Invariants
//!
//! 1. No `RefCell` borrow is held while a work block or host call runs.
//! 2. Only one pump (drain + flush loop) is active at a time. A pump request
//!    arriving while one is active is absorbed by the active loop.
//! 3. A pump request arriving during a frame callback is deferred until the
//!    frame callback returns.
//! 4. Host callbacks hold a `Weak` reference; dropping the last handle makes
//!    every pending callback a no-op.
//! 5. New submissions never overtake queued work of their class. While a
//!    queue is non-empty or a deferred pump is pending, they queue too.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::direct::BindingTable;
use crate::gate::Gate;
use crate::host::Host;
use crate::mutation::flush_mutations;
use crate::transition::drain_transitions;

/// Single-threaded arbiter for direct, transition, and mutation work.
pub struct Scheduler<H: Host> {
    pub(crate) inner: Rc<Inner<H>>,
}

pub(crate) struct Inner<H: Host> {
    pub(crate) host: H,
    pub(crate) config: SchedulerConfig,
    pub(crate) gate: RefCell<Gate<H::Target>>,
    pub(crate) bindings: RefCell<BindingTable<H>>,
}

/// Point-in-time view of scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerSnapshot {
    /// Transitions started but not yet completed.
    pub ongoing_transitions: usize,
    /// Non-feedback transitions waiting for the gate to open.
    pub queued_transitions: usize,
    /// Mutations waiting for the next flush.
    pub queued_mutations: usize,
    /// Live (target, event kind) bindings.
    pub bindings: usize,
    /// Whether any binding's protection window is open.
    pub protected: bool,
    /// Whether a mutation flush pass is running.
    pub flushing: bool,
}

impl<H: Host> Scheduler<H> {
    /// Create a scheduler on `host` with default timings.
    pub fn new(host: H) -> Self {
        Self::with_config(host, SchedulerConfig::default())
    }

    /// Create a scheduler on `host` with explicit timings.
    pub fn with_config(host: H, config: SchedulerConfig) -> Self {
        tracing::debug!(?config, "scheduler created");
        Self {
            inner: Rc::new(Inner {
                host,
                config,
                gate: RefCell::new(Gate::new()),
                bindings: RefCell::new(BindingTable::default()),
            }),
        }
    }

    /// The host this scheduler runs on.
    #[must_use]
    pub fn host(&self) -> &H {
        &self.inner.host
    }

    /// Timings in effect.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Number of transitions currently in flight.
    #[must_use]
    pub fn ongoing_transitions(&self) -> usize {
        self.inner.gate.borrow().ongoing()
    }

    /// Whether any protection window is open.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.inner.is_protected()
    }

    /// Capture the current queue lengths and flags.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let gate = self.inner.gate.borrow();
        let bindings = self.inner.bindings.borrow();
        SchedulerSnapshot {
            ongoing_transitions: gate.ongoing(),
            queued_transitions: gate.transitions.len(),
            queued_mutations: gate.mutations.len(),
            bindings: bindings.len(),
            protected: bindings.any_protected(),
            flushing: gate.flushing,
        }
    }
}

impl<H: Host> Clone for Scheduler<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<H: Host> fmt::Debug for Scheduler<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("state", &self.snapshot())
            .finish()
    }
}

impl<H: Host> Inner<H> {
    pub(crate) fn is_protected(&self) -> bool {
        self.bindings.borrow().any_protected()
    }

    /// Mutations run immediately only when nothing else is in the way.
    pub(crate) fn mutation_gated(&self) -> bool {
        let gate = self.gate.borrow();
        gate.flushing || gate.ongoing() > 0 || self.is_protected()
    }

    /// Non-feedback transitions wait for protection and for a running flush.
    pub(crate) fn transition_gated(&self) -> bool {
        self.gate.borrow().flushing || self.is_protected()
    }

    /// A new mutation queues behind anything the next pump would run first.
    pub(crate) fn mutation_must_queue(&self) -> bool {
        self.mutation_gated() || {
            let gate = self.gate.borrow();
            gate.pump_requested || !gate.transitions.is_empty() || !gate.mutations.is_empty()
        }
    }

    /// A new transition queues behind earlier queued transitions.
    pub(crate) fn transition_must_queue(&self) -> bool {
        self.transition_gated() || {
            let gate = self.gate.borrow();
            gate.pump_requested || !gate.transitions.is_empty()
        }
    }
}

/// Release queued transitions, then flush queued mutations, until neither
/// makes progress.
pub(crate) fn pump<H: Host>(inner: &Rc<Inner<H>>) {
    {
        let mut gate = inner.gate.borrow_mut();
        if gate.pumping {
            return;
        }
        if gate.frame_depth > 0 {
            gate.pump_requested = true;
            return;
        }
        gate.pumping = true;
    }
    let _pass = PumpPass { inner };

    #[cfg(feature = "tracing")]
    let _span = tracing::debug_span!("sched_pump").entered();

    loop {
        let drained = drain_transitions(inner);
        let flushed = flush_mutations(inner);
        if !drained && !flushed {
            break;
        }
    }
}

struct PumpPass<'a, H: Host> {
    inner: &'a Rc<Inner<H>>,
}

impl<H: Host> Drop for PumpPass<'_, H> {
    fn drop(&mut self) {
        self.inner.gate.borrow_mut().pumping = false;
        if std::thread::panicking() {
            schedule_recovery(self.inner);
        }
    }
}

/// Queue a pump on the next host turn after a work block panicked, so work
/// queued behind the failed block is not stranded.
pub(crate) fn schedule_recovery<H: Host>(inner: &Rc<Inner<H>>) {
    let weak: Weak<Inner<H>> = Rc::downgrade(inner);
    let token = inner.host.after(
        Duration::ZERO,
        Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let token = inner.gate.borrow_mut().recovery.take();
            drop(token);
            tracing::debug!("recovering scheduler after panicked work block");
            pump(&inner);
        }),
    );
    let prior = inner.gate.borrow_mut().recovery.replace(token);
    drop(prior);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::VirtualHost;

    #[test]
    fn fresh_snapshot_is_idle() {
        let sched = Scheduler::new(VirtualHost::<u32>::new());
        assert_eq!(sched.snapshot(), SchedulerSnapshot::default());
        assert!(!sched.is_protected());
        assert_eq!(sched.ongoing_transitions(), 0);
    }

    #[test]
    fn clones_share_state() {
        let sched = Scheduler::new(VirtualHost::<u32>::new());
        let other = sched.clone();
        let host = sched.host().clone();
        let target = host.target();
        let _pending = other.transition(|| {}, Some(crate::CompletionSignal::new(target, "done")));
        assert_eq!(sched.ongoing_transitions(), 1);
    }

    #[test]
    fn dropping_scheduler_cancels_host_registrations() {
        let host = VirtualHost::<u32>::new();
        let target = host.target();
        {
            let sched = Scheduler::new(host.clone());
            let block = crate::direct_block(|_: &u32| {});
            sched.attach_direct(&target, "move", &block);
            host.emit(&target, "move", 1);
            assert!(host.pending_timers() > 0);
            assert_eq!(host.pending_frames(), 1);
        }
        assert_eq!(host.pending_timers(), 0);
        assert_eq!(host.pending_frames(), 0);
        assert_eq!(host.listener_count(), 0);
    }

    #[test]
    fn debug_includes_state() {
        let sched = Scheduler::new(VirtualHost::<u32>::new());
        let debug = format!("{sched:?}");
        assert!(debug.contains("ongoing_transitions: 0"));
        assert!(debug.contains("protection_window"));
    }
}
