#![forbid(unsafe_code)]

//! Direct-work tracking: input-bound blocks coalesced to one run per frame.
//!
//! Each (target, event kind) pair with at least one registered block owns a
//! [`Binding`]. Every native event on the pair:
//!
//! - restarts the binding's protection timer (debounce), and
//! - supersedes any pending frame callback with a fresh one carrying the
//!   latest event.
//!
//! When the frame callback fires, every registered block runs once with the
//! latest event. When the protection timer finally fires and no other binding
//! is protected, queued transitions and mutations are released.
//!
//! # Invariants
//!
//! 1. A binding with an empty block list does not exist.
//! 2. A binding has at most one pending frame callback and at most one
//!    pending protection timer.
//! 3. Stale host callbacks (from superseded registrations) are ignored by
//!    sequence number even if the host fails to cancel them.
//!
//! # Failure Modes
//!
//! - Detaching a block that was never attached is a no-op (debug log).
//! - A panicking direct block propagates to the host's frame dispatch; the
//!   frame-depth counter is restored on unwind.

use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use ahash::AHashMap;

use crate::host::{CancelToken, EventHandler, EventKind, Host};
use crate::scheduler::{Inner, Scheduler, pump, schedule_recovery};

/// Input-bound work block, invoked with the latest event once per frame.
///
/// Blocks are identified by pointer: detach with the same `Rc` you attached.
pub type DirectBlock<E> = Rc<dyn Fn(&E)>;

/// Wrap a closure as a [`DirectBlock`].
pub fn direct_block<E>(block: impl Fn(&E) + 'static) -> DirectBlock<E> {
    Rc::new(block)
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) struct BindingKey<T> {
    target: T,
    kind: EventKind,
}

impl<T: fmt::Debug> fmt::Debug for BindingKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.target, self.kind)
    }
}

pub(crate) struct Binding<E> {
    blocks: Vec<DirectBlock<E>>,
    window: Duration,
    latest: Option<E>,
    listener: Option<CancelToken>,
    frame: Option<CancelToken>,
    frame_seq: u64,
    /// Host time the current run of superseded frames started.
    frame_since: Option<Duration>,
    protection: Option<CancelToken>,
    protection_seq: u64,
}

impl<E> Binding<E> {
    fn new(block: DirectBlock<E>, window: Duration) -> Self {
        Self {
            blocks: vec![block],
            window,
            latest: None,
            listener: None,
            frame: None,
            frame_seq: 0,
            frame_since: None,
            protection: None,
            protection_seq: 0,
        }
    }
}

/// All live bindings, keyed by (target, event kind).
pub(crate) struct BindingTable<H: Host> {
    map: AHashMap<BindingKey<H::Target>, Binding<H::Event>>,
}

impl<H: Host> Default for BindingTable<H> {
    fn default() -> Self {
        Self {
            map: AHashMap::new(),
        }
    }
}

impl<H: Host> BindingTable<H> {
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Derived protection state: any binding with a pending protection timer.
    pub(crate) fn any_protected(&self) -> bool {
        self.map.values().any(|binding| binding.protection.is_some())
    }
}

impl<H: Host> Scheduler<H> {
    /// Register `block` to run once per frame with the latest `kind` event
    /// observed on `target`.
    ///
    /// Registering the same block twice runs it twice per frame. A new
    /// binding uses the configured protection window; an existing binding
    /// keeps whatever window it already has.
    pub fn attach_direct(
        &self,
        target: &H::Target,
        kind: impl Into<EventKind>,
        block: &DirectBlock<H::Event>,
    ) {
        self.attach(target, kind.into(), block, None);
    }

    /// Like [`attach_direct`](Self::attach_direct), with a protection window
    /// for this binding that overrides the scheduler default. The latest
    /// explicit window wins.
    pub fn attach_direct_with_window(
        &self,
        target: &H::Target,
        kind: impl Into<EventKind>,
        block: &DirectBlock<H::Event>,
        window: Duration,
    ) {
        self.attach(target, kind.into(), block, Some(window));
    }

    fn attach(
        &self,
        target: &H::Target,
        kind: EventKind,
        block: &DirectBlock<H::Event>,
        window: Option<Duration>,
    ) {
        let key = BindingKey {
            target: target.clone(),
            kind,
        };

        let created = {
            let mut table = self.inner.bindings.borrow_mut();
            match table.map.get_mut(&key) {
                Some(binding) => {
                    binding.blocks.push(Rc::clone(block));
                    if let Some(window) = window {
                        binding.window = window;
                    }
                    false
                }
                None => {
                    let window = window.unwrap_or(self.inner.config.protection_window);
                    table
                        .map
                        .insert(key.clone(), Binding::new(Rc::clone(block), window));
                    true
                }
            }
        };
        tracing::trace!(binding = ?key, created, "direct block attached");
        if !created {
            return;
        }

        let weak = Rc::downgrade(&self.inner);
        let handler_key = key.clone();
        let handler: EventHandler<H::Event> = Rc::new(move |event: &H::Event| {
            if let Some(inner) = weak.upgrade() {
                on_direct_event(&inner, &handler_key, event);
            }
        });
        let listener = self.inner.host.listen(&key.target, &key.kind, handler);
        if let Some(binding) = self.inner.bindings.borrow_mut().map.get_mut(&key) {
            binding.listener = Some(listener);
        }
    }

    /// Remove the first registration of `block` for (`target`, `kind`).
    ///
    /// Removing the last block tears the binding down: its pending frame
    /// callback, protection timer, and listener are canceled. If that closes
    /// the last open protection window, queued work is released immediately.
    pub fn detach_direct(
        &self,
        target: &H::Target,
        kind: impl Into<EventKind>,
        block: &DirectBlock<H::Event>,
    ) {
        let key = BindingKey {
            target: target.clone(),
            kind: kind.into(),
        };

        let removed = {
            let mut table = self.inner.bindings.borrow_mut();
            let Some(binding) = table.map.get_mut(&key) else {
                tracing::debug!(binding = ?key, "detach for unknown binding ignored");
                return;
            };
            let Some(index) = binding.blocks.iter().position(|b| Rc::ptr_eq(b, block)) else {
                tracing::debug!(binding = ?key, "detach for unregistered block ignored");
                return;
            };
            binding.blocks.remove(index);
            if !binding.blocks.is_empty() {
                return;
            }
            table.map.remove(&key)
        };

        let Some(binding) = removed else {
            return;
        };
        let was_protecting = binding.protection.is_some();
        // Cancels the frame callback, protection timer, and listener.
        drop(binding);
        tracing::debug!(binding = ?key, was_protecting, "binding removed");

        if was_protecting && !self.inner.is_protected() {
            pump(&self.inner);
        }
    }
}

fn on_direct_event<H: Host>(inner: &Rc<Inner<H>>, key: &BindingKey<H::Target>, event: &H::Event) {
    let now = inner.host.now();
    let max_delay = inner.config.max_frame_delay;

    let (window, protection_seq, frame_seq, superseded) = {
        let mut table = inner.bindings.borrow_mut();
        let Some(binding) = table.map.get_mut(key) else {
            return;
        };
        binding.latest = Some(event.clone());

        binding.protection_seq += 1;
        let prior_protection = binding.protection.take();

        let hold_frame = match (binding.frame.is_some(), binding.frame_since, max_delay) {
            (true, Some(since), Some(max)) => now.saturating_sub(since) >= max,
            _ => false,
        };
        let (frame_seq, prior_frame) = if hold_frame {
            (None, None)
        } else {
            if binding.frame.is_none() {
                binding.frame_since = Some(now);
            }
            binding.frame_seq += 1;
            (Some(binding.frame_seq), binding.frame.take())
        };

        (
            binding.window,
            binding.protection_seq,
            frame_seq,
            (prior_protection, prior_frame),
        )
    };
    drop(superseded);

    let protection = inner.host.after(window, {
        let weak = Rc::downgrade(inner);
        let key = key.clone();
        Box::new(move || on_protection_expired(&weak, &key, protection_seq))
    });
    let frame = frame_seq.map(|seq| request_frame(inner, key, seq));

    let stale = {
        let mut table = inner.bindings.borrow_mut();
        match table.map.get_mut(key) {
            Some(binding) => {
                let mut stale = Vec::new();
                if binding.protection_seq == protection_seq {
                    stale.extend(binding.protection.replace(protection));
                } else {
                    stale.push(protection);
                }
                if let (Some(seq), Some(frame)) = (frame_seq, frame) {
                    if binding.frame_seq == seq {
                        stale.extend(binding.frame.replace(frame));
                    } else {
                        stale.push(frame);
                    }
                }
                stale
            }
            None => {
                let mut stale = vec![protection];
                stale.extend(frame);
                stale
            }
        }
    };
    drop(stale);

    tracing::trace!(binding = ?key, coalesced = frame_seq.is_some(), "direct event");
}

fn request_frame<H: Host>(inner: &Rc<Inner<H>>, key: &BindingKey<H::Target>, seq: u64) -> CancelToken {
    let weak = Rc::downgrade(inner);
    let key = key.clone();
    inner
        .host
        .request_frame(Box::new(move || on_frame(&weak, &key, seq)))
}

fn on_protection_expired<H: Host>(weak: &Weak<Inner<H>>, key: &BindingKey<H::Target>, seq: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let expired = {
        let mut table = inner.bindings.borrow_mut();
        match table.map.get_mut(key) {
            Some(binding) if binding.protection_seq == seq => binding.protection.take(),
            _ => None,
        }
    };
    let Some(expired) = expired else {
        return;
    };
    drop(expired);
    tracing::trace!(binding = ?key, "protection window closed");

    if !inner.is_protected() {
        pump(&inner);
    }
}

fn on_frame<H: Host>(weak: &Weak<Inner<H>>, key: &BindingKey<H::Target>, seq: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };

    if inner.gate.borrow().pumping {
        // A drain or flush is on the stack: run on the next frame instead.
        let token = request_frame(&inner, key, seq);
        let stale = match inner.bindings.borrow_mut().map.get_mut(key) {
            Some(binding) if binding.frame_seq == seq => binding.frame.replace(token),
            _ => Some(token),
        };
        drop(stale);
        return;
    }

    let run = {
        let mut table = inner.bindings.borrow_mut();
        match table.map.get_mut(key) {
            Some(binding) if binding.frame_seq == seq => {
                let fired = binding.frame.take();
                binding.frame_since = None;
                binding
                    .latest
                    .clone()
                    .map(|event| (fired, binding.blocks.clone(), event))
            }
            _ => None,
        }
    };
    let Some((fired, blocks, event)) = run else {
        return;
    };
    drop(fired);

    #[cfg(feature = "tracing")]
    let _span = tracing::debug_span!("sched_frame", binding = ?key, blocks = blocks.len()).entered();

    inner.gate.borrow_mut().frame_depth += 1;
    let _frame = FramePass { inner: &inner };
    for block in &blocks {
        block(&event);
    }
}

struct FramePass<'a, H: Host> {
    inner: &'a Rc<Inner<H>>,
}

impl<H: Host> Drop for FramePass<'_, H> {
    fn drop(&mut self) {
        let deferred = {
            let mut gate = self.inner.gate.borrow_mut();
            gate.frame_depth -= 1;
            gate.frame_depth == 0 && std::mem::take(&mut gate.pump_requested)
        };
        if !deferred {
            return;
        }
        if std::thread::panicking() {
            schedule_recovery(self.inner);
        } else {
            pump(self.inner);
        }
    }
}
