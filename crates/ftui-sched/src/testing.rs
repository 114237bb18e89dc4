#![forbid(unsafe_code)]

//! Deterministic virtual host for tests.
//!
//! [`VirtualHost`] implements [`Host`] with a manual clock, an explicit frame
//! queue, ordered timers, and in-memory event targets. Nothing happens until
//! the test drives it with [`advance`](VirtualHost::advance),
//! [`run_frame`](VirtualHost::run_frame), or [`emit`](VirtualHost::emit).
//!
//! # Example
//!
//! ```
//! use ftui_sched::testing::VirtualHost;
//! use ftui_sched::{Scheduler, direct_block};
//! use std::time::Duration;
//!
//! let host = VirtualHost::<i32>::new();
//! let list = host.target();
//! let sched = Scheduler::new(host.clone());
//!
//! let scroll = direct_block(|dy: &i32| assert_eq!(*dy, 3));
//! sched.attach_direct(&list, "pointermove", &scroll);
//! host.emit(&list, "pointermove", 1);
//! host.emit(&list, "pointermove", 3);
//! host.run_frame();
//!
//! host.advance(Duration::from_millis(360));
//! assert!(!sched.is_protected());
//! ```
//!
//! # Semantics
//!
//! - Timers fire in (due time, registration order). `advance` moves the clock
//!   to each timer's due time before running it, so callbacks observe the
//!   right `now()`.
//! - `run_frame` runs the frame callbacks requested before it was called.
//!   Callbacks requested while it runs wait for the next frame.
//! - `emit` dispatches to a snapshot of the matching listeners. A listener
//!   removed earlier in the same dispatch is skipped.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::host::{CancelToken, EventHandler, EventKind, Host, HostCallback};

/// Opaque target handle issued by [`VirtualHost::target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u32);

struct Listener<E> {
    id: u64,
    target: TargetId,
    kind: EventKind,
    handler: EventHandler<E>,
}

struct State<E> {
    now: Cell<Duration>,
    next_id: Cell<u64>,
    next_target: Cell<u32>,
    frames: RefCell<Vec<(u64, HostCallback)>>,
    timers: RefCell<BTreeMap<(Duration, u64), HostCallback>>,
    listeners: RefCell<Vec<Listener<E>>>,
    frames_run: Cell<u64>,
}

impl<E> State<E> {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

/// Manually driven [`Host`] implementation.
pub struct VirtualHost<E: 'static = u32> {
    state: Rc<State<E>>,
}

impl<E: 'static> Clone for VirtualHost<E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<E: Clone + 'static> Default for VirtualHost<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + 'static> VirtualHost<E> {
    /// Create a host at time zero with no targets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(State {
                now: Cell::new(Duration::ZERO),
                next_id: Cell::new(1),
                next_target: Cell::new(1),
                frames: RefCell::new(Vec::new()),
                timers: RefCell::new(BTreeMap::new()),
                listeners: RefCell::new(Vec::new()),
                frames_run: Cell::new(0),
            }),
        }
    }

    /// Issue a fresh target handle.
    #[must_use]
    pub fn target(&self) -> TargetId {
        let id = self.state.next_target.get();
        self.state.next_target.set(id + 1);
        TargetId(id)
    }

    /// Dispatch `event` to every `kind` listener on `target`.
    pub fn emit(&self, target: &TargetId, kind: impl Into<EventKind>, event: E) {
        let kind = kind.into();
        let matching: Vec<(u64, EventHandler<E>)> = self
            .state
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.target == *target && l.kind == kind)
            .map(|l| (l.id, Rc::clone(&l.handler)))
            .collect();
        for (id, handler) in matching {
            let live = self.state.listeners.borrow().iter().any(|l| l.id == id);
            if live {
                handler(&event);
            }
        }
    }

    /// Move the clock forward by `by`, firing every timer that comes due.
    pub fn advance(&self, by: Duration) {
        let deadline = self.state.now.get() + by;
        loop {
            let next = {
                let mut timers = self.state.timers.borrow_mut();
                let due = timers.first_key_value().map(|(&(due, _), _)| due);
                match due {
                    Some(due) if due <= deadline => timers.pop_first(),
                    _ => None,
                }
            };
            let Some(((due, _), callback)) = next else {
                break;
            };
            self.state.now.set(due);
            callback();
        }
        self.state.now.set(deadline);
    }

    /// Run the frame callbacks requested so far.
    ///
    /// Returns how many callbacks ran.
    pub fn run_frame(&self) -> usize {
        let ids: Vec<u64> = self
            .state
            .frames
            .borrow()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        self.state.frames_run.set(self.state.frames_run.get() + 1);
        let mut ran = 0;
        for id in ids {
            let callback = {
                let mut frames = self.state.frames.borrow_mut();
                frames
                    .iter()
                    .position(|(fid, _)| *fid == id)
                    .map(|index| frames.remove(index).1)
            };
            if let Some(callback) = callback {
                callback();
                ran += 1;
            }
        }
        ran
    }

    /// Advance the clock by `frame` and then run one frame.
    pub fn tick(&self, frame: Duration) -> usize {
        self.advance(frame);
        self.run_frame()
    }

    /// Frame callbacks waiting for the next frame.
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.state.frames.borrow().len()
    }

    /// Timers not yet fired or canceled.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.state.timers.borrow().len()
    }

    /// Registered listeners across all targets.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.state.listeners.borrow().len()
    }

    /// Frames run since creation.
    #[must_use]
    pub fn frames_run(&self) -> u64 {
        self.state.frames_run.get()
    }
}

impl<E: Clone + 'static> Host for VirtualHost<E> {
    type Target = TargetId;
    type Event = E;

    fn now(&self) -> Duration {
        self.state.now.get()
    }

    fn request_frame(&self, callback: HostCallback) -> CancelToken {
        let id = self.state.next_id();
        self.state.frames.borrow_mut().push((id, callback));
        let weak: Weak<State<E>> = Rc::downgrade(&self.state);
        CancelToken::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = {
                    let mut frames = state.frames.borrow_mut();
                    frames
                        .iter()
                        .position(|(fid, _)| *fid == id)
                        .map(|index| frames.remove(index))
                };
                drop(removed);
            }
        })
    }

    fn after(&self, delay: Duration, callback: HostCallback) -> CancelToken {
        let id = self.state.next_id();
        let key = (self.state.now.get() + delay, id);
        self.state.timers.borrow_mut().insert(key, callback);
        let weak: Weak<State<E>> = Rc::downgrade(&self.state);
        CancelToken::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = state.timers.borrow_mut().remove(&key);
                drop(removed);
            }
        })
    }

    fn listen(
        &self,
        target: &TargetId,
        kind: &EventKind,
        handler: EventHandler<E>,
    ) -> CancelToken {
        let id = self.state.next_id();
        self.state.listeners.borrow_mut().push(Listener {
            id,
            target: *target,
            kind: kind.clone(),
            handler,
        });
        let weak: Weak<State<E>> = Rc::downgrade(&self.state);
        CancelToken::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = {
                    let mut listeners = state.listeners.borrow_mut();
                    listeners
                        .iter()
                        .position(|l| l.id == id)
                        .map(|index| listeners.remove(index))
                };
                drop(removed);
            }
        })
    }
}

impl<E: 'static> fmt::Debug for VirtualHost<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualHost")
            .field("now", &self.state.now.get())
            .field("pending_frames", &self.state.frames.borrow().len())
            .field("pending_timers", &self.state.timers.borrow().len())
            .field("listeners", &self.state.listeners.borrow().len())
            .finish()
    }
}
