#![forbid(unsafe_code)]

//! Shared gate flags and FIFO queues.
//!
//! Every scheduler component consults the same [`Gate`]: the ongoing
//! transition counter, the flush flag, and the two pending-work queues.
//! Protection is not stored here; it is derived from the binding table.

use std::collections::VecDeque;
use std::fmt;

use crate::completion::Resolver;
use crate::host::CancelToken;
use crate::transition::CompletionSignal;

/// Work closure for transitions and mutations.
pub(crate) type Block = Box<dyn FnOnce()>;

/// A fully bound "start this transition now" request.
pub(crate) struct QueuedTransition<T> {
    pub(crate) block: Block,
    pub(crate) signal: Option<CompletionSignal<T>>,
    pub(crate) resolver: Resolver,
}

/// A deferred mutation and the resolver fulfilled after its flush.
pub(crate) struct PendingMutation {
    pub(crate) block: Block,
    pub(crate) resolver: Resolver,
}

pub(crate) struct Gate<T> {
    ongoing: usize,
    pub(crate) flushing: bool,
    /// A drain/flush pump is on the stack.
    pub(crate) pumping: bool,
    /// Frame callbacks currently executing direct blocks.
    pub(crate) frame_depth: usize,
    /// A pump was refused while a frame callback ran.
    pub(crate) pump_requested: bool,
    pub(crate) transitions: VecDeque<QueuedTransition<T>>,
    pub(crate) mutations: VecDeque<PendingMutation>,
    /// Deferred pump scheduled after a block panicked.
    pub(crate) recovery: Option<CancelToken>,
}

impl<T> Gate<T> {
    pub(crate) fn new() -> Self {
        Self {
            ongoing: 0,
            flushing: false,
            pumping: false,
            frame_depth: 0,
            pump_requested: false,
            transitions: VecDeque::new(),
            mutations: VecDeque::new(),
            recovery: None,
        }
    }

    #[inline]
    pub(crate) fn ongoing(&self) -> usize {
        self.ongoing
    }

    pub(crate) fn begin_transition(&mut self) {
        self.ongoing += 1;
    }

    /// Decrement the ongoing counter, returning the remaining count.
    pub(crate) fn end_transition(&mut self) -> usize {
        debug_assert!(self.ongoing > 0, "transition counter underflow");
        match self.ongoing.checked_sub(1) {
            Some(remaining) => {
                self.ongoing = remaining;
                remaining
            }
            None => {
                tracing::warn!("transition completed with no ongoing transitions");
                0
            }
        }
    }
}

impl<T> fmt::Debug for Gate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("ongoing", &self.ongoing)
            .field("flushing", &self.flushing)
            .field("pumping", &self.pumping)
            .field("frame_depth", &self.frame_depth)
            .field("queued_transitions", &self.transitions.len())
            .field("queued_mutations", &self.mutations.len())
            .finish()
    }
}
