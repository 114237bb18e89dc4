#![forbid(unsafe_code)]

//! Cooperative UI work scheduler for FrankenTUI.
//!
//! The scheduler arbitrates three classes of visual work on a single UI
//! thread so that none starves or visually corrupts the others:
//!
//! - **Direct work** ([`Scheduler::attach_direct`]): input-bound blocks,
//!   coalesced to one run per frame with the latest event. Every event opens
//!   or extends a debounced *protection window*.
//! - **Transitions** ([`Scheduler::transition`], [`Scheduler::feedback`]):
//!   animated changes that stay "in flight" until a completion signal or a
//!   timeout. Feedback bypasses the protection window; other transitions wait
//!   for it to close.
//! - **Mutations** ([`Scheduler::mutation`]): structural changes, deferred
//!   while protected or while any transition is in flight, then flushed as
//!   one batch.
//!
//! # Architecture
//!
//! State lives in one `Rc<RefCell<..>>`-backed instance per UI thread. The
//! host substrate (frames, timers, event listeners) is abstracted by the
//! [`Host`] trait; [`testing::VirtualHost`] is a deterministic implementation
//! for tests (feature `test-helpers`).
//!
//! # Invariants
//!
//! 1. The ongoing-transition counter never goes negative.
//! 2. Mutations requested during a flush run in the next flush.
//! 3. Queued transitions and queued mutations each drain in FIFO order, and
//!    newly submitted work never overtakes work already queued.
//! 4. A panicking work block never leaves the flush flag set or the counter
//!    raised.
//!
//! # Example
//!
//! ```ignore
//! let sched = Scheduler::new(host);
//!
//! let drag = direct_block(move |event: &PointerEvent| list.scroll_to(event.y));
//! sched.attach_direct(&list_target, "pointermove", &drag);
//!
//! // Acknowledge a tap right away.
//! let _ = sched.feedback(|| item.set_pressed(true), None);
//!
//! // Reflow once the gesture settles and animations finish.
//! let reflowed = sched.mutation(move || list.insert_rows(rows));
//! reflowed.await;
//! ```

pub mod completion;
pub mod config;
pub mod direct;
mod gate;
pub mod host;
mod mutation;
mod race;
pub mod scheduler;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod transition;

pub use completion::{Completion, Resolver};
#[cfg(feature = "policy-config")]
pub use config::ConfigError;
pub use config::{DEFAULT_PROTECTION_WINDOW, DEFAULT_TRANSITION_TIMEOUT, SchedulerConfig};
pub use direct::{DirectBlock, direct_block};
pub use host::{CancelToken, EventHandler, EventKind, Host, HostCallback, MonotonicClock};
pub use scheduler::{Scheduler, SchedulerSnapshot};
pub use transition::CompletionSignal;
