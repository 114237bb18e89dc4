#![forbid(unsafe_code)]

//! Host substrate consumed by the scheduler.
//!
//! The scheduler never touches a real event loop. Everything it needs from
//! the outside world goes through the [`Host`] trait: a frame-sync primitive,
//! a timer primitive, event listener registration, and a monotonic clock.
//!
//! # Contract
//!
//! 1. Callbacks registered through `request_frame`, `after`, or `listen` are
//!    never invoked synchronously from inside the registering call.
//! 2. Every registration returns a [`CancelToken`]. Canceling (or dropping)
//!    the token guarantees the callback will not run afterwards.
//! 3. Canceling a token whose callback already ran is a no-op.
//! 4. A listener may cancel its own token while it is being dispatched.

use std::borrow::Cow;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::time::Duration;

/// Callback run once by the host (frame or timer).
pub type HostCallback = Box<dyn FnOnce()>;

/// Handler invoked for every matching event on a target.
pub type EventHandler<E> = Rc<dyn Fn(&E)>;

/// Rendering/event substrate the scheduler runs on.
pub trait Host: 'static {
    /// Opaque handle identifying a visual target.
    type Target: Clone + Eq + Hash + fmt::Debug + 'static;
    /// Event payload delivered to listeners.
    type Event: Clone + 'static;

    /// Monotonic time since an arbitrary host origin.
    fn now(&self) -> Duration;

    /// Run `callback` once before the next visual refresh.
    fn request_frame(&self, callback: HostCallback) -> CancelToken;

    /// Run `callback` once after `delay` has elapsed.
    fn after(&self, delay: Duration, callback: HostCallback) -> CancelToken;

    /// Invoke `handler` for every `kind` event observed on `target` until the
    /// returned token is canceled.
    fn listen(
        &self,
        target: &Self::Target,
        kind: &EventKind,
        handler: EventHandler<Self::Event>,
    ) -> CancelToken;
}

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Name of an event or completion signal (e.g. `"pointermove"`,
/// `"transitionend"`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKind(Cow<'static, str>);

impl EventKind {
    /// Create an event kind from a static name.
    #[must_use]
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// The event name.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for EventKind {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// RAII handle for a pending host callback or listener.
///
/// Dropping the token cancels the registration.
#[must_use = "dropping a CancelToken cancels the registration"]
pub struct CancelToken {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl CancelToken {
    /// Create a token that runs `cancel` when canceled or dropped.
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A token with nothing to cancel.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Cancel the registration now.
    pub fn cancel(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for CancelToken {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MonotonicClock
// ---------------------------------------------------------------------------

/// Monotonic clock for hosts implementing [`Host::now`].
///
/// Backed by `web_time::Instant` so it also works on `wasm32-unknown-unknown`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: web_time::Instant,
}

impl MonotonicClock {
    /// Start a clock at the current instant.
    #[must_use]
    pub fn start() -> Self {
        Self {
            origin: web_time::Instant::now(),
        }
    }

    /// Time elapsed since the clock started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn token_cancels_on_drop() {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        {
            let _token = CancelToken::new(move || h.set(h.get() + 1));
        }
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn token_cancels_once() {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let token = CancelToken::new(move || h.set(h.get() + 1));
        token.cancel();
        assert_eq!(hits.get(), 1, "explicit cancel must not run again on drop");
    }

    #[test]
    fn noop_token_is_unarmed() {
        let token = CancelToken::noop();
        assert!(format!("{token:?}").contains("armed: false"));
    }

    #[test]
    fn event_kind_from_static_and_owned_compare_equal() {
        let a = EventKind::from("move");
        let b = EventKind::from(String::from("move"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "move");
        assert_eq!(format!("{a:?}"), "\"move\"");
    }

    #[test]
    fn monotonic_clock_advances() {
        let clock = MonotonicClock::start();
        let a = clock.elapsed();
        let b = clock.elapsed();
        assert!(b >= a);
    }
}
