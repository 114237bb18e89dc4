#![forbid(unsafe_code)]

//! One-shot completion futures returned by scheduler entry points.
//!
//! A [`Completion`] is the receiving half of a `futures` oneshot channel,
//! shared so every clone observes the same outcome. The paired [`Resolver`]
//! fulfils it exactly once. A completion can be awaited by an executor living
//! on the UI thread, or inspected directly with [`Completion::is_complete`].
//!
//! # Invariants
//!
//! 1. `Resolver::resolve` consumes the resolver, so a completion is fulfilled
//!    at most once.
//! 2. Once complete, a `Completion` (and every clone of it) stays complete.
//! 3. Dropping a `Resolver` without resolving leaves the completion pending
//!    forever; the work it stood for will never run.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

/// Future fulfilled when the scheduled work has finished.
#[must_use = "a Completion does nothing unless awaited or inspected"]
#[derive(Clone)]
pub struct Completion {
    /// `None` once the resolver was dropped unfulfilled.
    rx: Option<Shared<oneshot::Receiver<()>>>,
}

/// Write side of a [`Completion`].
pub struct Resolver {
    tx: oneshot::Sender<()>,
}

impl Completion {
    /// Create a pending completion and its resolver.
    pub fn pending() -> (Self, Resolver) {
        let (tx, rx) = oneshot::channel();
        (Self { rx: Some(rx.shared()) }, Resolver { tx })
    }

    /// An already-fulfilled completion.
    pub fn ready() -> Self {
        let (completion, resolver) = Self::pending();
        resolver.resolve();
        completion
    }

    /// Whether the work has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rx
            .as_ref()
            .and_then(|rx| rx.clone().now_or_never())
            .is_some_and(|outcome| outcome.is_ok())
    }
}

impl Future for Completion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Pending;
        };
        match rx.poll_unpin(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            Poll::Ready(Err(oneshot::Canceled)) => {
                self.rx = None;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl Resolver {
    /// Fulfil the paired completion.
    pub fn resolve(self) {
        // Every completion handle may already be gone.
        let _ = self.tx.send(());
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("canceled", &self.tx.is_canceled())
            .finish()
    }
}
