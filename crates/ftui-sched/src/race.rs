#![forbid(unsafe_code)]

//! First-of-two race between a completion signal and a timeout.
//!
//! Both arms are registered with the host. Whichever fires first drops the
//! other arm's [`CancelToken`] and then runs the settle callback exactly once.
//! Nothing is left registered with the host after the race settles.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::host::{CancelToken, EventKind, Host};

/// Which arm won the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RaceOutcome {
    Signaled,
    TimedOut,
}

struct RaceCell {
    on_settle: RefCell<Option<Box<dyn FnOnce(RaceOutcome)>>>,
    arms: RefCell<Vec<CancelToken>>,
}

impl RaceCell {
    fn settle(&self, outcome: RaceOutcome) {
        let Some(on_settle) = self.on_settle.borrow_mut().take() else {
            return;
        };
        let losers = std::mem::take(&mut *self.arms.borrow_mut());
        drop(losers);
        on_settle(outcome);
    }
}

/// Wait for `kind` on `target` or for `timeout`, whichever comes first.
pub(crate) fn first_of<H: Host>(
    host: &H,
    target: &H::Target,
    kind: &EventKind,
    timeout: Duration,
    on_settle: impl FnOnce(RaceOutcome) + 'static,
) {
    let cell = Rc::new(RaceCell {
        on_settle: RefCell::new(Some(Box::new(on_settle))),
        arms: RefCell::new(Vec::with_capacity(2)),
    });

    let signal_cell = Rc::clone(&cell);
    let signal = host.listen(
        target,
        kind,
        Rc::new(move |_: &H::Event| signal_cell.settle(RaceOutcome::Signaled)),
    );

    let timer_cell = Rc::clone(&cell);
    let timer = host.after(
        timeout,
        Box::new(move || timer_cell.settle(RaceOutcome::TimedOut)),
    );

    cell.arms.borrow_mut().extend([signal, timer]);
}
