#![forbid(unsafe_code)]

//! Property tests: arbitrary interleavings of input, transitions, and
//! mutations never break the scheduler's ordering or accounting.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use ftui_sched::testing::{TargetId, VirtualHost};
use ftui_sched::{Completion, CompletionSignal, DirectBlock, Scheduler, direct_block};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Attach(usize),
    Detach(usize),
    Emit(usize),
    Frame,
    Advance(u64),
    Transition { signal_ms: Option<u64> },
    Feedback { signal_ms: Option<u64> },
    Signal(usize),
    Mutation,
    NestedMutation,
}

const TARGETS: usize = 3;

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => (0..TARGETS).prop_map(Op::Attach),
        1 => (0..TARGETS).prop_map(Op::Detach),
        3 => (0..TARGETS).prop_map(Op::Emit),
        2 => Just(Op::Frame),
        2 => (0u64..400).prop_map(Op::Advance),
        1 => prop::option::of(1u64..300).prop_map(|signal_ms| Op::Transition { signal_ms }),
        1 => prop::option::of(1u64..300).prop_map(|signal_ms| Op::Feedback { signal_ms }),
        1 => (0..TARGETS).prop_map(Op::Signal),
        2 => Just(Op::Mutation),
        1 => Just(Op::NestedMutation),
    ]
}

struct World {
    host: VirtualHost<u32>,
    sched: Scheduler<VirtualHost<u32>>,
    targets: Vec<TargetId>,
    attached: Vec<Vec<DirectBlock<u32>>>,
    completions: Vec<Completion>,
    next_id: Rc<Cell<u32>>,
    mutation_runs: Rc<RefCell<Vec<u32>>>,
    transition_runs: Rc<RefCell<Vec<u32>>>,
    direct_runs: Rc<Cell<u32>>,
}

impl World {
    fn new() -> Self {
        let host = VirtualHost::new();
        let targets = (0..TARGETS).map(|_| host.target()).collect();
        Self {
            sched: Scheduler::new(host.clone()),
            host,
            targets,
            attached: vec![Vec::new(); TARGETS],
            completions: Vec::new(),
            next_id: Rc::new(Cell::new(0)),
            mutation_runs: Rc::default(),
            transition_runs: Rc::default(),
            direct_runs: Rc::default(),
        }
    }

    fn fresh_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn signal(&self, signal_ms: Option<u64>, slot: usize) -> Option<CompletionSignal<TargetId>> {
        signal_ms.map(|ms| {
            CompletionSignal::new(self.targets[slot % TARGETS], "done")
                .with_timeout(Duration::from_millis(ms))
        })
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Attach(i) => {
                let runs = Rc::clone(&self.direct_runs);
                let block = direct_block(move |_: &u32| runs.set(runs.get() + 1));
                self.sched.attach_direct(&self.targets[i], "move", &block);
                self.attached[i].push(block);
            }
            Op::Detach(i) => {
                if let Some(block) = self.attached[i].pop() {
                    self.sched.detach_direct(&self.targets[i], "move", &block);
                }
            }
            Op::Emit(i) => self.host.emit(&self.targets[i], "move", 0),
            Op::Frame => {
                self.host.run_frame();
            }
            Op::Advance(ms) => self.host.advance(Duration::from_millis(ms)),
            Op::Transition { signal_ms } => {
                let id = self.fresh_id();
                let runs = Rc::clone(&self.transition_runs);
                let signal = self.signal(signal_ms, id as usize);
                let done = self.sched.transition(move || runs.borrow_mut().push(id), signal);
                self.completions.push(done);
            }
            Op::Feedback { signal_ms } => {
                let id = self.fresh_id();
                let signal = self.signal(signal_ms, id as usize);
                let done = self.sched.feedback(|| {}, signal);
                assert!(
                    signal_ms.is_some() || done.is_complete(),
                    "unsignaled feedback completes synchronously"
                );
                self.completions.push(done);
            }
            Op::Signal(i) => self.host.emit(&self.targets[i], "done", 0),
            Op::Mutation => {
                let id = self.fresh_id();
                let runs = Rc::clone(&self.mutation_runs);
                let done = self.sched.mutation(move || runs.borrow_mut().push(id));
                self.completions.push(done);
            }
            Op::NestedMutation => {
                let id = self.fresh_id();
                let runs = Rc::clone(&self.mutation_runs);
                let sched = self.sched.clone();
                let next_id = Rc::clone(&self.next_id);
                let done = self.sched.mutation(move || {
                    runs.borrow_mut().push(id);
                    let child = next_id.get();
                    next_id.set(child + 1);
                    let runs = Rc::clone(&runs);
                    let _ = sched.mutation(move || runs.borrow_mut().push(child));
                });
                self.completions.push(done);
            }
        }
    }

    fn settle(&mut self) {
        for (i, blocks) in self.attached.iter_mut().enumerate() {
            while let Some(block) = blocks.pop() {
                self.sched.detach_direct(&self.targets[i], "move", &block);
            }
        }
        self.host.advance(Duration::from_secs(5));
        self.host.run_frame();
    }
}

fn strictly_increasing(ids: &[u32]) -> bool {
    ids.windows(2).all(|w| w[0] < w[1])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn interleavings_preserve_invariants(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut world = World::new();

        for op in &ops {
            world.apply(op);
            let snap = world.sched.snapshot();
            prop_assert!(!snap.flushing, "flush flag leaked after {:?}", op);
            prop_assert_eq!(snap.bindings, world.attached.iter().filter(|b| !b.is_empty()).count());
            prop_assert!(strictly_increasing(&world.mutation_runs.borrow()));
            prop_assert!(strictly_increasing(&world.transition_runs.borrow()));
        }

        world.settle();

        let snap = world.sched.snapshot();
        prop_assert_eq!(snap.ongoing_transitions, 0);
        prop_assert_eq!(snap.queued_transitions, 0);
        prop_assert_eq!(snap.queued_mutations, 0);
        prop_assert!(!snap.protected);
        prop_assert!(world.completions.iter().all(Completion::is_complete));
        prop_assert_eq!(world.host.pending_timers(), 0);
        prop_assert_eq!(world.host.listener_count(), 0);
        prop_assert_eq!(world.host.pending_frames(), 0);
    }

    #[test]
    fn protected_bursts_run_direct_blocks_at_most_once_per_frame(
        bursts in prop::collection::vec(1usize..10, 1..12),
    ) {
        let world = World::new();
        let runs = Rc::new(RefCell::new(Vec::new()));
        let r = Rc::clone(&runs);
        let block = direct_block(move |event: &u32| r.borrow_mut().push(*event));
        world.sched.attach_direct(&world.targets[0], "move", &block);

        let mut expected = Vec::new();
        let mut next = 0u32;
        for burst in &bursts {
            for _ in 0..*burst {
                world.host.emit(&world.targets[0], "move", next);
                next += 1;
            }
            expected.push(next - 1);
            world.host.tick(Duration::from_millis(16));
        }
        prop_assert_eq!(&*runs.borrow(), &expected);
    }
}
