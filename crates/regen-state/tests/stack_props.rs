// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
//! Model-based properties of the apply-on-change stacks.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use regen_dry_tests::{ApplyCall, ApplyLog};
use regen_state::{IndexedValueStack, ValueStack};

const CHANNELS: usize = 4;

#[derive(Clone, Debug)]
enum Op {
    Push(u8),
    Pop,
}

#[derive(Clone, Debug)]
enum IndexedOp {
    Push(u8),
    PushChannel(usize, u8),
    Pop,
    PopChannel(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0u8..4).prop_map(Op::Push), Just(Op::Pop)]
}

fn indexed_op() -> impl Strategy<Value = IndexedOp> {
    prop_oneof![
        (0u8..4).prop_map(IndexedOp::Push),
        (0..CHANNELS, 0u8..4).prop_map(|(i, v)| IndexedOp::PushChannel(i, v)),
        Just(IndexedOp::Pop),
        (0..CHANNELS).prop_map(IndexedOp::PopChannel),
    ]
}

/// Applies `op` unless it would pop an empty stack. Returns whether it ran.
fn run<F: FnMut(&u8)>(stack: &mut ValueStack<u8, F>, op: &Op) -> bool {
    match *op {
        Op::Push(v) => stack.push(v),
        Op::Pop if stack.is_empty() => return false,
        Op::Pop => stack.pop(),
    }
    true
}

fn run_indexed<F, G>(
    stack: &mut IndexedValueStack<u8, F, G>,
    depths: &mut [usize; CHANNELS + 1],
    op: &IndexedOp,
) where
    F: FnMut(&u8),
    G: FnMut(usize, &u8),
{
    match *op {
        IndexedOp::Push(v) => {
            stack.push(v);
            depths[CHANNELS] += 1;
        }
        IndexedOp::PushChannel(i, v) => {
            stack.push_channel(i, v);
            depths[i] += 1;
        }
        IndexedOp::Pop if depths[CHANNELS] > 0 => {
            stack.pop();
            depths[CHANNELS] -= 1;
        }
        IndexedOp::PopChannel(i) if depths[i] > 0 => {
            stack.pop_channel(i);
            depths[i] -= 1;
        }
        IndexedOp::Pop | IndexedOp::PopChannel(_) => {}
    }
}

proptest! {
    #[test]
    fn apply_fires_exactly_when_the_observable_value_changes(
        ops in prop::collection::vec(op(), 0..64)
    ) {
        let log = ApplyLog::new();
        let mut stack = ValueStack::new(log.recorder());
        for op in &ops {
            let before = stack.value().copied();
            if !run(&mut stack, op) {
                continue;
            }
            let after = stack.value().copied();
            let calls = log.take();
            if before == after {
                prop_assert!(calls.is_empty(), "{op:?} applied {calls:?}");
            } else {
                prop_assert_eq!(calls, vec![ApplyCall::All(after.unwrap_or_default())]);
            }
        }
    }

    #[test]
    fn drained_stack_skips_the_remembered_value(
        prefix in prop::collection::vec(0u8..4, 1..8),
        other in 0u8..4,
    ) {
        let log = ApplyLog::new();
        let mut stack = ValueStack::new(log.recorder());
        for &v in &prefix {
            stack.push(v);
        }
        // Draining remembers the bottom entry, the last one popped.
        let last = prefix[0];
        for _ in &prefix {
            stack.pop();
        }
        log.take();

        stack.push(last);
        prop_assert!(log.take().is_empty());
        stack.pop();
        stack.push(other);
        let expected = usize::from(other != last);
        prop_assert_eq!(log.len(), expected);
    }

    #[test]
    fn locking_suppresses_applies_without_changing_the_logical_top(
        before in prop::collection::vec(op(), 0..16),
        locked in prop::collection::vec(op(), 0..32),
        after in prop::collection::vec(op(), 0..16),
    ) {
        let log = ApplyLog::new();
        let mut stack = ValueStack::new(log.recorder());
        let mut reference = ValueStack::new(|_: &u8| {});

        for op in &before {
            run(&mut stack, op);
            run(&mut reference, op);
        }
        log.take();
        stack.lock();
        for op in &locked {
            run(&mut stack, op);
            run(&mut reference, op);
        }
        stack.unlock();
        prop_assert!(log.take().is_empty());
        prop_assert_eq!(stack.value(), reference.value());
        prop_assert_eq!(stack.depth(), reference.depth());

        for op in &after {
            run(&mut stack, op);
            run(&mut reference, op);
        }
        prop_assert_eq!(stack.value(), reference.value());
    }

    #[test]
    fn indexed_device_state_tracks_effective_values(
        ops in prop::collection::vec(indexed_op(), 0..64)
    ) {
        let device = Rc::new(RefCell::new([None::<u8>; CHANNELS]));
        let mut stack = IndexedValueStack::new(
            CHANNELS,
            {
                let device = Rc::clone(&device);
                move |v: &u8| device.borrow_mut().iter_mut().for_each(|c| *c = Some(*v))
            },
            {
                let device = Rc::clone(&device);
                move |i: usize, v: &u8| device.borrow_mut()[i] = Some(*v)
            },
        );
        let mut depths = [0usize; CHANNELS + 1];
        for op in &ops {
            run_indexed(&mut stack, &mut depths, op);
            for i in 0..CHANNELS {
                prop_assert_eq!(
                    device.borrow()[i],
                    stack.value(i).copied(),
                    "channel {} after {:?}",
                    i,
                    op
                );
            }
        }
    }

    #[test]
    fn indexed_lock_suppresses_applies_and_keeps_resolution(
        before in prop::collection::vec(indexed_op(), 0..16),
        locked in prop::collection::vec(indexed_op(), 0..32),
    ) {
        let log = ApplyLog::new();
        let mut stack = IndexedValueStack::new(CHANNELS, log.recorder(), log.channel_recorder());
        let mut reference = IndexedValueStack::new(CHANNELS, |_: &u8| {}, |_, _: &u8| {});
        let mut depths = [0usize; CHANNELS + 1];
        let mut reference_depths = [0usize; CHANNELS + 1];

        for op in &before {
            run_indexed(&mut stack, &mut depths, op);
            run_indexed(&mut reference, &mut reference_depths, op);
        }
        log.take();
        {
            let mut guard = stack.locked();
            for op in &locked {
                run_indexed(&mut *guard, &mut depths, op);
                run_indexed(&mut reference, &mut reference_depths, op);
            }
        }
        prop_assert!(!stack.is_locked());
        prop_assert!(log.is_empty());
        for i in 0..CHANNELS {
            prop_assert_eq!(stack.value(i), reference.value(i));
            prop_assert_eq!(stack.channel_stamp(i), reference.channel_stamp(i));
        }
        prop_assert_eq!(stack.global_value(), reference.global_value());
    }
}
