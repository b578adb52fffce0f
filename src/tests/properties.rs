//! Property-based tests for queue and timer invariants.

use alloc::vec::Vec;

use proptest::prelude::*;

use super::helpers::{table_with, Fixture};
use crate::board::ManualBoard;
use crate::sched::queue::PrioQueue;
use crate::thread::{Slot, ThreadTable};
use crate::time::timer::TimerScope;
use crate::time::{Instant, TimerMode, TimerSlot};

fn order(q: &PrioQueue, threads: &ThreadTable) -> Vec<Slot> {
    q.iter(threads).collect()
}

proptest! {
    /// Inserting a thread and removing it again leaves the queue as it was.
    #[test]
    fn insert_then_remove_restores_the_queue(
        prios in prop::collection::vec(0u8..8, 1..12),
        extra in 0u8..8,
        first in any::<bool>(),
    ) {
        let mut all = prios.clone();
        all.push(extra);
        let (mut threads, slots) = table_with(&all);
        let (&moved, rest) = slots.split_last().expect("at least one slot");

        let mut q = PrioQueue::new();
        for &s in rest {
            q.insert(&mut threads, s);
        }
        let before = order(&q, &threads);

        if first {
            q.insert_first(&mut threads, moved);
        } else {
            q.insert(&mut threads, moved);
        }
        prop_assert_eq!(q.len(), before.len() + 1);
        prop_assert!(q.remove(&mut threads, moved));
        prop_assert_eq!(order(&q, &threads), before);
        prop_assert!(!threads[moved].primary.is_linked());
    }

    /// The queue is sorted by priority, and equals keep arrival order.
    #[test]
    fn priority_order_with_fifo_among_equals(prios in prop::collection::vec(0u8..6, 0..20)) {
        let (mut threads, slots) = table_with(&prios);
        let mut q = PrioQueue::new();
        for &s in &slots {
            q.insert(&mut threads, s);
        }
        let seen = order(&q, &threads);
        for pair in seen.windows(2) {
            let (a, b) = (&threads[pair[0]], &threads[pair[1]]);
            prop_assert!(a.prio >= b.prio);
            if a.prio == b.prio {
                prop_assert!(pair[0] < pair[1], "equals left arrival order");
            }
        }
        if let Some(head) = q.pop_front(&mut threads) {
            let max = prios.iter().copied().max().unwrap_or(0);
            prop_assert_eq!(threads[head].prio, max);
        }
    }

    /// The timeout queue head is the earliest deadline, and the board timer
    /// follows it when the head is cancelled.
    #[test]
    fn timer_head_is_the_minimum(deadlines in prop::collection::vec(1u64..1_000, 1..10)) {
        let board = ManualBoard::new();
        let prios: Vec<u8> = deadlines.iter().map(|_| 1).collect();
        let mut fx = Fixture::new(&prios);
        for (&slot, &at) in fx.slots.iter().zip(&deadlines) {
            fx.state
                .timer_arm(&board, slot, TimerMode::Absolute, Instant::from_nanos(at))
                .expect("future deadline");
        }
        let min = deadlines.iter().copied().min().map(Instant::from_nanos);
        prop_assert_eq!(fx.state.next_deadline(), min);
        prop_assert_eq!(board.programmed(), min);

        let head = fx.state.timeouts.front().expect("armed").slot;
        fx.state.timer_cancel(&board, head, TimerScope::One(TimerSlot::Sync));
        let rest = fx
            .slots
            .iter()
            .zip(&deadlines)
            .filter(|(s, _)| **s != head)
            .map(|(_, &at)| Instant::from_nanos(at))
            .min();
        prop_assert_eq!(fx.state.next_deadline(), rest);
        prop_assert_eq!(board.programmed(), rest);
    }
}
