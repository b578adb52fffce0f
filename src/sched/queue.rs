//! Intrusive queues over thread records.
//!
//! Every queue in the kernel is a [`Queue`]: a doubly-linked list whose
//! links live inside the thread records themselves. The `L` parameter says
//! which link field a queue threads through (the primary link, the
//! all-threads link, or one of the two timer entries) and `D` is the
//! ordering discipline, which decides the insert operations available:
//!
//! - [`Unsorted`]: O(1) insert at the head, for enumeration only.
//! - [`ByPriority`]: higher priority first, FIFO or LIFO among equals.
//! - [`ByDeadline`]: ascending deadline, so the head fires next.
//!
//! Removal and iteration are shared by every discipline.

use core::fmt;
use core::marker::PhantomData;

use crate::thread::{Slot, ThreadTable};
use crate::time::timer::TimerRef;

/// Previous/next pointers embedded in a thread record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link<N> {
    prev: Option<N>,
    next: Option<N>,
    linked: bool,
}

impl<N> Link<N> {
    pub(crate) const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
        }
    }

    pub(crate) fn is_linked(&self) -> bool {
        self.linked
    }
}

impl<N> Default for Link<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects the link field a queue is threaded through.
pub(crate) trait Linkage {
    type Node: Copy + Eq + fmt::Debug;

    fn link(threads: &ThreadTable, node: Self::Node) -> &Link<Self::Node>;
    fn link_mut(threads: &mut ThreadTable, node: Self::Node) -> &mut Link<Self::Node>;
}

/// Ready, Suspend, mutex, condvar and join queues.
pub(crate) struct PrimaryLink;
/// The All-Threads list.
pub(crate) struct AllLink;
/// The timeout queue.
pub(crate) struct TimerLink;

impl Linkage for PrimaryLink {
    type Node = Slot;

    fn link(threads: &ThreadTable, node: Slot) -> &Link<Slot> {
        &threads[node].primary
    }

    fn link_mut(threads: &mut ThreadTable, node: Slot) -> &mut Link<Slot> {
        &mut threads[node].primary
    }
}

impl Linkage for AllLink {
    type Node = Slot;

    fn link(threads: &ThreadTable, node: Slot) -> &Link<Slot> {
        &threads[node].all
    }

    fn link_mut(threads: &mut ThreadTable, node: Slot) -> &mut Link<Slot> {
        &mut threads[node].all
    }
}

impl Linkage for TimerLink {
    type Node = TimerRef;

    fn link(threads: &ThreadTable, node: TimerRef) -> &Link<TimerRef> {
        &threads[node.slot].timers[node.which as usize].link
    }

    fn link_mut(threads: &mut ThreadTable, node: TimerRef) -> &mut Link<TimerRef> {
        &mut threads[node.slot].timers[node.which as usize].link
    }
}

/// Insertion order is irrelevant.
pub(crate) struct Unsorted;
/// Ordered by descending effective priority.
pub(crate) struct ByPriority;
/// Ordered by ascending deadline.
pub(crate) struct ByDeadline;

pub(crate) type PrioQueue = Queue<PrimaryLink, ByPriority>;
pub(crate) type AllQueue = Queue<AllLink, Unsorted>;
pub(crate) type TimerQueue = Queue<TimerLink, ByDeadline>;

pub(crate) struct Queue<L: Linkage, D> {
    head: Option<L::Node>,
    tail: Option<L::Node>,
    len: usize,
    _policy: PhantomData<fn() -> (L, D)>,
}

impl<L: Linkage, D> Default for Queue<L, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Linkage, D> fmt::Debug for Queue<L, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("len", &self.len)
            .finish()
    }
}

impl<L: Linkage, D> Queue<L, D> {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            _policy: PhantomData,
        }
    }

    pub(crate) fn front(&self) -> Option<L::Node> {
        self.head
    }

    pub(crate) fn back(&self) -> Option<L::Node> {
        self.tail
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn iter<'a>(&self, threads: &'a ThreadTable) -> Iter<'a, L> {
        Iter {
            threads,
            next: self.head,
        }
    }

    pub(crate) fn contains(&self, threads: &ThreadTable, node: L::Node) -> bool {
        self.iter(threads).any(|n| n == node)
    }

    /// Link `node` in front of `before`, or at the tail when `before` is `None`.
    fn link_before(&mut self, threads: &mut ThreadTable, node: L::Node, before: Option<L::Node>) {
        debug_assert!(!L::link(threads, node).linked, "{:?} is already queued", node);
        let prev = match before {
            Some(b) => L::link(threads, b).prev,
            None => self.tail,
        };
        {
            let link = L::link_mut(threads, node);
            link.prev = prev;
            link.next = before;
            link.linked = true;
        }
        match prev {
            Some(p) => L::link_mut(threads, p).next = Some(node),
            None => self.head = Some(node),
        }
        match before {
            Some(b) => L::link_mut(threads, b).prev = Some(node),
            None => self.tail = Some(node),
        }
        self.len += 1;
    }

    /// Unlink `node`. Returns `false` if it was not queued.
    pub(crate) fn remove(&mut self, threads: &mut ThreadTable, node: L::Node) -> bool {
        if !L::link(threads, node).linked {
            return false;
        }
        debug_assert!(self.contains(threads, node), "{:?} is queued elsewhere", node);
        let Link { prev, next, .. } = core::mem::take(L::link_mut(threads, node));
        match prev {
            Some(p) => L::link_mut(threads, p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => L::link_mut(threads, n).prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
        true
    }

    pub(crate) fn pop_front(&mut self, threads: &mut ThreadTable) -> Option<L::Node> {
        let head = self.head?;
        self.remove(threads, head);
        Some(head)
    }

    /// First node satisfying `pred`, scanning from the head.
    fn find(&self, threads: &ThreadTable, mut pred: impl FnMut(L::Node) -> bool) -> Option<L::Node> {
        self.iter(threads).find(|&n| pred(n))
    }
}

impl<L: Linkage> Queue<L, Unsorted> {
    pub(crate) fn push_front(&mut self, threads: &mut ThreadTable, node: L::Node) {
        let head = self.head;
        self.link_before(threads, node, head);
    }
}

impl Queue<PrimaryLink, ByPriority> {
    /// Insert behind every thread of equal or higher priority.
    pub(crate) fn insert(&mut self, threads: &mut ThreadTable, slot: Slot) {
        let view = &*threads;
        let prio = view[slot].prio;
        let before = self.find(view, |n| view[n].prio < prio);
        self.link_before(threads, slot, before);
    }

    /// Insert ahead of every thread of equal priority.
    pub(crate) fn insert_first(&mut self, threads: &mut ThreadTable, slot: Slot) {
        let view = &*threads;
        let prio = view[slot].prio;
        let before = self.find(view, |n| view[n].prio <= prio);
        self.link_before(threads, slot, before);
    }
}

impl Queue<TimerLink, ByDeadline> {
    /// Insert before the first entry due no earlier than `entry`.
    pub(crate) fn insert(&mut self, threads: &mut ThreadTable, entry: TimerRef) {
        let view = &*threads;
        let deadline = view.timer(entry).deadline;
        let before = self.find(view, |n| view.timer(n).deadline >= deadline);
        self.link_before(threads, entry, before);
    }
}

pub(crate) struct Iter<'a, L: Linkage> {
    threads: &'a ThreadTable,
    next: Option<L::Node>,
}

impl<L: Linkage> Iterator for Iter<'_, L> {
    type Item = L::Node;

    fn next(&mut self) -> Option<L::Node> {
        let node = self.next?;
        self.next = L::link(self.threads, node).next;
        Some(node)
    }
}
