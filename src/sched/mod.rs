//! Queue bookkeeping shared by every component.
//!
//! [`queue`] holds the list engine itself. This module adds the layer that
//! keeps each thread's `queue` field equal to the primary queue actually
//! holding it, raises `state_change` whenever the head of Ready moves, and
//! provides the wake/block primitives the rest of the kernel is built on.

pub(crate) mod queue;

use crate::errors::KResult;
use crate::kernel::state::KernelState;
use crate::sync::{CondId, MutexId};
use crate::thread::{Slot, ThreadState, ThreadTable};
use queue::PrioQueue;

/// Names a primary queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueId {
    Ready,
    Suspended,
    /// Threads joining the thread in this slot.
    Join(Slot),
    Mutex(MutexId),
    Cond(CondId),
}

impl KernelState {
    /// Run `f` against the queue named by `id`. `None` if the owning
    /// object no longer exists.
    fn with_queue<R>(
        &mut self,
        id: QueueId,
        f: impl FnOnce(&mut PrioQueue, &mut ThreadTable) -> R,
    ) -> Option<R> {
        match id {
            QueueId::Ready => {
                let head = self.ready.front();
                let r = f(&mut self.ready, &mut self.threads);
                if self.ready.front() != head {
                    self.state_change = true;
                }
                Some(r)
            }
            QueueId::Suspended => Some(f(&mut self.suspended, &mut self.threads)),
            QueueId::Mutex(m) => {
                let rec = self.mutexes.get_mut(m.0)?;
                Some(f(&mut rec.queue, &mut self.threads))
            }
            QueueId::Cond(c) => {
                let rec = self.conds.get_mut(c.0)?;
                Some(f(&mut rec.queue, &mut self.threads))
            }
            QueueId::Join(target) => {
                // The queue head lives inside another thread record; lift
                // it out so the links of both records can be touched.
                let mut q = core::mem::take(&mut self.threads.get_mut(target)?.joinq);
                let r = f(&mut q, &mut self.threads);
                self.threads[target].joinq = q;
                Some(r)
            }
        }
    }

    /// Queue `slot` behind its equals.
    pub(crate) fn enqueue(&mut self, id: QueueId, slot: Slot) {
        debug_assert!(self.threads[slot].queue.is_none());
        if self.with_queue(id, |q, t| q.insert(t, slot)).is_some() {
            self.threads[slot].queue = Some(id);
        }
    }

    /// Queue `slot` ahead of its equals.
    pub(crate) fn enqueue_first(&mut self, id: QueueId, slot: Slot) {
        debug_assert!(self.threads[slot].queue.is_none());
        if self.with_queue(id, |q, t| q.insert_first(t, slot)).is_some() {
            self.threads[slot].queue = Some(id);
        }
    }

    /// Take `slot` off whatever primary queue holds it.
    pub(crate) fn dequeue(&mut self, slot: Slot) -> Option<QueueId> {
        let id = self.threads[slot].queue.take()?;
        self.with_queue(id, |q, t| q.remove(t, slot));
        Some(id)
    }

    pub(crate) fn dequeue_head(&mut self, id: QueueId) -> Option<Slot> {
        let slot = self.with_queue(id, |q, t| q.pop_front(t))??;
        self.threads[slot].queue = None;
        Some(slot)
    }

    /// Make a blocked thread runnable, behind its equals.
    pub(crate) fn wake(&mut self, slot: Slot) {
        let t = &mut self.threads[slot];
        if t.state.contains(ThreadState::RUNNING) || t.state.contains(ThreadState::RETURNED) {
            return;
        }
        t.state.remove(ThreadState::BLOCKED | ThreadState::INTR_POINT);
        let suspended = t.state.contains(ThreadState::SUSPENDED);
        if !suspended {
            t.state.insert(ThreadState::RUNNING);
        }
        self.dequeue(slot);
        let target = if suspended {
            QueueId::Suspended
        } else {
            QueueId::Ready
        };
        self.enqueue(target, slot);
    }

    /// Take the calling thread off Ready and optionally park it on `on`.
    pub(crate) fn block_current(&mut self, on: Option<QueueId>) -> KResult<Slot> {
        let me = self.current_slot()?;
        self.dequeue(me);
        let t = &mut self.threads[me];
        t.state.remove(ThreadState::RUNNING);
        t.state.insert(ThreadState::BLOCKED);
        t.wait_status = Ok(());
        if let Some(id) = on {
            self.enqueue(id, me);
        }
        Ok(me)
    }

    /// Move a runnable thread behind its equals (`sched_yield`, slice expiry).
    pub(crate) fn requeue(&mut self, slot: Slot) {
        if self.threads[slot].queue == Some(QueueId::Ready) {
            self.dequeue(slot);
            self.enqueue(QueueId::Ready, slot);
        }
    }

    /// Change the effective priority and re-sort the thread's queue.
    pub(crate) fn set_priority(&mut self, slot: Slot, prio: u8) {
        if self.threads[slot].prio == prio {
            return;
        }
        self.threads[slot].prio = prio;
        if let Some(id) = self.dequeue(slot) {
            self.enqueue_first(id, slot);
        }
    }
}
