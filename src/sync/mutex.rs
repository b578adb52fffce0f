//! Mutexes: normal or recursive, optionally with the priority-ceiling
//! protocol.
//!
//! Unlocking hands the mutex straight to the head of its wait queue, so
//! the highest-priority waiter owns it by the time it runs and a
//! later arrival can never overtake it.

use super::MutexId;
use crate::arch::Arch;
use crate::board::Board;
use crate::config::DEFAULT_PRIORITY;
use crate::errors::{Errno, KResult};
use crate::kernel::state::KernelState;
use crate::kernel::Kernel;
use crate::sched::queue::PrioQueue;
use crate::sched::QueueId;
use crate::thread::Slot;

/// `PTHREAD_MUTEX_NORMAL` or `PTHREAD_MUTEX_RECURSIVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutexKind {
    /// Relocking by the owner fails with `EDEADLK`.
    #[default]
    Normal,
    /// The owner may relock; each lock needs its own unlock.
    Recursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutexProtocol {
    #[default]
    None,
    /// Priority inheritance. Not supported.
    Inherit,
    /// Priority ceiling: the owner runs at least at the mutex's ceiling.
    Protect,
}

/// Attributes for [`Kernel::mutex_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexAttr {
    kind: MutexKind,
    protocol: MutexProtocol,
    ceiling: u8,
    process_shared: bool,
}

impl MutexAttr {
    pub const fn new() -> Self {
        Self {
            kind: MutexKind::Normal,
            protocol: MutexProtocol::None,
            ceiling: DEFAULT_PRIORITY,
            process_shared: false,
        }
    }

    pub fn kind(mut self, kind: MutexKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn protocol(mut self, protocol: MutexProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn ceiling(mut self, ceiling: u8) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn process_shared(mut self, shared: bool) -> Self {
        self.process_shared = shared;
        self
    }

    pub fn get_kind(&self) -> MutexKind {
        self.kind
    }

    pub fn get_protocol(&self) -> MutexProtocol {
        self.protocol
    }

    pub fn get_ceiling(&self) -> u8 {
        self.ceiling
    }

    pub fn get_process_shared(&self) -> bool {
        self.process_shared
    }

    fn validate(&self) -> KResult<()> {
        if self.process_shared {
            return Err(Errno::ENOSYS);
        }
        match self.protocol {
            MutexProtocol::None => Ok(()),
            MutexProtocol::Inherit => Err(Errno::ENOTSUP),
            MutexProtocol::Protect if cfg!(feature = "prio-ceiling") => Ok(()),
            MutexProtocol::Protect => Err(Errno::ENOTSUP),
        }
    }
}

impl Default for MutexAttr {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct MutexRecord {
    /// Locked exactly when an owner is set.
    pub(crate) owner: Option<Slot>,
    /// Extra locks taken by the owner of a recursive mutex.
    pub(crate) count: u32,
    pub(crate) kind: MutexKind,
    pub(crate) protocol: MutexProtocol,
    pub(crate) ceiling: u8,
    pub(crate) queue: PrioQueue,
}

impl MutexRecord {
    pub(crate) fn new(attr: &MutexAttr) -> Self {
        Self {
            owner: None,
            count: 0,
            kind: attr.kind,
            protocol: attr.protocol,
            ceiling: attr.ceiling,
            queue: PrioQueue::new(),
        }
    }

    fn uses_ceiling(&self) -> bool {
        cfg!(feature = "prio-ceiling") && self.protocol == MutexProtocol::Protect
    }
}

impl<A: Arch, B: Board> Kernel<A, B> {
    pub fn mutex_init(&self, attr: &MutexAttr) -> KResult<MutexId> {
        attr.validate()?;
        let mut k = self.enter();
        let handle = k.mutexes.insert(MutexRecord::new(attr))?;
        Ok(MutexId(handle))
    }

    /// Fails with `EBUSY` while the mutex is locked or has waiters.
    pub fn mutex_destroy(&self, id: MutexId) -> KResult<()> {
        let mut k = self.enter();
        let rec = k.mutexes.get(id.0).ok_or(Errno::EINVAL)?;
        if rec.owner.is_some() || !rec.queue.is_empty() {
            return Err(Errno::EBUSY);
        }
        k.mutexes.remove(id.0);
        Ok(())
    }

    /// Lock `id`, blocking behind higher- and equal-priority waiters.
    pub fn mutex_lock(&self, id: MutexId) -> KResult<()> {
        loop {
            let mut k = self.enter();
            let me = k.current_slot()?;
            let owner = k.mutexes.get(id.0).ok_or(Errno::EINVAL)?.owner;
            match owner {
                None => {
                    k.check_ceiling(id, me)?;
                    k.take_mutex(id, me);
                    return Ok(());
                }
                Some(owner) if owner == me => return k.relock(id),
                Some(_) => {}
            }
            k.check_ceiling(id, me)?;
            k.block_current(Some(QueueId::Mutex(id)))?;
            drop(k);

            // Either the unlocker handed us the mutex or a signal woke us.
            let k = self.enter();
            match k.mutexes.get(id.0) {
                None => return Err(Errno::EINVAL),
                Some(rec) if rec.owner == Some(me) => return Ok(()),
                Some(_) => {}
            }
        }
    }

    /// Like [`Kernel::mutex_lock`] but fails with `EBUSY` instead of
    /// blocking.
    pub fn mutex_trylock(&self, id: MutexId) -> KResult<()> {
        let mut k = self.enter();
        let me = k.current_slot()?;
        let owner = k.mutexes.get(id.0).ok_or(Errno::EINVAL)?.owner;
        match owner {
            None => {
                k.check_ceiling(id, me)?;
                k.take_mutex(id, me);
                Ok(())
            }
            Some(owner) if owner == me => k.relock(id),
            Some(_) => Err(Errno::EBUSY),
        }
    }

    pub fn mutex_unlock(&self, id: MutexId) -> KResult<()> {
        let mut k = self.enter();
        let me = k.current_slot()?;
        let rec = k.mutexes.get_mut(id.0).ok_or(Errno::EINVAL)?;
        if rec.owner != Some(me) {
            return Err(Errno::EPERM);
        }
        if rec.count > 0 {
            rec.count -= 1;
            return Ok(());
        }
        k.release_mutex(id, me);
        Ok(())
    }

    /// Change the ceiling of a priority-ceiling mutex; returns the old one.
    pub fn mutex_setprioceiling(&self, id: MutexId, ceiling: u8) -> KResult<u8> {
        if !cfg!(feature = "prio-ceiling") {
            return Err(Errno::ENOSYS);
        }
        let mut k = self.enter();
        let rec = k.mutexes.get_mut(id.0).ok_or(Errno::EINVAL)?;
        if !rec.uses_ceiling() {
            return Err(Errno::EINVAL);
        }
        let old = core::mem::replace(&mut rec.ceiling, ceiling);
        if let Some(owner) = rec.owner {
            k.replace_ceiling(owner, old, ceiling);
        }
        Ok(old)
    }

    pub fn mutex_getprioceiling(&self, id: MutexId) -> KResult<u8> {
        if !cfg!(feature = "prio-ceiling") {
            return Err(Errno::ENOSYS);
        }
        let k = self.enter();
        let rec = k.mutexes.get(id.0).ok_or(Errno::EINVAL)?;
        if !rec.uses_ceiling() {
            return Err(Errno::EINVAL);
        }
        Ok(rec.ceiling)
    }
}

impl KernelState {
    /// A caller above the ceiling may not lock a ceiling mutex.
    fn check_ceiling(&self, id: MutexId, me: Slot) -> KResult<()> {
        let rec = self.mutexes.get(id.0).ok_or(Errno::EINVAL)?;
        if rec.uses_ceiling() && self.threads[me].base_prio > rec.ceiling {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }

    /// Lock again a mutex the caller already owns.
    fn relock(&mut self, id: MutexId) -> KResult<()> {
        let rec = self.mutexes.get_mut(id.0).ok_or(Errno::EINVAL)?;
        match rec.kind {
            MutexKind::Normal => Err(Errno::EDEADLK),
            MutexKind::Recursive => {
                rec.count = rec.count.checked_add(1).ok_or(Errno::EAGAIN)?;
                Ok(())
            }
        }
    }

    /// Make `slot` the owner of an unlocked mutex.
    pub(crate) fn take_mutex(&mut self, id: MutexId, slot: Slot) {
        let Some(rec) = self.mutexes.get_mut(id.0) else {
            return;
        };
        debug_assert!(rec.owner.is_none());
        rec.owner = Some(slot);
        rec.count = 0;
        #[cfg(feature = "prio-ceiling")]
        if rec.uses_ceiling() {
            let ceiling = rec.ceiling;
            self.threads[slot].ceilings.push(ceiling);
            let effective = self.effective_priority(slot);
            self.set_priority(slot, effective);
        }
    }

    /// Give up `slot`'s ownership entirely and pass the mutex to the
    /// first waiter, if any.
    pub(crate) fn release_mutex(&mut self, id: MutexId, slot: Slot) {
        let Some(rec) = self.mutexes.get_mut(id.0) else {
            return;
        };
        rec.owner = None;
        rec.count = 0;
        if rec.uses_ceiling() {
            let ceiling = rec.ceiling;
            self.drop_ceiling(slot, ceiling);
        }
        if let Some(next) = self.dequeue_head(QueueId::Mutex(id)) {
            log::trace!("mutex {:?} handed to {:?}", id.0, next);
            self.take_mutex(id, next);
            self.threads[next].wait_status = Ok(());
            self.wake(next);
        }
    }

    #[cfg_attr(not(feature = "prio-ceiling"), allow(unused_variables))]
    fn drop_ceiling(&mut self, slot: Slot, ceiling: u8) {
        #[cfg(feature = "prio-ceiling")]
        {
            let held = &mut self.threads[slot].ceilings;
            if let Some(i) = held.iter().rposition(|&c| c == ceiling) {
                held.remove(i);
            }
            let effective = self.effective_priority(slot);
            self.set_priority(slot, effective);
        }
    }

    #[cfg_attr(not(feature = "prio-ceiling"), allow(unused_variables))]
    fn replace_ceiling(&mut self, slot: Slot, old: u8, new: u8) {
        #[cfg(feature = "prio-ceiling")]
        {
            let held = &mut self.threads[slot].ceilings;
            if let Some(c) = held.iter_mut().rev().find(|c| **c == old) {
                *c = new;
            }
            let effective = self.effective_priority(slot);
            self.set_priority(slot, effective);
        }
    }
}
