//! Thread-specific data keys and cleanup handlers.

use alloc::boxed::Box;

use super::Slot;
use crate::arch::Arch;
use crate::board::Board;
use crate::errors::{Errno, KResult};
use crate::kernel::state::KernelState;
use crate::kernel::Kernel;

/// Passes over the keys made at thread exit while destructors keep
/// storing new values (`PTHREAD_DESTRUCTOR_ITERATIONS`).
const DESTRUCTOR_ITERATIONS: usize = 4;

/// A thread-specific data key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key(pub(crate) usize);

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct KeySlot {
    pub(crate) in_use: bool,
    pub(crate) destructor: Option<fn(usize)>,
}

impl<A: Arch, B: Board> Kernel<A, B> {
    /// Allocate a key. Every thread sees the value 0 for it until it
    /// stores one. At thread exit `destructor` is called with each
    /// non-zero value.
    pub fn key_create(&self, destructor: Option<fn(usize)>) -> KResult<Key> {
        let mut k = self.enter();
        let index = match k.keys.iter().position(|s| !s.in_use) {
            Some(i) => i,
            None if k.keys.len() < k.config.keys_max => {
                k.keys.try_reserve(1)?;
                k.keys.push(KeySlot::default());
                k.keys.len() - 1
            }
            None => return Err(Errno::EAGAIN),
        };
        k.clear_key(index);
        k.keys[index] = KeySlot {
            in_use: true,
            destructor,
        };
        Ok(Key(index))
    }

    /// Retire `key`. No destructors run for the values it still holds.
    pub fn key_delete(&self, key: Key) -> KResult<()> {
        let mut k = self.enter();
        k.key_slot(key)?;
        k.keys[key.0] = KeySlot::default();
        k.clear_key(key.0);
        Ok(())
    }

    pub fn setspecific(&self, key: Key, value: usize) -> KResult<()> {
        let mut k = self.enter();
        k.key_slot(key)?;
        let me = k.current_slot()?;
        let values = &mut k.threads[me].specific;
        if values.len() <= key.0 {
            values.try_reserve(key.0 + 1 - values.len()).map_err(|_| Errno::ENOMEM)?;
            values.resize(key.0 + 1, 0);
        }
        values[key.0] = value;
        Ok(())
    }

    /// The calling thread's value for `key`; 0 if never set.
    pub fn getspecific(&self, key: Key) -> usize {
        let k = self.enter();
        match (k.key_slot(key), k.current) {
            (Ok(_), Some(me)) => k.threads[me].specific.get(key.0).copied().unwrap_or(0),
            _ => 0,
        }
    }

    /// Push a handler to run if the thread exits or is cancelled before
    /// the matching [`Kernel::cleanup_pop`].
    pub fn cleanup_push<F>(&self, handler: F) -> KResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut k = self.enter();
        let me = k.current_slot()?;
        let stack = &mut k.threads[me].cleanup;
        stack.try_reserve(1)?;
        stack.push(Box::new(handler));
        Ok(())
    }

    /// Pop the newest cleanup handler, running it if `execute`.
    pub fn cleanup_pop(&self, execute: bool) -> KResult<()> {
        let handler = {
            let mut k = self.enter();
            let me = k.current_slot()?;
            k.threads[me].cleanup.pop().ok_or(Errno::EINVAL)?
        };
        if execute {
            handler();
        }
        Ok(())
    }

    /// Call the key destructors of an exiting thread, outside the kernel.
    pub(crate) fn run_key_destructors(&self, me: Slot) {
        for _ in 0..DESTRUCTOR_ITERATIONS {
            let mut from = 0;
            let mut ran = false;
            loop {
                let next = self.enter().next_destructor(me, from);
                let Some((index, destructor, value)) = next else {
                    break;
                };
                destructor(value);
                ran = true;
                from = index + 1;
            }
            if !ran {
                return;
            }
        }
    }
}

impl KernelState {
    fn key_slot(&self, key: Key) -> KResult<&KeySlot> {
        self.keys.get(key.0).filter(|s| s.in_use).ok_or(Errno::EINVAL)
    }

    /// Forget every thread's value for key `index`.
    fn clear_key(&mut self, index: usize) {
        let slots: alloc::vec::Vec<Slot> = self.all.iter(&self.threads).collect();
        for slot in slots {
            if let Some(v) = self.threads[slot].specific.get_mut(index) {
                *v = 0;
            }
        }
    }

    /// Next key from `from` on with a destructor and a non-zero value for
    /// `me`. The value is cleared before it is handed out.
    fn next_destructor(&mut self, me: Slot, from: usize) -> Option<(usize, fn(usize), usize)> {
        let values = &mut self.threads[me].specific;
        (from..values.len()).find_map(|i| {
            let destructor = self.keys.get(i).filter(|s| s.in_use)?.destructor?;
            let value = core::mem::take(&mut values[i]);
            (value != 0).then_some((i, destructor, value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::Fixture;

    fn noop(_: usize) {}

    #[test]
    fn destructors_only_see_live_keys_with_values() {
        let mut fx = Fixture::new(&[1]);
        let me = fx.slots[0];
        fx.state.keys = alloc::vec![
            KeySlot { in_use: true, destructor: Some(noop) },
            KeySlot { in_use: false, destructor: Some(noop) },
            KeySlot { in_use: true, destructor: None },
            KeySlot { in_use: true, destructor: Some(noop) },
        ];
        fx.state.threads[me].specific = alloc::vec![0, 7, 8, 9];

        let first = fx.state.next_destructor(me, 0).map(|(i, _, v)| (i, v));
        assert_eq!(first, Some((3, 9)));
        assert_eq!(fx.state.threads[me].specific[3], 0);
        assert!(fx.state.next_destructor(me, 4).is_none());
        assert!(fx.state.next_destructor(me, 0).is_none());
    }

    #[test]
    fn deleting_a_key_clears_thread_values() {
        let mut fx = Fixture::new(&[1, 2]);
        fx.state.keys = alloc::vec![KeySlot { in_use: true, destructor: None }];
        for &s in &fx.slots {
            fx.state.threads[s].specific = alloc::vec![5];
        }
        fx.state.clear_key(0);
        assert!(fx.slots.iter().all(|&s| fx.state.threads[s].specific[0] == 0));
    }
}
