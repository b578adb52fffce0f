//! Generation-checked slot arena.
//!
//! Threads, mutexes and condition variables all live in arenas. A handle
//! is `(index, generation)`; freeing a slot bumps its generation, so a
//! stale handle resolves to `None` instead of to whatever reused the slot.

use alloc::vec::Vec;

use crate::errors::KResult;

/// Index plus generation of an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RawHandle {
    index: u32,
    generation: u32,
}

impl RawHandle {
    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct Arena<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Store `value`, reusing the most recently freed slot if there is one.
    pub(crate) fn insert(&mut self, value: T) -> KResult<RawHandle> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.try_reserve(1)?;
                self.entries.push(Entry {
                    generation: 0,
                    value: None,
                });
                (self.entries.len() - 1) as u32
            }
        };
        let entry = &mut self.entries[index as usize];
        debug_assert!(entry.value.is_none());
        entry.value = Some(value);
        Ok(RawHandle {
            index,
            generation: entry.generation,
        })
    }

    /// Remove the value behind `handle`, invalidating every copy of it.
    pub(crate) fn remove(&mut self, handle: RawHandle) -> Option<T> {
        let entry = self.entries.get_mut(handle.index as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(value)
    }

    pub(crate) fn get(&self, handle: RawHandle) -> Option<&T> {
        let entry = self.entries.get(handle.index as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, handle: RawHandle) -> Option<&mut T> {
        let entry = self.entries.get_mut(handle.index as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.value.as_mut()
    }

    /// Handle for whatever currently occupies `index`.
    pub(crate) fn handle_at(&self, index: u32) -> Option<RawHandle> {
        let entry = self.entries.get(index as usize)?;
        entry.value.as_ref().map(|_| RawHandle {
            index,
            generation: entry.generation,
        })
    }

    pub(crate) fn at(&self, index: u32) -> Option<&T> {
        self.entries.get(index as usize)?.value.as_ref()
    }

    pub(crate) fn at_mut(&mut self, index: u32) -> Option<&mut T> {
        self.entries.get_mut(index as usize)?.value.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut arena = Arena::new();
        let a = arena.insert("a").unwrap();
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));

        let b = arena.insert("b").unwrap();
        assert_eq!(b.index(), a.index());
        assert_ne!(b.generation(), a.generation());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn handle_at_reports_current_generation() {
        let mut arena = Arena::new();
        let a = arena.insert(1u8).unwrap();
        assert_eq!(arena.handle_at(a.index()), Some(a));
        arena.remove(a);
        assert_eq!(arena.handle_at(a.index()), None);
    }
}
