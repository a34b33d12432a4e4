use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;

use super::magazine::Magazine;
use super::space::MarkStackSpace;
use super::MAGAZINE_BYTES;
use crate::util::error::{GcError, MarkStackExhausted};
use crate::util::os::VirtualMemory;

/// Hands out [`Magazine`]s carved from a [`MarkStackSpace`].
///
/// Freed magazines go to a lock-free free list and are reused before the space is bumped again.
/// Their memory is only given back by [`MarkStackAllocator::free`], between cycles.
pub struct MarkStackAllocator {
    space: MarkStackSpace,
    freelist: SegQueue<Magazine>,
    /// Magazines handed out and not yet returned.
    outstanding: AtomicUsize,
}

impl MarkStackAllocator {
    pub fn new(memory: Arc<dyn VirtualMemory>, limit: usize) -> Result<Self, GcError> {
        Ok(Self::from_space(MarkStackSpace::new(memory, limit)?))
    }

    pub fn from_space(space: MarkStackSpace) -> Self {
        Self {
            space,
            freelist: SegQueue::new(),
            outstanding: AtomicUsize::new(0),
        }
    }

    pub fn space(&self) -> &MarkStackSpace {
        &self.space
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Get an empty magazine, from the free list if possible.
    pub fn alloc_magazine(&self) -> Result<Magazine, MarkStackExhausted> {
        let magazine = match self.freelist.pop() {
            Some(magazine) => magazine,
            None => {
                let base = self.space.alloc(MAGAZINE_BYTES)?;
                trace!("New magazine at {}", base);
                // The space never hands out the same range twice before it is freed.
                unsafe { Magazine::new(base) }
            }
        };
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(magazine)
    }

    /// Return a magazine.  Remaining entries are dropped.
    pub fn free_magazine(&self, mut magazine: Magazine) {
        gc_invariant!(
            magazine.base().is_in_range(self.space.start(), self.space.used()),
            "{:?} was not allocated from this space",
            magazine
        );
        magazine.clear();
        let old = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        gc_invariant!(old > 0, "More magazines freed than allocated");
        self.freelist.push(magazine);
    }

    /// Give all memory back.  Every magazine must have been returned.
    pub fn free(&self) {
        if !gc_invariant!(
            self.outstanding() == 0,
            "{} magazines still in use",
            self.outstanding()
        ) {
            return;
        }
        while self.freelist.pop().is_some() {}
        debug!(
            "Freeing mark stack space: used {} of {} committed",
            self.space.used(),
            self.space.size()
        );
        self.space.free();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;
    use crate::util::address::{Address, ObjectReference};
    use crate::util::mark_stack::{EntryKind, MarkStackEntry};
    use crate::util::os::InMemory;

    fn allocator(limit: usize) -> MarkStackAllocator {
        let memory = Arc::new(InMemory::new());
        let space = MarkStackSpace::with_expand_bytes(memory, limit, 4 * MAGAZINE_BYTES).unwrap();
        MarkStackAllocator::from_space(space)
    }

    #[test]
    fn reuses_freed_magazines() {
        let allocator = allocator(16 * MAGAZINE_BYTES);
        let first = allocator.alloc_magazine().unwrap();
        let base = first.base();
        allocator.free_magazine(first);
        let again = allocator.alloc_magazine().unwrap();
        assert_eq!(again.base(), base);
        assert!(again.is_empty());
        assert_eq!(allocator.space().used(), MAGAZINE_BYTES);
        allocator.free_magazine(again);
    }

    #[test]
    fn exhaustion_then_free() {
        let allocator = allocator(4 * MAGAZINE_BYTES);
        let magazines: Vec<_> = (0..4).map(|_| allocator.alloc_magazine().unwrap()).collect();
        assert!(allocator.alloc_magazine().is_err());
        assert_eq!(allocator.outstanding(), 4);
        for m in magazines {
            allocator.free_magazine(m);
        }
        allocator.free();
        assert_eq!(allocator.space().used(), 0);
        assert_eq!(allocator.space().size(), 0);
        assert!(allocator.alloc_magazine().is_ok());
    }

    /// Racing threads allocate, fill, free and re-allocate magazines.  A magazine is never owned
    /// by two threads at once: each thread stamps its magazines with its own id and finds only
    /// its own stamps when it pops them again.
    #[test]
    fn magazines_have_one_owner() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 200;
        let allocator = allocator(1024 * MAGAZINE_BYTES);
        let seen: Mutex<HashSet<Address>> = Default::default();

        std::thread::scope(|s| {
            for id in 1..=THREADS {
                let allocator = &allocator;
                let seen = &seen;
                s.spawn(move || {
                    let stamp = ObjectReference::from_raw_address(unsafe {
                        Address::from_usize(id * 0x1000)
                    })
                    .unwrap();
                    for _ in 0..ROUNDS {
                        let mut held: Vec<Magazine> =
                            (0..3).map(|_| allocator.alloc_magazine().unwrap()).collect();
                        for m in held.iter_mut() {
                            while m.push(MarkStackEntry::new(stamp, EntryKind::Strong)).is_ok() {}
                        }
                        std::thread::yield_now();
                        for mut m in held {
                            seen.lock().unwrap().insert(m.base());
                            while let Some(entry) = m.pop() {
                                assert_eq!(entry.object(), stamp);
                            }
                            allocator.free_magazine(m);
                        }
                    }
                });
            }
        });

        assert_eq!(allocator.outstanding(), 0);
        // Reuse kept the footprint down to what was live at once.
        assert!(seen.lock().unwrap().len() <= 3 * THREADS);
        assert!(allocator.space().used() <= 3 * THREADS * MAGAZINE_BYTES);
    }
}
