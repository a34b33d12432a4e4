use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::util::address::{Address, ObjectReference};

/// `to` of an entry whose object is being copied.
const BEING_FORWARDED: usize = 0;
/// `from` of a free entry.
const EMPTY: usize = 0;

const MIN_ENTRIES: usize = 16;

struct ForwardingEntry {
    from: AtomicUsize,
    to: AtomicUsize,
}

/// The forwarding table of one region of the relocation set: an open-addressing hash table from
/// old to new object addresses.
///
/// Whoever claims an entry for an object first (a GC worker or a mutator) copies it.  Everybody
/// else spins until the new address is published.  The table outlives the copy: it keeps healing
/// stale references until every reference to the region has been remapped.
pub struct Forwarding {
    region: usize,
    region_start: Address,
    entries: Box<[ForwardingEntry]>,
    mask: usize,
    /// Some object could not be copied and stays in the region.
    retained: AtomicBool,
}

impl Forwarding {
    /// A table for a region at `region_start` with `live_objects` objects to relocate.
    pub fn new(region: usize, region_start: Address, live_objects: usize) -> Self {
        let len = std::cmp::max(MIN_ENTRIES, (live_objects * 2).next_power_of_two());
        Self {
            region,
            region_start,
            entries: (0..len)
                .map(|_| ForwardingEntry {
                    from: AtomicUsize::new(EMPTY),
                    to: AtomicUsize::new(BEING_FORWARDED),
                })
                .collect(),
            mask: len - 1,
            retained: AtomicBool::new(false),
        }
    }

    pub fn region(&self) -> usize {
        self.region
    }

    /// Did some object have to stay in the region?
    pub fn is_retained(&self) -> bool {
        self.retained.load(Ordering::Acquire)
    }

    fn first_slot(&self, object: ObjectReference) -> usize {
        ((object.to_raw_address() - self.region_start) / ObjectReference::ALIGNMENT) & self.mask
    }

    fn wait_for_copy(entry: &ForwardingEntry) -> ObjectReference {
        let backoff = crossbeam::utils::Backoff::new();
        loop {
            let to = entry.to.load(Ordering::Acquire);
            if to != BEING_FORWARDED {
                return unsafe { ObjectReference::from_raw_address_unchecked(Address::from_usize(to)) };
            }
            backoff.snooze();
        }
    }

    /// The new location of `object`, if it has been forwarded.  Waits if a copy is in progress.
    pub fn find(&self, object: ObjectReference) -> Option<ObjectReference> {
        let raw = object.to_raw_address().as_usize();
        let mut slot = self.first_slot(object);
        for _ in 0..self.entries.len() {
            let entry = &self.entries[slot];
            match entry.from.load(Ordering::Acquire) {
                EMPTY => return None,
                from if from == raw => return Some(Self::wait_for_copy(entry)),
                _ => slot = (slot + 1) & self.mask,
            }
        }
        None
    }

    /// Forward `object`.  If nobody has claimed it yet, claim it and call `copy` to move it;
    /// if `copy` fails the object is forwarded to itself and the region is retained.  Return the
    /// new location either way.
    pub fn forward(
        &self,
        object: ObjectReference,
        copy: impl FnOnce() -> Option<ObjectReference>,
    ) -> ObjectReference {
        let raw = object.to_raw_address().as_usize();
        let mut slot = self.first_slot(object);
        for _ in 0..self.entries.len() {
            let entry = &self.entries[slot];
            match entry
                .from
                .compare_exchange(EMPTY, raw, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let to = copy().unwrap_or_else(|| {
                        self.retained.store(true, Ordering::Release);
                        object
                    });
                    entry
                        .to
                        .store(to.to_raw_address().as_usize(), Ordering::Release);
                    return to;
                }
                Err(from) if from == raw => return Self::wait_for_copy(entry),
                Err(_) => slot = (slot + 1) & self.mask,
            }
        }
        gc_invariant!(
            false,
            "Forwarding table of region {} is full ({} entries)",
            self.region,
            self.entries.len()
        );
        self.retained.store(true, Ordering::Release);
        object
    }
}

impl std::fmt::Debug for Forwarding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Forwarding(region {}, {} entries{})",
            self.region,
            self.entries.len(),
            if self.is_retained() { ", retained" } else { "" }
        )
    }
}
