use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;

use crate::util::address::ObjectReference;
use crate::util::mark_stack::{Magazine, MarkStackAllocator};

/// Upper bound on the number of stripes.
pub const MAX_STRIPES: usize = 16;

/// Mark work split by address.
///
/// Every object belongs to a stripe, picked from its region address.  Each worker has a home
/// stripe.  Magazines a worker fills or gives away are published on the list of the stripe their
/// objects belong to, so workers mostly trace objects of their own stripe and stay in the same
/// part of the heap.
pub struct MarkStripeSet {
    log_region_size: usize,
    nstripes: AtomicUsize,
    published: [SegQueue<Magazine>; MAX_STRIPES],
}

impl MarkStripeSet {
    pub fn new(log_region_size: usize) -> Self {
        Self {
            log_region_size,
            nstripes: AtomicUsize::new(1),
            published: std::array::from_fn(|_| SegQueue::new()),
        }
    }

    /// The number of stripes for `nworkers` workers: the largest power of two not above it.
    pub fn stripes_for(nworkers: usize) -> usize {
        let nworkers = nworkers.clamp(1, MAX_STRIPES);
        1 << (usize::BITS - 1 - nworkers.leading_zeros())
    }

    /// Set up for a mark with `nworkers` workers.  All lists must be empty.
    pub fn reset(&self, nworkers: usize) {
        debug_assert!(self.is_empty());
        self.nstripes
            .store(Self::stripes_for(nworkers), Ordering::Relaxed);
    }

    pub fn nstripes(&self) -> usize {
        self.nstripes.load(Ordering::Relaxed)
    }

    pub fn stripe_of(&self, object: ObjectReference) -> usize {
        (object.to_raw_address().as_usize() >> self.log_region_size) & (self.nstripes() - 1)
    }

    pub fn home_of(&self, ordinal: usize) -> usize {
        ordinal & (self.nstripes() - 1)
    }

    pub fn publish(&self, stripe: usize, magazine: Magazine) {
        debug_assert!(!magazine.is_empty());
        self.published[stripe].push(magazine);
    }

    pub fn take(&self, stripe: usize) -> Option<Magazine> {
        self.published[stripe].pop()
    }

    pub fn is_empty(&self) -> bool {
        self.published.iter().all(|list| list.is_empty())
    }

    /// Return every published magazine to `allocator`, dropping its entries.  Return the number
    /// of entries dropped.
    pub fn drain(&self, allocator: &MarkStackAllocator) -> usize {
        let mut dropped = 0;
        for list in self.published.iter() {
            while let Some(magazine) = list.pop() {
                dropped += magazine.len();
                allocator.free_magazine(magazine);
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::address::Address;
    use crate::util::constants::MIN_REGION_SIZE;

    #[test]
    fn stripe_counts() {
        let expected = [(0, 1), (1, 1), (2, 2), (3, 2), (4, 4), (7, 4), (8, 8), (16, 16), (64, 16)];
        for (nworkers, nstripes) in expected {
            assert_eq!(MarkStripeSet::stripes_for(nworkers), nstripes, "{}", nworkers);
        }
    }

    #[test]
    fn objects_map_to_stripes_by_region() {
        let stripes = MarkStripeSet::new(MIN_REGION_SIZE.trailing_zeros() as usize);
        stripes.reset(4);
        let object = |region: usize, offset: usize| {
            ObjectReference::from_raw_address(unsafe {
                Address::from_usize((1 << 40) + region * MIN_REGION_SIZE + offset)
            })
            .unwrap()
        };
        assert_eq!(stripes.stripe_of(object(0, 8)), 0);
        assert_eq!(stripes.stripe_of(object(0, MIN_REGION_SIZE - 8)), 0);
        assert_eq!(stripes.stripe_of(object(1, 0)), 1);
        assert_eq!(stripes.stripe_of(object(5, 64)), 1);
        assert_eq!(stripes.home_of(6), 2);
    }
}
