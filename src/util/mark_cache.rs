//! A per-worker cache of region liveness.
//!
//! Marking counts every marked object towards its region.  Doing that with atomic adds on the
//! region directly would make all workers fight over the same cache lines, so each worker counts
//! into its own direct-mapped cache and folds a slot into the region only when the slot is
//! needed for another region, or when the cache is flushed at the end of marking.

use crate::policy::{Region, RegionTable};
use crate::util::conversions::log2_exact;

/// Number of slots.  Must be a power of two.
pub const MARK_CACHE_SIZE: usize = 1024;

static_assertions::const_assert!(MARK_CACHE_SIZE.is_power_of_two());

#[derive(Copy, Clone, Debug, Default)]
struct MarkCacheEntry {
    /// Index of the region the counts belong to, or `None` for an empty slot.
    region: Option<usize>,
    live_objects: u32,
    live_bytes: usize,
}

pub struct MarkCache {
    shift: usize,
    entries: Box<[MarkCacheEntry]>,
}

impl MarkCache {
    /// A cache for a worker marking with `nstripes` stripes.  A worker mostly sees regions of
    /// its own stripe, so the stripe bits of a region address are skipped when picking the slot.
    pub fn new(log_region_size: usize, nstripes: usize) -> Self {
        Self {
            shift: log_region_size + log2_exact(nstripes),
            entries: vec![MarkCacheEntry::default(); MARK_CACHE_SIZE].into_boxed_slice(),
        }
    }

    fn slot_of(&self, region: &Region) -> usize {
        (region.start().as_usize() >> self.shift) & (MARK_CACHE_SIZE - 1)
    }

    /// Count one live object of `bytes` in `region`.
    pub fn inc_live(&mut self, regions: &RegionTable, region: &Region, bytes: usize) {
        let slot = self.slot_of(region);
        let entry = &mut self.entries[slot];
        if entry.region == Some(region.index()) {
            entry.live_objects += 1;
            entry.live_bytes += bytes;
            return;
        }
        self.evict(regions, slot);
        self.entries[slot] = MarkCacheEntry {
            region: Some(region.index()),
            live_objects: 1,
            live_bytes: bytes,
        };
    }

    /// Fold a slot into its region and empty it.  Empty slots are left alone.
    pub fn evict(&mut self, regions: &RegionTable, slot: usize) {
        let entry = std::mem::take(&mut self.entries[slot]);
        if let Some(index) = entry.region {
            // Several workers may fold into the same region.  `inc_live` adds atomically.
            regions
                .get(index)
                .inc_live(entry.live_objects, entry.live_bytes);
        }
    }

    /// Fold every slot into its region.
    pub fn flush(&mut self, regions: &RegionTable) {
        for slot in 0..MARK_CACHE_SIZE {
            self.evict(regions, slot);
        }
    }

    /// Number of slots holding counts not yet folded into a region.
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|e| e.region.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::policy::region::NO_EPOCH;
    use crate::util::address::Address;
    use crate::util::constants::MIN_REGION_SIZE;

    const NREGIONS: usize = 4 * MARK_CACHE_SIZE;

    fn table() -> RegionTable {
        // Regions are only used for their counters, the memory is never touched.
        let start = unsafe { Address::from_usize(1 << 40) };
        RegionTable::new(start, MIN_REGION_SIZE, NREGIONS)
    }

    fn totals(table: &RegionTable) -> Vec<(u32, usize)> {
        table
            .iter()
            .map(|r| (r.live_objects(NO_EPOCH), r.live_bytes(NO_EPOCH)))
            .collect()
    }

    /// (region index, object size) pairs
    fn random_updates(seed: u64, count: usize) -> Vec<(usize, usize)> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..count)
            .map(|_| (rng.random_range(0..NREGIONS), rng.random_range(1..64) * 8))
            .collect()
    }

    fn expected(updates: &[(usize, usize)]) -> Vec<(u32, usize)> {
        let mut expected = vec![(0u32, 0usize); NREGIONS];
        for &(index, bytes) in updates {
            expected[index].0 += 1;
            expected[index].1 += bytes;
        }
        expected
    }

    #[test]
    fn evicting_twice_changes_nothing() {
        for seed in 0..8 {
            let table = table();
            let log_region_size = table.log_region_size();
            let mut cache = MarkCache::new(log_region_size, 1);
            for (index, bytes) in random_updates(seed, 500) {
                cache.inc_live(&table, table.get(index), bytes);
            }
            let mut rng = ChaCha8Rng::seed_from_u64(seed + 100);
            for _ in 0..200 {
                let slot = rng.random_range(0..MARK_CACHE_SIZE);
                cache.evict(&table, slot);
                let after_first = totals(&table);
                cache.evict(&table, slot);
                assert_eq!(totals(&table), after_first);
            }
        }
    }

    #[test]
    fn totals_are_conserved_for_any_stripe_count() {
        let updates = random_updates(42, 20_000);
        let expected = expected(&updates);
        for nstripes in [1, 2, 4, 8, 16] {
            let table = table();
            let mut cache = MarkCache::new(table.log_region_size(), nstripes);
            for &(index, bytes) in &updates {
                cache.inc_live(&table, table.get(index), bytes);
            }
            cache.flush(&table);
            assert_eq!(cache.pending(), 0);
            assert_eq!(totals(&table), expected, "nstripes = {}", nstripes);
        }
    }

    #[test]
    fn colliding_regions_are_conserved() {
        // Regions MARK_CACHE_SIZE apart share a slot, so every update evicts the previous one.
        let table = table();
        let mut cache = MarkCache::new(table.log_region_size(), 1);
        let colliding = [0, MARK_CACHE_SIZE, 2 * MARK_CACHE_SIZE, 3 * MARK_CACHE_SIZE];
        let mut updates = vec![];
        for round in 0..100 {
            for &index in &colliding {
                updates.push((index, 8 * (round % 5 + 1)));
            }
        }
        for &(index, bytes) in &updates {
            cache.inc_live(&table, table.get(index), bytes);
        }
        assert_eq!(cache.pending(), 1);
        cache.flush(&table);
        assert_eq!(totals(&table), expected(&updates));
    }

    #[test]
    fn workers_fold_into_shared_regions() {
        let table = table();
        let updates = random_updates(7, 40_000);
        std::thread::scope(|s| {
            for chunk in updates.chunks(10_000) {
                let table = &table;
                s.spawn(move || {
                    let mut cache = MarkCache::new(table.log_region_size(), 4);
                    for &(index, bytes) in chunk {
                        cache.inc_live(table, table.get(index), bytes);
                    }
                    cache.flush(table);
                });
            }
        });
        assert_eq!(totals(&table), expected(&updates));
    }
}
