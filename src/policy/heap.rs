use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::region::{Region, RegionState, NO_EPOCH};
use crate::util::address::{Address, ObjectReference};
use crate::util::conversions::{bytes_to_formatted_string, log2_exact, raw_align_up};
use crate::util::error::GcError;
use crate::util::heap::backing::Numa;
use crate::util::options::Options;
use crate::util::os::VirtualMemory;

/// Maps heap addresses to regions.  Regions are laid out back to back from `start`, so the
/// lookup is a shift.
pub struct RegionTable {
    start: Address,
    log_region_size: usize,
    regions: Box<[Region]>,
}

impl RegionTable {
    pub fn new(start: Address, region_size: usize, nregions: usize) -> Self {
        debug_assert!(start.is_aligned_to(region_size));
        Self {
            start,
            log_region_size: log2_exact(region_size),
            regions: (0..nregions)
                .map(|i| Region::new(i, start + (i << log2_exact(region_size)), region_size))
                .collect(),
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + (self.regions.len() << self.log_region_size)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn log_region_size(&self) -> usize {
        self.log_region_size
    }

    pub fn region_size(&self) -> usize {
        1 << self.log_region_size
    }

    pub fn get(&self, index: usize) -> &Region {
        &self.regions[index]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end()
    }

    pub fn region_of(&self, addr: Address) -> Option<&Region> {
        if self.contains(addr) {
            Some(&self.regions[(addr - self.start) >> self.log_region_size])
        } else {
            None
        }
    }

    pub fn region_of_object(&self, object: ObjectReference) -> Option<&Region> {
        self.region_of(object.to_raw_address())
    }
}

const NO_REGION: usize = usize::MAX;

/// A region shared by several allocating threads, replaced by a fresh one when full.
pub struct AllocRegion {
    /// Index of the current region, or `NO_REGION`.
    current: AtomicUsize,
    refill_lock: Mutex<()>,
}

impl AllocRegion {
    pub fn new() -> Self {
        Self {
            current: AtomicUsize::new(NO_REGION),
            refill_lock: Mutex::new(()),
        }
    }

    /// Bump-allocate `bytes` in the current region, taking a new region from `heap` when it is
    /// full.  `None` if the heap is out of regions.  `bytes` must fit in a region.
    pub fn alloc(&self, heap: &Heap, bytes: usize) -> Option<Address> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current != NO_REGION {
                if let Some(addr) = heap.table.get(current).alloc(bytes) {
                    return Some(addr);
                }
            }
            let _guard = self.refill_lock.lock().unwrap();
            if self.current.load(Ordering::Acquire) != current {
                // Somebody else refilled.
                continue;
            }
            let region = heap.alloc_region()?;
            self.current.store(region.index(), Ordering::Release);
        }
    }

    /// Stop allocating into the current region.
    pub fn retire(&self) {
        let _guard = self.refill_lock.lock().unwrap();
        self.current.store(NO_REGION, Ordering::Release);
    }

    pub fn current(&self) -> Option<usize> {
        match self.current.load(Ordering::Acquire) {
            NO_REGION => None,
            index => Some(index),
        }
    }
}

impl Default for AllocRegion {
    fn default() -> Self {
        Self::new()
    }
}

/// The managed heap: one reservation split into regions, committed a region at a time.
pub struct Heap {
    memory: Arc<dyn VirtualMemory>,
    table: RegionTable,
    numa: Numa,
    /// The current mark epoch.  Bumped at the start of every cycle.
    epoch: AtomicU32,
    /// The last epoch whose marking ran to completion.
    marked_epoch: AtomicU32,
    /// Indices of free regions.  Allocation takes the lowest.
    free: Mutex<BTreeSet<usize>>,
    used_regions: AtomicUsize,
    /// The region mutators allocate into.
    mutator_region: AllocRegion,
}

impl Heap {
    pub fn new(
        options: &Options,
        memory: Arc<dyn VirtualMemory>,
        numa: Numa,
    ) -> Result<Self, GcError> {
        let region_size = options.region_size;
        let nregions = std::cmp::max(1, options.heap_size / region_size);
        let reserved = nregions * region_size;
        let start = memory
            .reserve(reserved, region_size)
            .map_err(|source| GcError::Memory {
                what: "heap",
                bytes: reserved,
                source,
            })?;
        info!(
            "Heap: {} regions of {} at {} ({} reserved)",
            nregions,
            bytes_to_formatted_string(region_size),
            start,
            bytes_to_formatted_string(reserved)
        );
        Ok(Self {
            memory,
            table: RegionTable::new(start, region_size, nregions),
            numa,
            epoch: AtomicU32::new(NO_EPOCH),
            marked_epoch: AtomicU32::new(NO_EPOCH),
            free: Mutex::new((0..nregions).collect()),
            used_regions: AtomicUsize::new(0),
            mutator_region: AllocRegion::new(),
        })
    }

    pub fn table(&self) -> &RegionTable {
        &self.table
    }

    pub fn numa(&self) -> &Numa {
        &self.numa
    }

    pub fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Start a new mark epoch and return it.
    pub(crate) fn bump_epoch(&self) -> u32 {
        let mut next = self.epoch().wrapping_add(1);
        if next == NO_EPOCH {
            next += 1;
        }
        self.epoch.store(next, Ordering::Release);
        next
    }

    /// Marking of the current epoch is complete, including objects kept alive by reference
    /// processing.
    pub(crate) fn complete_marking(&self) {
        self.marked_epoch.store(self.epoch(), Ordering::Release);
    }

    /// Are the marks of the current epoch complete?  False while a cycle marks, and after a
    /// cycle aborted until the next one completes its marking.
    pub fn is_marking_complete(&self) -> bool {
        self.marked_epoch.load(Ordering::Acquire) == self.epoch()
    }

    pub fn nregions(&self) -> usize {
        self.table.len()
    }

    /// Regions that are not free.
    pub fn used_regions(&self) -> usize {
        self.used_regions.load(Ordering::Relaxed)
    }

    pub fn free_regions(&self) -> usize {
        self.nregions() - self.used_regions()
    }

    /// Percentage of regions in use.
    pub fn occupancy(&self) -> f64 {
        self.used_regions() as f64 * 100.0 / self.nregions() as f64
    }

    /// Take the lowest free region, commit it and make it allocating in the current epoch.
    /// `None` if the heap is full or the memory can't be committed.
    pub fn alloc_region(&self) -> Option<&Region> {
        let index = {
            let mut free = self.free.lock().unwrap();
            free.pop_first()?
        };
        let region = self.table.get(index);
        if let Err(e) = self.memory.commit(region.start(), region.size()) {
            warn!("Failed to commit region {}: {}", index, e);
            self.free.lock().unwrap().insert(index);
            return None;
        }
        region.reset_for_allocation(self.epoch(), self.numa.node_of(region.start()));
        self.used_regions.fetch_add(1, Ordering::Relaxed);
        trace!("Allocated {:?}", region);
        Some(region)
    }

    /// Uncommit a region and put it back on the free list.
    pub fn free_region(&self, region: &Region) {
        if !gc_invariant!(
            region.state() != RegionState::Free,
            "Region {} freed twice",
            region.index()
        ) {
            return;
        }
        region.set_state(RegionState::Free);
        if let Err(e) = self.memory.uncommit(region.start(), region.size()) {
            warn!("Failed to uncommit region {}: {}", region.index(), e);
        }
        self.used_regions.fetch_sub(1, Ordering::Relaxed);
        self.free.lock().unwrap().insert(region.index());
    }

    /// Allocate `bytes` for a mutator.  Objects bigger than a region are not supported.
    pub fn alloc(&self, bytes: usize) -> Option<Address> {
        let bytes = raw_align_up(bytes, ObjectReference::ALIGNMENT);
        if bytes > self.table.region_size() {
            warn!(
                "Can't allocate {} bytes: larger than a region ({})",
                bytes,
                self.table.region_size()
            );
            return None;
        }
        self.mutator_region.alloc(self, bytes)
    }

    /// Stop allocating into the current mutator region.  The next allocation takes a fresh
    /// region, which is then allocated in the new epoch.
    pub(crate) fn retire_mutator_region(&self) {
        self.mutator_region.retire();
    }

    /// Is `object` live in the current epoch?  Objects outside the heap are considered live.
    pub fn is_marked(&self, object: ObjectReference) -> bool {
        match self.table.region_of_object(object) {
            Some(region) => region.is_marked(object, self.epoch()),
            None => true,
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let reserved = self.table.end() - self.table.start();
        if let Err(e) = self.memory.release(self.table.start(), reserved) {
            warn!("Failed to release the heap: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::MIN_REGION_SIZE;
    use crate::util::os::InMemory;

    fn heap(nregions: usize) -> (Arc<InMemory>, Heap) {
        let mut options = Options::without_env();
        options.region_size = MIN_REGION_SIZE;
        options.heap_size = nregions * MIN_REGION_SIZE;
        let memory = Arc::new(InMemory::new());
        let heap = Heap::new(&options, memory.clone(), Numa::disabled()).unwrap();
        (memory, heap)
    }

    #[test]
    fn region_lookup() {
        let (_memory, heap) = heap(4);
        let table = heap.table();
        assert_eq!(table.len(), 4);
        assert!(table.start().is_aligned_to(MIN_REGION_SIZE));
        let second = table.get(1);
        assert_eq!(second.start(), table.start() + MIN_REGION_SIZE);
        assert_eq!(table.region_of(second.start() + 8).unwrap().index(), 1);
        assert_eq!(table.region_of(second.end() - 8).unwrap().index(), 1);
        assert!(table.region_of(table.end()).is_none());
        assert!(table.region_of(table.start() - 8).is_none());
    }

    #[test]
    fn alloc_and_free_regions() {
        let (memory, heap) = heap(2);
        let a = heap.alloc_region().unwrap().index();
        let b = heap.alloc_region().unwrap().index();
        assert_eq!((a, b), (0, 1));
        assert!(heap.alloc_region().is_none());
        assert_eq!(heap.occupancy(), 100.0);
        assert_eq!(memory.committed_bytes(), 2 * MIN_REGION_SIZE);

        heap.free_region(heap.table().get(0));
        assert_eq!(heap.used_regions(), 1);
        assert_eq!(memory.committed_bytes(), MIN_REGION_SIZE);
        assert_eq!(heap.alloc_region().unwrap().index(), 0);
    }

    #[test]
    fn mutator_allocation_moves_to_fresh_regions() {
        let (_memory, heap) = heap(3);
        let first = heap.alloc(MIN_REGION_SIZE / 2).unwrap();
        let second = heap.alloc(MIN_REGION_SIZE / 2).unwrap();
        assert_eq!(heap.table().region_of(first).unwrap().index(), 0);
        assert_eq!(heap.table().region_of(second).unwrap().index(), 0);
        let third = heap.alloc(8).unwrap();
        assert_eq!(heap.table().region_of(third).unwrap().index(), 1);

        heap.retire_mutator_region();
        let fourth = heap.alloc(8).unwrap();
        assert_eq!(heap.table().region_of(fourth).unwrap().index(), 2);

        assert!(heap.alloc(MIN_REGION_SIZE + 8).is_none());
    }

    #[test]
    fn epochs_skip_zero() {
        let (_memory, heap) = heap(1);
        assert_eq!(heap.epoch(), NO_EPOCH);
        assert_eq!(heap.bump_epoch(), 1);
        heap.epoch.store(u32::MAX, Ordering::Release);
        assert_eq!(heap.bump_epoch(), 1);
    }

    #[test]
    fn marking_completes_per_epoch() {
        let (_memory, heap) = heap(1);
        assert!(heap.is_marking_complete());
        heap.bump_epoch();
        assert!(!heap.is_marking_complete());
        heap.complete_marking();
        assert!(heap.is_marking_complete());
        // An abandoned epoch stays incomplete.
        heap.bump_epoch();
        assert!(!heap.is_marking_complete());
    }
}
