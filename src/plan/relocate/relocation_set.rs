use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crossbeam::queue::SegQueue;

use super::forwarding::Forwarding;
use crate::global_state::GlobalState;
use crate::policy::{AllocRegion, Heap, Region, RegionState};
use crate::scheduler::{WorkerPool, WorkerTask};
use crate::util::address::{Address, ObjectReference};
use crate::vm::{ObjectModel, VMBinding};

/// The regions being relocated in a cycle, with their forwarding tables.
pub struct RelocationSet {
    /// Sorted by region index.
    forwardings: Vec<Forwarding>,
    /// Next forwarding to hand out with `claim`.
    cursor: AtomicUsize,
    relocated_objects: AtomicUsize,
    relocated_bytes: AtomicUsize,
}

impl RelocationSet {
    pub fn new(mut forwardings: Vec<Forwarding>) -> Self {
        forwardings.sort_by_key(|f| f.region());
        Self {
            forwardings,
            cursor: AtomicUsize::new(0),
            relocated_objects: AtomicUsize::new(0),
            relocated_bytes: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.forwardings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forwardings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Forwarding> {
        self.forwardings.iter()
    }

    /// The forwarding table of `region`, if it is in the set.
    pub fn forwarding(&self, region: usize) -> Option<&Forwarding> {
        self.forwardings
            .binary_search_by_key(&region, |f| f.region())
            .ok()
            .map(|i| &self.forwardings[i])
    }

    /// Hand out every forwarding table once, for relocation.
    pub fn claim(&self) -> Option<&Forwarding> {
        self.forwardings
            .get(self.cursor.fetch_add(1, Ordering::Relaxed))
    }

    fn record_copy(&self, bytes: usize) {
        self.relocated_objects.fetch_add(1, Ordering::Relaxed);
        self.relocated_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn relocated_objects(&self) -> usize {
        self.relocated_objects.load(Ordering::Relaxed)
    }

    pub fn relocated_bytes(&self) -> usize {
        self.relocated_bytes.load(Ordering::Relaxed)
    }

    /// Address ranges of the regions in the set.
    pub fn ranges(&self, heap: &Heap) -> Vec<std::ops::Range<Address>> {
        self.forwardings
            .iter()
            .map(|f| {
                let region = heap.table().get(f.region());
                region.start()..region.end()
            })
            .collect()
    }
}

/// Relocation state of a collector.
///
/// The current relocation set is installed in `PauseRelocateStart` and stays installed after
/// relocation, to heal stale references, until the next cycle selects a new set.
pub struct Relocation {
    current: RwLock<Option<Arc<RelocationSet>>>,
    /// Objects are copied on access while this is set.  Otherwise stale references are only
    /// looked up.
    relocating: AtomicBool,
    /// Where copies go, one per NUMA node.
    targets: Box<[AllocRegion]>,
}

impl Relocation {
    pub fn new(numa_nodes: usize) -> Self {
        Self {
            current: RwLock::new(None),
            relocating: AtomicBool::new(false),
            targets: (0..numa_nodes.max(1)).map(|_| AllocRegion::new()).collect(),
        }
    }

    pub fn current(&self) -> Option<Arc<RelocationSet>> {
        self.current.read().unwrap().clone()
    }

    pub fn install(&self, set: Arc<RelocationSet>) {
        let mut current = self.current.write().unwrap();
        gc_invariant!(current.is_none(), "A relocation set is already installed");
        *current = Some(set);
    }

    /// Uninstall the current set.
    pub fn take(&self) -> Option<Arc<RelocationSet>> {
        self.current.write().unwrap().take()
    }

    pub fn is_relocating(&self) -> bool {
        self.relocating.load(Ordering::Acquire)
    }

    pub fn start(&self) {
        self.relocating.store(true, Ordering::Release);
    }

    /// Stop copying.  Copies from the next cycle go to fresh regions.
    pub fn finish(&self) {
        self.relocating.store(false, Ordering::Release);
        for target in self.targets.iter() {
            target.retire();
        }
    }

    /// Slow path of [`GlobalState::remap`] for an object in a `Relocating` or `Detached` region.
    pub fn remap<VM: VMBinding>(
        &self,
        global: &GlobalState<VM>,
        region: &Region,
        object: ObjectReference,
    ) -> ObjectReference {
        let Some(set) = self.current() else {
            return object;
        };
        let Some(forwarding) = set.forwarding(region.index()) else {
            return object;
        };
        if self.is_relocating() && region.state() == RegionState::Relocating {
            self.relocate_object(global, &set, forwarding, object)
        } else {
            forwarding.find(object).unwrap_or(object)
        }
    }

    /// Relocate `object` unless somebody already did, and return its new location.
    pub fn relocate_object<VM: VMBinding>(
        &self,
        global: &GlobalState<VM>,
        set: &RelocationSet,
        forwarding: &Forwarding,
        object: ObjectReference,
    ) -> ObjectReference {
        forwarding.forward(object, || self.copy(global, set, object))
    }

    fn copy<VM: VMBinding>(
        &self,
        global: &GlobalState<VM>,
        set: &RelocationSet,
        object: ObjectReference,
    ) -> Option<ObjectReference> {
        let bytes = global.binding.object_size(object);
        let node = std::cmp::min(global.heap.numa().id(), self.targets.len() - 1);
        let Some(to) = self.targets[node].alloc(&global.heap, bytes) else {
            debug!("No room to relocate {} ({} bytes)", object, bytes);
            return None;
        };
        let copy = global.binding.copy_object(object, to);
        set.record_copy(bytes);
        trace!("Relocated {} -> {}", object, copy);
        Some(copy)
    }
}

/// Input of a forwarding table: region index, region start and live objects.
pub type ForwardingRequest = (usize, Address, usize);

/// Builds forwarding tables in parallel.
struct BuildForwardingTask {
    requests: Vec<ForwardingRequest>,
    cursor: AtomicUsize,
    built: SegQueue<Forwarding>,
}

impl WorkerTask for BuildForwardingTask {
    fn execute(&self, _ordinal: usize) {
        while let Some(&(region, start, live_objects)) = self
            .requests
            .get(self.cursor.fetch_add(1, Ordering::Relaxed))
        {
            self.built.push(Forwarding::new(region, start, live_objects));
        }
    }
}

/// Build a relocation set on all workers of `pool`.
pub fn build_relocation_set(pool: &WorkerPool, requests: Vec<ForwardingRequest>) -> RelocationSet {
    let expected = requests.len();
    let task = Arc::new(BuildForwardingTask {
        requests,
        cursor: AtomicUsize::new(0),
        built: SegQueue::new(),
    });
    if expected > 0 {
        pool.run(task.clone(), pool.nworkers());
    }
    let mut forwardings = Vec::with_capacity(expected);
    while let Some(forwarding) = task.built.pop() {
        forwardings.push(forwarding);
    }
    debug_assert_eq!(forwardings.len(), expected);
    RelocationSet::new(forwardings)
}

/// Relocates every marked object of the relocation set.
pub struct RelocateTask<VM: VMBinding> {
    global: Arc<GlobalState<VM>>,
    set: Arc<RelocationSet>,
}

impl<VM: VMBinding> RelocateTask<VM> {
    pub fn new(global: Arc<GlobalState<VM>>, set: Arc<RelocationSet>) -> Self {
        Self { global, set }
    }
}

impl<VM: VMBinding> WorkerTask for RelocateTask<VM> {
    fn execute(&self, ordinal: usize) {
        let global = &self.global;
        let epoch = global.heap.epoch();
        while let Some(forwarding) = self.set.claim() {
            let region = global.heap.table().get(forwarding.region());
            let objects = region.marked_objects(epoch);
            trace!(
                "Worker {} relocating {} objects of region {}",
                ordinal,
                objects.len(),
                region.index()
            );
            for object in objects {
                global
                    .relocation
                    .relocate_object(global, &self.set, forwarding, object);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_claim() {
        let pool = WorkerPool::new("Forwarding", 3).unwrap();
        let requests = [9, 2, 5]
            .iter()
            .map(|&i| (i, unsafe { Address::from_usize((1 << 40) + (i << 16)) }, 10))
            .collect();
        let set = build_relocation_set(&pool, requests);
        assert_eq!(set.len(), 3);
        assert_eq!(set.forwarding(5).map(|f| f.region()), Some(5));
        assert!(set.forwarding(4).is_none());

        let claimed: Vec<usize> = std::iter::from_fn(|| set.claim().map(|f| f.region())).collect();
        assert_eq!(claimed, vec![2, 5, 9]);
        assert!(set.claim().is_none());
    }

    #[test]
    fn empty_set_needs_no_workers() {
        let pool = WorkerPool::new("Forwarding", 1).unwrap();
        let set = build_relocation_set(&pool, vec![]);
        assert!(set.is_empty());
    }
}
