//! A tiny VM for tests.
//!
//! Objects live in the collector's heap with a three word header followed by reference fields:
//!
//! ```text
//! [size in bytes][id][number of fields][field 0]...[field n-1]
//! ```
//!
//! A null field is zero.  Fields are read and written as atomics, since GC workers scan objects
//! while the test thread plays mutator.  The VM keeps a root list, weak roots and finalizable
//! objects, and records what the collector told it.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::collector::Collector;
use crate::global_state::GlobalState;
use crate::plan::driver::DriverPhase;
use crate::util::address::{Address, ObjectReference};
use crate::util::constants::BYTES_IN_WORD;
use crate::vm::*;

const SIZE_WORD: usize = 0;
const ID_WORD: usize = 1;
const NFIELDS_WORD: usize = 2;
const HEADER_WORDS: usize = 3;

#[derive(Default)]
pub struct FakeVM {
    global: OnceLock<Weak<GlobalState<FakeVM>>>,
    roots: Mutex<Vec<ObjectReference>>,
    weak_roots: Mutex<Vec<Option<ObjectReference>>>,
    finalizable: Mutex<Vec<ObjectReference>>,
    /// Objects whose finalizers are due.  They are roots until taken.
    finalized: Mutex<Vec<ObjectReference>>,
    /// References a mutator holds in a register, stored into the roots in the next mark end pause.
    hidden: Mutex<Vec<ObjectReference>>,
    phases: Mutex<Vec<DriverPhase>>,
    epochs: Mutex<Vec<u32>>,
    relocation_sets: Mutex<Vec<Vec<Range<Address>>>>,
    stopped: AtomicBool,
    pauses: AtomicUsize,
    /// Make `scan_object` panic, as a VM bug would.
    broken_scan: AtomicBool,
}

fn word(object: ObjectReference, index: usize) -> &'static AtomicUsize {
    unsafe { &*(object.to_raw_address() + index * BYTES_IN_WORD).to_ptr::<AtomicUsize>() }
}

fn to_field(raw: usize) -> Option<ObjectReference> {
    ObjectReference::from_raw_address(unsafe { Address::from_usize(raw) })
}

fn from_field(object: Option<ObjectReference>) -> usize {
    object.map_or(0, |o| o.to_raw_address().as_usize())
}

impl FakeVM {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the VM call back into `collector` from its callbacks.
    pub fn attach(&self, collector: &Collector<FakeVM>) {
        let _ = self.global.set(Arc::downgrade(collector.global()));
    }

    fn global(&self) -> Arc<GlobalState<FakeVM>> {
        self.global
            .get()
            .and_then(|global| global.upgrade())
            .expect("FakeVM is not attached to a live collector")
    }

    pub fn object_bytes(nfields: usize) -> usize {
        (HEADER_WORDS + nfields) * BYTES_IN_WORD
    }

    /// Allocate an object with `nfields` null fields.  `None` if the heap is full even after a
    /// collection.
    pub fn try_new_object(
        collector: &Collector<FakeVM>,
        id: usize,
        nfields: usize,
    ) -> Option<ObjectReference> {
        let bytes = Self::object_bytes(nfields);
        let addr = collector.alloc(bytes)?;
        let object = ObjectReference::from_raw_address(addr)?;
        word(object, SIZE_WORD).store(bytes, Ordering::Relaxed);
        word(object, ID_WORD).store(id, Ordering::Relaxed);
        word(object, NFIELDS_WORD).store(nfields, Ordering::Relaxed);
        for i in 0..nfields {
            word(object, HEADER_WORDS + i).store(0, Ordering::Relaxed);
        }
        Some(object)
    }

    pub fn new_object(collector: &Collector<FakeVM>, id: usize, nfields: usize) -> ObjectReference {
        Self::try_new_object(collector, id, nfields).expect("Out of memory")
    }

    pub fn id_of(object: ObjectReference) -> usize {
        word(object, ID_WORD).load(Ordering::Relaxed)
    }

    pub fn nfields(object: ObjectReference) -> usize {
        word(object, NFIELDS_WORD).load(Ordering::Relaxed)
    }

    pub fn set_field(object: ObjectReference, index: usize, value: Option<ObjectReference>) {
        assert!(index < Self::nfields(object));
        word(object, HEADER_WORDS + index).store(from_field(value), Ordering::Release);
    }

    /// Load a field through the load barrier.  The healed reference is stored back.
    pub fn field(
        collector: &Collector<FakeVM>,
        object: ObjectReference,
        index: usize,
    ) -> Option<ObjectReference> {
        assert!(index < Self::nfields(object));
        let slot = word(object, HEADER_WORDS + index);
        let raw = slot.load(Ordering::Acquire);
        let loaded = to_field(raw)?;
        let healed = collector.mark_barrier(loaded);
        if healed != loaded {
            let _ = slot.compare_exchange(
                raw,
                from_field(Some(healed)),
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
        Some(healed)
    }

    /// Add a root and return its index.
    pub fn add_root(&self, object: ObjectReference) -> usize {
        let mut roots = self.roots.lock().unwrap();
        roots.push(object);
        roots.len() - 1
    }

    pub fn root(&self, index: usize) -> ObjectReference {
        self.roots.lock().unwrap()[index]
    }

    pub fn roots(&self) -> Vec<ObjectReference> {
        self.roots.lock().unwrap().clone()
    }

    pub fn clear_roots(&self) {
        self.roots.lock().unwrap().clear();
    }

    pub fn add_weak(&self, object: ObjectReference) -> usize {
        let mut weak_roots = self.weak_roots.lock().unwrap();
        weak_roots.push(Some(object));
        weak_roots.len() - 1
    }

    pub fn weak(&self, index: usize) -> Option<ObjectReference> {
        self.weak_roots.lock().unwrap()[index]
    }

    pub fn add_finalizable(&self, object: ObjectReference) {
        self.finalizable.lock().unwrap().push(object);
    }

    pub fn take_finalized(&self) -> Vec<ObjectReference> {
        std::mem::take(&mut *self.finalized.lock().unwrap())
    }

    /// Keep `object` only in a "register" and store it into the roots during the next mark end
    /// pause, as a mutator racing with the marker would.
    pub fn resurrect_at_mark_end(&self, object: ObjectReference) {
        self.hidden.lock().unwrap().push(object);
    }

    pub fn phases(&self) -> Vec<DriverPhase> {
        self.phases.lock().unwrap().clone()
    }

    pub fn clear_phases(&self) {
        self.phases.lock().unwrap().clear();
    }

    pub fn epochs(&self) -> Vec<u32> {
        self.epochs.lock().unwrap().clone()
    }

    pub fn relocation_sets(&self) -> Vec<Vec<Range<Address>>> {
        self.relocation_sets.lock().unwrap().clone()
    }

    /// Make every later `scan_object` call panic.
    pub fn break_object_scanning(&self) {
        self.broken_scan.store(true, Ordering::SeqCst);
    }

    /// Number of pauses so far.
    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}

impl ObjectModel for FakeVM {
    fn object_size(&self, object: ObjectReference) -> usize {
        word(object, SIZE_WORD).load(Ordering::Relaxed)
    }
}

impl Scanning for FakeVM {
    fn scan_roots(&self, tracer: &mut dyn ObjectTracer) {
        for root in self.roots.lock().unwrap().iter_mut() {
            *root = tracer.trace_object(*root);
        }
        for root in self.finalized.lock().unwrap().iter_mut() {
            *root = tracer.trace_object(*root);
        }
    }

    fn scan_object(&self, object: ObjectReference, tracer: &mut dyn ObjectTracer) {
        if self.broken_scan.load(Ordering::SeqCst) {
            panic!("Cannot scan {}", object);
        }
        for i in 0..Self::nfields(object) {
            let slot = word(object, HEADER_WORDS + i);
            let raw = slot.load(Ordering::Acquire);
            if let Some(child) = to_field(raw) {
                let healed = tracer.trace_object(child);
                if healed != child {
                    let _ = slot.compare_exchange(
                        raw,
                        from_field(Some(healed)),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                }
            }
        }
    }

    fn process_weak_refs(&self, processor: &mut dyn WeakRefProcessor) {
        {
            let mut finalizable = self.finalizable.lock().unwrap();
            let mut finalized = self.finalized.lock().unwrap();
            let mut still_finalizable = vec![];
            for object in finalizable.drain(..) {
                if processor.is_live(object) {
                    still_finalizable.push(processor.remap(object));
                } else {
                    finalized.push(processor.keep_alive(object));
                }
            }
            *finalizable = still_finalizable;
        }
        for slot in self.weak_roots.lock().unwrap().iter_mut() {
            *slot = slot.and_then(|object| {
                if processor.is_live(object) {
                    Some(processor.remap(object))
                } else {
                    None
                }
            });
        }
    }
}

impl Collection for FakeVM {
    fn stop_mutators(&self) {
        assert!(
            !self.stopped.swap(true, Ordering::SeqCst),
            "Mutators are already stopped"
        );
        self.pauses.fetch_add(1, Ordering::SeqCst);
        let hidden = std::mem::take(&mut *self.hidden.lock().unwrap());
        if hidden.is_empty() {
            return;
        }
        let global = self.global();
        if global.phase() != DriverPhase::PauseMarkEnd {
            self.hidden.lock().unwrap().extend(hidden);
            return;
        }
        // The mutator reached the safe point after loading these and storing them into roots.
        let mut roots = self.roots.lock().unwrap();
        for object in hidden {
            roots.push(global.mark_barrier(object));
        }
    }

    fn resume_mutators(&self) {
        assert!(
            self.stopped.swap(false, Ordering::SeqCst),
            "Mutators are not stopped"
        );
    }
}

impl Barriers for FakeVM {
    fn publish_epoch(&self, epoch: u32) {
        self.epochs.lock().unwrap().push(epoch);
    }

    fn publish_relocation_set(&self, regions: &[Range<Address>]) {
        self.relocation_sets.lock().unwrap().push(regions.to_vec());
    }

    fn on_phase(&self, phase: DriverPhase) {
        self.phases.lock().unwrap().push(phase);
    }
}

impl VMBinding for FakeVM {}
