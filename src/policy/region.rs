use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::OnceLock;

use atomic::Atomic;
use bytemuck::NoUninit;

use super::mark_bitmap::MarkBitmap;
use crate::util::address::{Address, ObjectReference};
use crate::util::conversions::raw_align_up;

/// The life cycle of a region.
///
/// `Free -> Allocating -> (Relocating -> Detached ->) Free`.  A `Detached` region holds no live
/// objects any more, but its forwarding information is still needed to heal stale references.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit)]
pub enum RegionState {
    Free,
    Allocating,
    Relocating,
    Detached,
}

/// Epoch 0 means "never marked".  Real epochs start at 1.
pub const NO_EPOCH: u32 = 0;

/// A fixed-size, aligned part of the heap.
pub struct Region {
    index: usize,
    start: Address,
    size: usize,
    state: Atomic<RegionState>,
    /// Bump allocation cursor.
    top: AtomicUsize,
    numa_id: AtomicUsize,
    /// The epoch the region was (re)allocated in.  Everything allocated into a region during the
    /// epoch it was allocated in is live for that epoch without being marked.
    alloc_epoch: AtomicU32,
    /// The epoch the mark bitmap and the liveness counters belong to.
    mark_epoch: AtomicU32,
    live_objects: AtomicU32,
    live_bytes: AtomicUsize,
    /// Created when the region is first allocated.
    bitmap: OnceLock<MarkBitmap>,
    reset_lock: spin::Mutex<()>,
}

impl Region {
    pub fn new(index: usize, start: Address, size: usize) -> Self {
        Self {
            index,
            start,
            size,
            state: Atomic::new(RegionState::Free),
            top: AtomicUsize::new(start.as_usize()),
            numa_id: AtomicUsize::new(0),
            alloc_epoch: AtomicU32::new(NO_EPOCH),
            mark_epoch: AtomicU32::new(NO_EPOCH),
            live_objects: AtomicU32::new(0),
            live_bytes: AtomicUsize::new(0),
            bitmap: OnceLock::new(),
            reset_lock: spin::Mutex::new(()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + self.size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn top(&self) -> Address {
        unsafe { Address::from_usize(self.top.load(Ordering::Acquire)) }
    }

    pub fn used_bytes(&self) -> usize {
        self.top() - self.start
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr.is_in_range(self.start, self.size)
    }

    pub fn state(&self) -> RegionState {
        self.state.load(Ordering::Acquire)
    }

    pub fn set_state(&self, state: RegionState) {
        trace!("Region {}: {:?} -> {:?}", self.index, self.state(), state);
        self.state.store(state, Ordering::Release);
    }

    pub fn numa_id(&self) -> usize {
        self.numa_id.load(Ordering::Relaxed)
    }

    pub fn alloc_epoch(&self) -> u32 {
        self.alloc_epoch.load(Ordering::Acquire)
    }

    /// Was this region allocated in `epoch`?  Its objects are then live without being marked.
    pub fn is_allocated_in(&self, epoch: u32) -> bool {
        self.alloc_epoch() == epoch
    }

    /// Start allocating into a freshly committed region.
    pub(crate) fn reset_for_allocation(&self, epoch: u32, numa_id: usize) {
        debug_assert_eq!(self.state(), RegionState::Free);
        self.top.store(self.start.as_usize(), Ordering::Release);
        self.numa_id.store(numa_id, Ordering::Relaxed);
        self.alloc_epoch.store(epoch, Ordering::Release);
        self.mark_epoch.store(NO_EPOCH, Ordering::Release);
        self.live_objects.store(0, Ordering::Relaxed);
        self.live_bytes.store(0, Ordering::Relaxed);
        self.bitmap().clear();
        self.set_state(RegionState::Allocating);
    }

    /// Bump-allocate `bytes` (rounded up to the object alignment).  Fails if the region is full
    /// or not allocating.
    pub fn alloc(&self, bytes: usize) -> Option<Address> {
        if self.state() != RegionState::Allocating {
            return None;
        }
        let bytes = raw_align_up(bytes, ObjectReference::ALIGNMENT);
        let end = self.end().as_usize();
        let mut top = self.top.load(Ordering::Relaxed);
        loop {
            let new_top = top.checked_add(bytes)?;
            if new_top > end {
                return None;
            }
            match self
                .top
                .compare_exchange_weak(top, new_top, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Some(unsafe { Address::from_usize(top) }),
                Err(current) => top = current,
            }
        }
    }

    fn bitmap(&self) -> &MarkBitmap {
        self.bitmap
            .get_or_init(|| MarkBitmap::new(self.size / ObjectReference::ALIGNMENT))
    }

    fn bit_of(&self, object: ObjectReference) -> usize {
        let addr = object.to_raw_address();
        debug_assert!(self.contains(addr), "{} is not in region {}", addr, self.index);
        (addr - self.start) / ObjectReference::ALIGNMENT
    }

    /// Reset the mark bitmap and liveness counters the first time the region is touched in a new
    /// epoch.
    fn ensure_mark_epoch(&self, epoch: u32) {
        if self.mark_epoch.load(Ordering::Acquire) == epoch {
            return;
        }
        let _guard = self.reset_lock.lock();
        if self.mark_epoch.load(Ordering::Acquire) == epoch {
            return;
        }
        self.bitmap().clear();
        self.live_objects.store(0, Ordering::Relaxed);
        self.live_bytes.store(0, Ordering::Relaxed);
        self.mark_epoch.store(epoch, Ordering::Release);
    }

    /// Mark `object` for `epoch`.  Return true if this call marked it.
    pub fn mark(&self, object: ObjectReference, epoch: u32) -> bool {
        self.ensure_mark_epoch(epoch);
        self.bitmap().set(self.bit_of(object))
    }

    pub fn is_marked(&self, object: ObjectReference, epoch: u32) -> bool {
        if self.is_allocated_in(epoch) {
            return true;
        }
        self.mark_epoch.load(Ordering::Acquire) == epoch && self.bitmap().is_set(self.bit_of(object))
    }

    /// Add liveness.  Marking must have touched the region in the current epoch.
    pub fn inc_live(&self, objects: u32, bytes: usize) {
        self.live_objects.fetch_add(objects, Ordering::Relaxed);
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Live objects found by marking in `epoch`.  Zero if marking never touched the region in
    /// that epoch.
    pub fn live_objects(&self, epoch: u32) -> u32 {
        if self.mark_epoch.load(Ordering::Acquire) == epoch {
            self.live_objects.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn live_bytes(&self, epoch: u32) -> usize {
        if self.mark_epoch.load(Ordering::Acquire) == epoch {
            self.live_bytes.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// Objects marked in `epoch`, in address order.
    pub fn marked_objects(&self, epoch: u32) -> Vec<ObjectReference> {
        if self.mark_epoch.load(Ordering::Acquire) != epoch {
            return vec![];
        }
        self.bitmap()
            .iter_set()
            .map(|bit| unsafe {
                ObjectReference::from_raw_address_unchecked(
                    self.start + bit * ObjectReference::ALIGNMENT,
                )
            })
            .collect()
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Region #{} [{}, {}) {:?} top={}",
            self.index,
            self.start,
            self.end(),
            self.state(),
            self.top()
        )
    }
}
