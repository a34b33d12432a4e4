use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::EXPAND_BYTES;
use crate::util::address::Address;
use crate::util::constants::BYTES_IN_PAGE;
use crate::util::conversions::raw_align_up;
use crate::util::error::{GcError, MarkStackExhausted};
use crate::util::os::VirtualMemory;

/// The raw memory behind all mark stacks.
///
/// The whole limit is reserved up front.  Memory is committed from the start of the reservation
/// in `expand_bytes` steps as allocation needs it, and handed out by bumping `top`.  Nothing is
/// returned until [`MarkStackSpace::free`].
///
/// Invariant: `start <= top <= end <= start + limit`.
pub struct MarkStackSpace {
    memory: Arc<dyn VirtualMemory>,
    start: Address,
    limit: usize,
    expand_bytes: usize,
    /// Bump pointer.  Only advanced by CAS.
    top: AtomicUsize,
    /// End of the committed memory.  Only advanced while holding `expand_lock`.
    end: AtomicUsize,
    expand_lock: Mutex<()>,
}

impl MarkStackSpace {
    pub fn new(memory: Arc<dyn VirtualMemory>, limit: usize) -> Result<Self, GcError> {
        Self::with_expand_bytes(memory, limit, EXPAND_BYTES)
    }

    /// Like `new`, but expand in steps of `expand_bytes`.
    pub fn with_expand_bytes(
        memory: Arc<dyn VirtualMemory>,
        limit: usize,
        expand_bytes: usize,
    ) -> Result<Self, GcError> {
        let limit = raw_align_up(limit, BYTES_IN_PAGE);
        let expand_bytes = raw_align_up(expand_bytes, BYTES_IN_PAGE);
        let start = memory
            .reserve(limit, BYTES_IN_PAGE)
            .map_err(|source| GcError::Memory {
                what: "mark stack space",
                bytes: limit,
                source,
            })?;
        debug!(
            "Mark stack space: reserved {} at {}",
            crate::util::conversions::bytes_to_formatted_string(limit),
            start
        );
        Ok(Self {
            memory,
            start,
            limit,
            expand_bytes,
            top: AtomicUsize::new(start.as_usize()),
            end: AtomicUsize::new(start.as_usize()),
            expand_lock: Mutex::new(()),
        })
    }

    pub fn start(&self) -> Address {
        self.start
    }

    /// Bytes handed out since the last `free`.
    pub fn used(&self) -> usize {
        self.top.load(Ordering::Relaxed) - self.start.as_usize()
    }

    /// Bytes committed.
    pub fn size(&self) -> usize {
        self.end.load(Ordering::Acquire) - self.start.as_usize()
    }

    /// Bytes reserved, i.e. the limit.
    pub fn reserved(&self) -> usize {
        self.limit
    }

    /// Allocate `bytes` of committed memory.  Fails once the limit is reached or the memory can't
    /// be committed.  The same range is never returned twice before `free`.
    pub fn alloc(&self, bytes: usize) -> Result<Address, MarkStackExhausted> {
        loop {
            if let Some(addr) = self.alloc_space(bytes) {
                return Ok(addr);
            }
            self.expand(bytes)?;
        }
    }

    fn alloc_space(&self, bytes: usize) -> Option<Address> {
        let mut top = self.top.load(Ordering::Relaxed);
        loop {
            let end = self.end.load(Ordering::Acquire);
            let new_top = top + bytes;
            if new_top > end {
                return None;
            }
            match self.top.compare_exchange_weak(
                top,
                new_top,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(unsafe { Address::from_usize(top) }),
                Err(current) => top = current,
            }
        }
    }

    fn expand(&self, bytes: usize) -> Result<(), MarkStackExhausted> {
        let _guard = self.expand_lock.lock().unwrap();

        let end = self.end.load(Ordering::Acquire);
        if self.top.load(Ordering::Relaxed) + bytes <= end {
            // Someone else expanded while we waited for the lock.
            return Ok(());
        }

        let committed = end - self.start.as_usize();
        let remaining = self.limit - committed;
        let exhausted = MarkStackExhausted {
            requested: bytes,
            limit: self.limit,
        };
        if remaining < bytes {
            warn!("Mark stack space exhausted: {} used", committed);
            return Err(exhausted);
        }

        let expand = std::cmp::min(std::cmp::max(self.expand_bytes, bytes), remaining);
        let expand = raw_align_up(expand, BYTES_IN_PAGE).min(remaining);
        let end = unsafe { Address::from_usize(end) };
        if let Err(e) = self.memory.commit(end, expand) {
            warn!("Failed to expand mark stack space by {}: {}", expand, e);
            return Err(exhausted);
        }
        debug!(
            "Expanded mark stack space: {}M->{}M ({}M limit)",
            committed >> 20,
            (committed + expand) >> 20,
            self.limit >> 20
        );
        self.end.store((end + expand).as_usize(), Ordering::Release);
        Ok(())
    }

    /// Forget all allocations and uncommit everything.
    ///
    /// Only call this when no memory handed out is in use.
    pub fn free(&self) {
        let _guard = self.expand_lock.lock().unwrap();
        let size = self.size();
        if size > 0 {
            if let Err(e) = self.memory.uncommit(self.start, size) {
                // Keep it committed.  It is reused from the start.
                warn!("Failed to uncommit mark stack space: {}", e);
                self.top.store(self.start.as_usize(), Ordering::Relaxed);
                return;
            }
        }
        self.top.store(self.start.as_usize(), Ordering::Relaxed);
        self.end.store(self.start.as_usize(), Ordering::Release);
    }
}

impl Drop for MarkStackSpace {
    fn drop(&mut self) {
        if let Err(e) = self.memory.release(self.start, self.limit) {
            warn!("Failed to release mark stack space: {}", e);
        }
    }
}
