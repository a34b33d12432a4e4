use std::alloc::Layout;
use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::memory::*;
use crate::util::address::Address;
use crate::util::constants::BYTES_IN_PAGE;

/// A [`VirtualMemory`] backed by the Rust global allocator.
///
/// Every reservation is a zeroed heap allocation, so the collector's memory handling can be
/// exercised without touching OS mappings.  The type also counts committed bytes and can be told
/// to start failing commits, which is how tests run the mark stack space into its limit.
pub struct InMemory {
    sync: Mutex<InMemorySync>,
    committed: AtomicUsize,
    commit_calls: AtomicUsize,
    /// Commits fail once this reaches zero.  `usize::MAX` means never.
    commit_budget: AtomicUsize,
}

struct InMemorySync {
    /// start -> layout of every live reservation
    reservations: BTreeMap<usize, Layout>,
    /// start -> size of every committed range
    commits: BTreeMap<usize, usize>,
}

impl Default for InMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemory {
    pub fn new() -> Self {
        Self {
            sync: Mutex::new(InMemorySync {
                reservations: BTreeMap::new(),
                commits: BTreeMap::new(),
            }),
            committed: AtomicUsize::new(0),
            commit_calls: AtomicUsize::new(0),
            commit_budget: AtomicUsize::new(usize::MAX),
        }
    }

    /// Allow only `n` more successful commits.
    pub fn fail_commits_after(&self, n: usize) {
        self.commit_budget.store(n, Ordering::SeqCst);
    }

    /// Bytes currently committed.
    pub fn committed_bytes(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    /// Number of successful commits so far.
    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    fn check_in_reservation(sync: &InMemorySync, start: Address, bytes: usize) -> Result<()> {
        let inside = sync
            .reservations
            .range(..=start.as_usize())
            .next_back()
            .map(|(s, layout)| start.as_usize() + bytes <= s + layout.size())
            .unwrap_or(false);
        if inside {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::InvalidInput,
                format!("{} + {} is not inside a reservation", start, bytes),
            ))
        }
    }

    fn take_budget(&self) -> bool {
        self.commit_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |budget| match budget {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl VirtualMemory for InMemory {
    fn reserve(&self, bytes: usize, align: usize) -> Result<Address> {
        let align = std::cmp::max(align, BYTES_IN_PAGE);
        let layout = Layout::from_size_align(bytes, align)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, e))?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(Error::new(ErrorKind::OutOfMemory, "allocation failed"));
        }
        let start = Address::from_mut_ptr(ptr);
        let mut sync = self.sync.lock().unwrap();
        sync.reservations.insert(start.as_usize(), layout);
        Ok(start)
    }

    fn commit(&self, start: Address, bytes: usize) -> Result<()> {
        let mut sync = self.sync.lock().unwrap();
        Self::check_in_reservation(&sync, start, bytes)?;
        if !self.take_budget() {
            return Err(Error::new(ErrorKind::OutOfMemory, "commit budget exhausted"));
        }
        let old = sync.commits.insert(start.as_usize(), bytes);
        debug_assert!(old.is_none(), "{} committed twice", start);
        self.committed.fetch_add(bytes, Ordering::SeqCst);
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn uncommit(&self, start: Address, bytes: usize) -> Result<()> {
        let mut sync = self.sync.lock().unwrap();
        Self::check_in_reservation(&sync, start, bytes)?;
        // Forget every commit inside the range.
        let end = start.as_usize() + bytes;
        let inside: Vec<(usize, usize)> = sync
            .commits
            .range(start.as_usize()..end)
            .map(|(s, b)| (*s, *b))
            .collect();
        for (s, b) in inside {
            sync.commits.remove(&s);
            self.committed.fetch_sub(b, Ordering::SeqCst);
        }
        // The next commit must read as zero.
        unsafe { std::ptr::write_bytes(start.to_mut_ptr::<u8>(), 0, bytes) };
        Ok(())
    }

    fn protect(&self, start: Address, bytes: usize, _prot: MmapProtection) -> Result<()> {
        let sync = self.sync.lock().unwrap();
        Self::check_in_reservation(&sync, start, bytes)
    }

    fn release(&self, start: Address, bytes: usize) -> Result<()> {
        self.uncommit(start, bytes)?;
        let mut sync = self.sync.lock().unwrap();
        match sync.reservations.remove(&start.as_usize()) {
            Some(layout) => {
                unsafe { std::alloc::dealloc(start.to_mut_ptr(), layout) };
                Ok(())
            }
            None => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not a reservation", start),
            )),
        }
    }
}

impl Drop for InMemory {
    fn drop(&mut self) {
        let sync = self.sync.get_mut().unwrap();
        for (start, layout) in std::mem::take(&mut sync.reservations) {
            unsafe { std::alloc::dealloc(start as *mut u8, layout) };
        }
    }
}
