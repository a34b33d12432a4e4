use std::fmt;

use super::MAGAZINE_BYTES;
use crate::util::address::{Address, ObjectReference};

/// Why an object is on the mark stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Reached from a root or another object.
    Strong,
    /// Kept alive by reference processing.
    KeepAlive,
}

/// One mark stack slot: an object reference with the kind in the low bit.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct MarkStackEntry(usize);

const KEEP_ALIVE_BIT: usize = 1;

static_assertions::const_assert!(ObjectReference::ALIGNMENT > KEEP_ALIVE_BIT);
static_assertions::assert_eq_size!(MarkStackEntry, usize);
// Mark workers are shared by every GC thread through `AtomicRefCell`.
static_assertions::assert_impl_all!(Magazine: Send, Sync);

impl MarkStackEntry {
    pub fn new(object: ObjectReference, kind: EntryKind) -> Self {
        let raw = object.to_raw_address().as_usize();
        match kind {
            EntryKind::Strong => MarkStackEntry(raw),
            EntryKind::KeepAlive => MarkStackEntry(raw | KEEP_ALIVE_BIT),
        }
    }

    pub fn object(self) -> ObjectReference {
        // Entries are only made from object references, which are never zero.
        unsafe {
            ObjectReference::from_raw_address_unchecked(Address::from_usize(
                self.0 & !KEEP_ALIVE_BIT,
            ))
        }
    }

    pub fn kind(self) -> EntryKind {
        if self.0 & KEEP_ALIVE_BIT != 0 {
            EntryKind::KeepAlive
        } else {
            EntryKind::Strong
        }
    }
}

impl fmt::Debug for MarkStackEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}({})", self.kind(), self.object())
    }
}

/// A fixed-capacity stack of [`MarkStackEntry`] living in the mark stack space.
///
/// A magazine has exactly one owner at a time: the allocator's free list, a stripe's list of
/// published magazines, or a worker.  Handing it over moves the handle, which is why it is
/// neither `Clone` nor `Copy`.
pub struct Magazine {
    base: *mut MarkStackEntry,
    len: usize,
}

// A magazine is a unique handle to memory nobody else touches.
unsafe impl Send for Magazine {}
// `&Magazine` only reads `base` and `len`.  `push` and `pop` need `&mut`.
unsafe impl Sync for Magazine {}

impl Magazine {
    pub const CAPACITY: usize = MAGAZINE_BYTES / std::mem::size_of::<MarkStackEntry>();

    /// # Safety
    /// `base` must point to `MAGAZINE_BYTES` of committed memory that is used by no one else for
    /// as long as the magazine lives.
    pub(super) unsafe fn new(base: Address) -> Self {
        debug_assert!(base.is_aligned_to(std::mem::align_of::<MarkStackEntry>()));
        Self {
            base: base.to_mut_ptr(),
            len: 0,
        }
    }

    pub fn base(&self) -> Address {
        Address::from_mut_ptr(self.base)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == Self::CAPACITY
    }

    /// Push an entry.  Hand the entry back if the magazine is full.
    pub fn push(&mut self, entry: MarkStackEntry) -> Result<(), MarkStackEntry> {
        if self.is_full() {
            return Err(entry);
        }
        unsafe { self.base.add(self.len).write(entry) };
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<MarkStackEntry> {
        if self.is_empty() {
            return None;
        }
        self.len -= 1;
        Some(unsafe { self.base.add(self.len).read() })
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl fmt::Debug for Magazine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Magazine({}, {}/{})", self.base(), self.len, Self::CAPACITY)
    }
}
