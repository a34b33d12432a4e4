use std::sync::Arc;

use rgc::util::address::{Address, ObjectReference};
use rgc::util::mark_stack::{
    EntryKind, MarkStackAllocator, MarkStackEntry, MarkStackSpace, MAGAZINE_BYTES,
};
use rgc::util::os::InMemory;

fn object(i: usize) -> ObjectReference {
    ObjectReference::from_raw_address(unsafe { Address::from_usize(0x1000_0000 + i * 16) }).unwrap()
}

#[test]
fn magazines_hold_entries_until_freed() {
    let memory = Arc::new(InMemory::new());
    let space = MarkStackSpace::with_expand_bytes(memory.clone(), 64 * MAGAZINE_BYTES, 4 * MAGAZINE_BYTES)
        .unwrap();
    let allocator = MarkStackAllocator::from_space(space);

    let mut magazine = allocator.alloc_magazine().unwrap();
    let mut pushed = 0;
    while magazine
        .push(MarkStackEntry::new(object(pushed), EntryKind::Strong))
        .is_ok()
    {
        pushed += 1;
    }
    assert!(magazine.is_full());
    assert!(pushed > 0);
    let top = magazine.pop().unwrap();
    assert_eq!(top.object(), object(pushed - 1));
    assert_eq!(top.kind(), EntryKind::Strong);

    allocator.free_magazine(magazine);
    assert_eq!(allocator.outstanding(), 0);
    allocator.free();
    assert_eq!(memory.committed_bytes(), 0);
}

#[test]
fn exhaustion_is_reported_and_recoverable() {
    let memory = Arc::new(InMemory::new());
    let space = MarkStackSpace::with_expand_bytes(memory.clone(), 8 * MAGAZINE_BYTES, MAGAZINE_BYTES)
        .unwrap();
    let allocator = MarkStackAllocator::from_space(space);

    let magazines: Vec<_> = (0..8).map(|_| allocator.alloc_magazine().unwrap()).collect();
    let err = allocator.alloc_magazine().unwrap_err();
    assert_eq!(err.limit, 8 * MAGAZINE_BYTES);
    assert_eq!(allocator.outstanding(), 8);

    // Returned magazines are reused before any new memory is needed.
    for magazine in magazines {
        allocator.free_magazine(magazine);
    }
    let again = allocator.alloc_magazine().unwrap();
    allocator.free_magazine(again);
    allocator.free();
    assert_eq!(allocator.space().used(), 0);
}

#[test]
fn keep_alive_entries_remember_their_kind() {
    let entry = MarkStackEntry::new(object(3), EntryKind::KeepAlive);
    assert_eq!(entry.object(), object(3));
    assert_eq!(entry.kind(), EntryKind::KeepAlive);
}
