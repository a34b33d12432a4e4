use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::constants::BITS_IN_WORD;

/// One mark bit per object granule of a region.
///
/// Setting a bit is an atomic `fetch_or`, so racing markers agree on which of them marked an
/// object first.  Clearing is not atomic with respect to setting; the owner clears only when no
/// marker can touch the bitmap.
pub struct MarkBitmap {
    words: Box<[AtomicUsize]>,
    nbits: usize,
}

impl MarkBitmap {
    pub fn new(nbits: usize) -> Self {
        let nwords = nbits.div_ceil(BITS_IN_WORD);
        Self {
            words: (0..nwords).map(|_| AtomicUsize::new(0)).collect(),
            nbits,
        }
    }

    pub fn len(&self) -> usize {
        self.nbits
    }

    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    fn locate(&self, bit: usize) -> (usize, usize) {
        debug_assert!(bit < self.nbits, "bit {} out of {}", bit, self.nbits);
        (bit / BITS_IN_WORD, 1 << (bit % BITS_IN_WORD))
    }

    /// Set `bit`.  Return true if this call changed it from 0 to 1.
    pub fn set(&self, bit: usize) -> bool {
        let (word, mask) = self.locate(bit);
        let old = self.words[word].fetch_or(mask, Ordering::AcqRel);
        old & mask == 0
    }

    pub fn is_set(&self, bit: usize) -> bool {
        let (word, mask) = self.locate(bit);
        self.words[word].load(Ordering::Acquire) & mask != 0
    }

    pub fn clear(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Indices of the set bits, in increasing order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, word)| {
            let mut bits = word.load(Ordering::Acquire);
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let offset = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(i * BITS_IN_WORD + offset)
            })
        })
    }
}
