//! Relocation set selection.  A pure function of region liveness, so it is tested without a heap.

/// Liveness of one region, as left by marking.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionLiveness {
    pub index: usize,
    pub size: usize,
    pub live_bytes: usize,
    pub live_objects: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// Regions with nothing live.  They are freed without relocation.
    pub empty: Vec<usize>,
    /// Regions to relocate, sparsest first.
    pub selected: Vec<usize>,
}

/// Is more than `fragmentation_limit` percent of the region garbage?
fn is_fragmented(region: &RegionLiveness, fragmentation_limit: f64) -> bool {
    (region.live_bytes as f64) * 100.0 < (region.size as f64) * (100.0 - fragmentation_limit)
}

/// Split `candidates` into empty regions and regions worth relocating.  Regions with live
/// objects and little garbage are left alone.
pub fn select(candidates: &[RegionLiveness], fragmentation_limit: f64) -> Selection {
    let mut selection = Selection::default();
    let mut fragmented = vec![];
    for region in candidates {
        if region.live_objects == 0 {
            selection.empty.push(region.index);
        } else if is_fragmented(region, fragmentation_limit) {
            fragmented.push(region);
        }
    }
    fragmented.sort_by_key(|r| (r.live_bytes, r.index));
    selection.selected = fragmented.into_iter().map(|r| r.index).collect();
    selection
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(index: usize, live_bytes: usize, live_objects: u32) -> RegionLiveness {
        RegionLiveness {
            index,
            size: 1000,
            live_bytes,
            live_objects,
        }
    }

    #[test]
    fn empty_and_sparse_regions() {
        let candidates = [
            region(0, 0, 0),
            region(1, 900, 9),
            region(2, 100, 1),
            region(3, 749, 7),
            region(4, 750, 7),
            region(5, 100, 2),
        ];
        let selection = select(&candidates, 25.0);
        assert_eq!(selection.empty, vec![0]);
        // Sparsest first, ties by index.
        assert_eq!(selection.selected, vec![2, 5, 3]);
    }

    #[test]
    fn limits() {
        let candidates = [region(0, 0, 0), region(1, 999, 1), region(2, 1, 1)];
        // Nothing is fragmented enough at 100%, but empty regions are still freed.
        assert_eq!(
            select(&candidates, 100.0),
            Selection {
                empty: vec![0],
                selected: vec![]
            }
        );
        // At 0%, every region with any garbage is selected.
        assert_eq!(select(&candidates, 0.0).selected, vec![2, 1]);
    }

    #[test]
    fn selection_is_deterministic() {
        let mut candidates: Vec<_> = (0..50).map(|i| region(i, (i * 37) % 700, 1)).collect();
        let first = select(&candidates, 25.0);
        candidates.reverse();
        assert_eq!(select(&candidates, 25.0), first);
    }
}
