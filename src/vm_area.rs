//! Virtual memory areas and their free-region lists.

use std::collections::VecDeque;
use std::fmt;

/// A `[start, end)` span of virtual addresses.
///
/// The zero span marks an unused symbol-table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub start: usize,
    pub end: usize,
}

impl Region {
    pub const UNUSED: Region = Region { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Region { start, end }
    }

    #[inline]
    pub fn is_unused(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        ranges_overlap(self.start, self.end, other.start, other.end)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}->{})", self.start, self.end)
    }
}

/// True when a boundary of one span falls strictly inside the other, or one
/// span contains the other.
pub fn ranges_overlap(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start < b_end && b_start < a_end
}

/// A contiguous virtual range with its growth break and free-region list.
#[derive(Debug, Clone)]
pub struct VmArea {
    pub id: usize,
    pub vm_start: usize,
    pub vm_end: usize,
    /// Everything below the break has been handed out or parked on the free list.
    pub sbrk: usize,
    free_regions: VecDeque<Region>,
}

impl VmArea {
    pub fn new(id: usize, vm_start: usize, vm_end: usize) -> Self {
        VmArea {
            id,
            vm_start,
            vm_end,
            sbrk: vm_start,
            free_regions: VecDeque::new(),
        }
    }

    /// Prepend a span to the free list. Empty spans are refused.
    pub fn enlist_free_region(&mut self, region: Region) -> bool {
        if region.is_empty() {
            return false;
        }
        self.free_regions.push_front(region);
        true
    }

    /// The span `take_first_fit(size)` would carve, without carving it
    pub fn peek_first_fit(&self, size: usize) -> Option<Region> {
        self.free_regions
            .iter()
            .find(|r| r.len() >= size)
            .map(|r| Region::new(r.start, r.start + size))
    }

    /// Carve `size` bytes from the first free span large enough to hold them.
    pub fn take_first_fit(&mut self, size: usize) -> Option<Region> {
        let idx = self.free_regions.iter().position(|r| r.len() >= size)?;
        let node = &mut self.free_regions[idx];
        let carved = Region::new(node.start, node.start + size);
        if node.len() > size {
            node.start += size;
        } else {
            self.free_regions.remove(idx);
        }
        Some(carved)
    }

    /// Bytes between the break and the end of the area
    #[inline]
    pub fn headroom(&self) -> usize {
        self.vm_end.saturating_sub(self.sbrk)
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        ranges_overlap(self.vm_start, self.vm_end, start, end)
    }

    pub fn free_regions(&self) -> impl Iterator<Item = &Region> {
        self.free_regions.iter()
    }
}
