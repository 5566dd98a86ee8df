use std::ops::RangeInclusive;

use crate::constants::*;

/// Represents the decomposed components of a virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAddress {
    pub va: u32,
    pub pgn: u32,
    pub offset: u32,
}

impl VirtualAddress {
    /// Decompose a raw VA into page number and page offset
    pub fn from_raw(va: u32) -> Self {
        VirtualAddress {
            va,
            pgn: va >> PAGE_SHIFT,
            offset: va & OFFSET_MASK,
        }
    }

    /// Physical address of this VA once its page lives in frame `fpn`
    #[inline]
    pub fn physical(&self, fpn: u32) -> usize {
        ((fpn as usize) << PAGE_SHIFT) + self.offset as usize
    }
}

impl std::fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VA({:#x}) = (pgn={}, off={})", self.va, self.pgn, self.offset)
    }
}

/// Round `size` up to a whole number of pages; `None` on overflow
#[inline]
pub fn page_align_up(size: usize) -> Option<usize> {
    size.checked_next_multiple_of(PAGE_SIZE)
}

/// Page numbers touched by the byte span `[start, end)`; `None` when empty
pub fn pages_spanned(start: usize, end: usize) -> Option<RangeInclusive<u32>> {
    if start >= end {
        return None;
    }
    let first = (start >> PAGE_SHIFT) as u32;
    let last = ((end - 1) >> PAGE_SHIFT) as u32;
    Some(first..=last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_va_decomposition() {
        let va = VirtualAddress::from_raw(0x1234);
        assert_eq!(va.pgn, 0x12);
        assert_eq!(va.offset, 0x34);
    }

    #[test]
    fn test_va_decomposition_edge_cases() {
        let va = VirtualAddress::from_raw(0);
        assert_eq!(va.pgn, 0);
        assert_eq!(va.offset, 0);

        // Last byte of the 22-bit space
        let va = VirtualAddress::from_raw((1 << 22) - 1);
        assert_eq!(va.pgn as usize, MAX_PGN - 1);
        assert_eq!(va.offset, 255);
    }

    #[test]
    fn test_va_reconstruction() {
        for &original in &[0u32, 1, 255, 256, 789002, 0x3F_FFFF] {
            let va = VirtualAddress::from_raw(original);
            let reconstructed = (va.pgn << PAGE_SHIFT) | va.offset;
            assert_eq!(reconstructed, original, "Failed for VA={}", original);
        }
    }

    #[test]
    fn test_physical_address() {
        let va = VirtualAddress::from_raw(0x0310);
        assert_eq!(va.physical(0), 0x10);
        assert_eq!(va.physical(9), 9 * 256 + 0x10);
    }

    #[test]
    fn test_display() {
        let display = format!("{}", VirtualAddress::from_raw(0x1234));
        assert!(display.contains("0x1234"));
        assert!(display.contains("pgn=18"));
        assert!(display.contains("off=52"));
    }

    #[test]
    fn test_page_align_up() {
        assert_eq!(page_align_up(0), Some(0));
        assert_eq!(page_align_up(1), Some(256));
        assert_eq!(page_align_up(256), Some(256));
        assert_eq!(page_align_up(257), Some(512));
        assert_eq!(page_align_up(usize::MAX), None);
    }

    #[test]
    fn test_pages_spanned() {
        assert_eq!(pages_spanned(0, 0), None);
        assert_eq!(pages_spanned(0, 64), Some(0..=0));
        assert_eq!(pages_spanned(0, 256), Some(0..=0));
        assert_eq!(pages_spanned(250, 300), Some(0..=1));
        assert_eq!(pages_spanned(512, 1024), Some(2..=3));
    }
}
