//! Page table entry encoding.
//!
//! A PTE is a plain `u32`; the bit layout is part of the contract:
//!
//! ```text
//!  31 30 29 28 27 ........ 26..5 ........ 4..0
//!  P  S  R  D               swap offset    swap type   (swapped)
//!  P  S  R  D                   FPN (bits 12..0)       (present)
//! ```

use bitflags::bitflags;
use std::fmt;

use crate::constants::*;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT = 1 << 31;
        const SWAPPED = 1 << 30;
        const RESERVED = 1 << 29;
        const DIRTY = 1 << 28;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pte(u32);

impl Pte {
    pub const EMPTY: Pte = Pte(0);

    /// Entry for a page resident in RAM frame `fpn`
    pub fn present(fpn: u32) -> Self {
        Pte(PteFlags::PRESENT.bits() | (fpn & PTE_FPN_MASK))
    }

    /// Entry for a page stored in frame `offset` of swap device `swap_type`
    pub fn swapped(swap_type: u32, offset: u32) -> Self {
        Pte(PteFlags::SWAPPED.bits()
            | (swap_type & PTE_SWPTYP_MASK)
            | ((offset << PTE_SWPOFF_SHIFT) & PTE_SWPOFF_MASK))
    }

    #[inline]
    pub fn from_bits(raw: u32) -> Self {
        Pte(raw)
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    #[inline]
    pub fn is_present(self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    #[inline]
    pub fn is_swapped(self) -> bool {
        !self.is_present() && self.flags().contains(PteFlags::SWAPPED)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn fpn(self) -> Option<u32> {
        self.is_present().then_some(self.0 & PTE_FPN_MASK)
    }

    pub fn swap_type(self) -> Option<u32> {
        self.is_swapped().then_some(self.0 & PTE_SWPTYP_MASK)
    }

    pub fn swap_offset(self) -> Option<u32> {
        self.is_swapped().then_some((self.0 & PTE_SWPOFF_MASK) >> PTE_SWPOFF_SHIFT)
    }
}

impl fmt::Display for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.fpn(), self.swap_type(), self.swap_offset()) {
            (Some(fpn), _, _) => write!(f, "PTE({:08x}) present fpn={}", self.0, fpn),
            (None, Some(typ), Some(off)) => {
                write!(f, "PTE({:08x}) swapped dev={} off={}", self.0, typ, off)
            }
            _ => write!(f, "PTE({:08x}) empty", self.0),
        }
    }
}
