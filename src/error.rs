//! Error type shared by every memory-management operation.

use std::fmt;

/// Which class of physical device an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Ram,
    Swap(usize),
    Tlb,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Ram => write!(f, "RAM"),
            DeviceKind::Swap(idx) => write!(f, "SWAP{}", idx),
            DeviceKind::Tlb => write!(f, "TLB"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmError {
    /// Region id outside the symbol table, or the region is not allocated.
    InvalidRegion(usize),
    /// Region id already holds a live allocation.
    RegionInUse(usize),
    /// No virtual memory area with this id.
    InvalidArea(usize),
    /// A proposed area range collides with a sibling area.
    Overlap { start: usize, end: usize },
    /// The device has no free frame left.
    DeviceExhausted(DeviceKind),
    InvalidSize(usize),
    OffsetOutOfRange { region: usize, offset: usize, len: usize },
    AddressOutOfRange { addr: usize, limit: usize },
    InvalidFrame { fpn: u32, frames: usize },
    InvalidDevice(usize),
    /// The page has neither a RAM frame nor a swap frame.
    PageNotMapped(u32),
    /// A fault needed a victim but no page is resident.
    NoVictim,
    InvalidConfig(String),
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmError::InvalidRegion(id) => write!(f, "invalid memory region {}", id),
            MmError::RegionInUse(id) => write!(f, "memory region {} is already allocated", id),
            MmError::InvalidArea(id) => write!(f, "invalid virtual memory area {}", id),
            MmError::Overlap { start, end } => {
                write!(f, "area range [{:#x}, {:#x}) overlaps another area", start, end)
            }
            MmError::DeviceExhausted(kind) => write!(f, "{} has no free frame", kind),
            MmError::InvalidSize(size) => write!(f, "invalid allocation size {}", size),
            MmError::OffsetOutOfRange { region, offset, len } => write!(
                f,
                "offset {} outside region {} of length {}",
                offset, region, len
            ),
            MmError::AddressOutOfRange { addr, limit } => {
                write!(f, "address {:#x} beyond limit {:#x}", addr, limit)
            }
            MmError::InvalidFrame { fpn, frames } => {
                write!(f, "frame {} outside device of {} frames", fpn, frames)
            }
            MmError::InvalidDevice(idx) => write!(f, "no swap device {}", idx),
            MmError::PageNotMapped(pgn) => write!(f, "page {} is not mapped", pgn),
            MmError::NoVictim => write!(f, "no resident page to evict"),
            MmError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for MmError {}

pub type Result<T> = core::result::Result<T, MmError>;
