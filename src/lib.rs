//! Demand-paged virtual memory simulator.
//!
//! Physical devices hand out fixed-size frames; each process owns an
//! [`AddressSpace`](address_space::AddressSpace) whose regions are backed by
//! RAM frames, swapped out in FIFO order when RAM runs short, and optionally
//! cached in a shared hashed TLB.

pub mod address_space;
pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod logger;
pub mod memory;
pub mod mmu;
pub mod pte;
pub mod tlb;
pub mod translation;
pub mod vm_area;

/// Process identifier, as stored in a TLB slot
pub type Pid = u8;

// Re-export commonly used items for convenience
pub use config::MmConfig;
pub use error::{DeviceKind, MmError, Result};
pub use mmu::{MemoryContext, MemorySystem};
pub use translation::VirtualAddress;
