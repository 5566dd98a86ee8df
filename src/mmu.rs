//! Caller-facing memory operations.
//!
//! A [`MemorySystem`] owns the devices of one simulated machine; every
//! process gets a [`MemoryContext`] bound to it. Contexts are `Sync`, so
//! each simulated process can drive its own context from its own thread.

use std::sync::Arc;

use log::{debug, info, warn};
use spin::Mutex;

use crate::Pid;
use crate::address_space::{AddressSpace, Devices};
use crate::config::MmConfig;
use crate::error::{DeviceKind, Result};
use crate::memory::MemoryDevice;
use crate::tlb::TlbCache;
use crate::translation::pages_spanned;

/// Default area for the caller-facing operations
const DEFAULT_VMA: usize = 0;

pub struct MemorySystem {
    config: MmConfig,
    ram: MemoryDevice,
    swaps: Vec<MemoryDevice>,
    tlb: TlbCache,
}

impl MemorySystem {
    pub fn new(config: MmConfig) -> Result<Self> {
        config.validate()?;
        let ram = MemoryDevice::new(DeviceKind::Ram, config.ram_size, config.ram_mode)?;
        let swaps = config
            .swap_sizes
            .iter()
            .enumerate()
            .map(|(idx, &size)| MemoryDevice::new(DeviceKind::Swap(idx), size, config.swap_mode))
            .collect::<Result<Vec<_>>>()?;
        let tlb = TlbCache::new(config.tlb_slots)?;
        info!(
            "memory system: {} RAM frames, {} swap devices, {} TLB slots",
            ram.frame_count(),
            swaps.len(),
            tlb.slots()
        );
        Ok(MemorySystem { config, ram, swaps, tlb })
    }

    pub fn config(&self) -> &MmConfig {
        &self.config
    }

    pub fn ram(&self) -> &MemoryDevice {
        &self.ram
    }

    pub fn swaps(&self) -> &[MemoryDevice] {
        &self.swaps
    }

    pub fn tlb(&self) -> &TlbCache {
        &self.tlb
    }

    fn devices(&self) -> Devices<'_> {
        Devices {
            ram: &self.ram,
            swaps: &self.swaps,
            active_swap: self.config.active_swap,
        }
    }
}

/// One process's view of memory. Dropping it tears the address space down.
pub struct MemoryContext {
    pid: Pid,
    system: Arc<MemorySystem>,
    mm: Mutex<AddressSpace>,
}

impl MemoryContext {
    pub fn new(pid: Pid, system: Arc<MemorySystem>) -> Self {
        let mut mm = AddressSpace::new();
        mm.set_evict_on_exhaustion(system.config().evict_on_exhaustion);
        debug!("pid {}: address space created", pid);
        MemoryContext { pid, system, mm: Mutex::new(mm) }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn system(&self) -> &MemorySystem {
        &self.system
    }

    /// Run `f` against the address space, for inspection
    pub fn inspect<R>(&self, f: impl FnOnce(&AddressSpace) -> R) -> R {
        f(&self.mm.lock())
    }

    pub fn add_area(&self, start: usize, end: usize) -> Result<usize> {
        self.mm.lock().add_area(start, end)
    }

    // =========================================================================
    // Page-table path
    // =========================================================================

    pub fn allocate(&self, size: usize, region_id: usize) -> Result<usize> {
        self.allocate_in(DEFAULT_VMA, size, region_id)
    }

    pub fn allocate_in(&self, vma_id: usize, size: usize, region_id: usize) -> Result<usize> {
        let mut mm = self.mm.lock();
        self.alloc_locked(&mut mm, vma_id, size, region_id)
    }

    fn alloc_locked(
        &self,
        mm: &mut AddressSpace,
        vma_id: usize,
        size: usize,
        region_id: usize,
    ) -> Result<usize> {
        let result = mm.alloc(self.system.devices(), vma_id, region_id, size);
        self.drop_evicted(mm);
        result.inspect_err(|e| warn!("pid {}: alloc {} bytes at region {}: {}", self.pid, size, region_id, e))
    }

    pub fn free(&self, region_id: usize) -> Result<()> {
        self.free_in(DEFAULT_VMA, region_id)
    }

    pub fn free_in(&self, vma_id: usize, region_id: usize) -> Result<()> {
        let mut mm = self.mm.lock();
        mm.free(vma_id, region_id)
            .inspect_err(|e| warn!("pid {}: free region {}: {}", self.pid, region_id, e))?;
        self.system.tlb().invalidate(self.pid);
        Ok(())
    }

    pub fn read_region(&self, region_id: usize, offset: usize) -> Result<u8> {
        self.read_in(DEFAULT_VMA, region_id, offset)
    }

    pub fn read_in(&self, vma_id: usize, region_id: usize, offset: usize) -> Result<u8> {
        let mut mm = self.mm.lock();
        let result = mm.read(self.system.devices(), vma_id, region_id, offset);
        self.drop_evicted(&mut mm);
        result.inspect_err(|e| warn!("pid {}: read region {}+{}: {}", self.pid, region_id, offset, e))
    }

    pub fn write_region(&self, region_id: usize, offset: usize, value: u8) -> Result<()> {
        self.write_in(DEFAULT_VMA, region_id, offset, value)
    }

    pub fn write_in(&self, vma_id: usize, region_id: usize, offset: usize, value: u8) -> Result<()> {
        let mut mm = self.mm.lock();
        let result = mm.write(self.system.devices(), vma_id, region_id, offset, value);
        self.drop_evicted(&mut mm);
        result.inspect_err(|e| warn!("pid {}: write region {}+{}: {}", self.pid, region_id, offset, e))
    }

    // =========================================================================
    // TLB path
    // =========================================================================

    /// Allocate, then cache every resident page of the new region.
    /// Both steps run under one hold of the address-space lock.
    pub fn tlb_allocate(&self, size: usize, region_id: usize) -> Result<usize> {
        let mut mm = self.mm.lock();
        let addr = self.alloc_locked(&mut mm, DEFAULT_VMA, size, region_id)?;
        let region = mm.region(region_id)?;
        if let Some(pages) = pages_spanned(region.start, region.end) {
            for pgn in pages {
                if let Some(fpn) = mm.pte(pgn).fpn() {
                    self.system.tlb().insert(self.pid, pgn, fpn)?;
                }
            }
        }
        Ok(addr)
    }

    pub fn tlb_free(&self, region_id: usize) -> Result<()> {
        self.free(region_id)
    }

    pub fn tlb_read(&self, region_id: usize, offset: usize) -> Result<u8> {
        let mut mm = self.mm.lock();
        let va = mm.translate(DEFAULT_VMA, region_id, offset)?;
        let fpn = self.cached_frame(&mut mm, va.pgn)?;
        self.system.ram().read(va.physical(fpn))
    }

    pub fn tlb_write(&self, region_id: usize, offset: usize, value: u8) -> Result<()> {
        let mut mm = self.mm.lock();
        let va = mm.translate(DEFAULT_VMA, region_id, offset)?;
        let fpn = self.cached_frame(&mut mm, va.pgn)?;
        self.system.ram().write(va.physical(fpn), value)
    }

    /// Frame for `pgn` from the TLB, or from the page table with the TLB refreshed
    fn cached_frame(&self, mm: &mut AddressSpace, pgn: u32) -> Result<u32> {
        let tlb = self.system.tlb();
        if let Some(fpn) = tlb.lookup(self.pid, pgn) {
            tlb.record_hit();
            debug!("pid {}: TLB hit pgn {} -> fpn {}", self.pid, pgn, fpn);
            return Ok(fpn);
        }
        tlb.record_miss();
        let result = mm.resolve(self.system.devices(), pgn);
        self.drop_evicted(mm);
        let fpn = result?;
        tlb.insert(self.pid, pgn, fpn)?;
        debug!("pid {}: TLB miss pgn {} -> fpn {}", self.pid, pgn, fpn);
        Ok(fpn)
    }

    /// Forget cached translations of pages that were just swapped out
    fn drop_evicted(&self, mm: &mut AddressSpace) {
        for pgn in mm.take_evicted() {
            self.system.tlb().invalidate_page(self.pid, pgn);
        }
    }

    /// Tear the process's memory down now
    pub fn exit(self) {
        info!("pid {}: exit", self.pid);
    }
}

impl Drop for MemoryContext {
    fn drop(&mut self) {
        let mm = self.mm.get_mut();
        match mm.release(self.system.devices()) {
            Ok(frames) => debug!("pid {}: returned {} frames", self.pid, frames),
            Err(e) => warn!("pid {}: teardown incomplete: {}", self.pid, e),
        }
        self.system.tlb().invalidate(self.pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::error::MmError;
    use crate::vm_area::Region;

    fn system(ram_frames: usize, swap_frames: usize, evict: bool) -> Arc<MemorySystem> {
        let config = MmConfig {
            ram_size: ram_frames * PAGE_SIZE,
            swap_sizes: vec![swap_frames * PAGE_SIZE],
            tlb_slots: 64,
            evict_on_exhaustion: evict,
            ..Default::default()
        };
        Arc::new(MemorySystem::new(config).unwrap())
    }

    #[test]
    fn test_end_to_end_scenario() {
        let sys = system(8, 8, false);
        let ctx = MemoryContext::new(1, sys.clone());

        let addr = ctx.allocate(64, 0).unwrap();
        assert_eq!(addr, 0);
        assert_eq!(ctx.inspect(|mm| mm.area(0).unwrap().sbrk), PAGE_SIZE);

        ctx.write_region(0, 0, 0x7A).unwrap();
        assert_eq!(ctx.read_region(0, 0).unwrap(), 0x7A);

        assert_eq!(ctx.tlb_read(0, 0).unwrap(), 0x7A); // miss, inserts
        assert_eq!(ctx.tlb_read(0, 0).unwrap(), 0x7A); // hit
        assert!(sys.tlb().invalidate(1) > 0);
        assert_eq!(ctx.tlb_read(0, 0).unwrap(), 0x7A); // miss again, reinserted
        assert_eq!(ctx.tlb_read(0, 0).unwrap(), 0x7A);
        assert_eq!(sys.tlb().stats().hits, 2);
        assert_eq!(sys.tlb().stats().misses, 2);
    }

    #[test]
    fn test_tlb_allocate_prefills_cache() {
        let sys = system(8, 8, false);
        let ctx = MemoryContext::new(2, sys.clone());
        ctx.tlb_allocate(300, 0).unwrap();
        let fpn0 = ctx.inspect(|mm| mm.pte(0).fpn());
        let fpn1 = ctx.inspect(|mm| mm.pte(1).fpn());
        assert_eq!(sys.tlb().lookup(2, 0), fpn0);
        assert_eq!(sys.tlb().lookup(2, 1), fpn1);

        ctx.tlb_write(0, 299, 9).unwrap();
        assert_eq!(sys.tlb().stats().hits, 1);
        assert_eq!(ctx.read_region(0, 299).unwrap(), 9);
    }

    #[test]
    fn test_tlb_and_page_table_paths_agree() {
        let sys = system(8, 8, false);
        let ctx = MemoryContext::new(3, sys);
        ctx.allocate(32, 0).unwrap();
        ctx.tlb_write(0, 7, 0x42).unwrap();
        assert_eq!(ctx.read_region(0, 7).unwrap(), 0x42);
        ctx.write_region(0, 8, 0x43).unwrap();
        assert_eq!(ctx.tlb_read(0, 8).unwrap(), 0x43);
    }

    #[test]
    fn test_free_invalidates_tlb() {
        let sys = system(8, 8, false);
        let ctx = MemoryContext::new(4, sys.clone());
        ctx.tlb_allocate(64, 0).unwrap();
        assert!(sys.tlb().lookup(4, 0).is_some());
        ctx.tlb_free(0).unwrap();
        assert_eq!(sys.tlb().lookup(4, 0), None);
        assert_eq!(ctx.tlb_read(0, 0), Err(MmError::InvalidRegion(0)));
    }

    #[test]
    fn test_evicted_page_not_served_from_tlb() {
        let sys = system(2, 8, true);
        let ctx = MemoryContext::new(5, sys.clone());
        ctx.tlb_allocate(PAGE_SIZE, 0).unwrap();
        ctx.tlb_allocate(PAGE_SIZE, 1).unwrap();
        ctx.tlb_write(0, 0, 0xAA).unwrap();
        ctx.tlb_write(1, 0, 0xBB).unwrap();

        // page 0 is evicted to make room; its cached frame now belongs to page 2
        ctx.tlb_allocate(PAGE_SIZE, 2).unwrap();
        assert_eq!(sys.tlb().lookup(5, 0), None);
        ctx.tlb_write(2, 0, 0xCC).unwrap();

        assert_eq!(ctx.tlb_read(0, 0).unwrap(), 0xAA);
        assert_eq!(ctx.tlb_read(1, 0).unwrap(), 0xBB);
        assert_eq!(ctx.tlb_read(2, 0).unwrap(), 0xCC);
    }

    #[test]
    fn test_errors_surface_to_caller() {
        let sys = system(1, 8, false);
        let ctx = MemoryContext::new(6, sys);
        assert_eq!(ctx.free(SYMBOL_TABLE_SIZE), Err(MmError::InvalidRegion(SYMBOL_TABLE_SIZE)));
        assert_eq!(ctx.read_region(0, 0), Err(MmError::InvalidRegion(0)));
        assert_eq!(ctx.allocate_in(2, 8, 0), Err(MmError::InvalidArea(2)));
        ctx.allocate(PAGE_SIZE, 0).unwrap();
        assert_eq!(ctx.allocate(1, 1), Err(MmError::DeviceExhausted(DeviceKind::Ram)));
    }

    #[test]
    fn test_operations_in_second_area() {
        let sys = system(8, 8, false);
        let ctx = MemoryContext::new(10, sys);
        let vma = ctx.add_area(4 * PAGE_SIZE, 8 * PAGE_SIZE).unwrap();
        assert_eq!(ctx.allocate_in(vma, 100, 3).unwrap(), 4 * PAGE_SIZE);
        ctx.write_in(vma, 3, 99, 0x5C).unwrap();
        assert_eq!(ctx.read_in(vma, 3, 99).unwrap(), 0x5C);
        ctx.free_in(vma, 3).unwrap();
        assert_eq!(ctx.read_in(vma, 3, 0), Err(MmError::InvalidRegion(3)));
        let spans: Vec<Region> = ctx.inspect(|mm| mm.area(vma).unwrap().free_regions().copied().collect());
        assert_eq!(spans, vec![Region::new(4 * PAGE_SIZE, 4 * PAGE_SIZE + 100)]);
    }

    #[test]
    fn test_tlb_allocate_races_free_on_same_context() {
        let sys = system(256, 8, false);
        let ctx = MemoryContext::new(11, sys);
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..100 {
                    assert_eq!(ctx.tlb_allocate(64, 0), Ok(0));
                    ctx.free(0).ok();
                }
            });
            s.spawn(|| {
                for _ in 0..100 {
                    ctx.free(0).ok();
                }
            });
        });
    }

    #[test]
    fn test_drop_returns_frames_and_clears_tlb() {
        let sys = system(4, 8, true);
        {
            let ctx = MemoryContext::new(7, sys.clone());
            for region in 0..6 {
                ctx.tlb_allocate(PAGE_SIZE, region).unwrap();
            }
            ctx.free(5).unwrap();
            ctx.tlb_read(0, 0).unwrap();
            assert_eq!(sys.ram().free_count(), 0);
            ctx.exit();
        }
        assert_eq!(sys.ram().free_count(), 4);
        assert!(sys.ram().used_frames().is_empty());
        assert_eq!(sys.swaps()[0].free_count(), 8);
        assert!((0..sys.tlb().slots()).all(|slot| sys.tlb().entry(slot).is_none()));
    }

    #[test]
    fn test_processes_share_devices() {
        let sys = system(4, 8, false);
        let a = MemoryContext::new(1, sys.clone());
        let b = MemoryContext::new(2, sys.clone());
        a.allocate(PAGE_SIZE, 0).unwrap();
        b.allocate(PAGE_SIZE, 0).unwrap();
        a.write_region(0, 0, 1).unwrap();
        b.write_region(0, 0, 2).unwrap();
        assert_eq!(a.read_region(0, 0).unwrap(), 1);
        assert_eq!(b.read_region(0, 0).unwrap(), 2);
        assert_ne!(a.inspect(|mm| mm.pte(0)), b.inspect(|mm| mm.pte(0)));
        assert_eq!(sys.ram().free_count(), 2);
        drop(a);
        assert_eq!(sys.ram().free_count(), 3);
    }

    #[test]
    fn test_sequential_swap_device() {
        let config = MmConfig {
            ram_size: 2 * PAGE_SIZE,
            swap_sizes: vec![4 * PAGE_SIZE],
            swap_mode: crate::memory::AccessMode::Sequential,
            tlb_slots: 16,
            evict_on_exhaustion: true,
            ..Default::default()
        };
        let sys = Arc::new(MemorySystem::new(config).unwrap());
        let ctx = MemoryContext::new(8, sys);
        for region in 0..3 {
            ctx.allocate(PAGE_SIZE, region).unwrap();
            ctx.write_region(region, 10, region as u8 + 1).unwrap();
        }
        for region in 0..3 {
            assert_eq!(ctx.read_region(region, 10).unwrap(), region as u8 + 1);
        }
    }

    #[test]
    fn test_active_swap_selects_device() {
        let config = MmConfig {
            ram_size: PAGE_SIZE,
            swap_sizes: vec![2 * PAGE_SIZE, 2 * PAGE_SIZE],
            active_swap: 1,
            tlb_slots: 16,
            evict_on_exhaustion: true,
            ..Default::default()
        };
        let sys = Arc::new(MemorySystem::new(config).unwrap());
        let ctx = MemoryContext::new(9, sys.clone());
        ctx.allocate(PAGE_SIZE, 0).unwrap();
        ctx.allocate(PAGE_SIZE, 1).unwrap();
        assert_eq!(ctx.inspect(|mm| mm.pte(0).swap_type()), Some(1));
        assert!(sys.swaps()[0].used_frames().is_empty());
        assert_eq!(sys.swaps()[1].used_frames().len(), 1);
    }
}
