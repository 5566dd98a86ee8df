//! Per-process address space: page directory, symbol table, areas and the
//! FIFO list of resident pages used for replacement.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::constants::*;
use crate::error::{MmError, Result};
use crate::memory::{copy_frame, MemoryDevice};
use crate::pte::Pte;
use crate::translation::{page_align_up, pages_spanned, VirtualAddress};
use crate::vm_area::{Region, VmArea};

/// The physical devices an address space operates on.
#[derive(Clone, Copy)]
pub struct Devices<'a> {
    pub ram: &'a MemoryDevice,
    pub swaps: &'a [MemoryDevice],
    /// Swap device that receives evicted pages
    pub active_swap: usize,
}

impl<'a> Devices<'a> {
    pub fn swap(&self, idx: usize) -> Result<&'a MemoryDevice> {
        self.swaps.get(idx).ok_or(MmError::InvalidDevice(idx))
    }

    pub fn active(&self) -> Result<&'a MemoryDevice> {
        self.swap(self.active_swap)
    }
}

/// A frame cut loose from the page directory by `free`; kept until teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetachedFrame {
    Ram(u32),
    Swap { device: usize, fpn: u32 },
}

pub struct AddressSpace {
    pgd: Vec<Pte>,
    symbols: [Region; SYMBOL_TABLE_SIZE],
    /// Area each symbol-table entry was carved from
    owners: [usize; SYMBOL_TABLE_SIZE],
    areas: Vec<VmArea>,
    /// Resident pages, newest at the front
    fifo: VecDeque<u32>,
    detached: Vec<DetachedFrame>,
    evicted: Vec<u32>,
    evict_on_exhaustion: bool,
}

impl AddressSpace {
    /// Fresh space with area 0 at `[0, 0)`
    pub fn new() -> Self {
        AddressSpace {
            pgd: vec![Pte::EMPTY; MAX_PGN],
            symbols: [Region::UNUSED; SYMBOL_TABLE_SIZE],
            owners: [0; SYMBOL_TABLE_SIZE],
            areas: vec![VmArea::new(0, 0, 0)],
            fifo: VecDeque::new(),
            detached: Vec::new(),
            evicted: Vec::new(),
            evict_on_exhaustion: false,
        }
    }

    /// When set, mapping a page with RAM exhausted swaps out the FIFO victim
    /// instead of failing.
    pub fn set_evict_on_exhaustion(&mut self, enabled: bool) {
        self.evict_on_exhaustion = enabled;
    }

    /// Add an area `[start, end)` with its break at `start`
    pub fn add_area(&mut self, start: usize, end: usize) -> Result<usize> {
        if start > end {
            return Err(MmError::InvalidSize(end.wrapping_sub(start)));
        }
        if end > ADDRESS_SPACE_SIZE {
            return Err(MmError::AddressOutOfRange { addr: end, limit: ADDRESS_SPACE_SIZE });
        }
        if self.areas.iter().any(|a| a.overlaps(start, end)) {
            return Err(MmError::Overlap { start, end });
        }
        let id = self.areas.len();
        self.areas.push(VmArea::new(id, start, end));
        debug!("area {} added at [{:#x}, {:#x})", id, start, end);
        Ok(id)
    }

    pub fn area(&self, vma_id: usize) -> Result<&VmArea> {
        self.areas.get(vma_id).ok_or(MmError::InvalidArea(vma_id))
    }

    pub fn areas(&self) -> &[VmArea] {
        &self.areas
    }

    /// The live span recorded at `region_id`
    pub fn region(&self, region_id: usize) -> Result<Region> {
        match self.symbols.get(region_id) {
            Some(region) if !region.is_unused() => Ok(*region),
            _ => Err(MmError::InvalidRegion(region_id)),
        }
    }

    /// Area that `region_id` was allocated from
    pub fn region_owner(&self, region_id: usize) -> Result<usize> {
        self.region(region_id)?;
        Ok(self.owners[region_id])
    }

    /// Live span at `region_id`, provided it belongs to area `vma_id`
    fn owned_region(&self, vma_id: usize, region_id: usize) -> Result<Region> {
        let region = self.region(region_id)?;
        self.area_index(vma_id)?;
        if self.owners[region_id] != vma_id {
            return Err(MmError::InvalidArea(vma_id));
        }
        Ok(region)
    }

    #[inline]
    pub fn pte(&self, pgn: u32) -> Pte {
        self.pgd.get(pgn as usize).copied().unwrap_or(Pte::EMPTY)
    }

    /// Resident pages, newest first
    pub fn fifo_pages(&self) -> Vec<u32> {
        self.fifo.iter().copied().collect()
    }

    /// Pages swapped out since the last call
    pub fn take_evicted(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.evicted)
    }

    // =========================================================================
    // Region allocator
    // =========================================================================

    /// Allocate `size` bytes in area `vma_id` and record them at `region_id`.
    ///
    /// Tries the area's free list (first fit), then the headroom below
    /// `vm_end`, then grows the area by whole pages. Frames mapped before a
    /// failure stay mapped.
    pub fn alloc(
        &mut self,
        dev: Devices<'_>,
        vma_id: usize,
        region_id: usize,
        size: usize,
    ) -> Result<usize> {
        if size == 0 {
            return Err(MmError::InvalidSize(size));
        }
        if size > ADDRESS_SPACE_SIZE {
            return Err(MmError::AddressOutOfRange { addr: size, limit: ADDRESS_SPACE_SIZE });
        }
        match self.symbols.get(region_id) {
            None => return Err(MmError::InvalidRegion(region_id)),
            Some(slot) if !slot.is_unused() => return Err(MmError::RegionInUse(region_id)),
            Some(_) => {}
        }
        let idx = self.area_index(vma_id)?;

        let region = if let Some(region) = self.areas[idx].peek_first_fit(size) {
            self.map_range(dev, region)?;
            self.areas[idx].take_first_fit(size);
            region
        } else if self.areas[idx]
            .sbrk
            .checked_add(size)
            .is_some_and(|end| end <= self.areas[idx].vm_end)
        {
            let start = self.areas[idx].sbrk;
            let region = Region::new(start, start + size);
            self.map_range(dev, region)?;
            self.areas[idx].sbrk += size;
            region
        } else {
            self.grow(dev, idx, size)?
        };

        self.symbols[region_id] = region;
        self.owners[region_id] = vma_id;
        debug!("alloc region {} = {} in area {}", region_id, region, vma_id);
        Ok(region.start)
    }

    fn grow(&mut self, dev: Devices<'_>, idx: usize, size: usize) -> Result<Region> {
        let (vm_start, old_end, sbrk) = {
            let area = &self.areas[idx];
            (area.vm_start, area.vm_end, area.sbrk)
        };
        let new_end = page_align_up(size)
            .and_then(|inc| old_end.checked_add(inc))
            .filter(|&end| end <= ADDRESS_SPACE_SIZE)
            .ok_or(MmError::AddressOutOfRange { addr: old_end.saturating_add(size), limit: ADDRESS_SPACE_SIZE })?;
        let collides = self
            .areas
            .iter()
            .any(|a| a.id != idx && a.overlaps(vm_start, new_end));
        if collides {
            return Err(MmError::Overlap { start: vm_start, end: new_end });
        }

        self.areas[idx].vm_end = new_end;
        trace!("area {} grown to [{:#x}, {:#x})", idx, vm_start, new_end);
        self.map_range(dev, Region::new(sbrk, new_end))?;

        let region = Region::new(sbrk, sbrk + size);
        let area = &mut self.areas[idx];
        area.sbrk = new_end;
        area.enlist_free_region(Region::new(region.end, new_end));
        Ok(region)
    }

    /// Release `region_id` back to area `vma_id`'s free list.
    ///
    /// Only pages that no other live region touches lose their mapping: a page
    /// shared with a neighbouring region keeps its PTE and frame until the last
    /// region on it is freed. Cleared frames are only returned to the devices
    /// at teardown. Adjacent free spans are not merged.
    ///
    /// Fails with `InvalidArea` when the region was carved from another area.
    pub fn free(&mut self, vma_id: usize, region_id: usize) -> Result<Region> {
        let region = self.owned_region(vma_id, region_id)?;
        let idx = vma_id;
        self.symbols[region_id] = Region::UNUSED;

        if let Some(pages) = pages_spanned(region.start, region.end) {
            for pgn in pages {
                if !self.page_in_live_region(pgn) {
                    self.detach_page(pgn);
                }
            }
        }
        self.areas[idx].enlist_free_region(region);
        debug!("free region {} = {} in area {}", region_id, region, vma_id);
        Ok(region)
    }

    fn page_in_live_region(&self, pgn: u32) -> bool {
        self.symbols
            .iter()
            .filter_map(|r| pages_spanned(r.start, r.end))
            .any(|pages| pages.contains(&pgn))
    }

    fn detach_page(&mut self, pgn: u32) {
        let pte = self.pgd[pgn as usize];
        if let Some(fpn) = pte.fpn() {
            self.detached.push(DetachedFrame::Ram(fpn));
        } else if let (Some(device), Some(fpn)) = (pte.swap_type(), pte.swap_offset()) {
            self.detached.push(DetachedFrame::Swap { device: device as usize, fpn });
        }
        self.pgd[pgn as usize] = Pte::EMPTY;
        self.fifo.retain(|&p| p != pgn);
    }

    // =========================================================================
    // Page mapping and fault handling
    // =========================================================================

    /// Give every page of `region` that has no mapping a RAM frame
    fn map_range(&mut self, dev: Devices<'_>, region: Region) -> Result<()> {
        let Some(pages) = pages_spanned(region.start, region.end) else {
            return Ok(());
        };
        for pgn in pages {
            if self.pgd[pgn as usize].is_empty() {
                self.map_page(dev, pgn)?;
            }
        }
        Ok(())
    }

    fn map_page(&mut self, dev: Devices<'_>, pgn: u32) -> Result<()> {
        let fpn = match dev.ram.get_free_frame() {
            Ok(fpn) => {
                dev.ram.put_used_frame(fpn)?;
                fpn
            }
            Err(MmError::DeviceExhausted(_)) if self.evict_on_exhaustion => self.evict_one(dev)?,
            Err(e) => return Err(e),
        };
        self.pgd[pgn as usize] = Pte::present(fpn);
        self.fifo.push_front(pgn);
        trace!("page {} mapped to frame {}", pgn, fpn);
        Ok(())
    }

    /// Oldest inserted page that is still resident, with its FIFO position
    fn pick_victim(&self) -> Option<(usize, u32)> {
        self.fifo
            .iter()
            .enumerate()
            .rev()
            .find(|&(_, &pgn)| self.pgd[pgn as usize].is_present())
            .map(|(pos, &pgn)| (pos, pgn))
    }

    /// Swap out the FIFO victim and hand back its RAM frame
    fn evict_one(&mut self, dev: Devices<'_>) -> Result<u32> {
        let (pos, victim) = self.pick_victim().ok_or(MmError::NoVictim)?;
        let vic_fpn = self.pgd[victim as usize].fpn().ok_or(MmError::PageNotMapped(victim))?;
        let swap = dev.active()?;
        let swp_fpn = swap.get_free_frame()?;

        copy_frame(dev.ram, vic_fpn, swap, swp_fpn)?;
        swap.put_used_frame(swp_fpn)?;

        self.fifo.remove(pos);
        self.pgd[victim as usize] = Pte::swapped(dev.active_swap as u32, swp_fpn);
        self.evicted.push(victim);
        debug!("evicted page {} from frame {} to swap frame {}", victim, vic_fpn, swp_fpn);
        Ok(vic_fpn)
    }

    /// Frame number backing `pgn`, faulting it in from swap when needed.
    ///
    /// A fault always evicts the oldest resident page, swapping the two
    /// pages' contents through a fresh swap frame.
    pub fn resolve(&mut self, dev: Devices<'_>, pgn: u32) -> Result<u32> {
        let pte = self
            .pgd
            .get(pgn as usize)
            .copied()
            .ok_or(MmError::AddressOutOfRange {
                addr: (pgn as usize) << PAGE_SHIFT,
                limit: ADDRESS_SPACE_SIZE,
            })?;
        if let Some(fpn) = pte.fpn() {
            return Ok(fpn);
        }
        let (Some(tgt_dev), Some(tgt_fpn)) = (pte.swap_type(), pte.swap_offset()) else {
            return Err(MmError::PageNotMapped(pgn));
        };

        let (pos, victim) = self.pick_victim().ok_or(MmError::NoVictim)?;
        let vic_fpn = self.pgd[victim as usize].fpn().ok_or(MmError::PageNotMapped(victim))?;
        let swap = dev.active()?;
        let source = dev.swap(tgt_dev as usize)?;
        let swp_fpn = swap.get_free_frame()?;

        copy_frame(dev.ram, vic_fpn, swap, swp_fpn)?;
        copy_frame(source, tgt_fpn, dev.ram, vic_fpn)?;
        swap.put_used_frame(swp_fpn)?;
        source.release_frame(tgt_fpn)?;

        self.fifo.remove(pos);
        self.pgd[victim as usize] = Pte::swapped(dev.active_swap as u32, swp_fpn);
        self.pgd[pgn as usize] = Pte::present(vic_fpn);
        self.fifo.push_front(pgn);
        self.evicted.push(victim);
        debug!(
            "page fault on {}: victim {} -> swap frame {}, frame {} reused",
            pgn, victim, swp_fpn, vic_fpn
        );
        Ok(vic_fpn)
    }

    // =========================================================================
    // Region access
    // =========================================================================

    /// Virtual address of `offset` inside `region_id`
    pub fn translate(&self, vma_id: usize, region_id: usize, offset: usize) -> Result<VirtualAddress> {
        let region = self.owned_region(vma_id, region_id)?;
        if offset >= region.len() {
            return Err(MmError::OffsetOutOfRange { region: region_id, offset, len: region.len() });
        }
        Ok(VirtualAddress::from_raw((region.start + offset) as u32))
    }

    pub fn read(
        &mut self,
        dev: Devices<'_>,
        vma_id: usize,
        region_id: usize,
        offset: usize,
    ) -> Result<u8> {
        let va = self.translate(vma_id, region_id, offset)?;
        let fpn = self.resolve(dev, va.pgn)?;
        dev.ram.read(va.physical(fpn))
    }

    pub fn write(
        &mut self,
        dev: Devices<'_>,
        vma_id: usize,
        region_id: usize,
        offset: usize,
        value: u8,
    ) -> Result<()> {
        let va = self.translate(vma_id, region_id, offset)?;
        let fpn = self.resolve(dev, va.pgn)?;
        dev.ram.write(va.physical(fpn), value)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Return every RAM and swap frame this space holds to its device.
    pub fn release(&mut self, dev: Devices<'_>) -> Result<usize> {
        let mut released = 0;
        for pte in self.pgd.iter_mut() {
            if let Some(fpn) = pte.fpn() {
                dev.ram.release_frame(fpn)?;
                released += 1;
            } else if let (Some(device), Some(fpn)) = (pte.swap_type(), pte.swap_offset()) {
                dev.swap(device as usize)?.release_frame(fpn)?;
                released += 1;
            }
            *pte = Pte::EMPTY;
        }
        for frame in self.detached.drain(..) {
            match frame {
                DetachedFrame::Ram(fpn) => dev.ram.release_frame(fpn)?,
                DetachedFrame::Swap { device, fpn } => dev.swap(device)?.release_frame(fpn)?,
            }
            released += 1;
        }
        self.fifo.clear();
        self.symbols = [Region::UNUSED; SYMBOL_TABLE_SIZE];
        debug!("released {} frames", released);
        Ok(released)
    }

    fn area_index(&self, vma_id: usize) -> Result<usize> {
        if vma_id < self.areas.len() {
            Ok(vma_id)
        } else {
            Err(MmError::InvalidArea(vma_id))
        }
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}
