use log::trace;
use spin::Mutex;

use crate::constants::*;
use crate::error::{DeviceKind, MmError, Result};

/// How a device reaches a byte address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Random,
    /// Every access first walks a cursor from zero to the target address.
    Sequential,
}

struct Cells {
    storage: Vec<u8>,
    cursor: usize,
}

impl Cells {
    fn seek(&mut self, addr: usize) {
        let len = self.storage.len();
        self.cursor = 0;
        let mut steps = 0;
        while steps < addr && steps < len {
            self.cursor = (self.cursor + 1) % len;
            steps += 1;
        }
    }
}

/// Free and used frame stacks; the head of each list is the last element.
struct FrameLists {
    frame_size: usize,
    free: Vec<u32>,
    used: Vec<u32>,
}

/// Byte-addressable physical storage with a frame allocator.
///
/// Backs RAM, every swap device and the TLB. Storage and frame lists sit
/// behind their own locks so allocators racing for frames never wait on
/// byte traffic.
pub struct MemoryDevice {
    kind: DeviceKind,
    capacity: usize,
    mode: AccessMode,
    cells: Mutex<Cells>,
    frames: Mutex<FrameLists>,
}

impl MemoryDevice {
    /// Create a device of `capacity` bytes split into page-sized frames
    pub fn new(kind: DeviceKind, capacity: usize, mode: AccessMode) -> Result<Self> {
        Self::with_frame_size(kind, capacity, PAGE_SIZE, mode)
    }

    /// Create a device whose frames are `frame_size` bytes wide
    pub fn with_frame_size(
        kind: DeviceKind,
        capacity: usize,
        frame_size: usize,
        mode: AccessMode,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(MmError::InvalidConfig(format!("{} capacity must be non-zero", kind)));
        }
        let device = MemoryDevice {
            kind,
            capacity,
            mode,
            cells: Mutex::new(Cells { storage: vec![0u8; capacity], cursor: 0 }),
            frames: Mutex::new(FrameLists { frame_size, free: Vec::new(), used: Vec::new() }),
        };
        device.format(frame_size)?;
        Ok(device)
    }

    /// Rebuild the free list as `0..capacity/frame_size` with frame 0 at the head
    pub fn format(&self, frame_size: usize) -> Result<()> {
        if frame_size == 0 || self.capacity % frame_size != 0 {
            return Err(MmError::InvalidConfig(format!(
                "{} capacity {} is not a multiple of frame size {}",
                self.kind, self.capacity, frame_size
            )));
        }
        let count = self.capacity / frame_size;
        let mut lists = self.frames.lock();
        lists.frame_size = frame_size;
        lists.free = (0..count as u32).rev().collect();
        lists.used.clear();
        trace!("{}: formatted {} frames of {} bytes", self.kind, count, frame_size);
        Ok(())
    }

    /// Read one byte
    pub fn read(&self, addr: usize) -> Result<u8> {
        self.check_addr(addr)?;
        let mut cells = self.cells.lock();
        if self.mode == AccessMode::Sequential {
            cells.seek(addr);
        }
        Ok(cells.storage[addr])
    }

    /// Write one byte
    pub fn write(&self, addr: usize, value: u8) -> Result<()> {
        self.check_addr(addr)?;
        let mut cells = self.cells.lock();
        if self.mode == AccessMode::Sequential {
            cells.seek(addr);
        }
        cells.storage[addr] = value;
        Ok(())
    }

    /// Pop the head of the free list
    pub fn get_free_frame(&self) -> Result<u32> {
        let mut lists = self.frames.lock();
        let fpn = lists.free.pop().ok_or(MmError::DeviceExhausted(self.kind))?;
        trace!("{}: took free frame {}", self.kind, fpn);
        Ok(fpn)
    }

    pub fn put_free_frame(&self, fpn: u32) -> Result<()> {
        let mut lists = self.frames.lock();
        Self::check_frame(&lists, self.capacity, fpn)?;
        lists.free.push(fpn);
        Ok(())
    }

    pub fn put_used_frame(&self, fpn: u32) -> Result<()> {
        let mut lists = self.frames.lock();
        Self::check_frame(&lists, self.capacity, fpn)?;
        lists.used.push(fpn);
        Ok(())
    }

    /// Move a frame from the used list (if it is there) back to the free list.
    pub fn release_frame(&self, fpn: u32) -> Result<()> {
        let mut lists = self.frames.lock();
        Self::check_frame(&lists, self.capacity, fpn)?;
        if let Some(pos) = lists.used.iter().rposition(|&f| f == fpn) {
            lists.used.remove(pos);
        }
        if !lists.free.contains(&fpn) {
            lists.free.push(fpn);
        }
        trace!("{}: released frame {}", self.kind, fpn);
        Ok(())
    }

    /// Free frames in list order, head first
    pub fn free_frames(&self) -> Vec<u32> {
        self.frames.lock().free.iter().rev().copied().collect()
    }

    /// Used frames in list order, head first
    pub fn used_frames(&self) -> Vec<u32> {
        self.frames.lock().used.iter().rev().copied().collect()
    }

    pub fn free_count(&self) -> usize {
        self.frames.lock().free.len()
    }

    pub fn frame_count(&self) -> usize {
        let lists = self.frames.lock();
        self.capacity / lists.frame_size
    }

    pub fn frame_size(&self) -> usize {
        self.frames.lock().frame_size
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    #[inline]
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Log every non-zero byte at trace level
    pub fn dump(&self) {
        let cells = self.cells.lock();
        for (addr, byte) in cells.storage.iter().enumerate().filter(|(_, b)| **b != 0) {
            trace!("{} {:#07x}: {}", self.kind, addr, byte);
        }
    }

    #[inline]
    fn check_addr(&self, addr: usize) -> Result<()> {
        if addr >= self.capacity {
            return Err(MmError::AddressOutOfRange { addr, limit: self.capacity });
        }
        Ok(())
    }

    fn check_frame(lists: &FrameLists, capacity: usize, fpn: u32) -> Result<()> {
        let frames = capacity / lists.frame_size;
        if fpn as usize >= frames {
            return Err(MmError::InvalidFrame { fpn, frames });
        }
        Ok(())
    }
}

/// Copy one page-sized frame byte by byte between two devices
pub fn copy_frame(
    src: &MemoryDevice,
    src_fpn: u32,
    dst: &MemoryDevice,
    dst_fpn: u32,
) -> Result<()> {
    let src_base = src_fpn as usize * PAGE_SIZE;
    let dst_base = dst_fpn as usize * PAGE_SIZE;
    for offset in 0..PAGE_SIZE {
        let byte = src.read(src_base + offset)?;
        dst.write(dst_base + offset, byte)?;
    }
    trace!("copied {} frame {} -> {} frame {}", src.kind(), src_fpn, dst.kind(), dst_fpn);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ram(frames: usize) -> MemoryDevice {
        MemoryDevice::new(DeviceKind::Ram, frames * PAGE_SIZE, AccessMode::Random).unwrap()
    }

    #[test]
    fn test_device_initialization() {
        let dev = ram(4);
        assert_eq!(dev.capacity(), 4 * PAGE_SIZE);
        assert_eq!(dev.frame_count(), 4);
        assert_eq!(dev.read(0).unwrap(), 0);
        assert_eq!(dev.read(4 * PAGE_SIZE - 1).unwrap(), 0);
    }

    #[test]
    fn test_capacity_must_be_frame_multiple() {
        let result = MemoryDevice::new(DeviceKind::Ram, PAGE_SIZE + 1, AccessMode::Random);
        assert!(matches!(result, Err(MmError::InvalidConfig(_))));
        let result = MemoryDevice::new(DeviceKind::Ram, 0, AccessMode::Random);
        assert!(matches!(result, Err(MmError::InvalidConfig(_))));
    }

    #[test]
    fn test_read_write() {
        let dev = ram(2);
        dev.write(100, 42).unwrap();
        assert_eq!(dev.read(100).unwrap(), 42);
        dev.write(100, 0xFF).unwrap();
        assert_eq!(dev.read(100).unwrap(), 0xFF);
    }

    #[test]
    fn test_out_of_range_access() {
        let dev = ram(1);
        assert_eq!(
            dev.read(PAGE_SIZE),
            Err(MmError::AddressOutOfRange { addr: PAGE_SIZE, limit: PAGE_SIZE })
        );
        assert!(dev.write(PAGE_SIZE + 7, 1).is_err());
    }

    #[test]
    fn test_sequential_device() {
        let dev =
            MemoryDevice::new(DeviceKind::Swap(0), 2 * PAGE_SIZE, AccessMode::Sequential).unwrap();
        assert_eq!(dev.mode(), AccessMode::Sequential);
        dev.write(300, 9).unwrap();
        dev.write(0, 1).unwrap();
        assert_eq!(dev.read(300).unwrap(), 9);
        assert_eq!(dev.read(0).unwrap(), 1);
        assert!(dev.read(2 * PAGE_SIZE).is_err());
    }

    #[test]
    fn test_format_builds_ascending_free_list() {
        let dev = ram(4);
        assert_eq!(dev.free_frames(), vec![0, 1, 2, 3]);
        assert_eq!(dev.get_free_frame().unwrap(), 0);
        assert_eq!(dev.get_free_frame().unwrap(), 1);
        dev.put_used_frame(1).unwrap();
        dev.format(PAGE_SIZE).unwrap();
        assert_eq!(dev.free_frames(), vec![0, 1, 2, 3]);
        assert!(dev.used_frames().is_empty());
    }

    #[test]
    fn test_exhaustion() {
        let dev = ram(2);
        dev.get_free_frame().unwrap();
        dev.get_free_frame().unwrap();
        assert_eq!(dev.get_free_frame(), Err(MmError::DeviceExhausted(DeviceKind::Ram)));
    }

    #[test]
    fn test_put_pushes_to_head() {
        let dev = ram(4);
        let a = dev.get_free_frame().unwrap();
        let b = dev.get_free_frame().unwrap();
        dev.put_used_frame(a).unwrap();
        dev.put_used_frame(b).unwrap();
        assert_eq!(dev.used_frames(), vec![b, a]);

        dev.put_free_frame(a).unwrap();
        assert_eq!(dev.free_frames()[0], a);
        assert_eq!(dev.get_free_frame().unwrap(), a);
    }

    #[test]
    fn test_invalid_frame_rejected() {
        let dev = ram(2);
        assert_eq!(dev.put_free_frame(2), Err(MmError::InvalidFrame { fpn: 2, frames: 2 }));
        assert!(dev.put_used_frame(99).is_err());
        assert!(dev.release_frame(5).is_err());
    }

    #[test]
    fn test_release_moves_used_to_free() {
        let dev = ram(3);
        let fpn = dev.get_free_frame().unwrap();
        dev.put_used_frame(fpn).unwrap();
        dev.release_frame(fpn).unwrap();
        assert!(dev.used_frames().is_empty());
        assert_eq!(dev.free_count(), 3);
        // a second release must not duplicate the frame
        dev.release_frame(fpn).unwrap();
        assert_eq!(dev.free_count(), 3);
    }

    #[test]
    fn test_copy_frame() {
        let ram = ram(2);
        let swap = MemoryDevice::new(DeviceKind::Swap(0), 4 * PAGE_SIZE, AccessMode::Random).unwrap();
        for i in 0..PAGE_SIZE {
            ram.write(PAGE_SIZE + i, i as u8).unwrap();
        }
        copy_frame(&ram, 1, &swap, 3).unwrap();
        for i in 0..PAGE_SIZE {
            assert_eq!(swap.read(3 * PAGE_SIZE + i).unwrap(), i as u8);
        }
        assert!(copy_frame(&swap, 3, &ram, 2).is_err());
    }

    #[test]
    fn test_custom_frame_size() {
        let dev = MemoryDevice::with_frame_size(DeviceKind::Tlb, 10 * 5, 5, AccessMode::Random).unwrap();
        assert_eq!(dev.frame_count(), 10);
        assert_eq!(dev.frame_size(), 5);
    }

    proptest! {
        #[test]
        fn prop_free_and_used_stay_disjoint(ops in proptest::collection::vec(any::<bool>(), 1..64)) {
            let dev = ram(8);
            let mut held: Vec<u32> = Vec::new();
            for take in ops {
                if take {
                    if let Ok(fpn) = dev.get_free_frame() {
                        dev.put_used_frame(fpn).unwrap();
                        held.push(fpn);
                    }
                } else if let Some(fpn) = held.pop() {
                    dev.release_frame(fpn).unwrap();
                }
                let free = dev.free_frames();
                let used = dev.used_frames();
                prop_assert!(free.iter().all(|f| !used.contains(f)));
                prop_assert_eq!(free.len() + used.len(), 8);
            }
        }
    }
}
