//! Software TLB: a hashed, one-way cache of `(pid, pgn) -> fpn` kept in its
//! own memory device.
//!
//! Each slot is five bytes: a big-endian packed value followed by the owner's
//! pid. Two keys that hash to the same slot simply overwrite each other; the
//! stored pid and page number are checked on lookup so a collision reads as a
//! miss, never as a wrong hit.
//!
//! Slots are striped over a small set of shards (slot index modulo the shard
//! count). Each shard owns the storage device for its slots behind its own
//! lock, so a lookup never observes a half-written slot and slots in
//! different shards never contend.

use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use spin::Mutex;

use crate::Pid;
use crate::constants::*;
use crate::error::{DeviceKind, MmError, Result};
use crate::memory::{AccessMode, MemoryDevice};

const VALID_BIT: u32 = 1 << 31;
const SWAP_BIT: u32 = 1 << 30;
const EMPTY_PID: u8 = 0xFF;

/// Pack a slot value: valid bit, swap bit, page number, frame number
pub fn pack_value(valid: bool, swapped: bool, pgn: u32, fpn: u32) -> u32 {
    let mut value = ((pgn << TLB_PGN_SHIFT) & TLB_PGN_MASK) | (fpn & TLB_FPN_MASK);
    if valid {
        value |= VALID_BIT;
    }
    if swapped {
        value |= SWAP_BIT;
    }
    value
}

/// A decoded valid slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub pid: Pid,
    pub pgn: u32,
    pub fpn: u32,
    pub swapped: bool,
}

impl TlbEntry {
    fn decode(value: u32, pid: u8) -> Option<Self> {
        if value & VALID_BIT == 0 {
            return None;
        }
        Some(TlbEntry {
            pid,
            pgn: (value & TLB_PGN_MASK) >> TLB_PGN_SHIFT,
            fpn: value & TLB_FPN_MASK,
            swapped: value & SWAP_BIT != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlbStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct TlbCache {
    slots: usize,
    /// Shard `i` stores slots `i`, `i + n`, `i + 2n`, ...
    shards: Vec<Mutex<MemoryDevice>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TlbCache {
    pub fn new(slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(MmError::InvalidConfig("TLB needs at least one slot".to_string()));
        }
        let count = TLB_LOCK_SHARDS.min(slots);
        let shards = (0..count)
            .map(|idx| {
                let shard_slots = (slots - idx).div_ceil(count);
                MemoryDevice::with_frame_size(
                    DeviceKind::Tlb,
                    shard_slots * TLB_SLOT_SIZE,
                    TLB_SLOT_SIZE,
                    AccessMode::Random,
                )
                .map(Mutex::new)
            })
            .collect::<Result<Vec<_>>>()?;
        let tlb = TlbCache {
            slots,
            shards,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        for slot in 0..slots {
            tlb.write_slot(&tlb.shard(slot).lock(), slot, 0, EMPTY_PID)?;
        }
        Ok(tlb)
    }

    #[inline]
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// `(pid * 9173 + pgn + 971) mod slots`
    #[inline]
    pub fn slot_index(&self, pid: Pid, pgn: u32) -> usize {
        let hash = (pid as u32)
            .wrapping_mul(TLB_HASH_MULTIPLIER)
            .wrapping_add(pgn)
            .wrapping_add(TLB_HASH_OFFSET);
        hash as usize % self.slots
    }

    /// Cached frame for `(pid, pgn)`, or `None` on a miss
    pub fn lookup(&self, pid: Pid, pgn: u32) -> Option<u32> {
        let slot = self.slot_index(pid, pgn);
        let storage = self.shard(slot).lock();
        let (value, owner) = self.read_slot(&storage, slot).ok()?;
        let entry = TlbEntry::decode(value, owner)?;
        (entry.pid == pid && entry.pgn == pgn).then_some(entry.fpn)
    }

    /// Store `(pid, pgn) -> fpn`, overwriting whatever held the slot
    pub fn insert(&self, pid: Pid, pgn: u32, fpn: u32) -> Result<()> {
        if pgn as usize >= MAX_PGN {
            return Err(MmError::AddressOutOfRange {
                addr: (pgn as usize) << PAGE_SHIFT,
                limit: ADDRESS_SPACE_SIZE,
            });
        }
        if fpn > TLB_FPN_MASK {
            return Err(MmError::InvalidFrame { fpn, frames: TLB_FPN_MASK as usize + 1 });
        }
        let slot = self.slot_index(pid, pgn);
        let storage = self.shard(slot).lock();
        self.write_slot(&storage, slot, pack_value(true, false, pgn, fpn), pid)?;
        trace!("tlb: slot {} <- pid {} pgn {} fpn {}", slot, pid, pgn, fpn);
        Ok(())
    }

    /// Clear every slot owned by `pid`; returns how many were cleared
    pub fn invalidate(&self, pid: Pid) -> usize {
        let mut cleared = 0;
        for slot in 0..self.slots {
            let storage = self.shard(slot).lock();
            let owned = matches!(
                self.read_slot(&storage, slot),
                Ok((value, owner)) if TlbEntry::decode(value, owner).is_some_and(|e| e.pid == pid)
            );
            if owned && self.write_slot(&storage, slot, 0, EMPTY_PID).is_ok() {
                cleared += 1;
            }
        }
        trace!("tlb: invalidated {} slots of pid {}", cleared, pid);
        cleared
    }

    /// Clear the slot for `(pid, pgn)` if it still caches that page
    pub fn invalidate_page(&self, pid: Pid, pgn: u32) -> bool {
        let slot = self.slot_index(pid, pgn);
        let storage = self.shard(slot).lock();
        let cached = matches!(
            self.read_slot(&storage, slot),
            Ok((value, owner)) if TlbEntry::decode(value, owner)
                .is_some_and(|e| e.pid == pid && e.pgn == pgn)
        );
        cached && self.write_slot(&storage, slot, 0, EMPTY_PID).is_ok()
    }

    /// Decoded contents of `slot`, `None` when invalid or out of range
    pub fn entry(&self, slot: usize) -> Option<TlbEntry> {
        if slot >= self.slots {
            return None;
        }
        let storage = self.shard(slot).lock();
        let (value, owner) = self.read_slot(&storage, slot).ok()?;
        TlbEntry::decode(value, owner)
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TlbStats {
        TlbStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Log every valid slot at trace level
    pub fn dump(&self) {
        for slot in 0..self.slots {
            if let Some(e) = self.entry(slot) {
                trace!("tlb[{}]: pid {} pgn {} fpn {}", slot, e.pid, e.pgn, e.fpn);
            }
        }
    }

    #[inline]
    fn shard(&self, slot: usize) -> &Mutex<MemoryDevice> {
        &self.shards[slot % self.shards.len()]
    }

    /// Byte offset of `slot` inside its shard's storage
    #[inline]
    fn slot_base(&self, slot: usize) -> usize {
        slot / self.shards.len() * TLB_SLOT_SIZE
    }

    fn read_slot(&self, storage: &MemoryDevice, slot: usize) -> Result<(u32, u8)> {
        let base = self.slot_base(slot);
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = storage.read(base + i)?;
        }
        let pid = storage.read(base + 4)?;
        Ok((u32::from_be_bytes(bytes), pid))
    }

    fn write_slot(&self, storage: &MemoryDevice, slot: usize, value: u32, pid: u8) -> Result<()> {
        let base = self.slot_base(slot);
        for (i, byte) in value.to_be_bytes().into_iter().enumerate() {
            storage.write(base + i, byte)?;
        }
        storage.write(base + 4, pid)
    }
}
