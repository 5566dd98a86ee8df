use static_assertions::{const_assert, const_assert_eq};

pub const PAGE_SHIFT: u32 = 8;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub const OFFSET_MASK: u32 = (1 << PAGE_SHIFT) - 1;

pub const CPU_BUS_WIDTH: u32 = 22;
pub const ADDRESS_SPACE_SIZE: usize = 1 << CPU_BUS_WIDTH;
pub const MAX_PGN: usize = ADDRESS_SPACE_SIZE / PAGE_SIZE;

pub const SYMBOL_TABLE_SIZE: usize = 30;
pub const MAX_SWAP_DEVICES: usize = 4;

// PTE layout
pub const PTE_FPN_BITS: u32 = 13;
pub const PTE_FPN_MASK: u32 = (1 << PTE_FPN_BITS) - 1;
pub const PTE_SWPTYP_BITS: u32 = 5;
pub const PTE_SWPTYP_MASK: u32 = (1 << PTE_SWPTYP_BITS) - 1;
pub const PTE_SWPOFF_SHIFT: u32 = 5;
pub const PTE_SWPOFF_BITS: u32 = 21;
pub const PTE_SWPOFF_MASK: u32 = ((1 << PTE_SWPOFF_BITS) - 1) << PTE_SWPOFF_SHIFT;

// TLB slot layout
pub const TLB_SLOT_SIZE: usize = 5;
pub const TLB_PGN_SHIFT: u32 = 13;
pub const TLB_PGN_BITS: u32 = 14;
pub const TLB_PGN_MASK: u32 = ((1 << TLB_PGN_BITS) - 1) << TLB_PGN_SHIFT;
pub const TLB_FPN_MASK: u32 = PTE_FPN_MASK;
pub const TLB_HASH_MULTIPLIER: u32 = 9173;
pub const TLB_HASH_OFFSET: u32 = 971;
pub const TLB_LOCK_SHARDS: usize = 16;

// Largest devices whose frame numbers still fit their PTE fields
pub const MAX_RAM_SIZE: usize = (1 << PTE_FPN_BITS) * PAGE_SIZE;
pub const MAX_SWAP_SIZE: usize = (1 << PTE_SWPOFF_BITS) * PAGE_SIZE;

pub const DEFAULT_RAM_SIZE: usize = 1 << 20;
pub const DEFAULT_SWAP_SIZE: usize = 1 << 24;
pub const DEFAULT_TLB_SLOTS: usize = 512;

pub const INVALID_VALUE: i32 = -1;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert_eq!(MAX_PGN, 1 << TLB_PGN_BITS);
const_assert!(MAX_SWAP_DEVICES <= (1 << PTE_SWPTYP_BITS));
const_assert!(PTE_SWPOFF_SHIFT + PTE_SWPOFF_BITS <= 28);
const_assert!(TLB_PGN_SHIFT + TLB_PGN_BITS <= 30);
