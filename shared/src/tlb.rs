// MIPS r3000 TLB register layout. See the "TLB" chapter of the MIPS R3000
// manual; each slot pairs an EntryHi (what is matched) with an EntryLo (what
// it translates to).

// Addresses in this module are 32-bit by construction, so truncating casts
// from usize only ever drop bits that are already zero.
#![allow(clippy::cast_possible_truncation)]

use crate::mem::{PAGE_FRAME, PAGE_SHIFT};
use arbitrary_int::{u20, u6};
use bitbybit::bitfield;

// Number of slots in the hardware TLB.
pub const NUM_TLB: usize = 64;

// Invalid slots are parked on distinct kseg0 pages so two of them can never
// match the same address.
const INVALID_VPN_BASE: u32 = 0x80000;

const VPN_MASK: usize = 0xF_FFFF;

#[bitfield(u32, default = 0)]
pub struct EntryHi {
    // Address space id. The VM flushes the TLB on every context switch
    // instead of tagging entries, so this is always zero.
    #[bits(6..=11, rw)]
    asid: u6,
    #[bits(12..=31, rw)]
    vpn: u20,
}

#[bitfield(u32, default = 0)]
pub struct EntryLo {
    #[bit(8, rw)]
    global: bool,
    #[bit(9, rw)]
    valid: bool,
    // On MIPS "dirty" means writable.
    #[bit(10, rw)]
    dirty: bool,
    #[bit(11, rw)]
    nocache: bool,
    #[bits(12..=31, rw)]
    pfn: u20,
}

impl EntryHi {
    /// The EntryHi matching the page that contains `vaddr`.
    pub fn for_page(vaddr: usize) -> Self {
        let vpn = ((vaddr & PAGE_FRAME) >> PAGE_SHIFT) & VPN_MASK;
        Self::DEFAULT.with_vpn(u20::new(vpn as u32))
    }

    /// A harmless EntryHi for `slot` that matches no user address.
    pub fn invalid(slot: usize) -> Self {
        Self::DEFAULT.with_vpn(u20::new(INVALID_VPN_BASE + (slot & 0x3FF) as u32))
    }

    pub fn page(&self) -> usize {
        (self.vpn().value() as usize) << PAGE_SHIFT
    }
}

impl EntryLo {
    pub const INVALID: Self = Self::DEFAULT;

    /// A valid, writable translation to the frame starting at `paddr`.
    pub fn for_frame(paddr: usize) -> Self {
        let pfn = ((paddr & PAGE_FRAME) >> PAGE_SHIFT) & VPN_MASK;
        Self::DEFAULT
            .with_pfn(u20::new(pfn as u32))
            .with_dirty(true)
            .with_valid(true)
    }

    pub fn frame_addr(&self) -> usize {
        (self.pfn().value() as usize) << PAGE_SHIFT
    }
}

// The largest frame number an EntryLo can name.
pub const MAX_TLB_FRAMES: usize = VPN_MASK + 1;
