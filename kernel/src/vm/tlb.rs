//! Software-managed TLB.
//!
//! The MMU raises an exception on every miss and the kernel writes the
//! translation into a slot itself. Once every slot is valid, victims are
//! picked round robin, so the slot to overwrite depends only on how many
//! replacements came before.

use crate::sync::intr::hold_interrupts;
use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use novavm_shared::tlb::{EntryHi, EntryLo};

/// Access to the slots of a TLB.
///
/// Implementations only move bits. Callers are responsible for holding
/// interrupts off around a read-modify-write of a slot.
pub trait TlbHardware: Sync {
    fn slots(&self) -> usize;
    fn read(&self, slot: usize) -> (EntryHi, EntryLo);
    fn write(&self, slot: usize, hi: EntryHi, lo: EntryLo);
}

/// A TLB kept in memory, for hosted builds and tests.
pub struct SoftTlb {
    slots: Box<[AtomicU64]>,
}

fn pack(hi: EntryHi, lo: EntryLo) -> u64 {
    u64::from(hi.raw_value()) << 32 | u64::from(lo.raw_value())
}

#[allow(clippy::cast_possible_truncation)]
fn unpack(raw: u64) -> (EntryHi, EntryLo) {
    (
        EntryHi::new_with_raw_value((raw >> 32) as u32),
        EntryLo::new_with_raw_value(raw as u32),
    )
}

impl SoftTlb {
    /// A TLB of `slots` entries, all invalid.
    pub fn new(slots: usize) -> Self {
        Self {
            slots: (0..slots)
                .map(|slot| AtomicU64::new(pack(EntryHi::invalid(slot), EntryLo::INVALID)))
                .collect(),
        }
    }

    /// The frame address `vaddr` translates to, if some valid slot matches.
    pub fn probe(&self, vaddr: usize) -> Option<usize> {
        let wanted = EntryHi::for_page(vaddr);
        (0..self.slots()).find_map(|slot| {
            let (hi, lo) = self.read(slot);
            (lo.valid() && hi.vpn() == wanted.vpn()).then(|| lo.frame_addr())
        })
    }
}

impl TlbHardware for SoftTlb {
    fn slots(&self) -> usize {
        self.slots.len()
    }

    fn read(&self, slot: usize) -> (EntryHi, EntryLo) {
        unpack(self.slots[slot].load(Ordering::Acquire))
    }

    fn write(&self, slot: usize, hi: EntryHi, lo: EntryLo) {
        self.slots[slot].store(pack(hi, lo), Ordering::Release);
    }
}

/// Which kind of slot a refill landed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refill {
    /// The slot was invalid.
    Free(usize),
    /// A valid translation was overwritten.
    Replaced(usize),
}

/// Request to drop one page's translation from another CPU's TLB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlbShootdown {
    pub page: usize,
}

pub struct Tlb<H: TlbHardware> {
    hw: H,
    next_victim: AtomicUsize,
}

impl<H: TlbHardware> Tlb<H> {
    pub fn new(hw: H) -> Self {
        assert!(hw.slots() > 0, "TLB with no slots");
        Self {
            hw,
            next_victim: AtomicUsize::new(0),
        }
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn slots(&self) -> usize {
        self.hw.slots()
    }

    /// Returns the slot to overwrite next and advances the cursor past it.
    /// After slot N-1 the cursor wraps to 0.
    pub fn next_victim(&self) -> usize {
        let n = self.hw.slots();
        match self
            .next_victim
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some((v + 1) % n))
        {
            Ok(v) | Err(v) => v,
        }
    }

    /// Installs a valid, writable translation from the page of `vaddr` to the
    /// frame at `paddr`.
    ///
    /// An invalid slot is used if there is one. Only a full TLB advances the
    /// round-robin victim. The scan and the write happen with interrupts off,
    /// so nothing on this CPU can touch the TLB in between.
    pub fn refill(&self, vaddr: usize, paddr: usize) -> Refill {
        let hi = EntryHi::for_page(vaddr);
        let lo = EntryLo::for_frame(paddr);
        let _guard = hold_interrupts();

        let refill = match (0..self.hw.slots()).find(|&slot| !self.hw.read(slot).1.valid()) {
            Some(slot) => Refill::Free(slot),
            None => Refill::Replaced(self.next_victim()),
        };
        let (Refill::Free(slot) | Refill::Replaced(slot)) = refill;
        self.hw.write(slot, hi, lo);

        vm_debug!("tlb: slot {} <- {:#x} -> {:#x}", slot, vaddr, paddr);
        refill
    }

    /// Invalidates any slot translating the page that contains `vaddr`.
    pub fn invalidate_page(&self, vaddr: usize) {
        let wanted = EntryHi::for_page(vaddr);
        let _guard = hold_interrupts();
        for slot in 0..self.hw.slots() {
            let (hi, lo) = self.hw.read(slot);
            if lo.valid() && hi.vpn() == wanted.vpn() {
                self.hw.write(slot, EntryHi::invalid(slot), EntryLo::INVALID);
            }
        }
    }

    /// Invalidates every slot.
    pub fn invalidate_all(&self) {
        let _guard = hold_interrupts();
        for slot in 0..self.hw.slots() {
            self.hw.write(slot, EntryHi::invalid(slot), EntryLo::INVALID);
        }
    }
}
