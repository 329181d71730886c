//! Counters describing what the fault path did, reported at shutdown.

use core::sync::atomic::{AtomicUsize, Ordering};
use novavm_shared::{eprintln, println};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stat {
    /// Every TLB miss handed to the VM.
    TlbFaults,
    /// Misses refilled into an empty TLB slot.
    TlbFaultsFree,
    /// Misses that had to overwrite a valid TLB slot.
    TlbFaultsReplace,
    /// Whole-TLB flushes.
    TlbInvalidations,
    /// Misses for a page that was already resident.
    TlbReloads,
    /// New pages filled with zeroes.
    PageFaultsZeroed,
    /// New pages read from the executable.
    PageFaultsElf,
    /// New pages read back from swap.
    PageFaultsSwap,
    /// Pages written out to swap.
    SwapWrites,
}

impl Stat {
    const COUNT: usize = 9;

    const ALL: [Stat; Stat::COUNT] = [
        Stat::TlbFaults,
        Stat::TlbFaultsFree,
        Stat::TlbFaultsReplace,
        Stat::TlbInvalidations,
        Stat::TlbReloads,
        Stat::PageFaultsZeroed,
        Stat::PageFaultsElf,
        Stat::PageFaultsSwap,
        Stat::SwapWrites,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stat::TlbFaults => "TLB Faults",
            Stat::TlbFaultsFree => "TLB Faults with Free",
            Stat::TlbFaultsReplace => "TLB Faults with Replace",
            Stat::TlbInvalidations => "TLB Invalidations",
            Stat::TlbReloads => "TLB Reloads",
            Stat::PageFaultsZeroed => "Page Faults (Zeroed)",
            Stat::PageFaultsElf => "Page Faults from ELF",
            Stat::PageFaultsSwap => "Page Faults from Swapfile",
            Stat::SwapWrites => "Swapfile Writes",
        }
    }
}

pub struct VmStats {
    counters: [AtomicUsize; Stat::COUNT],
}

/// A copy of the counters at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VmStatsSnapshot {
    pub tlb_faults: usize,
    pub tlb_faults_free: usize,
    pub tlb_faults_replace: usize,
    pub tlb_invalidations: usize,
    pub tlb_reloads: usize,
    pub page_faults_zeroed: usize,
    pub page_faults_elf: usize,
    pub page_faults_swap: usize,
    pub swap_writes: usize,
}

impl VmStats {
    pub const fn new() -> Self {
        Self {
            counters: [const { AtomicUsize::new(0) }; Stat::COUNT],
        }
    }

    pub fn record(&self, stat: Stat) {
        self.counters[stat as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, stat: Stat) -> usize {
        self.counters[stat as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> VmStatsSnapshot {
        VmStatsSnapshot {
            tlb_faults: self.get(Stat::TlbFaults),
            tlb_faults_free: self.get(Stat::TlbFaultsFree),
            tlb_faults_replace: self.get(Stat::TlbFaultsReplace),
            tlb_invalidations: self.get(Stat::TlbInvalidations),
            tlb_reloads: self.get(Stat::TlbReloads),
            page_faults_zeroed: self.get(Stat::PageFaultsZeroed),
            page_faults_elf: self.get(Stat::PageFaultsElf),
            page_faults_swap: self.get(Stat::PageFaultsSwap),
            swap_writes: self.get(Stat::SwapWrites),
        }
    }

    pub fn print(&self) {
        println!("novavm statistics:");
        for stat in Stat::ALL {
            println!("  {:<28}{}", stat.name(), self.get(stat));
        }

        let s = self.snapshot();
        if s.tlb_faults != s.tlb_faults_free + s.tlb_faults_replace {
            eprintln!(
                "novavm: warning: TLB faults ({}) != free ({}) + replace ({})",
                s.tlb_faults, s.tlb_faults_free, s.tlb_faults_replace
            );
        }
        let resolved =
            s.tlb_reloads + s.page_faults_zeroed + s.page_faults_elf + s.page_faults_swap;
        if s.tlb_faults != resolved {
            eprintln!(
                "novavm: warning: TLB faults ({}) != reloads + page faults ({})",
                s.tlb_faults, resolved
            );
        }
    }
}

impl Default for VmStats {
    fn default() -> Self {
        Self::new()
    }
}
