//! User virtual memory.
//!
//! Translations live in an inverted page table with one entry per physical
//! frame. When frames run out, the frame that was mapped earliest is written
//! to swap and reused, regardless of how recently it was touched. The TLB is
//! refilled in software on every miss.
//!
//! All table state sits behind a single lock. Frame copies and swap I/O happen
//! with the lock released; while they are in progress the entry is marked
//! loading or evicting so no other thread uses or reuses the frame.

pub mod config;
pub mod error;
pub mod fault;
pub mod fifo;
pub mod ipt;
pub mod stats;
pub mod tlb;

pub use self::{
    config::VmConfig,
    error::VmError,
    fault::FaultKind,
    ipt::{InvertedPageTable, PageId, Probe},
    stats::{Stat, VmStats, VmStatsSnapshot},
    tlb::{Refill, SoftTlb, Tlb, TlbHardware, TlbShootdown},
};

use crate::{
    mem::FrameAllocator,
    swapping::SwapStore,
    sync::Mutex,
    user_program::{
        process::{Pid, ProcessControlBlock},
        segment::Segment,
    },
};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use novavm_shared::{
    eprintln,
    mem::{frame_to_paddr, page_align, paddr_to_frame, PAGE_FRAME_SIZE, USERSTACK},
    println,
};

fn page_buffer() -> Result<Vec<u8>, VmError> {
    let mut page = Vec::new();
    page.try_reserve_exact(PAGE_FRAME_SIZE)
        .map_err(|_| VmError::AllocationFailure)?;
    page.resize(PAGE_FRAME_SIZE, 0);
    Ok(page)
}

pub struct VmSubsystem<A: FrameAllocator, S: SwapStore, H: TlbHardware> {
    config: VmConfig,
    ipt: Mutex<InvertedPageTable>,
    allocator: A,
    swap: S,
    tlb: Tlb<H>,
    stats: VmStats,
    // Frames out of the allocator but not yet in the table, or released from
    // the table but not yet freed.
    frames_in_transit: AtomicUsize,
}

impl<A: FrameAllocator, S: SwapStore, H: TlbHardware> VmSubsystem<A, S, H> {
    /// Brings up the VM with an empty page table and a flushed TLB.
    pub fn bootstrap(config: VmConfig, allocator: A, swap: S, tlb: H) -> Result<Self, VmError> {
        config.validate(allocator.frame_count(), tlb.slots(), swap.slots())?;
        let ipt = InvertedPageTable::new(config.frames)?;

        let tlb = Tlb::new(tlb);
        tlb.invalidate_all();

        println!(
            "novavm: {} frames, {} TLB slots, {} swap slots",
            config.frames, config.tlb_slots, config.swap_slots
        );

        Ok(Self {
            config,
            ipt: Mutex::new(ipt),
            allocator,
            swap,
            tlb,
            stats: VmStats::new(),
            frames_in_transit: AtomicUsize::new(0),
        })
    }

    /// Flushes swap, prints the statistics and tears everything down.
    pub fn shutdown(self) -> VmStatsSnapshot {
        self.swap.flush();
        self.stats.print();
        self.stats.snapshot()
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn stats(&self) -> &VmStats {
        &self.stats
    }

    pub fn tlb(&self) -> &Tlb<H> {
        &self.tlb
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn swap(&self) -> &S {
        &self.swap
    }

    /// The frame holding the page of `vaddr` in `pid`, if it is resident.
    pub fn lookup(&self, pid: Pid, vaddr: usize) -> Option<usize> {
        self.ipt.lock().lookup(pid, vaddr)
    }

    /// Number of frames currently holding a page.
    pub fn resident_pages(&self) -> usize {
        self.ipt.lock().occupied()
    }

    /// Panics if the page table is inconsistent.
    pub fn check_invariants(&self) {
        self.ipt.lock().check_invariants();
    }

    /// Handles a TLB miss or protection fault on `vaddr` for the current
    /// process, and returns the physical address the page now maps to.
    ///
    /// On success the translation has been written to the TLB.
    pub fn vm_fault(
        &self,
        current: Option<&ProcessControlBlock>,
        kind: FaultKind,
        vaddr: usize,
    ) -> Result<usize, VmError> {
        if kind == FaultKind::ReadOnly {
            eprintln!("novavm: write to read-only page {:#x}", vaddr);
            return Err(VmError::PermissionDenied);
        }

        let Some(process) = current else {
            eprintln!("novavm: fault at {:#x} with no current process", vaddr);
            return Err(VmError::NoContext);
        };
        let Some(addrspace) = &process.addrspace else {
            eprintln!("novavm: fault at {:#x} in pid {} with no address space", vaddr, process.pid);
            return Err(VmError::NoContext);
        };
        assert!(addrspace.is_page_aligned());

        let Some(segment) = addrspace.segment_for(vaddr) else {
            eprintln!("novavm: pid {} faulted on unmapped address {:#x}", process.pid, vaddr);
            return Err(VmError::InvalidAddress);
        };

        vm_debug!("fault: pid {} {:?} at {:#x}", process.pid, kind, vaddr);

        loop {
            self.stats.record(Stat::TlbFaults);
            let (paddr, resolution) = self.resolve(process.pid, vaddr, Some(segment))?;
            self.stats.record(resolution);

            match self.tlb.refill(vaddr, paddr) {
                Refill::Free(_) => self.stats.record(Stat::TlbFaultsFree),
                Refill::Replaced(_) => self.stats.record(Stat::TlbFaultsReplace),
            }

            // An eviction may have taken the frame before the refill landed.
            if self.lookup(process.pid, vaddr) == Some(paddr_to_frame(paddr)) {
                return Ok(paddr);
            }
            self.tlb.invalidate_page(vaddr);
        }
    }

    /// Returns the physical address backing the page of `vaddr` in `pid`,
    /// bringing it into memory if it is not resident.
    pub fn translate(&self, pid: Pid, vaddr: usize) -> Result<usize, VmError> {
        self.resolve(pid, vaddr, None).map(|(paddr, _)| paddr)
    }

    fn resolve(
        &self,
        pid: Pid,
        vaddr: usize,
        segment: Option<&Segment>,
    ) -> Result<(usize, Stat), VmError> {
        assert_ne!(pid, 0, "translation for pid 0");
        if page_align(vaddr) >= USERSTACK {
            eprintln!("novavm: pid {} address {:#x} above user space", pid, vaddr);
            return Err(VmError::InvalidAddress);
        }
        let id = PageId::new(pid, vaddr);

        loop {
            let probe = self.ipt.lock().probe(pid, vaddr);
            match probe {
                Probe::Present(frame) => return Ok((frame_to_paddr(frame), Stat::TlbReloads)),
                Probe::Busy(_) => {
                    core::hint::spin_loop();
                    continue;
                }
                Probe::Missing => {}
            }

            let mut page = page_buffer()?;
            let frame = self.obtain_frame(&mut page)?;

            let reserved = {
                let mut ipt = self.ipt.lock();
                let reserved = ipt.reserve(id, frame);
                if reserved.is_ok() {
                    self.frames_in_transit.fetch_sub(1, Ordering::AcqRel);
                }
                reserved
            };
            if reserved.is_err() {
                // Another thread mapped the page first; use its frame.
                self.allocator.free_frame(frame);
                self.frames_in_transit.fetch_sub(1, Ordering::AcqRel);
                continue;
            }

            let resolution = self.load_page(id, frame, segment, &mut page);
            self.ipt.lock().commit(frame);

            vm_debug!("pid {} page {:#x} -> frame {} ({})", pid, id.page, frame, resolution.name());
            return Ok((frame_to_paddr(frame), resolution));
        }
    }

    /// Gets a free frame, evicting the oldest mapping if there is none. The
    /// caller owns the returned frame and counts it as in transit.
    fn obtain_frame(&self, page: &mut [u8]) -> Result<usize, VmError> {
        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(frame);
            }
            if self.evict_one(page)? {
                continue;
            }

            // Nothing to evict right now. Other threads may still be loading
            // or freeing frames; only when the VM holds no frame at all is
            // memory really exhausted.
            let idle = {
                let ipt = self.ipt.lock();
                !ipt.has_victims()
                    && ipt.in_flight() == 0
                    && self.frames_in_transit.load(Ordering::Acquire) == 0
            };
            if idle {
                return self.take_frame().ok_or_else(|| {
                    eprintln!("novavm: no frame available and nothing to evict");
                    VmError::ResourceExhaustion
                });
            }
            core::hint::spin_loop();
        }
    }

    fn take_frame(&self) -> Option<usize> {
        self.frames_in_transit.fetch_add(1, Ordering::AcqRel);
        let frame = self.allocator.alloc_frame();
        if frame.is_none() {
            self.frames_in_transit.fetch_sub(1, Ordering::AcqRel);
        }
        frame
    }

    /// Writes the oldest mapped page to swap and frees its frame. Returns
    /// `false` if no page was mapped.
    fn evict_one(&self, page: &mut [u8]) -> Result<bool, VmError> {
        let Some((frame, victim)) = self.ipt.lock().begin_eviction() else {
            return Ok(false);
        };

        self.tlb.invalidate_page(victim.page);
        self.allocator.read_frame(frame, page);
        let written = self.swap.evict(victim, page);

        // The owner may have exited while the page was being written. Its
        // swap slots are already gone, so nothing of it may be kept.
        let orphaned = {
            let mut ipt = self.ipt.lock();
            let orphaned = ipt.entry(frame).is_orphaned();
            if written.is_err() && !orphaned {
                ipt.abort_eviction(frame);
            }
            orphaned
        };
        match written {
            Err(err) if !orphaned => {
                eprintln!("novavm: could not evict pid {} page {:#x}: {}", victim.pid, victim.page, err);
                return Err(err);
            }
            Err(_) => {}
            Ok(()) => {
                self.stats.record(Stat::SwapWrites);
                if orphaned {
                    self.swap.invalidate(victim);
                }
            }
        }

        self.frames_in_transit.fetch_add(1, Ordering::AcqRel);
        self.ipt.lock().release_entry(frame);
        self.allocator.free_frame(frame);
        self.frames_in_transit.fetch_sub(1, Ordering::AcqRel);

        vm_debug!("evicted pid {} page {:#x} from frame {}", victim.pid, victim.page, frame);
        Ok(true)
    }

    /// Fills a reserved frame: from swap if the page was evicted before, from
    /// the segment's file if it has data there, and with zeroes otherwise.
    fn load_page(&self, id: PageId, frame: usize, segment: Option<&Segment>, page: &mut [u8]) -> Stat {
        let resolution = if self.swap.restore(id, page) {
            self.allocator.write_frame(frame, page);
            Stat::PageFaultsSwap
        } else if segment.is_some_and(|s| s.load_page(id.page, page)) {
            self.allocator.write_frame(frame, page);
            Stat::PageFaultsElf
        } else {
            self.allocator.zero_frame(frame);
            Stat::PageFaultsZeroed
        };
        self.swap.invalidate(id);
        resolution
    }

    /// Called on a context switch. The TLB has no address space tags, so
    /// nothing from the previous process may stay in it.
    pub fn activate(&self) {
        self.tlb.invalidate_all();
        self.stats.record(Stat::TlbInvalidations);
    }

    /// Releases every frame and swap slot owned by `pid`.
    ///
    /// No thread of the process may still be faulting. Pages of `pid` that
    /// another process is evicting right now are dropped by that eviction.
    pub fn process_exit(&self, pid: Pid) {
        let frames = {
            let mut ipt = self.ipt.lock();
            let frames = ipt.release_process(pid);
            self.frames_in_transit
                .fetch_add(frames.len(), Ordering::AcqRel);
            frames
        };
        for &frame in &frames {
            self.allocator.free_frame(frame);
            self.frames_in_transit.fetch_sub(1, Ordering::AcqRel);
        }
        self.swap.invalidate_process(pid);
        self.activate();

        vm_debug!("pid {} exited, {} frames released", pid, frames.len());
    }

    /// There is a single TLB, so there is never another CPU to shoot down.
    pub fn tlb_shootdown(&self, shootdown: &TlbShootdown) {
        eprintln!("novavm: ignoring TLB shootdown for {:#x}", shootdown.page);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mem::frame_allocator::{Coremap, FirstFit},
        swapping::SwapArea,
        user_program::{
            address_space::AddressSpace,
            segment::{BackingFile, Permission},
        },
    };
    use alloc::{sync::Arc, vec, vec::Vec};
    use core::sync::atomic::AtomicBool;
    use std::sync::Barrier;
    use novavm_shared::mem::STACK_PAGES;

    const TLB_SLOTS: usize = 4;
    const CODE: usize = 0x0040_0000;
    const DATA: usize = 0x1000_0000;

    type TestVm<S = SwapArea> = VmSubsystem<Coremap<FirstFit>, S, SoftTlb>;

    fn config(frames: usize) -> VmConfig {
        VmConfig {
            frames,
            tlb_slots: TLB_SLOTS,
            swap_slots: 64,
        }
    }

    fn vm_with_swap<S: SwapStore>(frames: usize, swap: S) -> TestVm<S> {
        VmSubsystem::bootstrap(
            VmConfig {
                swap_slots: swap.slots(),
                ..config(frames)
            },
            Coremap::new(frames).unwrap(),
            swap,
            SoftTlb::new(TLB_SLOTS),
        )
        .unwrap()
    }

    fn vm(frames: usize) -> TestVm {
        vm_with_swap(frames, SwapArea::new(64).unwrap())
    }

    fn process(pid: Pid) -> ProcessControlBlock {
        let code = Segment::new(CODE, 4 * PAGE_FRAME_SIZE, Permission::ReadOnly);
        let data = Segment::new(DATA, 16 * PAGE_FRAME_SIZE, Permission::ReadWrite);
        ProcessControlBlock::new(pid, Some(AddressSpace::new(code, data)))
    }

    fn data_page(n: usize) -> usize {
        DATA + n * PAGE_FRAME_SIZE
    }

    fn fault<S: SwapStore>(vm: &TestVm<S>, pcb: &ProcessControlBlock, vaddr: usize) -> usize {
        vm.vm_fault(Some(pcb), FaultKind::Write, vaddr).unwrap()
    }

    fn fill<S: SwapStore>(vm: &TestVm<S>, paddr: usize, byte: u8) {
        vm.allocator()
            .write_frame(paddr_to_frame(paddr), &vec![byte; PAGE_FRAME_SIZE]);
    }

    fn contents<S: SwapStore>(vm: &TestVm<S>, paddr: usize) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_FRAME_SIZE];
        vm.allocator().read_frame(paddr_to_frame(paddr), &mut page);
        page
    }

    #[test]
    fn test_fault_maps_zeroed_page() {
        let vm = vm(4);
        let pcb = process(1);
        let paddr = fault(&vm, &pcb, data_page(0) + 0x10);
        assert_eq!(paddr % PAGE_FRAME_SIZE, 0);
        assert!(contents(&vm, paddr).iter().all(|&b| b == 0));
        assert_eq!(vm.tlb().hardware().probe(data_page(0)), Some(paddr));
        assert_eq!(vm.lookup(1, data_page(0)), Some(paddr_to_frame(paddr)));

        let stats = vm.stats().snapshot();
        assert_eq!(stats.tlb_faults, 1);
        assert_eq!(stats.tlb_faults_free, 1);
        assert_eq!(stats.page_faults_zeroed, 1);
    }

    #[test]
    fn test_translation_is_idempotent() {
        let vm = vm(4);
        let first = vm.translate(1, data_page(2)).unwrap();
        let second = vm.translate(1, data_page(2) + 0xabc).unwrap();
        assert_eq!(first, second);
        assert_eq!(vm.resident_pages(), 1);
        vm.check_invariants();
    }

    #[test]
    fn test_evicts_oldest_and_restores_from_swap() {
        let vm = vm(4);
        let pcb = process(1);
        let [a, b, c, d, e] = [0, 1, 2, 3, 4].map(data_page);

        let a_paddr = fault(&vm, &pcb, a);
        fill(&vm, a_paddr, 0xaa);
        let b_paddr = fault(&vm, &pcb, b);
        fill(&vm, b_paddr, 0xbb);
        fault(&vm, &pcb, c);
        fault(&vm, &pcb, d);

        // Out of frames: E takes A's frame, and A goes to swap.
        let e_paddr = fault(&vm, &pcb, e);
        assert_eq!(e_paddr, a_paddr);
        assert_eq!(vm.lookup(1, a), None);
        assert!(vm.swap().contains(PageId::new(1, a)));
        assert_eq!(vm.tlb().hardware().probe(a), None);
        assert!(contents(&vm, e_paddr).iter().all(|&b| b == 0));

        // A comes back with its contents, and B is the next victim.
        let a_paddr = fault(&vm, &pcb, a);
        assert_eq!(a_paddr, b_paddr);
        assert!(contents(&vm, a_paddr).iter().all(|&b| b == 0xaa));
        assert_eq!(vm.lookup(1, b), None);
        assert!(vm.swap().contains(PageId::new(1, b)));
        assert!(!vm.swap().contains(PageId::new(1, a)));

        let stats = vm.stats().snapshot();
        assert_eq!(stats.swap_writes, 2);
        assert_eq!(stats.page_faults_swap, 1);
        assert_eq!(stats.page_faults_zeroed, 5);
        vm.check_invariants();
    }

    #[test]
    fn test_reaccess_does_not_save_a_page() {
        let vm = vm(4);
        let pcb = process(1);
        for n in 0..4 {
            fault(&vm, &pcb, data_page(n));
        }
        // Touching the oldest page again does not move it back in line.
        fault(&vm, &pcb, data_page(0));
        fault(&vm, &pcb, data_page(0));
        assert_eq!(vm.stats().get(Stat::TlbReloads), 2);

        fault(&vm, &pcb, data_page(4));
        assert_eq!(vm.lookup(1, data_page(0)), None);
        for n in 1..5 {
            assert!(vm.lookup(1, data_page(n)).is_some());
        }
    }

    struct RecordingSwap {
        inner: SwapArea,
        evicted: Mutex<Vec<PageId>>,
        flushed: AtomicUsize,
    }

    impl SwapStore for RecordingSwap {
        fn slots(&self) -> usize {
            self.inner.slots()
        }

        fn evict(&self, id: PageId, page: &[u8]) -> Result<(), VmError> {
            self.evicted.lock().push(id);
            self.inner.evict(id, page)
        }

        fn restore(&self, id: PageId, page: &mut [u8]) -> bool {
            self.inner.restore(id, page)
        }

        fn invalidate(&self, id: PageId) {
            self.inner.invalidate(id);
        }

        fn invalidate_process(&self, pid: Pid) {
            self.inner.invalidate_process(pid);
        }

        fn flush(&self) {
            self.flushed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn recording_swap() -> RecordingSwap {
        RecordingSwap {
            inner: SwapArea::new(64).unwrap(),
            evicted: Mutex::new(Vec::new()),
            flushed: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_eviction_order_is_arrival_order() {
        let vm = vm_with_swap(3, recording_swap());
        let first = process(1);
        let second = process(2);
        // Interleave two processes; they share the one table.
        for n in 0..3 {
            fault(&vm, &first, data_page(n));
            fault(&vm, &second, data_page(n));
        }

        let evicted = vm.swap().evicted.lock().clone();
        let expected: Vec<PageId> = [(1, 0), (2, 0), (1, 1)]
            .into_iter()
            .map(|(pid, n)| PageId::new(pid, data_page(n)))
            .collect();
        assert_eq!(evicted, expected);
        vm.check_invariants();
    }

    #[test]
    fn test_read_only_fault_changes_nothing() {
        let vm = vm(4);
        let pcb = process(1);
        let before = vm.stats().snapshot();
        assert_eq!(
            vm.vm_fault(Some(&pcb), FaultKind::ReadOnly, data_page(0)),
            Err(VmError::PermissionDenied)
        );
        assert_eq!(vm.stats().snapshot(), before);
        assert_eq!(vm.resident_pages(), 0);
        assert_eq!(vm.allocator().frames_allocated(), 0);
        assert!(!VmError::PermissionDenied.is_fatal());
    }

    #[test]
    fn test_invalid_addresses() {
        let vm = vm(4);
        let pcb = process(1);
        assert_eq!(vm.translate(1, USERSTACK), Err(VmError::InvalidAddress));
        assert_eq!(vm.translate(1, usize::MAX & !0xfff), Err(VmError::InvalidAddress));
        assert_eq!(
            vm.vm_fault(Some(&pcb), FaultKind::Read, data_page(16)),
            Err(VmError::InvalidAddress)
        );
        assert_eq!(
            vm.vm_fault(Some(&pcb), FaultKind::Read, USERSTACK),
            Err(VmError::InvalidAddress)
        );
        assert_eq!(vm.resident_pages(), 0);

        // The top stack page is fine.
        let stack = USERSTACK - STACK_PAGES * PAGE_FRAME_SIZE;
        assert!(vm.vm_fault(Some(&pcb), FaultKind::Write, USERSTACK - 4).is_ok());
        assert!(vm.vm_fault(Some(&pcb), FaultKind::Write, stack).is_ok());
    }

    #[test]
    fn test_no_context() {
        let vm = vm(4);
        assert_eq!(
            vm.vm_fault(None, FaultKind::Read, data_page(0)),
            Err(VmError::NoContext)
        );
        let bare = ProcessControlBlock::new(1, None);
        assert_eq!(
            vm.vm_fault(Some(&bare), FaultKind::Write, data_page(0)),
            Err(VmError::NoContext)
        );
        assert_eq!(vm.stats().get(Stat::TlbFaults), 0);
        assert_eq!(vm.resident_pages(), 0);
    }

    #[test]
    fn test_code_pages_come_from_the_file() {
        let vm = vm(4);
        let image: Vec<u8> = (0..2 * PAGE_FRAME_SIZE).map(|i| (i % 13) as u8).collect();
        let file: Arc<dyn BackingFile> = Arc::new(image.clone());
        let code = Segment::with_file(
            CODE,
            2 * PAGE_FRAME_SIZE,
            Permission::ReadOnly,
            file,
            0,
            PAGE_FRAME_SIZE + 100,
        );
        let data = Segment::new(DATA, PAGE_FRAME_SIZE, Permission::ReadWrite);
        let pcb = ProcessControlBlock::new(1, Some(AddressSpace::new(code, data)));

        let paddr = fault(&vm, &pcb, CODE + PAGE_FRAME_SIZE);
        let page = contents(&vm, paddr);
        assert_eq!(&page[..100], &image[PAGE_FRAME_SIZE..PAGE_FRAME_SIZE + 100]);
        assert!(page[100..].iter().all(|&b| b == 0));
        assert_eq!(vm.stats().get(Stat::PageFaultsElf), 1);

        // An evicted code page comes back from swap, not from the file.
        for n in 0..4 {
            vm.translate(2, data_page(n)).unwrap();
        }
        fault(&vm, &pcb, CODE + PAGE_FRAME_SIZE);
        assert_eq!(vm.stats().get(Stat::PageFaultsSwap), 1);
    }

    #[test]
    fn test_process_exit_releases_everything() {
        let vm = vm(2);
        let pcb = process(1);
        let other = process(2);
        for n in 0..3 {
            fault(&vm, &pcb, data_page(n));
        }
        fault(&vm, &other, data_page(0));
        assert_eq!(vm.swap().used(), 2);

        vm.process_exit(1);
        assert_eq!(vm.resident_pages(), 1);
        assert_eq!(vm.allocator().frames_allocated(), 1);
        assert_eq!(vm.swap().used(), 0);
        assert!(vm.lookup(2, data_page(0)).is_some());
        assert_eq!(vm.tlb().hardware().probe(data_page(0)), None);
        vm.check_invariants();

        // The freed frame is reused without evicting anything.
        fault(&vm, &other, data_page(1));
        assert_eq!(vm.stats().get(Stat::SwapWrites), 2);
    }

    #[test]
    fn test_activate_flushes_tlb() {
        let vm = vm(4);
        let paddr = fault(&vm, &process(1), data_page(0));
        assert_eq!(vm.tlb().hardware().probe(data_page(0)), Some(paddr));
        vm.activate();
        assert_eq!(vm.tlb().hardware().probe(data_page(0)), None);
        assert_eq!(vm.stats().get(Stat::TlbInvalidations), 1);
        // The mapping itself survives.
        assert_eq!(vm.lookup(1, data_page(0)), Some(paddr_to_frame(paddr)));
    }

    #[test]
    fn test_tlb_replacement_is_counted() {
        let vm = vm(8);
        let pcb = process(1);
        for n in 0..TLB_SLOTS + 2 {
            fault(&vm, &pcb, data_page(n));
        }
        let stats = vm.stats().snapshot();
        assert_eq!(stats.tlb_faults_free, TLB_SLOTS);
        assert_eq!(stats.tlb_faults_replace, 2);
        // The two replacements went to slots 0 and 1.
        assert_eq!(vm.tlb().hardware().probe(data_page(0)), None);
        assert_eq!(vm.tlb().hardware().probe(data_page(1)), None);
        assert!(vm.tlb().hardware().probe(data_page(2)).is_some());
    }

    #[test]
    fn test_bootstrap_rejects_bad_config() {
        let bad = |config: VmConfig, frames: usize, slots: usize| {
            VmSubsystem::bootstrap(
                config,
                Coremap::<FirstFit>::new(frames).unwrap(),
                SwapArea::new(64).unwrap(),
                SoftTlb::new(slots),
            )
            .err()
        };
        assert_eq!(bad(config(0), 0, TLB_SLOTS), Some(VmError::InvalidConfig));
        assert_eq!(bad(config(4), 8, TLB_SLOTS), Some(VmError::InvalidConfig));
        assert_eq!(bad(config(4), 4, TLB_SLOTS + 1), Some(VmError::InvalidConfig));
        let small_swap = VmConfig {
            swap_slots: 32,
            ..config(4)
        };
        assert_eq!(bad(small_swap, 4, TLB_SLOTS), Some(VmError::InvalidConfig));
        assert_eq!(bad(config(4), 4, TLB_SLOTS), None);
    }

    #[test]
    fn test_swap_full_is_reported() {
        let vm = vm_with_swap(1, SwapArea::new(1).unwrap());
        vm.translate(1, data_page(0)).unwrap();
        vm.translate(1, data_page(1)).unwrap();
        assert_eq!(vm.translate(1, data_page(2)), Err(VmError::SwapFull));
        // The page that could not be written out stays mapped, and is still
        // the first to go once there is room.
        assert!(vm.lookup(1, data_page(1)).is_some());
        vm.check_invariants();

        vm.swap().invalidate(PageId::new(1, data_page(0)));
        vm.translate(1, data_page(2)).unwrap();
        assert_eq!(vm.lookup(1, data_page(1)), None);
        assert!(vm.swap().contains(PageId::new(1, data_page(1))));
    }

    #[test]
    fn test_no_frames_for_user_pages() {
        let allocator = Coremap::<FirstFit>::new(2).unwrap();
        allocator.reserve_for_kernel(0);
        allocator.reserve_for_kernel(1);
        let vm = VmSubsystem::bootstrap(
            config(2),
            allocator,
            SwapArea::new(64).unwrap(),
            SoftTlb::new(TLB_SLOTS),
        )
        .unwrap();

        assert_eq!(vm.translate(1, data_page(0)), Err(VmError::ResourceExhaustion));
        assert_eq!(
            vm.vm_fault(Some(&process(1)), FaultKind::Read, data_page(0)),
            Err(VmError::ResourceExhaustion)
        );
        assert_eq!(vm.resident_pages(), 0);
        assert_eq!(vm.lookup(1, data_page(0)), None);
        assert_eq!(vm.swap().used(), 0);
        vm.check_invariants();
    }

    /// Holds the first eviction inside the store until the test lets it go.
    struct GatedSwap {
        inner: SwapArea,
        armed: AtomicBool,
        gate: Barrier,
    }

    impl SwapStore for GatedSwap {
        fn slots(&self) -> usize {
            self.inner.slots()
        }

        fn evict(&self, id: PageId, page: &[u8]) -> Result<(), VmError> {
            if self.armed.swap(false, Ordering::AcqRel) {
                self.gate.wait();
                self.gate.wait();
            }
            self.inner.evict(id, page)
        }

        fn restore(&self, id: PageId, page: &mut [u8]) -> bool {
            self.inner.restore(id, page)
        }

        fn invalidate(&self, id: PageId) {
            self.inner.invalidate(id);
        }

        fn invalidate_process(&self, pid: Pid) {
            self.inner.invalidate_process(pid);
        }

        fn flush(&self) {}
    }

    #[test]
    fn test_exit_during_eviction_drops_the_page() {
        let vm = vm_with_swap(
            1,
            GatedSwap {
                inner: SwapArea::new(8).unwrap(),
                armed: AtomicBool::new(true),
                gate: Barrier::new(2),
            },
        );
        let paddr = vm.translate(1, data_page(0)).unwrap();
        fill(&vm, paddr, 0x5a);

        std::thread::scope(|s| {
            // pid 2 needs the only frame, so pid 1's page is written out.
            let other = s.spawn(|| vm.translate(2, data_page(0)));
            vm.swap().gate.wait();
            vm.process_exit(1);
            vm.swap().gate.wait();
            assert_eq!(other.join().unwrap(), Ok(paddr));
        });

        assert!(!vm.swap().inner.contains(PageId::new(1, data_page(0))));
        assert_eq!(vm.swap().inner.used(), 0);
        vm.check_invariants();

        // A new process with the same pid starts from a zeroed page.
        let paddr = fault(&vm, &process(1), data_page(0));
        assert!(contents(&vm, paddr).iter().all(|&b| b == 0));
        assert_eq!(vm.stats().get(Stat::PageFaultsSwap), 0);
        assert_eq!(vm.stats().get(Stat::PageFaultsZeroed), 1);
        assert!(vm.swap().inner.contains(PageId::new(2, data_page(0))));
    }

    #[test]
    fn test_shutdown_flushes_and_reports() {
        let vm = vm_with_swap(2, recording_swap());
        let pcb = process(1);
        for n in 0..3 {
            fault(&vm, &pcb, data_page(n));
        }
        fault(&vm, &pcb, data_page(2));
        vm.tlb_shootdown(&TlbShootdown { page: data_page(2) });

        assert_eq!(vm.swap().flushed.load(Ordering::Relaxed), 0);
        let stats = vm.shutdown();
        assert_eq!(stats.tlb_faults, 4);
        assert_eq!(stats.tlb_faults, stats.tlb_faults_free + stats.tlb_faults_replace);
        assert_eq!(
            stats.tlb_faults,
            stats.tlb_reloads + stats.page_faults_zeroed + stats.page_faults_elf + stats.page_faults_swap
        );
        assert_eq!(stats.swap_writes, 1);
    }

    #[test]
    fn test_concurrent_faults_on_one_page() {
        // Enough frames that nothing is evicted while the threads race.
        let vm = vm(16);
        let pcb = process(1);
        let paddrs: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| fault(&vm, &pcb, data_page(3))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(paddrs.iter().all(|&p| p == paddrs[0]));
        assert_eq!(vm.resident_pages(), 1);
        assert_eq!(vm.stats().get(Stat::PageFaultsZeroed), 1);
        vm.check_invariants();
    }

    #[test]
    fn test_concurrent_faults_under_pressure() {
        let vm = vm(4);
        std::thread::scope(|s| {
            for pid in 1..=4 {
                let vm = &vm;
                s.spawn(move || {
                    let pcb = process(pid);
                    for round in 0..20 {
                        let paddr = fault(vm, &pcb, data_page(round % 8));
                        assert_eq!(paddr % PAGE_FRAME_SIZE, 0);
                    }
                });
            }
        });
        vm.check_invariants();
        assert!(vm.resident_pages() <= 4);
        let stats = vm.stats().snapshot();
        assert_eq!(
            stats.tlb_faults,
            stats.tlb_reloads + stats.page_faults_zeroed + stats.page_faults_elf + stats.page_faults_swap
        );
    }
}
