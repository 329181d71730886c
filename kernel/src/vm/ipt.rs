//! Inverted page table.
//!
//! There is one entry per physical frame, recording which (process, page)
//! currently lives there. The table's size depends only on how much physical
//! memory there is, however sparse the processes' address spaces are.
//!
//! Going from (process, page) to a frame cannot index the entry array
//! directly, so a separate open-addressed hash index maps a page identity to
//! its frame. The index is twice the size of the table, marks removed slots
//! with tombstones, and a probe stops at the first empty slot, so a miss is a
//! definite answer and not a full scan.

use super::{error::VmError, fifo::FifoQueue};
use crate::user_program::process::Pid;
use alloc::{boxed::Box, vec::Vec};
use novavm_shared::mem::{page_align, page_number};

/// A virtual page owned by a process. Also the key under which the page's
/// contents are kept in swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId {
    pub pid: Pid,
    pub page: usize,
}

impl PageId {
    /// The page containing `vaddr` in process `pid`.
    pub fn new(pid: Pid, vaddr: usize) -> Self {
        Self {
            pid,
            page: page_align(vaddr),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryStatus {
    Absent,
    /// Reserved for a page whose contents are still being filled in.
    Loading,
    Present,
    /// Dequeued as a victim; its contents are on their way to swap.
    Evicting,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Protection {
    #[default]
    ReadWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IptEntry {
    pid: Option<Pid>,
    page: usize,
    status: EntryStatus,
    protection: Protection,
    // Set when the owner exits while the frame is being evicted.
    orphaned: bool,
}

impl IptEntry {
    const ABSENT: Self = Self {
        pid: None,
        page: 0,
        status: EntryStatus::Absent,
        protection: Protection::ReadWrite,
        orphaned: false,
    };

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    /// Whether the owning process exited while this frame was being evicted.
    /// Whatever the eviction wrote to swap must be thrown away.
    pub fn is_orphaned(&self) -> bool {
        self.orphaned
    }

    /// The page occupying this frame, if any.
    pub fn owner(&self) -> Option<PageId> {
        match self.status {
            EntryStatus::Absent => None,
            _ => self.pid.map(|pid| PageId {
                pid,
                page: self.page,
            }),
        }
    }

    fn owned_by(&self, id: PageId) -> bool {
        self.status != EntryStatus::Absent && self.pid == Some(id.pid) && self.page == id.page
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IndexSlot {
    Empty,
    Tombstone,
    Frame(usize),
}

/// Where a page stands in the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    /// Mapped and usable.
    Present(usize),
    /// Being loaded or evicted by another thread. Ask again shortly.
    Busy(usize),
    Missing,
}

pub struct InvertedPageTable {
    entries: Box<[IptEntry]>,
    index: Box<[IndexSlot]>,
    live: usize,
    tombstones: usize,
    fifo: FifoQueue,
}

fn try_boxed<T: Clone>(len: usize, value: T) -> Result<Box<[T]>, VmError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| VmError::AllocationFailure)?;
    v.resize(len, value);
    Ok(v.into_boxed_slice())
}

impl InvertedPageTable {
    /// Creates a table with every entry absent.
    pub fn new(capacity: usize) -> Result<Self, VmError> {
        let index_len = capacity
            .checked_mul(2)
            .and_then(usize::checked_next_power_of_two)
            .ok_or(VmError::AllocationFailure)?;

        let table = Self {
            entries: try_boxed(capacity, IptEntry::ABSENT)?,
            index: try_boxed(index_len, IndexSlot::Empty)?,
            live: 0,
            tombstones: 0,
            fifo: FifoQueue::new(capacity)?,
        };

        #[cfg(feature = "print_ipt_dim")]
        {
            use core::mem::size_of;
            novavm_shared::println!(
                "novavm: IPT entry {} B, {} entries, table {} KB, index {} KB, queue {} KB",
                size_of::<IptEntry>(),
                capacity,
                size_of::<IptEntry>() * capacity / 1024,
                size_of::<IndexSlot>() * index_len / 1024,
                size_of::<usize>() * capacity / 1024,
            );
        }

        Ok(table)
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, frame: usize) -> &IptEntry {
        &self.entries[frame]
    }

    /// Number of frames with a page in them, in any state.
    pub fn occupied(&self) -> usize {
        self.live
    }

    /// Number of frames whose contents are being loaded or written out.
    pub fn in_flight(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, EntryStatus::Loading | EntryStatus::Evicting))
            .count()
    }

    /// Whether any frame is waiting to be evicted.
    pub fn has_victims(&self) -> bool {
        !self.fifo.is_empty()
    }

    /// Frames in eviction order, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = usize> + '_ {
        self.fifo.iter()
    }

    fn mask(&self) -> usize {
        self.index.len() - 1
    }

    fn hash(id: PageId) -> usize {
        // Fibonacci hashing of the page number salted with the pid. Page
        // numbers fit in 32 bits, so the pid goes in the upper half.
        let key = (page_number(id.page) as u64) | (u64::from(id.pid) << 32);
        (key.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize
    }

    fn find_slot(&self, id: PageId) -> Option<(usize, usize)> {
        let mask = self.mask();
        let start = Self::hash(id) & mask;
        for step in 0..self.index.len() {
            let slot = (start + step) & mask;
            match self.index[slot] {
                IndexSlot::Empty => return None,
                IndexSlot::Tombstone => {}
                IndexSlot::Frame(frame) => {
                    if self.entries[frame].owned_by(id) {
                        return Some((slot, frame));
                    }
                }
            }
        }
        None
    }

    fn index_insert(&mut self, id: PageId, frame: usize) {
        if (self.live + self.tombstones + 1) * 4 > self.index.len() * 3 {
            self.rebuild_index();
        }

        let mask = self.mask();
        let start = Self::hash(id) & mask;
        for step in 0..self.index.len() {
            let slot = (start + step) & mask;
            match self.index[slot] {
                IndexSlot::Frame(_) => {}
                IndexSlot::Empty => {
                    self.index[slot] = IndexSlot::Frame(frame);
                    self.live += 1;
                    return;
                }
                IndexSlot::Tombstone => {
                    self.index[slot] = IndexSlot::Frame(frame);
                    self.tombstones -= 1;
                    self.live += 1;
                    return;
                }
            }
        }
        // The index is at most three quarters full after a rebuild.
        unreachable!("page table index has no free slot");
    }

    fn index_remove(&mut self, id: PageId) {
        if let Some((slot, _)) = self.find_slot(id) {
            self.index[slot] = IndexSlot::Tombstone;
            self.live -= 1;
            self.tombstones += 1;
        }
    }

    /// Re-inserts every occupied entry into a fresh index, dropping tombstones.
    pub fn rebuild_index(&mut self) {
        self.index.fill(IndexSlot::Empty);
        self.live = 0;
        self.tombstones = 0;

        let mask = self.mask();
        for frame in 0..self.entries.len() {
            let Some(id) = self.entries[frame].owner() else {
                continue;
            };
            let mut slot = Self::hash(id) & mask;
            while self.index[slot] != IndexSlot::Empty {
                slot = (slot + 1) & mask;
            }
            self.index[slot] = IndexSlot::Frame(frame);
            self.live += 1;
        }
    }

    /// Where the page containing `vaddr` stands.
    pub fn probe(&self, pid: Pid, vaddr: usize) -> Probe {
        match self.find_slot(PageId::new(pid, vaddr)) {
            None => Probe::Missing,
            Some((_, frame)) => match self.entries[frame].status {
                EntryStatus::Present => Probe::Present(frame),
                EntryStatus::Loading | EntryStatus::Evicting => Probe::Busy(frame),
                EntryStatus::Absent => unreachable!("index points at absent frame {frame}"),
            },
        }
    }

    /// The frame holding the page containing `vaddr`, if it is mapped.
    pub fn lookup(&self, pid: Pid, vaddr: usize) -> Option<usize> {
        match self.probe(pid, vaddr) {
            Probe::Present(frame) => Some(frame),
            Probe::Busy(_) | Probe::Missing => None,
        }
    }

    fn occupy(&mut self, id: PageId, frame: usize, status: EntryStatus) {
        // Index first: a rebuild inside the insert must not see this entry.
        self.index_insert(id, frame);
        self.entries[frame] = IptEntry {
            pid: Some(id.pid),
            page: id.page,
            status,
            protection: Protection::default(),
            orphaned: false,
        };
    }

    /// Maps the page containing `vaddr` to `frame` and queues the frame for
    /// replacement.
    ///
    /// Returns `false`, changing nothing, if the frame is already occupied or
    /// the page is already mapped elsewhere. A duplicate insert never
    /// overwrites the existing mapping.
    pub fn record_mapping(&mut self, pid: Pid, vaddr: usize, frame: usize) -> bool {
        let id = PageId::new(pid, vaddr);
        if self.entries[frame].status != EntryStatus::Absent || self.find_slot(id).is_some() {
            return false;
        }
        self.occupy(id, frame, EntryStatus::Present);
        self.fifo.enqueue(frame);
        true
    }

    /// Claims `frame` for `id` while its contents are filled in. Lookups of
    /// `id` report [`Probe::Busy`] until [`InvertedPageTable::commit`].
    ///
    /// If another thread got to `id` first, its state is returned instead and
    /// `frame` is left untouched.
    pub fn reserve(&mut self, id: PageId, frame: usize) -> Result<(), Probe> {
        if let Some((_, existing)) = self.find_slot(id) {
            return Err(match self.entries[existing].status {
                EntryStatus::Present => Probe::Present(existing),
                _ => Probe::Busy(existing),
            });
        }
        assert_eq!(
            self.entries[frame].status,
            EntryStatus::Absent,
            "frame {frame} handed out while still mapped"
        );
        self.occupy(id, frame, EntryStatus::Loading);
        Ok(())
    }

    /// Publishes a reserved frame and queues it for replacement.
    pub fn commit(&mut self, frame: usize) {
        let entry = &mut self.entries[frame];
        assert_eq!(entry.status, EntryStatus::Loading);
        entry.status = EntryStatus::Present;
        self.fifo.enqueue(frame);
    }

    /// Takes the oldest mapped frame off the queue and marks it as being
    /// evicted. Returns the frame and the page that lived there, or `None` if
    /// nothing is queued.
    pub fn begin_eviction(&mut self) -> Option<(usize, PageId)> {
        if self.fifo.is_empty() {
            return None;
        }
        let frame = self.fifo.dequeue();
        let entry = &mut self.entries[frame];
        assert_eq!(
            entry.status,
            EntryStatus::Present,
            "queued frame {frame} is not present"
        );
        entry.status = EntryStatus::Evicting;
        let owner = entry.owner()?;
        Some((frame, owner))
    }

    /// Puts a frame whose eviction failed back in service. It goes back to
    /// the front of the queue, so it is still the next victim.
    pub fn abort_eviction(&mut self, frame: usize) {
        let entry = &mut self.entries[frame];
        assert_eq!(entry.status, EntryStatus::Evicting);
        assert!(!entry.orphaned, "frame {frame} has no owner to return to");
        entry.status = EntryStatus::Present;
        self.fifo.push_front(frame);
    }

    /// Clears `frame`, returning the page that was there. Releasing an absent
    /// frame does nothing.
    pub fn release_entry(&mut self, frame: usize) -> Option<PageId> {
        let entry = self.entries[frame];
        let id = entry.owner()?;
        if entry.status == EntryStatus::Present {
            self.fifo.remove(frame);
        }
        self.index_remove(id);
        self.entries[frame] = IptEntry::ABSENT;
        Some(id)
    }

    /// Releases every mapped frame owned by `pid` and returns them.
    ///
    /// Frames of `pid` that are being evicted stay with the evicting thread.
    /// They are marked orphaned instead, and stay in the index until that
    /// thread releases them.
    pub fn release_process(&mut self, pid: Pid) -> Vec<usize> {
        let mut frames = Vec::new();
        for frame in 0..self.entries.len() {
            let entry = &mut self.entries[frame];
            if entry.pid != Some(pid) {
                continue;
            }
            match entry.status {
                EntryStatus::Present => frames.push(frame),
                EntryStatus::Evicting => entry.orphaned = true,
                EntryStatus::Absent | EntryStatus::Loading => {}
            }
        }
        for &frame in &frames {
            self.release_entry(frame);
        }
        frames
    }

    /// Checks every structural invariant of the table, panicking on the first
    /// violation.
    pub fn check_invariants(&self) {
        let mut owners: Vec<PageId> = self.entries.iter().filter_map(IptEntry::owner).collect();
        assert_eq!(owners.len(), self.live, "index and entries disagree");
        owners.sort_unstable();
        let before = owners.len();
        owners.dedup();
        assert_eq!(before, owners.len(), "a page is mapped by two frames");

        for frame in 0..self.entries.len() {
            let entry = &self.entries[frame];
            if let Some(id) = entry.owner() {
                assert_eq!(self.find_slot(id).map(|(_, f)| f), Some(frame));
            }
            if entry.orphaned {
                assert_eq!(entry.status, EntryStatus::Evicting, "frame {frame} orphaned");
            }
        }

        let queued: Vec<usize> = self.fifo.iter().collect();
        for &frame in &queued {
            assert_eq!(self.entries[frame].status, EntryStatus::Present);
        }
        let present = self
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Present)
            .count();
        assert_eq!(queued.len(), present, "every present frame is queued once");
    }
}
