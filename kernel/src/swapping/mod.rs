//! Backing store for evicted pages.

use crate::{sync::Mutex, user_program::process::Pid, vm::error::VmError, vm::PageId};
use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};
use novavm_shared::mem::PAGE_FRAME_SIZE;

/// Where page contents go when their frame is taken away.
///
/// Pages are keyed by the identity they had in the page table, never by frame.
pub trait SwapStore: Sync {
    /// Number of page-sized slots the store holds.
    fn slots(&self) -> usize;

    /// Saves one page of contents for `id`, replacing any earlier copy.
    fn evict(&self, id: PageId, page: &[u8]) -> Result<(), VmError>;

    /// Copies the saved contents of `id` into `page`. Returns `false`, leaving
    /// `page` alone, if nothing is saved.
    fn restore(&self, id: PageId, page: &mut [u8]) -> bool;

    /// Discards the saved copy of `id`, if there is one.
    fn invalidate(&self, id: PageId);

    /// Discards every saved page of `pid`.
    fn invalidate_process(&self, pid: Pid);

    /// Makes sure everything evicted so far is durable.
    fn flush(&self);
}

struct SwapSpace {
    area: Box<[u8]>,
    bitmap: Box<[bool]>,
    directory: BTreeMap<PageId, usize>,
    writes: usize,
    reads: usize,
}

impl SwapSpace {
    fn slot_mut(&mut self, slot: usize) -> &mut [u8] {
        &mut self.area[slot * PAGE_FRAME_SIZE..(slot + 1) * PAGE_FRAME_SIZE]
    }

    fn release(&mut self, id: PageId) {
        if let Some(slot) = self.directory.remove(&id) {
            assert!(self.bitmap[slot], "swap slot {slot} freed twice");
            self.bitmap[slot] = false;
        }
    }
}

/// Swap kept in memory: a fixed number of page-sized slots.
pub struct SwapArea {
    slots: usize,
    space: Mutex<SwapSpace>,
}

impl SwapArea {
    pub fn new(slots: usize) -> Result<Self, VmError> {
        let bytes = slots
            .checked_mul(PAGE_FRAME_SIZE)
            .ok_or(VmError::AllocationFailure)?;

        let mut area = Vec::new();
        area.try_reserve_exact(bytes)
            .map_err(|_| VmError::AllocationFailure)?;
        area.resize(bytes, 0u8);

        let mut bitmap = Vec::new();
        bitmap
            .try_reserve_exact(slots)
            .map_err(|_| VmError::AllocationFailure)?;
        bitmap.resize(slots, false);

        Ok(Self {
            slots,
            space: Mutex::new(SwapSpace {
                area: area.into_boxed_slice(),
                bitmap: bitmap.into_boxed_slice(),
                directory: BTreeMap::new(),
                writes: 0,
                reads: 0,
            }),
        })
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.space.lock().directory.contains_key(&id)
    }

    /// Number of slots holding a page.
    pub fn used(&self) -> usize {
        self.space.lock().directory.len()
    }

    /// Pages written out and pages read back so far.
    pub fn io_counts(&self) -> (usize, usize) {
        let space = self.space.lock();
        (space.writes, space.reads)
    }
}

impl SwapStore for SwapArea {
    fn slots(&self) -> usize {
        self.slots
    }

    fn evict(&self, id: PageId, page: &[u8]) -> Result<(), VmError> {
        assert_eq!(page.len(), PAGE_FRAME_SIZE);
        let mut space = self.space.lock();

        let existing = space.directory.get(&id).copied();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let slot = space
                    .bitmap
                    .iter()
                    .position(|used| !used)
                    .ok_or(VmError::SwapFull)?;
                space.bitmap[slot] = true;
                space.directory.insert(id, slot);
                slot
            }
        };

        space.slot_mut(slot).copy_from_slice(page);
        space.writes += 1;
        Ok(())
    }

    fn restore(&self, id: PageId, page: &mut [u8]) -> bool {
        assert_eq!(page.len(), PAGE_FRAME_SIZE);
        let mut space = self.space.lock();
        let Some(&slot) = space.directory.get(&id) else {
            return false;
        };
        page.copy_from_slice(space.slot_mut(slot));
        space.reads += 1;
        true
    }

    fn invalidate(&self, id: PageId) {
        self.space.lock().release(id);
    }

    fn invalidate_process(&self, pid: Pid) {
        let mut space = self.space.lock();
        let owned: Vec<PageId> = space
            .directory
            .keys()
            .filter(|id| id.pid == pid)
            .copied()
            .collect();
        for id in owned {
            space.release(id);
        }
    }

    fn flush(&self) {
        // Nothing is buffered; the area is the store.
    }
}
