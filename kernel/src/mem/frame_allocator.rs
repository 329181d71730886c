mod placement_algorithms;

pub use placement_algorithms::{FirstFit, NextFit, PlacementAlgorithm};

use super::FrameAllocator;
use crate::{sync::Mutex, vm::error::VmError};
use alloc::{boxed::Box, vec::Vec};
use bitbybit::bitfield;
use core::ptr::NonNull;
use novavm_shared::mem::PAGE_FRAME_SIZE;

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    // Reserved for the kernel and never handed out.
    #[bit(1, rw)]
    kernel: bool,
}

struct CoremapState<P> {
    core_map: Box<[CoreMapEntry]>,
    placement: P,
    frames_allocated: usize,
}

/// Frame allocator that tracks every frame in a core map.
pub struct Coremap<P: PlacementAlgorithm = NextFit> {
    start: NonNull<u8>,
    frames: usize,
    // Set when `start` came from a host allocation that must be given back.
    owned: bool,
    state: Mutex<CoremapState<P>>,
}

// SAFETY: The frame memory is only reached through `start`, and which frames
// are live is guarded by the mutex. A frame's contents are only touched by the
// thread that currently owns the frame.
unsafe impl<P: PlacementAlgorithm + Send> Send for Coremap<P> {}
// SAFETY: See above.
unsafe impl<P: PlacementAlgorithm + Send> Sync for Coremap<P> {}

fn empty_core_map(frames: usize) -> Result<Box<[CoreMapEntry]>, VmError> {
    let mut core_map = Vec::new();
    core_map
        .try_reserve_exact(frames)
        .map_err(|_| VmError::AllocationFailure)?;
    core_map.resize(frames, CoreMapEntry::DEFAULT);
    Ok(core_map.into_boxed_slice())
}

impl<P: PlacementAlgorithm> Coremap<P> {
    /// Allocates `frames` pages of zeroed memory to manage.
    pub fn new(frames: usize) -> Result<Self, VmError> {
        let bytes = frames
            .checked_mul(PAGE_FRAME_SIZE)
            .ok_or(VmError::AllocationFailure)?;
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(bytes)
            .map_err(|_| VmError::AllocationFailure)?;
        memory.resize(bytes, 0u8);
        let core_map = empty_core_map(frames)?;

        let raw = Box::into_raw(memory.into_boxed_slice());
        Ok(Self {
            // SAFETY: Box::into_raw never returns null.
            start: unsafe { NonNull::new_unchecked(raw.cast::<u8>()) },
            frames,
            owned: true,
            state: Mutex::new(CoremapState {
                core_map,
                placement: P::default(),
                frames_allocated: 0,
            }),
        })
    }

    /// Manages `frames` pages starting at `start`.
    ///
    /// # Safety
    ///
    /// The region must be valid for reads and writes, used by nothing else,
    /// and outlive the allocator.
    pub unsafe fn from_raw(start: NonNull<u8>, frames: usize) -> Result<Self, VmError> {
        Ok(Self {
            start,
            frames,
            owned: false,
            state: Mutex::new(CoremapState {
                core_map: empty_core_map(frames)?,
                placement: P::default(),
                frames_allocated: 0,
            }),
        })
    }

    /// Marks `frame` as belonging to the kernel. It is never handed out.
    pub fn reserve_for_kernel(&self, frame: usize) {
        let mut state = self.state.lock();
        let entry = state.core_map[frame];
        assert!(!entry.allocated(), "frame {frame} is already in use");
        state.core_map[frame] = entry.with_allocated(true).with_kernel(true);
        state.frames_allocated += 1;
    }

    pub fn frames_allocated(&self) -> usize {
        self.state.lock().frames_allocated
    }

    pub fn frames_free(&self) -> usize {
        self.frames - self.frames_allocated()
    }

    fn frame_ptr(&self, frame: usize) -> *mut u8 {
        assert!(frame < self.frames, "frame {frame} out of range");
        // SAFETY: `frame` is within the managed region.
        unsafe { self.start.as_ptr().add(frame * PAGE_FRAME_SIZE) }
    }
}

impl<P: PlacementAlgorithm + Send> FrameAllocator for Coremap<P> {
    fn frame_count(&self) -> usize {
        self.frames
    }

    fn alloc_frame(&self) -> Option<usize> {
        let mut state = self.state.lock();
        if state.frames_allocated == self.frames {
            return None;
        }

        let CoremapState {
            core_map,
            placement,
            frames_allocated,
        } = &mut *state;
        let frame = placement.place(core_map)?;
        assert!(!core_map[frame].allocated());
        core_map[frame] = core_map[frame].with_allocated(true);
        *frames_allocated += 1;
        Some(frame)
    }

    fn free_frame(&self, frame: usize) {
        let mut state = self.state.lock();
        let entry = state.core_map[frame];
        assert!(entry.allocated(), "double free of frame {frame}");
        assert!(!entry.kernel(), "freeing kernel frame {frame}");
        state.core_map[frame] = entry.with_allocated(false);
        state.frames_allocated -= 1;
    }

    fn read_frame(&self, frame: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), PAGE_FRAME_SIZE);
        // SAFETY: The frame lies inside the region and the buffer is one page.
        unsafe {
            core::ptr::copy_nonoverlapping(self.frame_ptr(frame), buf.as_mut_ptr(), PAGE_FRAME_SIZE)
        }
    }

    fn write_frame(&self, frame: usize, buf: &[u8]) {
        assert_eq!(buf.len(), PAGE_FRAME_SIZE);
        // SAFETY: The frame lies inside the region and the buffer is one page.
        unsafe {
            core::ptr::copy_nonoverlapping(buf.as_ptr(), self.frame_ptr(frame), PAGE_FRAME_SIZE)
        }
    }

    fn zero_frame(&self, frame: usize) {
        // SAFETY: The frame lies inside the region.
        unsafe { core::ptr::write_bytes(self.frame_ptr(frame), 0, PAGE_FRAME_SIZE) }
    }
}

impl<P: PlacementAlgorithm> Drop for Coremap<P> {
    fn drop(&mut self) {
        if self.owned {
            let raw = core::ptr::slice_from_raw_parts_mut(
                self.start.as_ptr(),
                self.frames * PAGE_FRAME_SIZE,
            );
            // SAFETY: Built by `Coremap::new` from Box::into_raw with this length.
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_alloc_until_full() {
        let coremap = Coremap::<NextFit>::new(3).unwrap();
        let mut frames = vec![];
        while let Some(frame) = coremap.alloc_frame() {
            frames.push(frame);
        }
        assert_eq!(frames, vec![0, 1, 2]);
        assert_eq!(coremap.frames_free(), 0);

        coremap.free_frame(1);
        assert_eq!(coremap.alloc_frame(), Some(1));
        assert_eq!(coremap.alloc_frame(), None);
    }

    #[test]
    fn test_next_fit_moves_on() {
        let coremap = Coremap::<NextFit>::new(4).unwrap();
        assert_eq!(coremap.alloc_frame(), Some(0));
        coremap.free_frame(0);
        // Next fit resumes after the last placement instead of reusing 0.
        assert_eq!(coremap.alloc_frame(), Some(1));
    }

    #[test]
    fn test_first_fit_reuses_lowest() {
        let coremap = Coremap::<FirstFit>::new(4).unwrap();
        assert_eq!(coremap.alloc_frame(), Some(0));
        assert_eq!(coremap.alloc_frame(), Some(1));
        coremap.free_frame(0);
        assert_eq!(coremap.alloc_frame(), Some(0));
    }

    #[test]
    fn test_kernel_frames_are_skipped() {
        let coremap = Coremap::<FirstFit>::new(3).unwrap();
        coremap.reserve_for_kernel(0);
        assert_eq!(coremap.alloc_frame(), Some(1));
        assert_eq!(coremap.frames_allocated(), 2);
    }

    #[test]
    fn test_frame_contents() {
        let coremap = Coremap::<NextFit>::new(2).unwrap();
        let page = vec![0xabu8; PAGE_FRAME_SIZE];
        coremap.write_frame(1, &page);

        let mut buf = vec![0u8; PAGE_FRAME_SIZE];
        coremap.read_frame(1, &mut buf);
        assert_eq!(buf, page);
        coremap.read_frame(0, &mut buf);
        assert!(buf.iter().all(|&b| b == 0));

        coremap.zero_frame(1);
        coremap.read_frame(1, &mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let coremap = Coremap::<NextFit>::new(2).unwrap();
        let frame = coremap.alloc_frame().unwrap();
        coremap.free_frame(frame);
        coremap.free_frame(frame);
    }

    #[test]
    fn test_from_raw_region() {
        let mut region = vec![0u8; 2 * PAGE_FRAME_SIZE];
        let start = NonNull::new(region.as_mut_ptr()).unwrap();
        // SAFETY: `region` outlives the allocator and is not touched meanwhile.
        let coremap = unsafe { Coremap::<FirstFit>::from_raw(start, 2) }.unwrap();
        coremap.write_frame(1, &vec![7u8; PAGE_FRAME_SIZE]);
        drop(coremap);
        assert_eq!(region[PAGE_FRAME_SIZE], 7);
        assert_eq!(region[0], 0);
    }
}
