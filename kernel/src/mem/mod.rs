//! Physical frames for user pages.

pub mod frame_allocator;

pub use frame_allocator::Coremap;

/// Hands out whole physical frames, identified by frame number, and gives
/// access to their contents.
///
/// Frame `f` starts at physical address `f * PAGE_FRAME_SIZE`. Buffers passed
/// to the copy methods are exactly one page long.
pub trait FrameAllocator: Sync {
    /// Total number of frames managed, allocated or not.
    fn frame_count(&self) -> usize;

    /// Claims a free frame, or returns `None` when every frame is in use.
    fn alloc_frame(&self) -> Option<usize>;

    /// Returns a frame obtained from [`FrameAllocator::alloc_frame`].
    fn free_frame(&self, frame: usize);

    fn read_frame(&self, frame: usize, buf: &mut [u8]);

    fn write_frame(&self, frame: usize, buf: &[u8]);

    fn zero_frame(&self, frame: usize);
}
