use crate::sizes::{KB, MB};

// Page size is 4KB. This is a property of the MIPS r3000 MMU.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;
pub const PAGE_SHIFT: usize = 12;

// Mask that keeps the page number and clears the offset within the page.
pub const PAGE_FRAME: usize = !(PAGE_FRAME_SIZE - 1);

// Any virtual address at or above USERSPACETOP belongs to the kernel (kseg0).
pub const USERSPACETOP: usize = 0x8000_0000;

// The user stack grows down from the top of user space.
pub const USERSTACK: usize = USERSPACETOP;

// 72KB of user stack. This must be more than 64KB so that argument blocks of
// size ARG_MAX fit.
pub const STACK_PAGES: usize = 18;

// Physical memory handed to user pages when no configuration is given.
pub const DEFAULT_USER_MEMORY: usize = 4 * MB;
pub const DEFAULT_FRAMES: usize = DEFAULT_USER_MEMORY / PAGE_FRAME_SIZE;

#[inline]
pub const fn page_align(addr: usize) -> usize {
    addr & PAGE_FRAME
}

#[inline]
pub const fn page_number(addr: usize) -> usize {
    addr >> PAGE_SHIFT
}

#[inline]
pub const fn frame_to_paddr(frame: usize) -> usize {
    frame * PAGE_FRAME_SIZE
}

#[inline]
pub const fn paddr_to_frame(paddr: usize) -> usize {
    paddr / PAGE_FRAME_SIZE
}

#[inline]
pub const fn pages_spanned(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_FRAME_SIZE)
}
