use super::segment::{Permission, Segment};
use novavm_shared::mem::{PAGE_FRAME_SIZE, STACK_PAGES, USERSTACK};

/// The regions a user process may touch: code, data and a fixed-size stack
/// just below `USERSTACK`.
#[derive(Debug)]
pub struct AddressSpace {
    code: Segment,
    data: Segment,
    stack: Segment,
}

impl AddressSpace {
    pub fn new(code: Segment, data: Segment) -> Self {
        let stack_size = STACK_PAGES * PAGE_FRAME_SIZE;
        Self {
            code,
            data,
            stack: Segment::new(USERSTACK - stack_size, stack_size, Permission::ReadWrite),
        }
    }

    pub fn code(&self) -> &Segment {
        &self.code
    }

    pub fn data(&self) -> &Segment {
        &self.data
    }

    pub fn stack(&self) -> &Segment {
        &self.stack
    }

    fn segments(&self) -> [&Segment; 3] {
        [&self.code, &self.data, &self.stack]
    }

    /// The segment containing `vaddr`.
    pub fn segment_for(&self, vaddr: usize) -> Option<&Segment> {
        self.segments().into_iter().find(|s| s.contains(vaddr))
    }

    pub fn is_valid(&self, vaddr: usize) -> bool {
        self.segment_for(vaddr).is_some()
    }

    pub fn is_page_aligned(&self) -> bool {
        self.segments().iter().all(|s| s.is_page_aligned())
    }

    pub fn copy(&self) -> Self {
        Self {
            code: self.code.copy(),
            data: self.data.copy(),
            stack: self.stack.copy(),
        }
    }
}
