use super::error::VmError;
use novavm_shared::{
    mem::{DEFAULT_FRAMES, PAGE_FRAME_SIZE},
    sizes::SWAP_SIZE,
    tlb::{MAX_TLB_FRAMES, NUM_TLB},
};

/// Sizes the VM is brought up with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of physical frames covered by the inverted page table. Every
    /// frame number the allocator hands out must be below this.
    pub frames: usize,
    /// Number of slots the hardware TLB is expected to have.
    pub tlb_slots: usize,
    /// Number of page-sized slots in the swap area.
    pub swap_slots: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            frames: DEFAULT_FRAMES,
            tlb_slots: NUM_TLB,
            swap_slots: SWAP_SIZE / PAGE_FRAME_SIZE,
        }
    }
}

impl VmConfig {
    pub fn with_frames(frames: usize) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }

    /// Checks the configuration against what the allocator, the TLB and the
    /// swap store can actually provide.
    pub fn validate(
        &self,
        allocator_frames: usize,
        tlb_slots: usize,
        swap_slots: usize,
    ) -> Result<(), VmError> {
        if self.frames == 0 || self.frames > MAX_TLB_FRAMES {
            return Err(VmError::InvalidConfig);
        }
        if allocator_frames > self.frames {
            return Err(VmError::InvalidConfig);
        }
        if self.tlb_slots == 0 || self.tlb_slots != tlb_slots {
            return Err(VmError::InvalidConfig);
        }
        if self.swap_slots == 0 || self.swap_slots != swap_slots {
            return Err(VmError::InvalidConfig);
        }
        Ok(())
    }
}
