use super::error::VmError;

// Fault codes passed in by the trap handler.
pub const VM_FAULT_READ: u32 = 0;
pub const VM_FAULT_WRITE: u32 = 1;
pub const VM_FAULT_READONLY: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// A read missed in the TLB.
    Read,
    /// A write missed in the TLB.
    Write,
    /// A write hit a TLB entry without the dirty bit.
    ReadOnly,
}

impl TryFrom<u32> for FaultKind {
    type Error = VmError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            VM_FAULT_READ => Ok(FaultKind::Read),
            VM_FAULT_WRITE => Ok(FaultKind::Write),
            VM_FAULT_READONLY => Ok(FaultKind::ReadOnly),
            _ => Err(VmError::InvalidFault),
        }
    }
}
