use core::error::Error;
use core::fmt::{Debug, Display, Formatter};

// Errno values understood by the trap layer.
pub const ENOMEM: i32 = 3;
pub const EFAULT: i32 = 6;
pub const EINVAL: i32 = 8;
pub const EACCES: i32 = 10;

/// Error type for the virtual memory subsystem.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// A write hit a read-only mapping. The faulting process is killed; the
    /// kernel carries on.
    PermissionDenied,
    /// The address lies outside every region a user process may map.
    InvalidAddress,
    /// The fault arrived with no current process or no address space.
    NoContext,
    /// Neither the frame allocator nor eviction produced a frame.
    ResourceExhaustion,
    /// The translation structures could not be allocated at bootstrap.
    AllocationFailure,
    /// The trap layer passed a fault code the VM does not know.
    InvalidFault,
    /// The bootstrap configuration does not fit the hardware or allocator.
    InvalidConfig,
    /// The swap area has no free slot left for an evicted page.
    SwapFull,
}

impl VmError {
    /// Whether the kernel must stop rather than kill the faulting process.
    pub fn is_fatal(self) -> bool {
        !matches!(self, VmError::PermissionDenied)
    }

    pub fn errno(self) -> i32 {
        match self {
            VmError::PermissionDenied => EACCES,
            VmError::InvalidAddress | VmError::NoContext => EFAULT,
            VmError::ResourceExhaustion | VmError::AllocationFailure | VmError::SwapFull => {
                ENOMEM
            }
            VmError::InvalidFault | VmError::InvalidConfig => EINVAL,
        }
    }
}

impl Debug for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::PermissionDenied => write!(f, "PermissionDenied"),
            VmError::InvalidAddress => write!(f, "InvalidAddress"),
            VmError::NoContext => write!(f, "NoContext"),
            VmError::ResourceExhaustion => write!(f, "ResourceExhaustion"),
            VmError::AllocationFailure => write!(f, "AllocationFailure"),
            VmError::InvalidFault => write!(f, "InvalidFault"),
            VmError::InvalidConfig => write!(f, "InvalidConfig"),
            VmError::SwapFull => write!(f, "SwapFull"),
        }
    }
}

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let message = match self {
            VmError::PermissionDenied => "write to a read-only page",
            VmError::InvalidAddress => "invalid address for paging",
            VmError::NoContext => "fault with no current process or address space",
            VmError::ResourceExhaustion => "no frame available after eviction",
            VmError::AllocationFailure => "could not allocate the page table",
            VmError::InvalidFault => "unknown fault type",
            VmError::InvalidConfig => "invalid VM configuration",
            VmError::SwapFull => "out of swap space",
        };
        f.write_str(message)
    }
}

impl Error for VmError {}
