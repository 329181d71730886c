use super::address_space::AddressSpace;

/// Process identifier. Zero never names a process.
pub type Pid = u16;

pub struct ProcessControlBlock {
    pub pid: Pid,
    pub addrspace: Option<AddressSpace>,
}

impl ProcessControlBlock {
    pub fn new(pid: Pid, addrspace: Option<AddressSpace>) -> Self {
        assert_ne!(pid, 0, "pid 0 is reserved");
        Self { pid, addrspace }
    }

    /// A child with a copy of this process's address space, as after fork.
    pub fn fork(&self, child: Pid) -> Self {
        Self::new(child, self.addrspace.as_ref().map(AddressSpace::copy))
    }
}
