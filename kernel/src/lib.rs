//! novavm: the virtual memory subsystem for a software-managed TLB.
//!
//! The trap layer reports TLB misses to [`vm::VmSubsystem::vm_fault`], which
//! resolves them through an inverted page table, evicting frames in FIFO order
//! to swap when physical memory runs out, and refills the TLB.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
mod macros;

pub mod mem;
pub mod swapping;
pub mod sync;
pub mod user_program;
pub mod vm;

extern crate alloc;
