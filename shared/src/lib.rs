#![cfg_attr(target_os = "none", no_std)]

pub mod console;
pub mod macros;
pub mod mem;
pub mod sizes;
pub mod tlb;
