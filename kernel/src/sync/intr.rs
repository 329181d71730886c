//! Interrupt masking for the current CPU.
//!
//! Disabling nests: every `intr_disable` must be paired with an `intr_enable`
//! and interrupts only come back once the outermost pair is finished. Code
//! should hold an [`InterruptsGuard`] rather than calling the pair by hand.

use core::sync::atomic::{AtomicUsize, Ordering};

static INTR_DISABLE_COUNT: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntrLevel {
    IntrOn,
    IntrOff,
}

#[cfg(all(target_os = "none", target_arch = "x86"))]
mod arch {
    use super::IntrLevel;
    use core::arch::asm;

    pub fn cli() {
        // SAFETY: Masking interrupts has no memory effects.
        unsafe { asm!("cli", options(nomem, nostack)) }
    }

    pub fn sti() {
        // SAFETY: Unmasking interrupts has no memory effects.
        unsafe { asm!("sti", options(nomem, nostack)) }
    }

    pub fn level(_disable_count: usize) -> IntrLevel {
        let flags: u32;
        // SAFETY: Reads EFLAGS through the stack and restores it unchanged.
        unsafe {
            asm!(
                "pushfd",
                "mov {}, [esp]",
                "popfd",
                out(reg) flags
            );
        }

        if flags & (1 << 9) != 0 {
            IntrLevel::IntrOn
        } else {
            IntrLevel::IntrOff
        }
    }
}

// Without privileged access to the interrupt flag (hosted builds), the nesting
// count is the interrupt level.
#[cfg(not(all(target_os = "none", target_arch = "x86")))]
mod arch {
    use super::IntrLevel;

    pub fn cli() {}

    pub fn sti() {}

    pub fn level(disable_count: usize) -> IntrLevel {
        if disable_count == 0 {
            IntrLevel::IntrOn
        } else {
            IntrLevel::IntrOff
        }
    }
}

pub fn intr_disable() {
    INTR_DISABLE_COUNT.fetch_add(1, Ordering::SeqCst);
    arch::cli();
}

pub fn intr_enable() {
    // fetch_sub returns the count before the decrement.
    let previous = INTR_DISABLE_COUNT.fetch_sub(1, Ordering::SeqCst);
    assert!(previous > 0, "intr_enable without matching intr_disable");
    if previous == 1 {
        arch::sti();
    }
}

pub fn intr_get_level() -> IntrLevel {
    arch::level(INTR_DISABLE_COUNT.load(Ordering::SeqCst))
}

/// Interrupts stay disabled on this CPU until the guard is dropped.
#[must_use]
pub struct InterruptsGuard(());

pub fn hold_interrupts() -> InterruptsGuard {
    intr_disable();
    InterruptsGuard(())
}

impl Drop for InterruptsGuard {
    fn drop(&mut self) {
        intr_enable();
    }
}
