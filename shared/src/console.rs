//! Kernel console.
//!
//! On bare metal the console is the first serial port. Hosted builds (the unit
//! tests, or the VM running inside a simulator process) write to the host's
//! stdout and stderr instead.

use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Out,
    Err,
}

#[doc(hidden)]
pub fn _print(stream: Stream, args: fmt::Arguments) {
    imp::write(stream, args);
}

#[cfg(target_os = "none")]
mod imp {
    use super::Stream;
    use core::{arch::asm, fmt};

    const IO_BASE: u16 = 0x3f8;
    const THR: u16 = IO_BASE; // Transmitter Holding Reg (write-only)
    const IER: u16 = IO_BASE + 1; // Interrupt Enable Reg
    const FCR: u16 = IO_BASE + 2; // FIFO Control Reg (write-only)
    const LCR: u16 = IO_BASE + 3; // Line Control Register
    const MCR: u16 = IO_BASE + 4; // MODEM Control Register
    const LSR: u16 = IO_BASE + 5; // Line Status Register (read-only)

    unsafe fn outb(port: u16, byte: u8) {
        asm!("out dx, al", in("dx") port, in("al") byte)
    }

    unsafe fn inb(port: u16) -> u8 {
        let res: u8;
        asm!("in al, dx", in("dx") port, out("al") res);
        res
    }

    struct SerialWriter {
        initialized: bool,
    }

    impl SerialWriter {
        fn ensure_initialized(&mut self) {
            if self.initialized {
                return;
            }

            // SAFETY: https://wiki.osdev.org/Serial_Ports#Initialization
            unsafe {
                outb(IER, 0x00);
                outb(LCR, 0x80);
                outb(THR, 0x03);
                outb(IER, 0x00);
                outb(LCR, 0x03);
                outb(FCR, 0xC7);
                outb(MCR, 0x0F);
            }
            self.initialized = true;
        }
    }

    impl fmt::Write for SerialWriter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.ensure_initialized();

            for b in s.bytes() {
                // SAFETY: Waits for the transmit buffer to drain before each byte.
                unsafe {
                    while inb(LSR) & 0x20 == 0 {}
                    outb(THR, b);
                }
            }
            Ok(())
        }
    }

    static mut SERIAL_WRITER: SerialWriter = SerialWriter { initialized: false };

    pub fn write(_stream: Stream, args: fmt::Arguments) {
        use core::fmt::Write;

        // SAFETY: The console is only written with interrupts disabled on a
        // single core, so there is never more than one writer.
        #[allow(static_mut_refs)]
        unsafe {
            let _ = SERIAL_WRITER.write_fmt(args);
        }
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    use super::Stream;
    use core::fmt;

    pub fn write(stream: Stream, args: fmt::Arguments) {
        match stream {
            Stream::Out => std::print!("{args}"),
            Stream::Err => std::eprint!("{args}"),
        }
    }
}
