//! Early console
//!
//! A single PL011 behind a spin lock. Until [`init`] runs every write is
//! silently dropped, which keeps the print path safe to call from anywhere,
//! including the panic handler of a core that came up before the primary
//! configured the UART.

use core::fmt::{self, Write};

use spin::mutex::SpinMutex;

use crate::pl011::Pl011;

struct Console {
    uart: Option<Pl011>,
}

impl Console {
    const fn new() -> Self {
        Self { uart: None }
    }

    fn putc(&self, c: u8) {
        if let Some(uart) = &self.uart {
            uart.write_byte(c);
        }
    }

    fn puts(&self, s: &str) {
        for c in s.bytes() {
            if c == b'\n' {
                self.putc(b'\r');
            }
            self.putc(c);
        }
    }
}

/// Global console instance
static CONSOLE: SpinMutex<Console> = SpinMutex::new(Console::new());

/// Attach the console to a PL011.
///
/// # Safety
/// `base` must be the address of a PL011 the caller may drive.
pub unsafe fn init(base: u64) {
    // SAFETY: Caller guarantees the register block.
    let uart = unsafe { Pl011::new(base) };
    CONSOLE.lock().uart = Some(uart);
}

/// Print a string to the console
pub fn puts(s: &str) {
    CONSOLE.lock().puts(s);
}

/// Drain the UART before the core stops printing for good.
pub fn flush() {
    if let Some(uart) = &CONSOLE.lock().uart {
        uart.flush();
    }
}

/// Console writer for fmt::Write
pub struct ConsoleWriter;

impl Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        puts(s);
        Ok(())
    }
}

/// Print formatted output to the console
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::console::ConsoleWriter, $($arg)*);
    }};
}

/// Print formatted output with newline to the console
#[macro_export]
macro_rules! println {
    () => {
        $crate::console::puts("\n")
    };
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::console::ConsoleWriter, $($arg)*);
        $crate::console::puts("\n");
    }};
}
