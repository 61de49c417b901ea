//! Stub Logging
//!
//! Backend for the `log` crate. Each record is formatted into a fixed stack
//! buffer and written to the console in one piece, so lines from different
//! cores do not interleave mid-line. Records longer than a line are
//! truncated.

use core::fmt::{self, Write};

use keel_pal::console;
use log::{Level, Log, Metadata, Record};

use crate::config::LOG_LEVEL;

/// Longest line the logger emits, newline included
pub const LINE_CAPACITY: usize = 256;

/// Stack buffer for one formatted line
struct LineBuffer {
    data: [u8; LINE_CAPACITY],
    len: usize,
}

impl LineBuffer {
    const fn new() -> Self {
        Self {
            data: [0u8; LINE_CAPACITY],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        match core::str::from_utf8(&self.data[..self.len]) {
            Ok(s) => s,
            // Truncation split a multi-byte character
            Err(e) => core::str::from_utf8(&self.data[..e.valid_up_to()]).unwrap_or_default(),
        }
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = LINE_CAPACITY - self.len;
        let to_copy = bytes.len().min(remaining);
        self.data[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

const fn level_str(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31mERROR\x1b[0m",
        Level::Warn => "\x1b[33m WARN\x1b[0m",
        Level::Info => "\x1b[32m INFO\x1b[0m",
        Level::Debug => "\x1b[34mDEBUG\x1b[0m",
        Level::Trace => "\x1b[35mTRACE\x1b[0m",
    }
}

fn format_line(
    buf: &mut LineBuffer,
    time_ms: u64,
    level: Level,
    target: &str,
    args: fmt::Arguments<'_>,
) {
    let _ = write!(
        buf,
        "[{:>5}.{:03}] {} {}: {}",
        time_ms / 1000,
        time_ms % 1000,
        level_str(level),
        target,
        args
    );
    // Always end on a newline, even when the message was cut
    if buf.len == LINE_CAPACITY {
        buf.len -= 1;
    }
    let _ = buf.write_str("\n");
}

/// Stub logger implementation
struct StubLogger;

impl Log for StubLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= LOG_LEVEL
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut line = LineBuffer::new();
            format_line(
                &mut line,
                keel_arch::cpu::uptime_ms(),
                record.level(),
                record.target(),
                *record.args(),
            );
            console::puts(line.as_str());
        }
    }

    fn flush(&self) {
        console::flush();
    }
}

/// Global logger instance
static LOGGER: StubLogger = StubLogger;

/// Initialise the logging system
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LOG_LEVEL))
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(time_ms: u64, level: Level, args: fmt::Arguments<'_>) -> LineBuffer {
        let mut buf = LineBuffer::new();
        format_line(&mut buf, time_ms, level, "keel_boot::pipeline", args);
        buf
    }

    #[test]
    fn test_line_format() {
        let buf = line(12_345, Level::Info, format_args!("loaded {} bytes", 42));
        assert_eq!(
            buf.as_str(),
            "[   12.345] \x1b[32m INFO\x1b[0m keel_boot::pipeline: loaded 42 bytes\n"
        );
    }

    #[test]
    fn test_long_line_is_truncated_with_newline() {
        let long = "x".repeat(2 * LINE_CAPACITY);
        let buf = line(0, Level::Warn, format_args!("{}", long));
        assert_eq!(buf.len, LINE_CAPACITY);
        assert!(buf.as_str().ends_with("x\n"));
    }

    #[test]
    fn test_truncation_keeps_valid_utf8() {
        let mut buf = LineBuffer::new();
        let _ = buf.write_str(&"a".repeat(LINE_CAPACITY - 1));
        let _ = buf.write_str("é");
        assert_eq!(buf.len, LINE_CAPACITY);
        assert_eq!(buf.as_str().len(), LINE_CAPACITY - 1);
    }
}
