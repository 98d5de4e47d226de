//! The kernel's logging façade: a UART sink registered with the `log` crate.
//!
//! Core subsystems never touch the serial port directly. They go through
//! `log::info!`/`log::warn!`/`log::error!` (or the legacy `printk!` macro,
//! kept for call sites ported from the original serial-only prints), and
//! `init()` installs the one sink that actually writes bytes out. Swapping
//! the sink later (e.g. for a ring-buffered in-memory log) needs no changes
//! anywhere else.

use core::fmt::{Error, Write};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::machine::{inb, outb};

/// Port to output to serial console
const PORT: u16 = 0x3F8;

/// A struct to write data to the console port
pub struct Debug;

impl Debug {
    fn wait_for_port(&self) {
        unsafe { while inb(PORT + 5) & 0x20 == 0 {} }
    }

    /// Wait for the port, then write the given array of bytes
    pub fn write_bytes(&self, bytes: &[u8]) {
        for b in bytes {
            self.wait_for_port();
            unsafe { outb(PORT, *b) };
        }
    }
}

/// Implement `Write` so that we can use format strings
impl Write for Debug {
    /// Take a string slice and write to the serial console
    #[inline]
    fn write_str(&mut self, data: &str) -> Result<(), Error> {
        self.write_bytes(data.as_bytes());
        Result::Ok(())
    }
}

/// A macro for printing using format strings to the console
/// when interrupts are enabled
#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => ({
        use ::core::fmt::Write;
        let _ = write!($crate::debug::Debug, $($arg)*);
    })
}

/// The `log::Log` implementation backing the logging façade. There is only
/// ever one instance, installed once by `init()`.
struct SerialLogger;

static SERIAL_LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        printk!(
            "[{:<5}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install the serial sink as the global `log` backend. Must run once, early
/// in `kernel_main`, before any other subsystem logs.
pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&SERIAL_LOGGER)?;
    log::set_max_level(LevelFilter::Trace);
    Ok(())
}
