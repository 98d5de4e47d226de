//! Raw byte I/O for the four legacy COM ports. A collaborator, not core:
//! `devfs`'s `tty0`-`tty3` files are the only callers.

use crate::machine::{inb, outb};

const PORTS: [u16; 4] = [0x3F8, 0x2F8, 0x3E8, 0x2E8];

fn wait_for_port(base: u16) {
    unsafe { while inb(base + 5) & 0x20 == 0 {} }
}

/// Write one byte out COM port `id` (0-3). Out-of-range `id` is a no-op.
pub fn put_char(id: u8, byte: u8) {
    if let Some(&base) = PORTS.get(id as usize) {
        wait_for_port(base);
        unsafe { outb(base, byte) };
    }
}

/// Nothing is buffered on the kernel side, so flushing is a no-op; kept as a
/// named call so `devfs::close` has something to call on a tty handle.
pub fn flush(_id: u8) {}
