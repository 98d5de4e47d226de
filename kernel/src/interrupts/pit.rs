//! A module for the programmable interrupt timer

use crate::machine::outb;

/// Max frequency of the PIT
const MAX_HZ: usize = 1_193_182;

/// The frequency of the PIT
pub const HZ: usize = 1000;

/// The command port of the PIT
const PIT_CMD: u16 = 0x43;

/// The data port of the PIT
const PIT_DATA: u16 = 0x40;

/// Initialize the PIT to the given frequency. Must run before interrupts are
/// globally enabled, so there is no flag save/restore dance here (unlike the
/// PS/2 path, which runs after).
pub fn init() {
    let divide = MAX_HZ / HZ;

    if (divide & 0xffff) != divide {
        panic!("PIT init divide={} doesn't fit in 16 bits", divide);
    }

    printk!("pit inited - {} hz\n", HZ);

    unsafe {
        // command: 00 (channel 0), 110 (lobyte/hibyte), 100 (rate generator)
        let cmd = 0b_0011_0100_u8;
        outb(PIT_CMD, cmd);

        let first_byte = (divide & 0xFF) as u8;
        let second_byte = ((divide & 0xFF00) >> 8) as u8;
        outb(PIT_DATA, first_byte);
        outb(PIT_DATA, second_byte);
    }
}
