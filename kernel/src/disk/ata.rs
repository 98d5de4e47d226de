//! PCI IDE (ATA PIO) driver. Probes PCI class 0x01 subclass 0x01, then talks
//! to the legacy ATA I/O port ranges directly. PIO only; DMA and ATAPI are
//! both unimplemented, matching the original driver's scope.

use bitflags::bitflags;

use crate::machine::{inb, inw, outb, outw};
use crate::pci;

bitflags! {
    struct Status: u8 {
        const ERR  = 1 << 0;
        const DRQ  = 1 << 3;
        const DF   = 1 << 5;
        const DRDY = 1 << 6;
        const BSY  = 1 << 7;
    }
}

const CMD_READ_SECTORS: u8 = 0x20;
const CMD_READ_SECTORS_EXT: u8 = 0x24;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_WRITE_SECTORS_EXT: u8 = 0x34;
const CMD_CACHE_FLUSH: u8 = 0xE7;
const CMD_CACHE_FLUSH_EXT: u8 = 0xEA;
const CMD_IDENTIFY: u8 = 0xEC;

const REG_DATA: u16 = 0;
const REG_FEATURES: u16 = 1;
const REG_SECCOUNT0: u16 = 2;
const REG_LBA0: u16 = 3;
const REG_LBA1: u16 = 4;
const REG_LBA2: u16 = 5;
const REG_DRIVE_HEAD: u16 = 6;
const REG_COMMAND: u16 = 7;
const REG_STATUS: u16 = 7;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    io_base: u16,
    ctrl_base: u16,
}

pub const PRIMARY: Channel = Channel {
    io_base: 0x1F0,
    ctrl_base: 0x3F6,
};
pub const SECONDARY: Channel = Channel {
    io_base: 0x170,
    ctrl_base: 0x376,
};

impl Channel {
    fn port(self, offset: u16) -> u16 {
        self.io_base + offset
    }

    fn read_altstatus(self) -> u8 {
        unsafe { inb(self.ctrl_base) }
    }

    fn read_status(self) -> Status {
        Status::from_bits_truncate(unsafe { inb(self.port(REG_STATUS)) })
    }

    /// The standard 400 ns settle: four discarded ALTSTATUS reads before any
    /// real register access, so the drive has time to raise BSY after a
    /// drive-select or command write.
    fn settle(self) {
        for _ in 0..4 {
            self.read_altstatus();
        }
    }

    /// Poll until BSY clears, then return the status byte observed.
    fn wait_not_busy(self) -> Status {
        self.settle();
        loop {
            let s = self.read_status();
            if !s.contains(Status::BSY) {
                return s;
            }
        }
    }

    /// Poll until either DRQ or ERR is set (data ready, or the command
    /// failed outright).
    fn wait_drq_or_err(self) -> Status {
        loop {
            let s = self.read_status();
            if s.contains(Status::DRQ) || s.contains(Status::ERR) || s.contains(Status::DF) {
                return s;
            }
        }
    }

    fn select(self, slave: bool, head_bits: u8) {
        let drv = if slave { 0xB0 } else { 0xA0 };
        unsafe { outb(self.port(REG_DRIVE_HEAD), drv | (head_bits & 0x0F)) };
        self.settle();
    }

    /// Mask this channel's IRQ line in the device control register so a PIO
    /// transfer polls rather than racing an interrupt.
    fn disable_irq(self) {
        unsafe { outb(self.ctrl_base, 0x02) };
    }
}

#[derive(Clone, Copy)]
pub struct AtaDrive {
    channel: Channel,
    slave: bool,
    lba48: bool,
    sectors: u64,
}

/// Probe one (channel, drive) pair with IDENTIFY. Returns `None` if no drive
/// answers, or if it answers as an ATAPI/SATA device (the signature bytes in
/// LBA1/LBA2 after a failed IDENTIFY disambiguate those from "no device").
pub fn identify(channel: Channel, slave: bool) -> Option<AtaDrive> {
    channel.select(slave, 0);
    unsafe {
        outb(channel.port(REG_SECCOUNT0), 0);
        outb(channel.port(REG_LBA0), 0);
        outb(channel.port(REG_LBA1), 0);
        outb(channel.port(REG_LBA2), 0);
        outb(channel.port(REG_COMMAND), CMD_IDENTIFY);
    }

    if unsafe { inb(channel.port(REG_STATUS)) } == 0 {
        return None;
    }

    let status = channel.wait_not_busy();
    if status.contains(Status::ERR) {
        let mid = unsafe { inb(channel.port(REG_LBA1)) };
        let hi = unsafe { inb(channel.port(REG_LBA2)) };
        log::info!(
            "ata: drive answered ERR to IDENTIFY (lba1={:#x} lba2={:#x}), not a PATA disk",
            mid,
            hi
        );
        return None;
    }

    let status = channel.wait_drq_or_err();
    if !status.contains(Status::DRQ) {
        return None;
    }

    let mut words = [0u16; 256];
    for w in words.iter_mut() {
        *w = unsafe { inw(channel.port(REG_DATA)) };
    }

    let command_sets = (words[82] as u32) | ((words[83] as u32) << 16);
    let lba48 = command_sets & (1 << 26) != 0;

    let sectors = if lba48 {
        (words[100] as u64)
            | ((words[101] as u64) << 16)
            | ((words[102] as u64) << 32)
            | ((words[103] as u64) << 48)
    } else {
        (words[60] as u64) | ((words[61] as u64) << 16)
    };

    Some(AtaDrive {
        channel,
        slave,
        lba48,
        sectors,
    })
}

impl AtaDrive {
    pub fn block_size(&self) -> u32 {
        512
    }

    pub fn sector_count(&self) -> u64 {
        self.sectors
    }

    fn program_lba(&self, lba: u64, count: u16) {
        let c = self.channel;
        if self.lba48 {
            unsafe {
                outb(c.port(REG_SECCOUNT0), (count >> 8) as u8);
                outb(c.port(REG_LBA0), (lba >> 24) as u8);
                outb(c.port(REG_LBA1), (lba >> 32) as u8);
                outb(c.port(REG_LBA2), (lba >> 40) as u8);
                outb(c.port(REG_SECCOUNT0), count as u8);
                outb(c.port(REG_LBA0), lba as u8);
                outb(c.port(REG_LBA1), (lba >> 8) as u8);
                outb(c.port(REG_LBA2), (lba >> 16) as u8);
            }
            c.select(self.slave, 0x40);
        } else {
            c.select(self.slave, (lba >> 24) as u8);
            unsafe {
                outb(c.port(REG_SECCOUNT0), count as u8);
                outb(c.port(REG_LBA0), lba as u8);
                outb(c.port(REG_LBA1), (lba >> 8) as u8);
                outb(c.port(REG_LBA2), (lba >> 16) as u8);
            }
        }
    }

    /// Read `count` sectors starting at `lba` into `buf` (must hold
    /// `count * 512` bytes). Returns the sector count transferred, or a
    /// negative IDE status code on failure.
    pub fn read_sectors(&mut self, buf: &mut [u8], count: u32, lba: u64) -> i32 {
        debug_assert!(buf.len() >= (count as usize) * 512);
        let c = self.channel;
        c.disable_irq();
        c.wait_not_busy();
        self.program_lba(lba, count as u16);

        let cmd = if self.lba48 {
            CMD_READ_SECTORS_EXT
        } else {
            CMD_READ_SECTORS
        };
        unsafe { outb(c.port(REG_COMMAND), cmd) };

        for sector in 0..count {
            let status = c.wait_not_busy();
            if status.contains(Status::ERR) || status.contains(Status::DF) {
                return -(status.bits() as i32);
            }
            let base = (sector as usize) * 512;
            for word in 0..256 {
                let v = unsafe { inw(c.port(REG_DATA)) };
                buf[base + word * 2] = v as u8;
                buf[base + word * 2 + 1] = (v >> 8) as u8;
            }
        }

        count as i32
    }

    /// Write `count` sectors starting at `lba` from `buf`, then flush the
    /// write cache.
    pub fn write_sectors(&mut self, buf: &[u8], count: u32, lba: u64) -> i32 {
        debug_assert!(buf.len() >= (count as usize) * 512);
        let c = self.channel;
        c.disable_irq();
        c.wait_not_busy();
        self.program_lba(lba, count as u16);

        let cmd = if self.lba48 {
            CMD_WRITE_SECTORS_EXT
        } else {
            CMD_WRITE_SECTORS
        };
        unsafe { outb(c.port(REG_COMMAND), cmd) };

        for sector in 0..count {
            let status = c.wait_not_busy();
            if status.contains(Status::ERR) || status.contains(Status::DF) {
                return -(status.bits() as i32);
            }
            let base = (sector as usize) * 512;
            for word in 0..256 {
                let lo = buf[base + word * 2] as u16;
                let hi = buf[base + word * 2 + 1] as u16;
                unsafe { outw(c.port(REG_DATA), lo | (hi << 8)) };
            }
        }

        let flush = if self.lba48 {
            CMD_CACHE_FLUSH_EXT
        } else {
            CMD_CACHE_FLUSH
        };
        unsafe { outb(c.port(REG_COMMAND), flush) };
        c.wait_not_busy();

        count as i32
    }

    pub fn flush(&mut self) -> i32 {
        let c = self.channel;
        let flush = if self.lba48 {
            CMD_CACHE_FLUSH_EXT
        } else {
            CMD_CACHE_FLUSH
        };
        unsafe { outb(c.port(REG_COMMAND), flush) };
        let status = c.wait_not_busy();
        if status.contains(Status::ERR) {
            -(status.bits() as i32)
        } else {
            0
        }
    }
}

/// Probe both channels' master/slave drives. Only called once, after PCI
/// enumeration has confirmed a class 0x01 subclass 0x01 controller exists.
pub fn probe_all() -> [Option<AtaDrive>; 4] {
    [
        identify(PRIMARY, false),
        identify(PRIMARY, true),
        identify(SECONDARY, false),
        identify(SECONDARY, true),
    ]
}

/// True if any PCI function is a mass-storage/IDE controller (class 0x01,
/// subclass 0x01). Drives are still accessed through the legacy port ranges
/// regardless of the controller's BARs — PIO compatibility mode.
pub fn ide_controller_present() -> bool {
    let mut found = false;
    pci::for_each_device(|dev| {
        if dev.class == 0x01 && dev.subclass == 0x01 {
            found = true;
        }
    });
    found
}
