//! The disk layer: a small registry of block devices, each a pair
//! (driver state, operations). A tagged enum stands in for the original's
//! function-pointer vtable — the spec's own design notes sanction either.

pub mod ata;
pub mod partition;

use spin::Mutex;

const MAX_DISKS: usize = 64;

/// A registered block device. Only one concrete kind exists today; adding a
/// second (e.g. a ramdisk for devfs) means adding a variant here, not
/// touching the registry.
#[derive(Clone, Copy)]
pub enum Disk {
    Ata(ata::AtaDrive),
}

impl Disk {
    fn block_size(&self) -> u32 {
        match self {
            Disk::Ata(d) => d.block_size(),
        }
    }

    fn read_blocks(&mut self, buf: &mut [u8], count: u32, lba: u64) -> i32 {
        match self {
            Disk::Ata(d) => d.read_sectors(buf, count, lba),
        }
    }

    fn write_blocks(&mut self, buf: &[u8], count: u32, lba: u64) -> i32 {
        match self {
            Disk::Ata(d) => d.write_sectors(buf, count, lba),
        }
    }
}

static DISKS: Mutex<[Option<Disk>; MAX_DISKS]> = Mutex::new([None; MAX_DISKS]);

/// Register a disk, returning its index, or `None` if the table is full.
pub fn register_device(disk: Disk) -> Option<u32> {
    let mut disks = DISKS.lock();
    for (i, slot) in disks.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(disk);
            return Some(i as u32);
        }
    }
    None
}

pub fn exists(disk: u32) -> bool {
    DISKS
        .lock()
        .get(disk as usize)
        .map(|s| s.is_some())
        .unwrap_or(false)
}

pub fn block_size(disk: u32) -> u32 {
    DISKS
        .lock()
        .get(disk as usize)
        .and_then(|s| s.as_ref())
        .map(|d| d.block_size())
        .unwrap_or(0)
}

/// Read `count` blocks starting at `lba` into `buf`. Returns the number of
/// blocks transferred, clamped to 31 bits, or a negative error code.
pub fn read_blocks(disk: u32, buf: &mut [u8], count: u32, lba: u64) -> i32 {
    debug_assert!(count < 0x7FFF_FFFF);
    let mut disks = DISKS.lock();
    match disks.get_mut(disk as usize).and_then(|s| s.as_mut()) {
        Some(d) => d.read_blocks(buf, count, lba).min(0x7FFF_FFFF),
        None => -1,
    }
}

pub fn write_blocks(disk: u32, buf: &[u8], count: u32, lba: u64) -> i32 {
    debug_assert!(count < 0x7FFF_FFFF);
    let mut disks = DISKS.lock();
    match disks.get_mut(disk as usize).and_then(|s| s.as_mut()) {
        Some(d) => d.write_blocks(buf, count, lba).min(0x7FFF_FFFF),
        None => -1,
    }
}

/// Probe the PCI bus for an IDE controller and register every drive that
/// answers IDENTIFY. Called once during boot, after `pci`'s enumeration
/// confirms a mass-storage controller is present.
pub fn probe_and_register() {
    if !ata::ide_controller_present() {
        log::info!("disk: no IDE controller found on the PCI bus");
        return;
    }

    for drive in ata::probe_all().into_iter().flatten() {
        match register_device(Disk::Ata(drive)) {
            Some(i) => log::info!(
                "disk: registered ATA drive #{} ({} sectors)",
                i,
                drive.sector_count()
            ),
            None => log::warn!("disk: registry full, dropping probed ATA drive"),
        }
    }
}
