//! Partition table parsing: classical MBR, and GPT via the MBR's
//! "protective MBR" convention (a single 0xEE entry covering the disk).

use crate::disk;
use crate::volume;

const SECTOR_SIZE: usize = 512;
const GPT_SIGNATURE: u64 = 0x5452_4150_2049_4645; // "EFI PART", little-endian
const PROTECTIVE_MBR_TYPE: u8 = 0xEE;

fn read_sector(disk_idx: u32, lba: u64) -> Option<[u8; SECTOR_SIZE]> {
    let mut buf = [0u8; SECTOR_SIZE];
    if disk::read_blocks(disk_idx, &mut buf, 1, lba) != 1 {
        return None;
    }
    Some(buf)
}

struct MbrEntry {
    typ: u8,
    lba_start: u32,
    lba_count: u32,
}

fn mbr_entry(sector: &[u8; SECTOR_SIZE], index: usize) -> MbrEntry {
    let off = 0x1BE + index * 16;
    MbrEntry {
        typ: sector[off + 4],
        lba_start: u32::from_le_bytes([
            sector[off + 8],
            sector[off + 9],
            sector[off + 10],
            sector[off + 11],
        ]),
        lba_count: u32::from_le_bytes([
            sector[off + 12],
            sector[off + 13],
            sector[off + 14],
            sector[off + 15],
        ]),
    }
}

/// GPT's attribute-bits field reserves bit 0 for "OEM partition" on the
/// implementations this spec follows; entries with it set are skipped.
const GPT_ATTR_OEM_BIT: u64 = 1 << 0;

/// "Basic Data Partition" type GUID (EBD0A0A2-B9E5-4433-87C0-68B6B72699C7),
/// on-disk byte order (first three fields little-endian, last two as-is).
/// The only GPT partition type this driver mounts.
const BASIC_DATA_PARTITION_GUID: [u8; 16] = [
    0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26, 0x99, 0xC7,
];

fn register_volume(disk_idx: u32, lba_start: u64, lba_count: u64) {
    volume::register(disk_idx, lba_start, lba_count);
}

fn probe_gpt(disk_idx: u32) -> bool {
    let header = match read_sector(disk_idx, 1) {
        Some(s) => s,
        None => return false,
    };

    let sig = u64::from_le_bytes(header[0..8].try_into().unwrap());
    if sig != GPT_SIGNATURE {
        log::warn!("disk{}: protective MBR but bad GPT signature", disk_idx);
        return false;
    }

    let entries_lba = u64::from_le_bytes(header[72..80].try_into().unwrap());
    let num_entries = u32::from_le_bytes(header[80..84].try_into().unwrap());
    let entry_size = u32::from_le_bytes(header[84..88].try_into().unwrap()) as usize;

    if entry_size == 0 {
        return false;
    }

    let entries_per_sector = SECTOR_SIZE / entry_size;
    let total_sectors = ((num_entries as usize) + entries_per_sector - 1) / entries_per_sector;

    let mut registered = 0;
    for s in 0..total_sectors {
        let sector = match read_sector(disk_idx, entries_lba + s as u64) {
            Some(s) => s,
            None => break,
        };
        for e in 0..entries_per_sector {
            let idx = s * entries_per_sector + e;
            if idx >= num_entries as usize {
                break;
            }
            let off = e * entry_size;
            if off + entry_size > SECTOR_SIZE {
                break;
            }
            let type_guid = &sector[off..off + 16];
            if type_guid != &BASIC_DATA_PARTITION_GUID[..] {
                continue;
            }
            let attrs = u64::from_le_bytes(sector[off + 48..off + 56].try_into().unwrap());
            if attrs & GPT_ATTR_OEM_BIT != 0 {
                continue;
            }
            let start = u64::from_le_bytes(sector[off + 32..off + 40].try_into().unwrap());
            let end = u64::from_le_bytes(sector[off + 40..off + 48].try_into().unwrap());
            if end < start {
                continue;
            }
            register_volume(disk_idx, start, end - start + 1);
            registered += 1;
        }
    }

    log::info!("disk{}: GPT, registered {} volume(s)", disk_idx, registered);
    true
}

fn probe_mbr(disk_idx: u32, mbr: &[u8; SECTOR_SIZE]) {
    let mut registered = 0;
    for i in 0..4 {
        let e = mbr_entry(mbr, i);
        if e.lba_count > 0 {
            register_volume(disk_idx, e.lba_start as u64, e.lba_count as u64);
            registered += 1;
        }
    }
    log::info!("disk{}: MBR, registered {} volume(s)", disk_idx, registered);
}

/// Read LBA 0 of every registered disk and classify it: GPT (protective
/// MBR, single 0xEE entry spanning the disk) or classical MBR. Disks with
/// no valid boot-sector signature are skipped entirely.
pub fn probe_all() {
    for disk_idx in 0..64u32 {
        if !disk::exists(disk_idx) {
            continue;
        }
        let mbr = match read_sector(disk_idx, 0) {
            Some(s) => s,
            None => continue,
        };
        if mbr[510] != 0x55 || mbr[511] != 0xAA {
            log::warn!("disk{}: no MBR signature, skipping", disk_idx);
            continue;
        }

        let entries: [MbrEntry; 4] = [
            mbr_entry(&mbr, 0),
            mbr_entry(&mbr, 1),
            mbr_entry(&mbr, 2),
            mbr_entry(&mbr, 3),
        ];
        let protective_count = entries.iter().filter(|e| e.typ == PROTECTIVE_MBR_TYPE).count();
        let others_empty = entries
            .iter()
            .filter(|e| e.typ != PROTECTIVE_MBR_TYPE)
            .all(|e| e.lba_count == 0);

        if protective_count == 1 && others_empty {
            if probe_gpt(disk_idx) {
                continue;
            }
        }

        probe_mbr(disk_idx, &mbr);
    }
}
