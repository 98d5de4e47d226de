//! FAT32 filesystem driver: geometry discovery, FAT/cluster caching,
//! directory lookup, cluster allocation, and the file operations the
//! volume manager dispatches to. Per-mount state is a fixed array slot
//! rather than a heap allocation — there is no allocator wired into this
//! kernel, so mount count is capped at [`MAX_MOUNTS`].

pub mod dirent;

use spin::Mutex;

use crate::volume;
use dirent::{split_name, RawDirent, ENTRY_SIZE};

const SECTOR_SIZE: usize = 512;
const MAX_MOUNTS: usize = 8;
/// Largest cluster this driver can cache: 64 sectors (32 KiB). FAT32 volumes
/// formatted larger than that are rejected at probe time.
const MAX_CLUSTER_SECTORS: usize = 64;
const MAX_CLUSTER_BYTES: usize = MAX_CLUSTER_SECTORS * SECTOR_SIZE;
const MAX_OPEN_FILES: usize = 16;
const DIR_SCAN_LIMIT: u32 = 65_536;

const FAT_ENTRY_MASK: u32 = 0x0FFF_FFFF;
const FAT_EOC_MIN: u32 = 0x0FFF_FFF0;
const FAT_EOC: u32 = 0x0FFF_FFFF;
const FAT_FREE: u32 = 0;

fn fat_entry_is_eoc(value: u32) -> bool {
    let masked = value & FAT_ENTRY_MASK;
    masked >= FAT_EOC_MIN
}

/// A virtual cluster index (clusters 0 and 1 are reserved; data clusters
/// start at 2). Kept as a distinct type from sector/byte offsets so the two
/// never get mixed up at a call site — conversion always goes through
/// [`Mount::cluster_sector`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Vci(pub u32);

#[derive(Clone, Copy)]
struct OpenFile {
    start_cluster: Vci,
    current_cluster: Vci,
    offset: u32,
    size: u32,
    dirent_cluster: Vci,
    dirent_index: u32,
    valid: bool,
}

#[derive(Clone, Copy)]
struct Mount {
    volume: u32,
    sectors_per_cluster: u32,
    sector_fat0: u32,
    data_region_start: u32,
    cluster_size: u32,
    total_clusters: u32,
    root_dir_cluster: Vci,
    write_protected: bool,

    fat_cache_page: Option<u32>,
    fat_cache_dirty: bool,
    fat_cache: [u8; SECTOR_SIZE],

    cluster_cache_index: Option<Vci>,
    cluster_cache_dirty: bool,
    cluster_cache: [u8; MAX_CLUSTER_BYTES],

    files: [Option<OpenFile>; MAX_OPEN_FILES],
}

static MOUNTS: Mutex<[Option<Mount>; MAX_MOUNTS]> = Mutex::new([None; MAX_MOUNTS]);

fn read_sector(volume: u32, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> bool {
    volume::read_blocks(volume, buf, 1, lba) == 1
}

/// Read the boot sector, info sector, and first FAT sector and validate all
/// of the signatures the format requires. Returns a populated, not-yet
/// write-protection-tested `Mount` on success.
fn do_probe(volume: u32) -> Option<Mount> {
    let mut boot = [0u8; SECTOR_SIZE];
    if !read_sector(volume, 0, &mut boot) {
        return None;
    }
    if boot[510] != 0x55 || boot[511] != 0xAA {
        return None;
    }

    let sector_size = u16::from_le_bytes([boot[11], boot[12]]);
    if sector_size as usize != SECTOR_SIZE {
        return None;
    }
    let sectors_per_cluster = boot[13] as u32;
    let count_reserved = u16::from_le_bytes([boot[14], boot[15]]) as u32;
    let count_fat = boot[16] as u32;
    let total_sectors16 = u16::from_le_bytes([boot[19], boot[20]]) as u32;
    let media = boot[21];
    let total_sectors32 = u32::from_le_bytes([boot[32], boot[33], boot[34], boot[35]]);
    let sectors_per_fat32 = u32::from_le_bytes([boot[36], boot[37], boot[38], boot[39]]);
    let version = u16::from_le_bytes([boot[42], boot[43]]);
    let cluster_root_directory = u32::from_le_bytes([boot[44], boot[45], boot[46], boot[47]]);
    let sector_infosector = u16::from_le_bytes([boot[48], boot[49]]) as u64;

    if version != 0 || sectors_per_cluster == 0 || count_fat == 0 || sectors_per_fat32 == 0 {
        return None;
    }

    let mut info = [0u8; SECTOR_SIZE];
    if !read_sector(volume, sector_infosector, &mut info) {
        return None;
    }
    let sig1 = u32::from_le_bytes([info[0], info[1], info[2], info[3]]);
    let sig2 = u32::from_le_bytes([info[484], info[485], info[486], info[487]]);
    if sig1 != 0x4161_5252 || sig2 != 0x6141_7272 {
        return None;
    }

    let mut fat0 = [0u8; SECTOR_SIZE];
    if !read_sector(volume, count_reserved as u64, &mut fat0) {
        return None;
    }
    let entry0 = u32::from_le_bytes([fat0[0], fat0[1], fat0[2], fat0[3]]);
    let entry1 = u32::from_le_bytes([fat0[4], fat0[5], fat0[6], fat0[7]]);
    if entry0 != (0x0FFF_FF00 | media as u32) || entry1 != FAT_EOC {
        return None;
    }

    let data_region_start = count_reserved + count_fat * sectors_per_fat32;
    let cluster_size = sectors_per_cluster * SECTOR_SIZE as u32;
    if cluster_size as usize > MAX_CLUSTER_BYTES {
        log::error!("fat32: cluster size {} exceeds driver's cache capacity", cluster_size);
        return None;
    }

    let total_sectors = if total_sectors16 != 0 { total_sectors16 } else { total_sectors32 };
    let total_clusters = if total_sectors > data_region_start {
        (total_sectors - data_region_start) / sectors_per_cluster
    } else {
        0
    };

    Some(Mount {
        volume,
        sectors_per_cluster,
        sector_fat0: count_reserved,
        data_region_start,
        cluster_size,
        total_clusters,
        root_dir_cluster: Vci(cluster_root_directory),
        write_protected: false,
        fat_cache_page: Some(0),
        fat_cache_dirty: false,
        fat_cache: fat0,
        cluster_cache_index: None,
        cluster_cache_dirty: false,
        cluster_cache: [0u8; MAX_CLUSTER_BYTES],
        files: [None; MAX_OPEN_FILES],
    })
}

/// Write a test pattern over the first FAT sector and read it back; if it
/// doesn't match, the volume is read-only. Either way, the original bytes
/// are restored before returning.
fn test_write_protection(m: &Mount) -> bool {
    let original = m.fat_cache;
    let pattern = [0xA5u8; SECTOR_SIZE];
    let wrote = volume::write_blocks(m.volume, &pattern, 1, m.sector_fat0 as u64) == 1;
    let mut check = [0u8; SECTOR_SIZE];
    let read_back = volume::read_blocks(m.volume, &mut check, 1, m.sector_fat0 as u64) == 1;
    let verified = wrote && read_back && check == pattern;
    volume::write_blocks(m.volume, &original, 1, m.sector_fat0 as u64);
    !verified
}

impl Mount {
    fn flush_fat_cache(&mut self) {
        if self.fat_cache_dirty {
            if let Some(page) = self.fat_cache_page {
                volume::write_blocks(self.volume, &self.fat_cache, 1, (self.sector_fat0 + page) as u64);
            }
            self.fat_cache_dirty = false;
        }
    }

    fn load_fat_page(&mut self, page: u32) {
        if self.fat_cache_page == Some(page) {
            return;
        }
        self.flush_fat_cache();
        volume::read_blocks(self.volume, &mut self.fat_cache, 1, (self.sector_fat0 + page) as u64);
        self.fat_cache_page = Some(page);
    }

    fn cluster_sector(&self, vci: Vci) -> u32 {
        self.data_region_start + (vci.0 - 2) * self.sectors_per_cluster
    }

    fn flush_cluster_cache(&mut self) {
        if self.cluster_cache_dirty {
            if let Some(idx) = self.cluster_cache_index {
                let sector = self.cluster_sector(idx);
                let bytes = self.cluster_size as usize;
                volume::write_blocks(self.volume, &self.cluster_cache[..bytes], self.sectors_per_cluster, sector as u64);
            }
            self.cluster_cache_dirty = false;
        }
    }

    fn load_cluster(&mut self, vci: Vci) {
        if self.cluster_cache_index == Some(vci) {
            return;
        }
        self.flush_cluster_cache();
        let sector = self.cluster_sector(vci);
        let bytes = self.cluster_size as usize;
        volume::read_blocks(self.volume, &mut self.cluster_cache[..bytes], self.sectors_per_cluster, sector as u64);
        self.cluster_cache_index = Some(vci);
    }

    fn get_fat_entry(&mut self, vci: Vci) -> u32 {
        let page = vci.0 / 128;
        let word = (vci.0 % 128) as usize;
        self.load_fat_page(page);
        let off = word * 4;
        u32::from_le_bytes([
            self.fat_cache[off],
            self.fat_cache[off + 1],
            self.fat_cache[off + 2],
            self.fat_cache[off + 3],
        ]) & FAT_ENTRY_MASK
    }

    fn set_fat_entry(&mut self, vci: Vci, value: u32, flush: bool) {
        let page = vci.0 / 128;
        let word = (vci.0 % 128) as usize;
        self.load_fat_page(page);
        let off = word * 4;
        let preserved_top = u32::from_le_bytes([
            self.fat_cache[off],
            self.fat_cache[off + 1],
            self.fat_cache[off + 2],
            self.fat_cache[off + 3],
        ]) & !FAT_ENTRY_MASK;
        let bytes = ((value & FAT_ENTRY_MASK) | preserved_top).to_le_bytes();
        self.fat_cache[off..off + 4].copy_from_slice(&bytes);
        self.fat_cache_dirty = true;
        if flush {
            self.flush_fat_cache();
        }
    }

    fn zero_fill_cluster(&mut self, vci: Vci) {
        let saved = self.cluster_cache_index;
        self.flush_cluster_cache();
        let bytes = self.cluster_size as usize;
        self.cluster_cache[..bytes].fill(0);
        self.cluster_cache_index = Some(vci);
        self.cluster_cache_dirty = true;
        self.flush_cluster_cache();
        if let Some(prev) = saved {
            if prev != vci {
                self.load_cluster(prev);
            }
        }
    }

    /// Scan FAT pages for a free entry, claim it as end-of-chain, and
    /// zero-fill its data cluster. Returns `Vci(0)` ("no cluster") when the
    /// volume is full.
    fn allocate_cluster(&mut self) -> Vci {
        let total_pages = (self.total_clusters + 2 + 127) / 128;
        for page in 0..total_pages.max(1) {
            self.load_fat_page(page);
            for word in 0..128u32 {
                let vci = page * 128 + word;
                if vci < 2 || vci >= self.total_clusters + 2 {
                    continue;
                }
                let off = (word as usize) * 4;
                let entry = u32::from_le_bytes([
                    self.fat_cache[off],
                    self.fat_cache[off + 1],
                    self.fat_cache[off + 2],
                    self.fat_cache[off + 3],
                ]) & FAT_ENTRY_MASK;
                if entry == FAT_FREE {
                    let target = Vci(vci);
                    self.set_fat_entry(target, FAT_EOC, false);
                    self.zero_fill_cluster(target);
                    return target;
                }
            }
        }
        Vci(0)
    }

    fn next_cluster(&mut self, current: Vci) -> Vci {
        let entry = self.get_fat_entry(current);
        if fat_entry_is_eoc(entry) {
            let new = self.allocate_cluster();
            if new.0 != 0 {
                self.set_fat_entry(current, new.0, false);
            }
            new
        } else {
            Vci(entry)
        }
    }

    fn entries_per_cluster(&self) -> usize {
        self.cluster_size as usize / ENTRY_SIZE
    }

    /// Walk `dir_cluster`'s chain looking for `name`. Returns the cluster
    /// the matching entry lives in (so a later Close can rewrite it), the
    /// decoded entry, and its index within that cluster.
    fn find_in_directory(&mut self, dir_cluster: Vci, name: &[u8]) -> Option<(Vci, RawDirent, u32)> {
        let mut cluster = dir_cluster;
        let mut scanned = 0u32;
        loop {
            self.load_cluster(cluster);
            let per_cluster = self.entries_per_cluster();
            for i in 0..per_cluster {
                if scanned >= DIR_SCAN_LIMIT {
                    return None;
                }
                scanned += 1;
                let off = i * ENTRY_SIZE;
                let raw = RawDirent::from_bytes(&self.cluster_cache[off..off + ENTRY_SIZE]);
                if raw.is_free() {
                    return None;
                }
                if raw.is_deleted() || raw.is_volume_label() || raw.is_device() {
                    continue;
                }
                if raw.matches_name(name) {
                    return Some((cluster, raw, i as u32));
                }
            }
            let next = self.get_fat_entry(cluster);
            if fat_entry_is_eoc(next) {
                return None;
            }
            cluster = Vci(next);
        }
    }

    /// Insert `entry` into the first free or deleted slot in `dir_cluster`'s
    /// chain, extending the chain with a freshly allocated cluster if none
    /// has room.
    fn insert_in_directory(&mut self, dir_cluster: Vci, entry: &RawDirent) -> Option<(Vci, u32)> {
        let mut cluster = dir_cluster;
        loop {
            self.load_cluster(cluster);
            let per_cluster = self.entries_per_cluster();
            for i in 0..per_cluster {
                let off = i * ENTRY_SIZE;
                let raw = RawDirent::from_bytes(&self.cluster_cache[off..off + ENTRY_SIZE]);
                if raw.is_free() || raw.is_deleted() {
                    let bytes = entry.to_bytes();
                    self.cluster_cache[off..off + ENTRY_SIZE].copy_from_slice(&bytes);
                    self.cluster_cache_dirty = true;
                    return Some((cluster, i as u32));
                }
            }
            let next = self.next_cluster(cluster);
            if next.0 == 0 {
                return None;
            }
            cluster = next;
        }
    }

    fn open(&mut self, path: &str, mode: u8) -> Option<u32> {
        let trimmed = path.trim_start_matches('/');
        let mut segments = trimmed.split('/').filter(|s| !s.is_empty()).peekable();
        let mut dir_cluster = self.root_dir_cluster;
        let mut found: Option<(Vci, RawDirent, u32)> = None;

        loop {
            let seg = segments.next()?;
            let is_last = segments.peek().is_none();
            let seg_bytes = seg.as_bytes();

            match self.find_in_directory(dir_cluster, seg_bytes) {
                Some((holder, entry, idx)) => {
                    if is_last {
                        if entry.is_directory() {
                            return None;
                        }
                        found = Some((holder, entry, idx));
                        break;
                    }
                    if !entry.is_directory() {
                        return None;
                    }
                    dir_cluster = entry.cluster();
                }
                None => {
                    if !is_last || mode & volume::MODE_CREATE == 0 {
                        return None;
                    }
                    let cluster = self.allocate_cluster();
                    if cluster.0 == 0 {
                        return None;
                    }
                    let (name, ext) = split_name(seg_bytes);
                    let entry = RawDirent::new_file(name, ext, cluster);
                    let (holder, idx) = self.insert_in_directory(dir_cluster, &entry)?;
                    found = Some((holder, entry, idx));
                    break;
                }
            }
        }

        let (dirent_cluster, entry, dirent_index) = found?;
        let slot = self.files.iter().position(|f| f.is_none())?;
        self.files[slot] = Some(OpenFile {
            start_cluster: entry.cluster(),
            current_cluster: entry.cluster(),
            offset: 0,
            size: entry.size,
            dirent_cluster,
            dirent_index,
            valid: true,
        });
        Some(slot as u32)
    }

    fn read(&mut self, handle: u32, buf: &mut [u8]) -> i32 {
        if buf.is_empty() {
            return -1;
        }
        let mut of = match self.files.get(handle as usize).copied().flatten() {
            Some(f) if f.valid => f,
            _ => return -1,
        };
        let want = buf.len();
        let mut total = 0usize;
        while total < want && of.offset < of.size {
            let cluster_off = (of.offset % self.cluster_size) as usize;
            let in_cluster = self.cluster_size as usize - cluster_off;
            let in_file = (of.size - of.offset) as usize;
            let chunk = in_cluster.min(in_file).min(want - total);
            if chunk == 0 {
                break;
            }
            self.load_cluster(of.current_cluster);
            buf[total..total + chunk].copy_from_slice(&self.cluster_cache[cluster_off..cluster_off + chunk]);
            total += chunk;
            of.offset += chunk as u32;
            if of.offset % self.cluster_size == 0 && of.offset < of.size {
                let next = self.get_fat_entry(of.current_cluster);
                if fat_entry_is_eoc(next) {
                    break;
                }
                of.current_cluster = Vci(next);
            }
        }
        self.files[handle as usize] = Some(of);
        total as i32
    }

    fn write(&mut self, handle: u32, buf: &[u8]) -> i32 {
        let mut of = match self.files.get(handle as usize).copied().flatten() {
            Some(f) if f.valid => f,
            _ => return -1,
        };
        let want = buf.len();
        let mut total = 0usize;
        while total < want {
            let cluster_off = (of.offset % self.cluster_size) as usize;
            let in_cluster = self.cluster_size as usize - cluster_off;
            let chunk = in_cluster.min(want - total);
            if chunk == 0 {
                break;
            }
            self.load_cluster(of.current_cluster);
            self.cluster_cache[cluster_off..cluster_off + chunk].copy_from_slice(&buf[total..total + chunk]);
            self.cluster_cache_dirty = true;
            total += chunk;
            of.offset += chunk as u32;
            if of.offset > of.size {
                of.size = of.offset;
            }
            if of.offset % self.cluster_size == 0 && total < want {
                let next = self.next_cluster(of.current_cluster);
                if next.0 == 0 {
                    break;
                }
                of.current_cluster = next;
            }
        }
        self.files[handle as usize] = Some(of);
        total as i32
    }

    fn close(&mut self, handle: u32) {
        let of = match self.files.get(handle as usize).copied().flatten() {
            Some(f) if f.valid => f,
            _ => return,
        };
        self.load_cluster(of.dirent_cluster);
        let per_cluster = self.entries_per_cluster();
        if (of.dirent_index as usize) < per_cluster {
            let off = (of.dirent_index as usize) * ENTRY_SIZE;
            let mut raw = RawDirent::from_bytes(&self.cluster_cache[off..off + ENTRY_SIZE]);
            raw.size = of.size;
            let bytes = raw.to_bytes();
            self.cluster_cache[off..off + ENTRY_SIZE].copy_from_slice(&bytes);
            self.cluster_cache_dirty = true;
        }
        self.flush_cluster_cache();
        self.files[handle as usize] = None;
    }

    fn seek(&mut self, handle: u32, offset: i32, whence: u32) -> i32 {
        let mut of = match self.files.get(handle as usize).copied().flatten() {
            Some(f) if f.valid => f,
            _ => return -1,
        };
        let base = match whence {
            volume::SEEK_SET => 0i64,
            volume::SEEK_CUR => of.offset as i64,
            volume::SEEK_END => of.size as i64,
            _ => return -1,
        };
        let target = (base + offset as i64).clamp(0, of.size as i64) as u32;

        let mut cluster = of.start_cluster;
        let mut walked = 0u32;
        while walked + self.cluster_size <= target {
            let next = self.get_fat_entry(cluster);
            if fat_entry_is_eoc(next) {
                break;
            }
            cluster = Vci(next);
            walked += self.cluster_size;
        }
        of.current_cluster = cluster;
        of.offset = target;
        self.files[handle as usize] = Some(of);
        target as i32
    }

    fn tell(&self, handle: u32) -> i32 {
        match self.files.get(handle as usize).copied().flatten() {
            Some(f) if f.valid => f.offset as i32,
            _ => -1,
        }
    }

    fn eof(&self, handle: u32) -> bool {
        match self.files.get(handle as usize).copied().flatten() {
            Some(f) if f.valid => f.offset == f.size,
            _ => true,
        }
    }

    fn sync(&mut self) {
        self.flush_fat_cache();
        self.flush_cluster_cache();
    }
}

fn find_mount_idx(mounts: &[Option<Mount>; MAX_MOUNTS], volume: u32) -> Option<usize> {
    mounts.iter().position(|m| matches!(m, Some(mm) if mm.volume == volume))
}

/// Check whether `volume` holds a valid FAT32 filesystem, without binding it.
pub fn probe(volume: u32) -> bool {
    do_probe(volume).is_some()
}

/// Bind `volume` as a FAT32 mount. Returns whether the volume is
/// write-protected. Caller must have already confirmed [`probe`] succeeded.
pub fn mount(volume: u32) -> bool {
    let mut m = match do_probe(volume) {
        Some(m) => m,
        None => return true,
    };
    m.write_protected = test_write_protection(&m);
    let write_protected = m.write_protected;

    let mut mounts = MOUNTS.lock();
    for slot in mounts.iter_mut() {
        if slot.is_none() {
            *slot = Some(m);
            return write_protected;
        }
    }
    log::warn!("fat32: mount table full, dropping volume{}", volume);
    write_protected
}

pub fn open(volume: u32, path: &str, mode: u8) -> Option<u32> {
    let mut mounts = MOUNTS.lock();
    let idx = find_mount_idx(&mounts, volume)?;
    mounts[idx].as_mut().unwrap().open(path, mode)
}

pub fn close(volume: u32, handle: u32) {
    let mut mounts = MOUNTS.lock();
    if let Some(idx) = find_mount_idx(&mounts, volume) {
        mounts[idx].as_mut().unwrap().close(handle);
    }
}

pub fn read(volume: u32, handle: u32, buf: &mut [u8]) -> i32 {
    let mut mounts = MOUNTS.lock();
    match find_mount_idx(&mounts, volume) {
        Some(idx) => mounts[idx].as_mut().unwrap().read(handle, buf),
        None => -1,
    }
}

pub fn write(volume: u32, handle: u32, buf: &[u8]) -> i32 {
    let mut mounts = MOUNTS.lock();
    match find_mount_idx(&mounts, volume) {
        Some(idx) => mounts[idx].as_mut().unwrap().write(handle, buf),
        None => -1,
    }
}

pub fn seek(volume: u32, handle: u32, offset: i32, whence: u32) -> i32 {
    let mut mounts = MOUNTS.lock();
    match find_mount_idx(&mounts, volume) {
        Some(idx) => mounts[idx].as_mut().unwrap().seek(handle, offset, whence),
        None => -1,
    }
}

pub fn tell(volume: u32, handle: u32) -> i32 {
    let mounts = MOUNTS.lock();
    match find_mount_idx(&mounts, volume) {
        Some(idx) => mounts[idx].as_ref().unwrap().tell(handle),
        None => -1,
    }
}

pub fn eof(volume: u32, handle: u32) -> bool {
    let mounts = MOUNTS.lock();
    match find_mount_idx(&mounts, volume) {
        Some(idx) => mounts[idx].as_ref().unwrap().eof(handle),
        None => true,
    }
}

pub fn sync(volume: u32) {
    let mut mounts = MOUNTS.lock();
    if let Some(idx) = find_mount_idx(&mounts, volume) {
        mounts[idx].as_mut().unwrap().sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eoc_range_is_recognized() {
        assert!(fat_entry_is_eoc(FAT_EOC_MIN));
        assert!(fat_entry_is_eoc(FAT_EOC));
        assert!(!fat_entry_is_eoc(FAT_FREE));
        assert!(!fat_entry_is_eoc(2));
    }

    #[test]
    fn entry_mask_drops_reserved_top_nibble() {
        let tagged = 0xF000_0002u32;
        assert_eq!(tagged & FAT_ENTRY_MASK, 2);
    }
}
