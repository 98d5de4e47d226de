//! Volume table and file API. A volume is a (disk, LBA range) pair,
//! optionally bound to a filesystem driver; a file handle is a small index
//! into a fixed table that maps to (volume, filesystem-internal handle).
//!
//! Polymorphism over filesystem kinds is a tagged enum rather than a vtable
//! of function pointers: there are exactly two kinds in this kernel
//! (FAT32, the device-file filesystem), so a `match` is the natural fit.

use spin::Mutex;

use crate::devfs;
use crate::disk;
use crate::fat32;

pub const MAX_VOLUMES: usize = 64;
pub const MAX_OPEN_FILES: usize = 64;

pub const MODE_READ: u8 = 1 << 0;
pub const MODE_WRITE: u8 = 1 << 1;
pub const MODE_CREATE: u8 = 1 << 2;

pub const SEEK_SET: u32 = 0;
pub const SEEK_CUR: u32 = 1;
pub const SEEK_END: u32 = 2;

/// Volume 0 is reserved for the device-file filesystem, never a disk-backed
/// volume, matching the spec's fixed convention.
pub const DEVFS_VOLUME: u32 = 0;

#[derive(Clone, Copy)]
pub struct VolumeDescriptor {
    pub disk: u32,
    pub lba_start: u64,
    pub lba_count: u64,
}

#[derive(Clone, Copy)]
enum Filesystem {
    Fat32,
    DevFs,
}

#[derive(Clone, Copy)]
struct Mount {
    fs: Filesystem,
    write_protected: bool,
}

static VOLUMES: Mutex<[Option<VolumeDescriptor>; MAX_VOLUMES]> = Mutex::new([None; MAX_VOLUMES]);
static MOUNTS: Mutex<[Option<Mount>; MAX_VOLUMES]> = Mutex::new([None; MAX_VOLUMES]);

#[derive(Clone, Copy)]
enum InnerHandle {
    Fat32(u32),
    DevFs(u32),
}

#[derive(Clone, Copy)]
struct OpenFile {
    volume: u32,
    inner: InnerHandle,
}

static FILES: Mutex<[Option<OpenFile>; MAX_OPEN_FILES]> = Mutex::new([None; MAX_OPEN_FILES]);

/// Register a disk-backed volume (called by the partition prober). Volume 0
/// is reserved, so allocation starts at index 1.
pub fn register(disk_idx: u32, lba_start: u64, lba_count: u64) -> Option<u32> {
    let mut volumes = VOLUMES.lock();
    for i in 1..MAX_VOLUMES {
        if volumes[i].is_none() {
            volumes[i] = Some(VolumeDescriptor {
                disk: disk_idx,
                lba_start,
                lba_count,
            });
            return Some(i as u32);
        }
    }
    None
}

/// Bind volume 0 to the device-file filesystem. Called once at boot, before
/// any disk-backed volumes are registered.
pub fn init_devfs() {
    let mut volumes = VOLUMES.lock();
    volumes[DEVFS_VOLUME as usize] = Some(VolumeDescriptor {
        disk: u32::MAX,
        lba_start: 0,
        lba_count: 0,
    });
    drop(volumes);
    MOUNTS.lock()[DEVFS_VOLUME as usize] = Some(Mount {
        fs: Filesystem::DevFs,
        write_protected: false,
    });
}

/// Range-checked block read against a volume's LBA window, forwarded to the
/// disk layer with the volume's offset applied.
pub fn read_blocks(volume: u32, buf: &mut [u8], count: u32, lba: u64) -> i32 {
    let volumes = VOLUMES.lock();
    let v = match volumes.get(volume as usize).and_then(|v| *v) {
        Some(v) => v,
        None => return -1,
    };
    if lba + count as u64 > v.lba_count {
        return -1;
    }
    disk::read_blocks(v.disk, buf, count, v.lba_start + lba)
}

pub fn write_blocks(volume: u32, buf: &[u8], count: u32, lba: u64) -> i32 {
    let volumes = VOLUMES.lock();
    let v = match volumes.get(volume as usize).and_then(|v| *v) {
        Some(v) => v,
        None => return -1,
    };
    if lba + count as u64 > v.lba_count {
        return -1;
    }
    disk::write_blocks(v.disk, buf, count, v.lba_start + lba)
}

/// Ask each filesystem driver, in a fixed order (FAT32 then device-file), to
/// probe every still-unmounted disk-backed volume. The first driver to
/// recognize a volume's content binds it.
pub fn detect_filesystems() {
    let count = {
        let volumes = VOLUMES.lock();
        volumes.len()
    };
    for i in 1..count {
        let present = VOLUMES.lock()[i].is_some();
        if !present || MOUNTS.lock()[i].is_some() {
            continue;
        }
        if fat32::probe(i as u32) {
            let write_protected = fat32::mount(i as u32);
            MOUNTS.lock()[i] = Some(Mount {
                fs: Filesystem::Fat32,
                write_protected,
            });
            log::info!("volume{}: mounted FAT32 (write_protected={})", i, write_protected);
        }
    }
}

pub fn open(volume: u32, path: &str, mode: u8) -> i32 {
    let mount = match MOUNTS.lock().get(volume as usize).and_then(|m| *m) {
        Some(m) => m,
        None => return -1,
    };
    if mode & MODE_WRITE != 0 && mount.write_protected {
        return -1;
    }

    let inner = match mount.fs {
        Filesystem::Fat32 => fat32::open(volume, path, mode).map(InnerHandle::Fat32),
        Filesystem::DevFs => devfs::open(path, mode).map(InnerHandle::DevFs),
    };
    let inner = match inner {
        Some(h) => h,
        None => return -1,
    };

    let mut files = FILES.lock();
    for (i, slot) in files.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(OpenFile { volume, inner });
            return i as i32;
        }
    }
    -1
}

fn with_file<R>(fd: i32, f: impl FnOnce(&OpenFile) -> R, fail: R) -> R {
    if fd < 0 {
        return fail;
    }
    match FILES.lock().get(fd as usize).and_then(|f| *f) {
        Some(of) => f(&of),
        None => fail,
    }
}

pub fn close(fd: i32) -> i32 {
    if fd < 0 {
        return -1;
    }
    let of = match FILES.lock().get(fd as usize).and_then(|f| *f) {
        Some(of) => of,
        None => return -1,
    };
    match of.inner {
        InnerHandle::Fat32(h) => fat32::close(of.volume, h),
        InnerHandle::DevFs(h) => devfs::close(h),
    }
    if let Some(slot) = FILES.lock().get_mut(fd as usize) {
        *slot = None;
    }
    0
}

pub fn read(fd: i32, buf: &mut [u8]) -> i32 {
    with_file(
        fd,
        |of| match of.inner {
            InnerHandle::Fat32(h) => fat32::read(of.volume, h, buf),
            InnerHandle::DevFs(h) => devfs::read(h, buf),
        },
        -1,
    )
}

pub fn write(fd: i32, buf: &[u8]) -> i32 {
    with_file(
        fd,
        |of| match of.inner {
            InnerHandle::Fat32(h) => fat32::write(of.volume, h, buf),
            InnerHandle::DevFs(h) => devfs::write(h, buf),
        },
        -1,
    )
}

pub fn seek(fd: i32, offset: i32, whence: u32) -> i32 {
    with_file(
        fd,
        |of| match of.inner {
            InnerHandle::Fat32(h) => fat32::seek(of.volume, h, offset, whence),
            InnerHandle::DevFs(h) => devfs::seek(h, offset, whence),
        },
        -1,
    )
}

pub fn tell(fd: i32) -> i32 {
    with_file(
        fd,
        |of| match of.inner {
            InnerHandle::Fat32(h) => fat32::tell(of.volume, h),
            InnerHandle::DevFs(h) => devfs::tell(h),
        },
        -1,
    )
}

pub fn eof(fd: i32) -> bool {
    with_file(
        fd,
        |of| match of.inner {
            InnerHandle::Fat32(h) => fat32::eof(of.volume, h),
            InnerHandle::DevFs(h) => devfs::eof(h),
        },
        true,
    )
}

pub fn sync(volume: u32) {
    if let Some(Mount { fs: Filesystem::Fat32, .. }) = MOUNTS.lock().get(volume as usize).and_then(|m| *m) {
        fat32::sync(volume);
    }
}
