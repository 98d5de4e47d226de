//! Device-file filesystem: synthetic files bound to volume 0 unconditionally
//! at boot (`volume::init_devfs`) rather than probed. `tty0`-`tty3` forward
//! to the four legacy COM ports, `vga` to the text-mode framebuffer, `mem`
//! gives raw read/write access to an absolute physical address, and
//! `null`/`zero` behave as their Unix namesakes. None of these support long
//! filenames or directories; the path is matched against a fixed set.

use spin::Mutex;

use crate::io::{uart, vga};
use crate::volume;

const MAX_OPEN_FILES: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Kind {
    Null,
    Zero,
    Serial { port: u8 },
    Vga,
    Memory { addr: u32, write: bool },
}

static FILES: Mutex<[Option<Kind>; MAX_OPEN_FILES]> = Mutex::new([None; MAX_OPEN_FILES]);

fn find_free(files: &[Option<Kind>; MAX_OPEN_FILES]) -> Option<usize> {
    files.iter().position(|f| f.is_none())
}

fn classify(path: &str, mode: u8) -> Option<Kind> {
    let path = path.trim_start_matches('/');
    if let Some(rest) = path.strip_prefix("tty") {
        let id: u8 = rest.parse().ok()?;
        if id >= 4 {
            return None;
        }
        return Some(Kind::Serial { port: id });
    }
    match path {
        "mem" => Some(Kind::Memory {
            addr: 0,
            write: mode & volume::MODE_WRITE != 0,
        }),
        "vga" => Some(Kind::Vga),
        "null" => Some(Kind::Null),
        "zero" => Some(Kind::Zero),
        _ => None,
    }
}

pub fn open(path: &str, mode: u8) -> Option<u32> {
    let kind = classify(path, mode)?;
    let mut files = FILES.lock();
    let slot = find_free(&files)?;
    files[slot] = Some(kind);
    Some(slot as u32)
}

pub fn close(handle: u32) {
    if let Some(slot) = FILES.lock().get_mut(handle as usize) {
        if let Some(Kind::Serial { port }) = *slot {
            uart::flush(port);
        }
        *slot = None;
    }
}

pub fn read(handle: u32, buf: &mut [u8]) -> i32 {
    if buf.is_empty() {
        return -1;
    }
    let mut files = FILES.lock();
    match files.get_mut(handle as usize).and_then(|f| f.as_mut()) {
        Some(Kind::Zero) => {
            buf.fill(0);
            buf.len() as i32
        }
        // Undemonstrated physical address, dereferenced directly: a GPF here
        // is the caller's fault, same as the original's unchecked memcpy.
        Some(Kind::Memory { addr, .. }) => {
            unsafe { core::ptr::copy_nonoverlapping(*addr as *const u8, buf.as_mut_ptr(), buf.len()) };
            *addr = addr.wrapping_add(buf.len() as u32);
            buf.len() as i32
        }
        _ => -1,
    }
}

pub fn write(handle: u32, buf: &[u8]) -> i32 {
    if buf.is_empty() {
        return -1;
    }
    let mut files = FILES.lock();
    match files.get_mut(handle as usize).and_then(|f| f.as_mut()) {
        Some(Kind::Null) => buf.len() as i32,
        Some(Kind::Memory { addr, write }) => {
            if !*write {
                return -1;
            }
            unsafe { core::ptr::copy_nonoverlapping(buf.as_ptr(), *addr as *mut u8, buf.len()) };
            *addr = addr.wrapping_add(buf.len() as u32);
            buf.len() as i32
        }
        Some(Kind::Serial { port }) => {
            let port = *port;
            for &b in buf {
                uart::put_char(port, b);
            }
            buf.len() as i32
        }
        Some(Kind::Vga) => {
            for &b in buf {
                vga::put_char(b);
            }
            buf.len() as i32
        }
        _ => -1,
    }
}

pub fn tell(handle: u32) -> i32 {
    match FILES.lock().get(handle as usize).copied().flatten() {
        Some(Kind::Memory { addr, .. }) => addr as i32,
        Some(Kind::Null) | Some(Kind::Zero) | Some(Kind::Vga) => 0,
        _ => -1,
    }
}

pub fn seek(handle: u32, offset: i32, whence: u32) -> i32 {
    let mut files = FILES.lock();
    match files.get_mut(handle as usize).and_then(|f| f.as_mut()) {
        Some(Kind::Memory { addr, .. }) => {
            *addr = match whence {
                volume::SEEK_SET => offset as u32,
                volume::SEEK_CUR => addr.wrapping_add(offset as u32),
                volume::SEEK_END => 0xFFFF_FFFFu32.wrapping_add(offset as u32),
                _ => return -1,
            };
            *addr as i32
        }
        Some(Kind::Null) | Some(Kind::Zero) => 0,
        _ => -1,
    }
}

pub fn eof(handle: u32) -> bool {
    match FILES.lock().get(handle as usize).copied().flatten() {
        Some(Kind::Memory { addr, .. }) => addr == 0xFFFF_FFFF,
        Some(Kind::Null) | Some(Kind::Serial { .. }) | Some(Kind::Vga) => true,
        Some(Kind::Zero) => false,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tty_id_out_of_range_is_rejected() {
        assert_eq!(classify("tty3", 0), Some(Kind::Serial { port: 3 }));
        assert_eq!(classify("tty4", 0), None);
        assert_eq!(classify("ttyX", 0), None);
    }

    #[test]
    fn mem_write_flag_follows_mode() {
        assert_eq!(
            classify("mem", volume::MODE_WRITE),
            Some(Kind::Memory { addr: 0, write: true })
        );
        assert_eq!(
            classify("mem", volume::MODE_READ),
            Some(Kind::Memory { addr: 0, write: false })
        );
    }

    #[test]
    fn unknown_path_is_rejected() {
        assert_eq!(classify("frobnicate", 0), None);
    }
}
