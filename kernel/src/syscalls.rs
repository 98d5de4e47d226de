//! Wires the I/O syscall ids (`librs::syscall`) to `volume` and `io::kbd`.
//! `EXIT` is registered separately by `loader`, since its handler needs to
//! unwind the in-flight program rather than just fill in `EAX`.
//!
//! `librs::syscall`'s `O_*`/`SYS_*` constants were chosen to already line up
//! bit-for-bit with `volume::MODE_*`, so `OPEN`'s mode argument is passed
//! through unchanged rather than translated.

use rs::syscall as abi;

use crate::interrupts::{self, Registers};
use crate::io::{kbd, vga};
use crate::volume;

const MAX_PATH: usize = 256;

/// Read a NUL-terminated string out of user memory. Bounded at `MAX_PATH`
/// bytes; a program that never terminates its string within that bound gets
/// truncated rather than walking off into unmapped memory indefinitely.
unsafe fn read_cstr<'a>(ptr: *const u8, storage: &'a mut [u8; MAX_PATH]) -> &'a str {
    let mut len = 0;
    while len < MAX_PATH {
        let byte = *ptr.add(len);
        if byte == 0 {
            break;
        }
        storage[len] = byte;
        len += 1;
    }
    core::str::from_utf8(&storage[..len]).unwrap_or("")
}

fn sys_read(regs: &mut Registers) {
    let len = (regs.ebx as usize).saturating_mul(regs.ecx as usize);
    let buf = unsafe { core::slice::from_raw_parts_mut(regs.edi as *mut u8, len) };
    regs.eax = volume::read(regs.edx as i32, buf) as u32;
}

fn sys_write(regs: &mut Registers) {
    let len = (regs.ebx as usize).saturating_mul(regs.ecx as usize);
    let buf = unsafe { core::slice::from_raw_parts(regs.esi as *const u8, len) };
    regs.eax = volume::write(regs.edx as i32, buf) as u32;
}

fn sys_open(regs: &mut Registers) {
    let mut storage = [0u8; MAX_PATH];
    let path = unsafe { read_cstr(regs.edx as *const u8, &mut storage) };
    regs.eax = volume::open(regs.ebx, path, regs.ecx as u8) as u32;
}

fn sys_close(regs: &mut Registers) {
    regs.eax = volume::close(regs.ebx as i32) as u32;
}

fn sys_seek(regs: &mut Registers) {
    regs.eax = volume::seek(regs.edx as i32, regs.ecx as i32, regs.ebx) as u32;
}

fn sys_tell(regs: &mut Registers) {
    regs.eax = volume::tell(regs.edx as i32) as u32;
}

fn sys_print(regs: &mut Registers) {
    let mut storage = [0u8; MAX_PATH];
    let s = unsafe { read_cstr(regs.esi as *const u8, &mut storage) };
    for &b in s.as_bytes() {
        vga::put_char(b);
    }
    regs.eax = 0;
}

fn sys_printch(regs: &mut Registers) {
    vga::put_char(regs.edx as u8);
    regs.eax = 0;
}

/// Layout `command`'s `poll_kbd` wrapper expects at its `ev` pointer.
#[repr(C)]
struct KeyboardEventAbi {
    vkey: u32,
    pressed: u8,
}

fn sys_poll_kbd(regs: &mut Registers) {
    match kbd::poll() {
        Some(ev) => {
            unsafe {
                let out = regs.edx as *mut KeyboardEventAbi;
                (*out).vkey = ev.vkey as u32;
                (*out).pressed = ev.pressed;
            }
            regs.eax = 1;
        }
        None => regs.eax = 0,
    }
}

/// Register every I/O syscall handler. Called once during boot, before
/// `loader::spawn_init` can hand control to ring 3.
pub fn install() {
    interrupts::register_syscall(abi::SYS_READ, sys_read);
    interrupts::register_syscall(abi::SYS_WRITE, sys_write);
    interrupts::register_syscall(abi::SYS_OPEN, sys_open);
    interrupts::register_syscall(abi::SYS_CLOSE, sys_close);
    interrupts::register_syscall(abi::SYS_SEEK, sys_seek);
    interrupts::register_syscall(abi::SYS_TELL, sys_tell);
    interrupts::register_syscall(abi::SYS_PRINT, sys_print);
    interrupts::register_syscall(abi::SYS_PRINTCH, sys_printch);
    interrupts::register_syscall(abi::SYS_POLL_KBD, sys_poll_kbd);
}
