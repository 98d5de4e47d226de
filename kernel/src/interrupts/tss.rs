//! The Task State Segment: x86 hardware only needs one field from it in a
//! kernel that never performs a hardware task switch — `esp0`/`ss0`, the
//! ring-0 stack loaded on every ring-3 -> ring-0 transition (interrupt or
//! syscall while running a user program).

use core::mem;

use crate::machine::ltr;

use crate::interrupts::gdt;

static mut TSS_: Tss = Tss::new();

#[allow(dead_code)]
#[repr(C, packed)]
struct Tss {
    prev: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    unused: [u32; 19],
}

impl Tss {
    const fn new() -> Tss {
        Tss {
            prev: 0,
            esp0: 0,
            ss0: 0,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            unused: [0; 19],
        }
    }
}

/// Base and limit of the TSS, for `gdt::init` to build its descriptor from.
pub fn location() -> (u32, u32) {
    unsafe {
        (
            &TSS_ as *const Tss as u32,
            (mem::size_of::<Tss>() - 1) as u32,
        )
    }
}

pub fn init() {
    unsafe {
        TSS_.ss0 = gdt::KERNEL_DATA_SEL as u32;
        ltr(gdt::TSS_SEL as usize);
    }
}

/// Set the ring-0 stack pointer to load on the next privilege-level change.
/// Called by the loader/scheduler whenever it switches to a different
/// program's kernel stack.
pub fn set_esp0(v: u32) {
    unsafe {
        TSS_.esp0 = v;
    }
}
