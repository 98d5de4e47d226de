//! The syscall vector (`int 0x80`): a naked entry stub that saves every
//! general-purpose register into a `Registers` snapshot, a small flat
//! dispatch table keyed by syscall id, and the table itself.
//!
//! Unlike the exception/IRQ stubs in `pic.rs`, which only need the
//! `x86-interrupt` ABI's implicit stack frame, syscalls need the caller's
//! argument registers — so this one is hand-written in the teacher's
//! `naked_functions` idiom instead.

use spin::Mutex;

pub const MAX_SYSCALLS: usize = 128;

/// Register snapshot, laid out to match what `pushad` leaves on the stack
/// (low address to high): edi, esi, ebp, esp, ebx, edx, ecx, eax.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Registers {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

pub type SyscallFn = fn(&mut Registers);

#[derive(Clone, Copy)]
struct Entry {
    id: u32,
    handler: SyscallFn,
}

static TABLE: Mutex<[Option<Entry>; MAX_SYSCALLS]> = Mutex::new([None; MAX_SYSCALLS]);

/// Register a syscall handler. Called during driver/subsystem init, in a
/// fixed known order (the spec's "registration macros" design note,
/// realized here as plain function calls rather than constructor-of-static
/// tricks).
pub fn register(id: u32, handler: SyscallFn) {
    let mut table = TABLE.lock();
    for slot in table.iter_mut() {
        if slot.is_none() {
            *slot = Some(Entry { id, handler });
            return;
        }
    }
    panic!("syscall: table full, cannot register id {}", id);
}

/// Look up and invoke the handler for `regs.eax`'s syscall id. An unknown
/// id is logged and survivable — it returns `-1` rather than crashing.
pub fn dispatch(regs: &mut Registers) {
    let table = TABLE.lock();
    for slot in table.iter() {
        if let Some(entry) = slot {
            if entry.id == regs.eax {
                let handler = entry.handler;
                drop(table);
                handler(regs);
                return;
            }
        }
    }
    log::warn!("syscall: unknown id {}", regs.eax);
    regs.eax = (-1i32) as u32;
}

extern "C" fn dispatch_c(regs: *mut Registers) {
    dispatch(unsafe { &mut *regs });
}

/// The raw `int 0x80` entry point, installed directly in the IDT (not via
/// the `x86-interrupt` ABI, since that ABI does not expose general-purpose
/// registers).
#[naked]
pub extern "C" fn entry() {
    unsafe {
        let f = dispatch_c as extern "C" fn(*mut Registers);
        asm!{
            "pushad
             mov %esp, %eax
             push %eax
             call *$0
             add $$4, %esp
             popad
             iretd"
            :
            : "r"(f)
            : "eax"
            : "volatile"
        };
    }
}
