//! The program loader: turns a flat executable image on a volume into a
//! running ring-3 program, and back again.
//!
//! There is no scheduler preempting a running program (`process` only
//! tracks a ready queue for programs that haven't started yet), so
//! `execute_program` can treat "jump to ring 3" and "the program calls
//! `EXIT`" as a single call that blocks the kernel thread until it
//! completes - the same shape as a function call, just with a ring
//! transition and a trap in the middle instead of a `call`/`ret` pair.
//! `enter_user_mode` saves the kernel stack pointer right before the
//! `iretd`; the `EXIT` handler restores it and runs the same callee-saved
//! pops and `ret` that a normal return from `enter_user_mode` would have
//! used. From `execute_program`'s point of view, the call returns, full
//! stop.

use core::sync::atomic::{AtomicI32, Ordering};

use rs::exec;

use crate::interrupts::{self, Registers, USER_CODE_SEL, USER_DATA_SEL};
use crate::memory::vmm;
use crate::pfa;
use crate::process;
use crate::volume;

pub const NOT_FOUND: i32 = -1;
pub const NOT_EXECUTABLE: i32 = -2;
pub const OUT_OF_MEMORY: i32 = -3;

/// Single-page stack, mapped at a fixed high address so it never collides
/// with the program image growing up from 0.
const USER_STACK_VADDR: u32 = 0x4000_0000;

/// `pfa::alloc`'s owner tag for program-owned frames, distinct from the
/// kernel's `0`.
const PROGRAM_OWNER: u16 = 1;

/// Saved kernel ESP from the most recent `enter_user_mode`, restored by the
/// `EXIT` syscall handler. Single `static mut`: the kernel is
/// non-preemptive and only one program runs at a time, same discipline
/// `io::kbd` uses for its scan-code modifier state.
static mut RESUME_ESP: u32 = 0;

/// Inputs to `enter_user_mode`, set by its caller just before the call.
/// `enter_user_mode` is `#[naked]` (no compiler prologue, so its own
/// callee-saved pushes land exactly where `resume_execute_program` expects
/// them) and a naked fn can't bind ordinary parameters, so these take the
/// place of arguments - the same trick `syscall::entry` uses for its
/// dispatch-function pointer.
static mut ENTRY_VADDR: u32 = 0;
static mut ENTRY_USER_ESP: u32 = 0;

static EXIT_CODE: AtomicI32 = AtomicI32::new(0);

/// Register the `EXIT` syscall. Unlike every other syscall, its handler
/// never returns to the caller's `iretd` epilogue - it diverts straight
/// into `enter_user_mode`'s saved stack frame.
pub fn install_exit_syscall() {
    interrupts::register_syscall(rs::syscall::SYS_EXIT, sys_exit);
}

fn sys_exit(regs: &mut Registers) {
    EXIT_CODE.store(regs.ebx as i32, Ordering::Relaxed);
    unsafe { resume_execute_program() };
}

/// Build the ring-3 `iretd` frame and jump to it, having first stashed this
/// call's own stack pointer (just past the callee-saved pushes) so
/// `resume_execute_program` can unwind back here. Naked: a normal fn's
/// compiler-generated prologue would push its own frame setup around these
/// pushes, and `resume_execute_program`'s pops need to land on exactly this
/// stack shape, not whatever LLVM happens to emit.
#[naked]
unsafe extern "C" fn enter_user_mode() {
    let entry = ENTRY_VADDR;
    let user_esp = ENTRY_USER_ESP;
    asm! {
        "pushl %ebx
         pushl %esi
         pushl %edi
         pushl %ebp
         movl %esp, ($0)
         pushl $1
         pushl $2
         pushl $$0x202
         pushl $3
         pushl $4
         iretd"
        :
        : "r"(&mut RESUME_ESP as *mut u32),
          "r"(USER_DATA_SEL as u32),
          "r"(user_esp),
          "r"(USER_CODE_SEL as u32),
          "r"(entry)
        : "memory"
        : "volatile"
    };
}

/// Restore the stack pointer `enter_user_mode` saved and run the exact
/// epilogue it would have run on a normal return. Never returns to its own
/// caller (`sys_exit`) - control lands back in `execute_program` instead.
#[naked]
unsafe extern "C" fn resume_execute_program() -> ! {
    asm! {
        "movl ($0), %esp
         popl %ebp
         popl %edi
         popl %esi
         popl %ebx
         ret"
        :
        : "r"(&mut RESUME_ESP as *mut u32)
        : "memory"
        : "volatile"
    };
    unreachable!("resume_execute_program: fell through the longjmp")
}

fn round_up_pages(bytes: u32) -> u32 {
    (bytes + vmm::PAGE_SIZE - 1) / vmm::PAGE_SIZE
}

/// Open `path` on `volume`, validate and load its flat executable image
/// into a fresh address space, and run it to completion.
///
/// On any failure, every resource acquired in an earlier step is released
/// in reverse order before returning. `-1` not found, `-2` not an
/// executable (bad magic, zero-length, or larger than the load window),
/// `-3` out of memory (PFA exhaustion).
pub fn execute_program(volume: u32, path: &str, argv: &[&str]) -> i32 {
    log::info!("exec: loading program '{}:{}'", volume, path);

    let fd = volume::open(volume, path, volume::MODE_READ);
    if fd < 0 {
        return NOT_FOUND;
    }

    let mut header = [0u8; exec::Header::SIZE];
    if volume::read(fd, &mut header) != exec::Header::SIZE as i32 {
        volume::close(fd);
        return NOT_EXECUTABLE;
    }
    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let entry = u32::from_le_bytes(header[4..8].try_into().unwrap());
    if magic != exec::EXEC_MAGIC {
        volume::close(fd);
        return NOT_EXECUTABLE;
    }

    let file_len = volume::seek(fd, 0, volume::SEEK_END);
    if file_len < 0 {
        volume::close(fd);
        return NOT_EXECUTABLE;
    }
    let file_len = file_len as u32;
    let span = exec::EXEC_START + file_len;
    if file_len == 0 || span > exec::EXEC_END {
        volume::close(fd);
        return NOT_EXECUTABLE;
    }
    let pages = round_up_pages(span);

    let directory = vmm::allocate_page_directory();
    vmm::switch_page_directory(directory);

    let program_phys = match pfa::alloc(pages * vmm::PAGE_SIZE, PROGRAM_OWNER) {
        Some(p) => p,
        None => {
            vmm::free_page_directory(directory);
            volume::close(fd);
            return OUT_OF_MEMORY;
        }
    };
    let stack_phys = match pfa::alloc(vmm::PAGE_SIZE, PROGRAM_OWNER) {
        Some(p) => p,
        None => {
            pfa::free(program_phys);
            vmm::free_page_directory(directory);
            volume::close(fd);
            return OUT_OF_MEMORY;
        }
    };

    for i in 0..pages {
        vmm::virtual_map_user(i * vmm::PAGE_SIZE, program_phys + i * vmm::PAGE_SIZE);
    }
    vmm::virtual_map_user(USER_STACK_VADDR, stack_phys);

    unsafe { core::ptr::write_bytes(0 as *mut u8, 0, (pages * vmm::PAGE_SIZE) as usize) };

    volume::seek(fd, 0, volume::SEEK_SET);
    let image = unsafe {
        core::slice::from_raw_parts_mut(exec::EXEC_START as *mut u8, file_len as usize)
    };
    let read = volume::read(fd, image);
    volume::close(fd);
    if read != file_len as i32 {
        pfa::free(stack_phys);
        pfa::free(program_phys);
        vmm::free_page_directory(directory);
        return NOT_EXECUTABLE;
    }

    let user_esp = build_argv(USER_STACK_VADDR + vmm::PAGE_SIZE, argv);

    process::spawn(volume, directory);
    process::schedule_next();

    log::info!("exec: entering '{}' at {:#010x}", path, entry);
    unsafe {
        ENTRY_VADDR = entry;
        ENTRY_USER_ESP = user_esp;
        enter_user_mode();
    }
    let code = EXIT_CODE.load(Ordering::Relaxed);
    log::info!("exec: '{}' returned with code {}", path, code);
    process::exit_current(code);

    pfa::free(stack_phys);
    pfa::free(program_phys);
    vmm::free_page_directory(directory);

    code
}

/// Lay out `argv` at the top of the user stack: the strings themselves,
/// then a `char**`-shaped pointer array pointing at them, then push
/// `(argc, argv)` so the cdecl entry point's prologue finds them exactly
/// where a normal `main(argc, argv)` call would leave them.
///
/// This all happens through the live (just-switched-to) page directory,
/// which already maps the stack page, so plain pointer writes suffice.
fn build_argv(stack_top: u32, argv: &[&str]) -> u32 {
    let mut cursor = stack_top;

    let mut pointers = [0u32; 16];
    let count = argv.len().min(pointers.len());

    for (i, s) in argv.iter().take(count).enumerate() {
        let bytes = s.as_bytes();
        cursor -= (bytes.len() + 1) as u32;
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), cursor as *mut u8, bytes.len());
            *((cursor + bytes.len() as u32) as *mut u8) = 0;
        }
        pointers[i] = cursor;
    }

    cursor &= !0x3;
    cursor -= 4 * (count as u32 + 1);
    let argv_vaddr = cursor;
    unsafe {
        for (i, &p) in pointers[..count].iter().enumerate() {
            *((argv_vaddr + 4 * i as u32) as *mut u32) = p;
        }
        *((argv_vaddr + 4 * count as u32) as *mut u32) = 0;
    }

    cursor -= 4;
    unsafe { *(cursor as *mut u32) = argv_vaddr };
    cursor -= 4;
    unsafe { *(cursor as *mut u32) = count as u32 };
    cursor -= 4; // return address slot; EXIT makes the entry point never use it.

    cursor
}

/// Try each disk-backed volume in ascending order and run the first
/// `/COMMAND.EXE` found. Volume 0 is the device-file filesystem and is
/// never a candidate.
pub fn spawn_init() -> i32 {
    for volume in 1..volume::MAX_VOLUMES as u32 {
        let code = execute_program(volume, "/COMMAND.EXE", &["/COMMAND.EXE"]);
        if code != NOT_FOUND {
            return code;
        }
    }
    log::warn!("loader: no volume has /COMMAND.EXE");
    NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_pages_rounds_partial_pages() {
        assert_eq!(round_up_pages(1), 1);
        assert_eq!(round_up_pages(vmm::PAGE_SIZE), 1);
        assert_eq!(round_up_pages(vmm::PAGE_SIZE + 1), 2);
    }
}
