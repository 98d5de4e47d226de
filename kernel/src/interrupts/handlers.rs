//! Exception and IRQ handling: the 32-bit equivalent of the stack frame the
//! `x86-interrupt` calling convention hands back, plus the 256-entry table
//! of optional callbacks the syscall/exception dispatchers consult.

use spin::Mutex;

use crate::memory;

/// What the CPU pushes for an interrupt/exception with no privilege change
/// and no error code. Error-bearing exceptions (GPF, page fault, double
/// fault) take an extra `u32` error-code argument ahead of this frame,
/// exactly as the `x86-interrupt` ABI specifies.
#[repr(C)]
pub struct InterruptStackFrame {
    pub instruction_pointer: u32,
    pub code_segment: u32,
    pub cpu_flags: u32,
}

pub type HandlerFn = fn(vector: u8);

/// A 256-entry array of optional callbacks for exceptions and IRQs beyond
/// the fixed set wired up in `interrupts::init` — an extension point for
/// drivers that want to observe a vector without owning its gate.
static CALLBACKS: Mutex<[Option<HandlerFn>; 256]> = Mutex::new([None; 256]);

pub fn register_callback(vector: u8, f: HandlerFn) {
    CALLBACKS.lock()[vector as usize] = Some(f);
}

pub fn run_callback(vector: u8) {
    if let Some(f) = CALLBACKS.lock()[vector as usize] {
        f(vector);
    }
}

pub extern "x86-interrupt" fn breakpoint(_esf: &mut InterruptStackFrame) {
    log::warn!("breakpoint hit");
}

pub extern "x86-interrupt" fn invalid_opcode(esf: &mut InterruptStackFrame) {
    panic!(
        "invalid opcode at CS:EIP {:#x}:{:#x}, flags {:#b}",
        esf.code_segment, esf.instruction_pointer, esf.cpu_flags
    );
}

pub extern "x86-interrupt" fn nmi(esf: &mut InterruptStackFrame) {
    panic!(
        "non-maskable interrupt at CS:EIP {:#x}:{:#x}",
        esf.code_segment, esf.instruction_pointer
    );
}

pub extern "x86-interrupt" fn double_fault(esf: &mut InterruptStackFrame, error: u32) -> ! {
    panic!(
        "double fault (error={:#x}) at CS:EIP {:#x}:{:#x}",
        error, esf.code_segment, esf.instruction_pointer
    );
}

pub extern "x86-interrupt" fn general_protection_fault(esf: &mut InterruptStackFrame, error: u32) {
    panic!(
        "general protection fault (error={:#x}) at CS:EIP {:#x}:{:#x}",
        error, esf.code_segment, esf.instruction_pointer
    );
}

pub extern "x86-interrupt" fn page_fault(_esf: &mut InterruptStackFrame, error: u32) -> ! {
    let fault_addr = unsafe { crate::machine::read_cr2() };
    memory::handle_page_fault(fault_addr, error);
}
