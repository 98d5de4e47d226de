//! Interrupt/syscall dispatcher: installs the GDT, IDT, TSS, and PIC, and
//! owns the syscall table.

pub use self::gdt::{USER_CODE_SEL, USER_DATA_SEL};
pub use self::pit::HZ as PIT_HZ;
pub use self::syscall::Registers;

mod gdt;
mod handlers;
mod idt;
mod pic;
mod pit;
mod syscall;
mod tss;

const VECTOR_BREAKPOINT: u8 = 3;
const VECTOR_INVALID_OPCODE: u8 = 6;
const VECTOR_DOUBLE_FAULT: u8 = 8;
const VECTOR_NMI: u8 = 2;
const VECTOR_GPF: u8 = 13;
const VECTOR_PAGE_FAULT: u8 = 14;
const VECTOR_SYSCALL: u8 = 0x80;

/// Initialize interrupts (and exceptions): GDT, TSS, IDT, PIC. Everything is
/// masked until a driver calls `unmask_irq`.
pub fn init() {
    let (tss_base, tss_limit) = tss::location();
    gdt::init(tss_base, tss_limit);
    tss::init();

    for v in 0..idt::NUM_ENTRIES {
        idt::set_gate(v as u8, default_handler as u32, gdt::KERNEL_CODE_SEL, false);
    }

    idt::set_gate(VECTOR_BREAKPOINT, handlers::breakpoint as u32, gdt::KERNEL_CODE_SEL, false);
    idt::set_gate(
        VECTOR_INVALID_OPCODE,
        handlers::invalid_opcode as u32,
        gdt::KERNEL_CODE_SEL,
        false,
    );
    idt::set_gate(VECTOR_NMI, handlers::nmi as u32, gdt::KERNEL_CODE_SEL, false);
    idt::set_gate(
        VECTOR_DOUBLE_FAULT,
        handlers::double_fault as u32,
        gdt::KERNEL_CODE_SEL,
        false,
    );
    idt::set_gate(VECTOR_GPF, handlers::general_protection_fault as u32, gdt::KERNEL_CODE_SEL, false);
    idt::set_gate(VECTOR_PAGE_FAULT, handlers::page_fault as u32, gdt::KERNEL_CODE_SEL, false);

    for (i, stub) in pic::STUBS.iter().enumerate() {
        idt::set_gate(pic::MASTER_BASE + i as u8, *stub as u32, gdt::KERNEL_CODE_SEL, false);
    }

    idt::set_gate(VECTOR_SYSCALL, syscall::entry as u32, gdt::KERNEL_CODE_SEL, true);

    idt::load();

    pic::init();
    pit::init();
}

pub fn mask_irq(i: u8) {
    pic::mask_irq(i);
}

pub fn unmask_irq(i: u8) {
    pic::unmask_irq(i);
}

pub fn register_syscall(id: u32, handler: syscall::SyscallFn) {
    syscall::register(id, handler);
}

pub fn register_callback(vector: u8, f: handlers::HandlerFn) {
    handlers::register_callback(vector, f);
}

pub fn set_kernel_stack(esp0: u32) {
    tss::set_esp0(esp0);
}

extern "x86-interrupt" fn default_handler(_esf: &mut handlers::InterruptStackFrame) {
    log::warn!("unhandled interrupt");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_dispatch_forwards_known_id() {
        fn handler(regs: &mut Registers) {
            regs.eax = regs.ebx + 1;
        }
        syscall::register(42, handler);

        let mut regs = Registers {
            eax: 42,
            ebx: 9,
            ..Default::default()
        };
        syscall::dispatch(&mut regs);
        assert_eq!(regs.eax, 10);
    }

    #[test]
    fn syscall_dispatch_unknown_id_returns_negative_one() {
        let mut regs = Registers {
            eax: 999,
            ..Default::default()
        };
        syscall::dispatch(&mut regs);
        assert_eq!(regs.eax as i32, -1);
    }
}
