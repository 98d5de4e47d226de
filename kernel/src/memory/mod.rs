//! The memory management subsystem: the physical frame allocator lives in
//! `crate::pfa`; this module owns the virtual memory manager and the
//! coarse kernel heap built on top of it.

pub use self::heap::KernelAllocator;

pub mod heap;
pub mod vmm;

/// Finish memory-subsystem bring-up once the caller has already run
/// `pfa::init`, seeded free ranges from the Multiboot2 memory map
/// (`multiboot2::seed_pfa`), and called `pfa::post_init` to reserve the
/// kernel image and VGA buffer. All that remains is handing the VMM the
/// page directory the boot shim already built.
pub fn init() {
    vmm::init();
}

/// Handle a page fault: CPU exceptions on kernel code are fatal by design
/// (demand paging is a non-goal).
pub fn handle_page_fault(fault_addr: u32, error_code: u32) -> ! {
    let present = error_code & 1 != 0;
    let write = error_code & (1 << 1) != 0;
    let user = error_code & (1 << 2) != 0;
    let reserved = error_code & (1 << 3) != 0;
    let instr_fetch = error_code & (1 << 4) != 0;

    vmm::print_diagnostic(fault_addr);
    panic!(
        "page fault at {:#010x}: present={} write={} user={} reserved={} instr_fetch={}",
        fault_addr, present, write, user, reserved, instr_fetch
    );
}
