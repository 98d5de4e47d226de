#![no_std]
#![no_main]

//! The Multiboot2 entry point. Everything past "we have a stack and a GDT
//! we trust" lives in the `kernel` library crate; this binary only holds the
//! handoff from the boot shim's calling convention into `kernel_main`.

use kernel::interrupts;
use kernel::loader;
use kernel::memory;
use kernel::multiboot2;
use kernel::pfa;
use kernel::syscalls;
use kernel::volume;
use kernel::{debug, disk, io, machine};

/// Multiboot2 magic the boot shim leaves in EAX.
const MULTIBOOT2_MAGIC: u32 = 0x36d7_6289;

/// Dedicated stack for ring-0 code entered via a trap (`int 0x80` or an
/// IRQ) from ring 3. Separate from whatever stack `_start`/`kernel_main`
/// run on: the TSS's `esp0` only matters across a ring3->ring0 transition,
/// never for kernel code calling kernel code.
const KERNEL_TRAP_STACK_SIZE: usize = 16 * 1024;
static mut KERNEL_TRAP_STACK: [u8; KERNEL_TRAP_STACK_SIZE] = [0; KERNEL_TRAP_STACK_SIZE];

extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
}

/// Entered from the boot shim with EAX holding the Multiboot2 magic and EBX
/// the physical address of the Multiboot2 information structure, per the
/// Multiboot2 protocol. Never returns.
#[no_mangle]
pub extern "C" fn kernel_main(magic: u32, info_addr: u32) -> ! {
    unsafe { machine::cli() };

    debug::init().expect("debug: logger already installed");
    log::info!("kernel_main: magic={:#x} info_addr={:#x}", magic, info_addr);
    assert_eq!(magic, MULTIBOOT2_MAGIC, "not booted by a Multiboot2-compliant loader");

    let boot_info = unsafe { multiboot2::parse(info_addr) };
    let kernel_start = unsafe { &__kernel_start as *const u8 as u32 };
    let kernel_end = unsafe { &__kernel_end as *const u8 as u32 };

    pfa::init(multiboot2::max_phys(&boot_info));
    multiboot2::seed_pfa(&boot_info);
    pfa::post_init(kernel_start, kernel_end);
    memory::init();

    interrupts::init();
    let trap_stack_top = unsafe { KERNEL_TRAP_STACK.as_ptr().add(KERNEL_TRAP_STACK_SIZE) as u32 };
    interrupts::set_kernel_stack(trap_stack_top);

    syscalls::install();
    loader::install_exit_syscall();

    io::kbd::init();
    interrupts::unmask_irq(0);
    interrupts::unmask_irq(1);

    disk::probe_and_register();
    disk::partition::probe_all();
    volume::init_devfs();
    volume::detect_filesystems();

    unsafe { machine::sti() };

    #[cfg(feature = "ktest")]
    kernel::ktest::run_all();

    #[cfg(not(feature = "ktest"))]
    {
        let code = loader::spawn_init();
        log::info!("kernel_main: init exited with code {}", code);
        loop {
            unsafe { machine::hlt() };
        }
    }
}
