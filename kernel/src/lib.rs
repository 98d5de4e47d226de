#![feature(
    lang_items,
    asm,
    alloc_error_handler,
    abi_x86_interrupt,
    panic_info_message,
    naked_functions
)]
#![no_std]

//! The kernel library: every subsystem lives here as a module so both the
//! `kernel` binary (`src/main.rs`, the thin Multiboot2 entry point) and the
//! `ktest` integration tests can reach them. Plain `#[cfg(test)]` unit tests
//! also run against this crate on the host, for logic that does not depend
//! on live paging or hardware.

extern crate alloc;

#[macro_use]
pub mod debug;
pub mod bare_bones;
pub mod devfs;
pub mod disk;
pub mod fat32;
pub mod interrupts;
pub mod io;
pub mod loader;
pub mod machine;
pub mod memory;
pub mod multiboot2;
pub mod pci;
pub mod pfa;
pub mod process;
pub mod syscalls;
pub mod time;
pub mod volume;

#[cfg(feature = "ktest")]
pub mod ktest;

/// The kernel heap.
#[global_allocator]
static mut ALLOCATOR: memory::KernelAllocator = memory::KernelAllocator::new();
