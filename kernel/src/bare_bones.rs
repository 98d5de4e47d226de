//! This module contains some basic functionality that libstd would normally
//! otherwise provide. Most importantly, it defines the `#[panic_handler]`
//! used by `panic!`.
//!
//! Every "CPU exceptions on kernel code" and "precondition violation" error
//! category lands here: disable interrupts, dump the message through the
//! logging façade, halt forever. The kernel never resumes after a panic.

use core::fmt::Write;
use core::panic::PanicInfo;

use crate::debug::Debug;
use crate::machine;

#[lang = "eh_personality"]
#[no_mangle]
pub fn eh_personality() {}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    unsafe { machine::cli() };

    printk!("\n========{{ PANIC }}========\n");
    if let Some(loc) = info.location() {
        printk!("{}:{}:{}\n", loc.file(), loc.line(), loc.column());
    }
    printk!("...........................\n");
    if let Some(args) = info.message() {
        let _ = Debug.write_fmt(*args);
    }
    printk!("\n===========================\n");

    loop {
        unsafe { machine::hlt() };
    }
}
