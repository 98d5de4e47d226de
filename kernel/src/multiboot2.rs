//! Consumes the boot loader's Multiboot2 information struct into the PFA.
//! Only the memory-map tag matters to the core; everything else in the
//! struct (boot command line, module list, ELF sections) is the boot shim's
//! business, not ours.

use multiboot2::{BootInformation, BootInformationHeader, MemoryAreaType};

use crate::pfa;

const PAGE_SIZE: u32 = 4096;

fn align_up(addr: u32) -> u32 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

fn align_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE - 1)
}

/// Parse the Multiboot2 info struct at `info_addr`. The boot shim passes
/// this pointer in EBX per the Multiboot2 protocol; the caller is
/// responsible for having already checked EAX against the Multiboot2 magic.
///
/// # Safety
/// `info_addr` must point to a valid Multiboot2 information structure, as
/// guaranteed only by the boot loader having just handed control to us.
pub unsafe fn parse<'a>(info_addr: u32) -> BootInformation<'a> {
    BootInformation::load(info_addr as *const BootInformationHeader)
        .expect("malformed multiboot2 info struct")
}

/// Feed every available (type 1) memory-map entry into the PFA as a free
/// range, rounding each to whole pages. Entries are Multiboot2's contiguous
/// physical RAM ranges, not yet aware of the kernel image or VGA buffer
/// living inside them — `pfa::post_init` reserves those afterward.
pub fn seed_pfa(boot_info: &BootInformation<'_>) {
    let mem_tag = boot_info
        .memory_map_tag()
        .expect("multiboot2 info has no memory map tag");

    for area in mem_tag.memory_areas() {
        if area.typ() != MemoryAreaType::Available {
            continue;
        }
        let start = align_up(area.start_address() as u32);
        let end = align_down(area.end_address() as u32);
        if end > start {
            pfa::insert_free(start, end - start);
        }
    }
}

/// Highest physical address Multiboot2 reports RAM reaching, rounded down
/// to a page boundary. Used to size the PFA's region-list coverage.
pub fn max_phys(boot_info: &BootInformation<'_>) -> u32 {
    let mem_tag = boot_info
        .memory_map_tag()
        .expect("multiboot2 info has no memory map tag");

    mem_tag
        .memory_areas()
        .map(|a| align_down(a.end_address() as u32))
        .max()
        .unwrap_or(0)
}
