//! Virtual Memory Manager: owns page directories and mappings, and exposes
//! `vmtemp`, the single temporary-mapping slot used to edit arbitrary
//! physical frames.
//!
//! Non-recursive, 2-level, 32-bit paging. The kernel half of every page
//! directory (entries 768..1023) is kept identical across all address
//! spaces; mutating a kernel-range entry broadcasts it to every directory
//! allocated so far.

use bitflags::bitflags;
use spin::Mutex;

use crate::pfa;

pub const ENTRIES: usize = 1024;
pub const PAGE_SIZE: u32 = 4096;

/// First directory index belonging to the kernel half.
pub const KERNEL_DIR_INDEX: usize = 768;

/// Fixed virtual address at which the live page directory's own frame is
/// mapped, so the kernel can always edit it.
pub const PD_SLOT: u32 = 0xFFFF_F000;

/// Fixed virtual address of the single temporary-mapping slot.
pub const VMTEMP_VADDR: u32 = 0xFFFF_E000;

bitflags! {
    pub struct EntryFlags: u32 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const GLOBAL        = 1 << 8;
    }
}

#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Entry(u32);

impl Entry {
    const fn empty() -> Self {
        Entry(0)
    }

    fn addr(&self) -> u32 {
        self.0 & 0xFFFF_F000
    }

    fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0 & 0xFFF)
    }

    fn is_present(&self) -> bool {
        self.flags().contains(EntryFlags::PRESENT)
    }

    fn set(&mut self, addr: u32, flags: EntryFlags) {
        self.0 = (addr & 0xFFFF_F000) | flags.bits();
    }
}

#[repr(C, align(4096))]
struct Table([Entry; ENTRIES]);

impl Table {
    const fn empty() -> Self {
        Table([Entry::empty(); ENTRIES])
    }
}

const MAX_DIRECTORIES: usize = 64;

struct Vmm {
    /// Physical addresses of every page directory allocated so far, used to
    /// broadcast kernel-half updates.
    directories: [Option<u32>; MAX_DIRECTORIES],
    live: u32,
}

static VMM: Mutex<Option<Vmm>> = Mutex::new(None);

/// The one physical frame we can have mapped at `VMTEMP_VADDR` at a time.
/// Callers of `with_temp_mapping` nest by saving/restoring this value, per
/// the scoped-acquisition discipline `vmtemp` requires.
static VMTEMP_CURRENT: Mutex<Option<u32>> = Mutex::new(None);

fn dir_index(vaddr: u32) -> usize {
    (vaddr >> 22) as usize
}

fn tbl_index(vaddr: u32) -> usize {
    ((vaddr >> 12) & 0x3FF) as usize
}

fn live_dir_ptr() -> *mut Table {
    PD_SLOT as *mut Table
}

/// Map `VMTEMP_VADDR` to `phys`, call `f` with the resulting pointer, then
/// restore whatever was mapped there before. Reentrancy-unsafe: the whole
/// kernel is single-threaded and non-preemptive during this window.
pub fn with_temp_mapping<R>(phys: u32, f: impl FnOnce(*mut u8) -> R) -> R {
    let prev = *VMTEMP_CURRENT.lock();
    raw_map(VMTEMP_VADDR, phys, EntryFlags::PRESENT | EntryFlags::WRITABLE);
    *VMTEMP_CURRENT.lock() = Some(phys);

    let result = f(VMTEMP_VADDR as *mut u8);

    match prev {
        Some(p) => raw_map(VMTEMP_VADDR, p, EntryFlags::PRESENT | EntryFlags::WRITABLE),
        None => raw_unmap(VMTEMP_VADDR),
    }
    *VMTEMP_CURRENT.lock() = prev;

    result
}

/// Write a leaf entry directly in the live directory, allocating a page
/// table via the PFA if the containing directory entry is absent. Does not
/// broadcast; callers in the kernel range must call `broadcast_kernel_entry`
/// themselves (`virtual_map` does).
fn raw_map(vaddr: u32, phys: u32, flags: EntryFlags) {
    unsafe {
        let dir = &mut *live_dir_ptr();
        let di = dir_index(vaddr);

        if !dir.0[di].is_present() {
            let pt_phys = pfa::alloc_frame().expect("vmm: out of frames for page table");
            with_temp_mapping(pt_phys, |p| {
                core::ptr::write_bytes(p, 0, PAGE_SIZE as usize);
            });
            dir.0[di].set(pt_phys, EntryFlags::PRESENT | EntryFlags::WRITABLE);
        }

        let pt_phys = dir.0[di].addr();
        with_temp_mapping(pt_phys, |p| {
            let table = &mut *(p as *mut Table);
            table.0[tbl_index(vaddr)].set(phys, flags);
        });
    }
}

fn raw_unmap(vaddr: u32) {
    unsafe {
        let dir = &mut *live_dir_ptr();
        let di = dir_index(vaddr);
        if !dir.0[di].is_present() {
            return;
        }
        let pt_phys = dir.0[di].addr();
        with_temp_mapping(pt_phys, |p| {
            let table = &mut *(p as *mut Table);
            table.0[tbl_index(vaddr)] = Entry::empty();
        });
    }
}

/// Copy directory entry `di` from the live directory into every allocated
/// directory. Used only for kernel-range indices.
fn broadcast_kernel_entry(di: usize) {
    let value = unsafe { (&*live_dir_ptr()).0[di] };
    let dirs = VMM.lock().as_ref().unwrap().directories;
    for slot in dirs.iter().flatten() {
        let phys = *slot;
        if phys == current_cr3() {
            continue;
        }
        with_temp_mapping(phys, |p| unsafe {
            (&mut *(p as *mut Table)).0[di] = value;
        });
    }
}

fn current_cr3() -> u32 {
    VMM.lock().as_ref().unwrap().live
}

/// Adopt the boot page directory (already loaded in CR3) as directory #0.
pub fn init() {
    let live = unsafe { crate::machine::read_cr3() };
    let mut dirs = [None; MAX_DIRECTORIES];
    dirs[0] = Some(live);
    *VMM.lock() = Some(Vmm {
        directories: dirs,
        live,
    });
    raw_map(PD_SLOT, live, EntryFlags::PRESENT | EntryFlags::WRITABLE);
}

/// Map `vaddr` to `phys` with present+RW permissions (no user bit; callers
/// needing a user-accessible mapping use `virtual_map_user`).
pub fn virtual_map(vaddr: u32, phys: u32) {
    raw_map(vaddr, phys, EntryFlags::PRESENT | EntryFlags::WRITABLE);
    if dir_index(vaddr) >= KERNEL_DIR_INDEX {
        broadcast_kernel_entry(dir_index(vaddr));
    }
}

/// Map `vaddr` to `phys`, user-accessible (program address spaces).
pub fn virtual_map_user(vaddr: u32, phys: u32) {
    raw_map(
        vaddr,
        phys,
        EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER,
    );
    assert!(dir_index(vaddr) < KERNEL_DIR_INDEX, "vmm: user mapping in kernel range");
}

pub fn virtual_unmap(vaddr: u32) {
    raw_unmap(vaddr);
}

/// Walk the live directory; return the physical address for `vaddr`,
/// honoring the page offset.
pub fn to_physical(vaddr: u32) -> Option<u32> {
    unsafe {
        let dir = &*live_dir_ptr();
        let di = dir_index(vaddr);
        if !dir.0[di].is_present() {
            return None;
        }
        let pt_phys = dir.0[di].addr();
        with_temp_mapping(pt_phys, |p| {
            let table = &*(p as *const Table);
            let entry = table.0[tbl_index(vaddr)];
            if entry.is_present() {
                Some(entry.addr() | (vaddr & 0xFFF))
            } else {
                None
            }
        })
    }
}

/// Map `n` contiguous free pages in the kernel range starting at
/// `search_from`, returning the base virtual address.
fn find_contiguous_free(search_from: u32, search_to: u32, n: u32) -> Option<u32> {
    let mut run_start = search_from;
    let mut run_len = 0u32;
    let mut vaddr = search_from;
    while vaddr < search_to {
        if to_physical(vaddr).is_none() {
            if run_len == 0 {
                run_start = vaddr;
            }
            run_len += 1;
            if run_len == n {
                return Some(run_start);
            }
        } else {
            run_len = 0;
        }
        vaddr += PAGE_SIZE;
    }
    None
}

const KERNEL_RANGE_START: u32 = (KERNEL_DIR_INDEX as u32) << 22;
const KERNEL_RANGE_END: u32 = VMTEMP_VADDR;
const PROGRAM_RANGE_START: u32 = 0x0010_0000;
const PROGRAM_RANGE_END: u32 = KERNEL_RANGE_START;

/// Map `n` contiguous physical frames (starting at `phys`) into `n`
/// contiguous free kernel-range virtual pages; returns the base vaddr.
pub fn map_kernel(phys: u32, n: u32) -> Option<u32> {
    let base = find_contiguous_free(KERNEL_RANGE_START, KERNEL_RANGE_END, n)?;
    for i in 0..n {
        virtual_map(base + i * PAGE_SIZE, phys + i * PAGE_SIZE);
    }
    Some(base)
}

/// Map `n` contiguous physical frames into `n` contiguous free program-range
/// virtual pages of the live directory.
pub fn map_program(phys: u32, n: u32) -> Option<u32> {
    let base = find_contiguous_free(PROGRAM_RANGE_START, PROGRAM_RANGE_END, n)?;
    for i in 0..n {
        virtual_map_user(base + i * PAGE_SIZE, phys + i * PAGE_SIZE);
    }
    Some(base)
}

/// Allocate a frame, map it temporarily, zero it, then copy the kernel half
/// (768..1023) from the live directory so the new directory shares it.
pub fn allocate_page_directory() -> u32 {
    let phys = pfa::alloc_frame().expect("vmm: out of frames for page directory");

    with_temp_mapping(phys, |p| unsafe {
        core::ptr::write_bytes(p, 0, PAGE_SIZE as usize);
        let new_dir = &mut *(p as *mut Table);
        let live = &*live_dir_ptr();
        for i in KERNEL_DIR_INDEX..ENTRIES {
            new_dir.0[i] = live.0[i];
        }
    });

    let mut guard = VMM.lock();
    let vmm = guard.as_mut().unwrap();
    for slot in vmm.directories.iter_mut() {
        if slot.is_none() {
            *slot = Some(phys);
            break;
        }
    }

    phys
}

/// Free a page directory and its page tables below the kernel range
/// (used when a program exits). Frees only program-owned page-table
/// frames; kernel-half page tables are shared and never freed here.
pub fn free_page_directory(phys: u32) {
    with_temp_mapping(phys, |p| unsafe {
        let dir = &*(p as *const Table);
        for i in 0..KERNEL_DIR_INDEX {
            if dir.0[i].is_present() {
                pfa::free(dir.0[i].addr());
            }
        }
    });
    pfa::free(phys);

    let mut guard = VMM.lock();
    let vmm = guard.as_mut().unwrap();
    for slot in vmm.directories.iter_mut() {
        if *slot == Some(phys) {
            *slot = None;
        }
    }
}

/// Load `phys` into CR3 and rebind `PD_SLOT` so the kernel can keep editing
/// whichever directory is now live.
pub fn switch_page_directory(phys: u32) {
    {
        let mut guard = VMM.lock();
        guard.as_mut().unwrap().live = phys;
    }
    unsafe { crate::machine::write_cr3(phys) };
    raw_map(PD_SLOT, phys, EntryFlags::PRESENT | EntryFlags::WRITABLE);
    unsafe { crate::machine::invlpg(PD_SLOT) };
}

/// Print a diagnostic for `vaddr`, for use by page-fault handling.
pub fn print_diagnostic(vaddr: u32) {
    let di = dir_index(vaddr);
    let ti = tbl_index(vaddr);
    log::error!(
        "vmm: fault at {:#010x} (dir={}, tbl={}, phys={:?})",
        vaddr,
        di,
        ti,
        to_physical(vaddr)
    );
}
