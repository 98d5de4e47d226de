//! In-kernel integration test runner, built only with `--features ktest`.
//!
//! Plain unit tests (`#[cfg(test)] mod tests` scattered through the other
//! modules) cover pure logic, but several invariants only hold once paging,
//! the PFA, and the disk stack are actually live - there is no host to run
//! those against. This is a static array of `(name, fn())` run in order from
//! `kernel_main` instead of `loader::spawn_init`, reported over the serial
//! console rather than collected through a linker section or proc macro.

type TestFn = fn();

static TESTS: &[(&str, TestFn)] = &[
    ("pfa::alloc_then_free_frees_every_page", checks::pfa_alloc_then_free_frees_every_page),
    ("vmm::map_then_unmap_round_trips", checks::vmm_map_then_unmap_round_trips),
    ("volume::devfs_null_write_discards_bytes", checks::volume_devfs_null_write_discards_bytes),
];

/// Run every registered test in order, logging pass/fail for each, then
/// report a summary. Never returns - the caller (`kernel_main`) `hlt`s
/// after this instead of falling through to `loader::spawn_init`.
pub fn run_all() -> ! {
    log::info!("ktest: running {} test(s)", TESTS.len());
    for (name, test) in TESTS {
        log::info!("ktest: {} ...", name);
        test();
        log::info!("ktest: {} ... ok", name);
    }
    log::info!("ktest: {} passed", TESTS.len());
    loop {
        unsafe { crate::machine::hlt() };
    }
}

mod checks {
    use crate::memory::vmm;
    use crate::pfa;
    use crate::volume;

    pub fn pfa_alloc_then_free_frees_every_page() {
        let before = pfa::alloc(pfa::PAGE_SIZE, 0).expect("pfa has free pages at boot");
        pfa::free(before);
        let after = pfa::alloc(pfa::PAGE_SIZE, 0).expect("freed page is allocatable again");
        pfa::free(after);
    }

    pub fn vmm_map_then_unmap_round_trips() {
        let phys = pfa::alloc(pfa::PAGE_SIZE, 0).expect("pfa has free pages at boot");
        let vaddr = vmm::map_kernel(phys, 1).expect("kernel range has room for one page");
        assert_eq!(vmm::to_physical(vaddr), Some(phys));
        vmm::virtual_unmap(vaddr);
        assert_eq!(vmm::to_physical(vaddr), None);
        pfa::free(phys);
    }

    pub fn volume_devfs_null_write_discards_bytes() {
        let fd = volume::open(volume::DEVFS_VOLUME, "/null", volume::MODE_WRITE);
        assert!(fd >= 0, "devfs always has /null");
        assert_eq!(volume::write(fd, b"ktest"), 5);
        volume::close(fd);
    }
}
