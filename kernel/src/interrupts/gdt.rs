//! Global Descriptor Table: the five flat segment descriptors (null, kernel
//! code, kernel data, user code, user data, all `0..0xFFFFFFFF`) plus the
//! TSS descriptor `tss::init` needs for ring-3 entry.
//!
//! Hand-rolled packed descriptor encoding, in the style of the kept
//! `tss.rs`, rather than a crate's typed GDT builder: the access-byte and
//! flags nibble are just bits, and this kernel only ever needs the same six
//! descriptors for its whole lifetime.

use crate::machine::lgdt;

pub const NULL_SEL: u16 = 0x00;
pub const KERNEL_CODE_SEL: u16 = 0x08;
pub const KERNEL_DATA_SEL: u16 = 0x10;
pub const USER_CODE_SEL: u16 = 0x18 | 3; // RPL 3
pub const USER_DATA_SEL: u16 = 0x20 | 3;
pub const TSS_SEL: u16 = 0x28;

const NUM_ENTRIES: usize = 6;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct Descriptor {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    flags_limit_high: u8,
    base_high: u8,
}

impl Descriptor {
    const fn null() -> Self {
        Descriptor {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            flags_limit_high: 0,
            base_high: 0,
        }
    }

    fn flat(access: u8, flags: u8) -> Self {
        Descriptor {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            flags_limit_high: 0xF | (flags << 4),
            base_high: 0,
        }
    }

    fn system(base: u32, limit: u32, access: u8) -> Self {
        Descriptor {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            flags_limit_high: ((limit >> 16) & 0xF) as u8,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, align(8))]
struct Table([Descriptor; NUM_ENTRIES]);

static mut GDT: Table = Table([Descriptor::null(); NUM_ENTRIES]);

// Access byte bits: present(7) dpl(6:5) s(4) type(3:0)
const PRESENT: u8 = 1 << 7;
const CODE_DATA: u8 = 1 << 4;
const EXECUTABLE: u8 = 1 << 3;
const RW: u8 = 1 << 1;
const DPL3: u8 = 3 << 5;
// flags: granularity(3) size(2)
const GRANULARITY_4K: u8 = 1 << 3;
const SIZE_32: u8 = 1 << 2;

pub fn init(tss_base: u32, tss_limit: u32) {
    unsafe {
        GDT.0[0] = Descriptor::null();
        GDT.0[1] = Descriptor::flat(
            PRESENT | CODE_DATA | EXECUTABLE | RW,
            GRANULARITY_4K | SIZE_32,
        );
        GDT.0[2] = Descriptor::flat(PRESENT | CODE_DATA | RW, GRANULARITY_4K | SIZE_32);
        GDT.0[3] = Descriptor::flat(
            PRESENT | DPL3 | CODE_DATA | EXECUTABLE | RW,
            GRANULARITY_4K | SIZE_32,
        );
        GDT.0[4] = Descriptor::flat(PRESENT | DPL3 | CODE_DATA | RW, GRANULARITY_4K | SIZE_32);
        // 32-bit TSS, present, DPL0.
        GDT.0[5] = Descriptor::system(tss_base, tss_limit, PRESENT | 0x09);

        let base = &GDT as *const _ as u32;
        let limit = (core::mem::size_of::<Table>() - 1) as u16;
        lgdt(base, limit);

        reload_segments();
    }
}

/// Reload CS via a far jump and the data segment registers directly, so the
/// CPU picks up the new GDT's selectors.
unsafe fn reload_segments() {
    asm!{
        "ljmp $$0x08, $$1f
         1:
         movw $$0x10, %ax
         movw %ax, %ds
         movw %ax, %es
         movw %ax, %fs
         movw %ax, %gs
         movw %ax, %ss"
        :::: "volatile"
    };
}
