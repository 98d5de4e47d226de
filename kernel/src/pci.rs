//! PCI configuration-space access and bus enumeration. The core only cares
//! about mass-storage (class 0x01) controllers; `disk::ata` calls
//! `for_each_device` and filters for the IDE subclass itself rather than
//! this module hard-coding IDE knowledge.

use crate::machine::{inl, outl};

const CONFIG_ADDRESS: u16 = 0xCF8;
const CONFIG_DATA: u16 = 0xCFC;

/// (bus, slot, function) — identifies one PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub bus: u8,
    pub slot: u8,
    pub func: u8,
}

impl Address {
    fn config_addr(self, offset: u8) -> u32 {
        0x8000_0000
            | ((self.bus as u32) << 16)
            | ((self.slot as u32) << 11)
            | ((self.func as u32) << 8)
            | ((offset as u32) & 0xFC)
    }
}

fn read_cfg32(addr: Address, offset: u8) -> u32 {
    unsafe {
        outl(CONFIG_ADDRESS, addr.config_addr(offset));
        inl(CONFIG_DATA)
    }
}

/// A function discovered during enumeration, identified and classified.
#[derive(Debug, Clone, Copy)]
pub struct Device {
    pub address: Address,
    pub vendor: u16,
    pub device: u16,
    pub class: u8,
    pub subclass: u8,
}

fn probe(addr: Address) -> Option<Device> {
    let id = read_cfg32(addr, 0x00);
    let vendor = (id & 0xFFFF) as u16;
    if vendor == 0xFFFF {
        return None;
    }
    let device = (id >> 16) as u16;

    let class_reg = read_cfg32(addr, 0x08);
    let subclass = ((class_reg >> 16) & 0xFF) as u8;
    let class = ((class_reg >> 24) & 0xFF) as u8;

    Some(Device {
        address: addr,
        vendor,
        device,
        class,
        subclass,
    })
}

/// Walk every (bus, slot, function) triple and invoke `f` for each present
/// device. A full 256x32x8 scan; PCI gives no cheaper way to discover
/// multifunction devices without reading the header-type byte, and scanning
/// unconditionally is simpler and still fast enough at boot.
pub fn for_each_device(mut f: impl FnMut(Device)) {
    for bus in 0..=255u16 {
        for slot in 0..32u8 {
            for func in 0..8u8 {
                let addr = Address {
                    bus: bus as u8,
                    slot,
                    func,
                };
                if let Some(dev) = probe(addr) {
                    log::info!(
                        "pci {:02x}:{:02x}.{} vendor={:04x} device={:04x} class={:02x}:{:02x}",
                        addr.bus,
                        addr.slot,
                        addr.func,
                        dev.vendor,
                        dev.device,
                        dev.class,
                        dev.subclass
                    );
                    f(dev);
                }
            }
        }
    }
}
