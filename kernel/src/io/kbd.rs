//! PS/2 keyboard scan-code translation. Out of the core per the spec — the
//! core only sees this module through `poll()`, which backs the `POLL_KBD`
//! syscall. Kept here, buffered, rather than handed synchronously to a
//! blocked continuation: the core has no scheduler to block against.

use rs::ring::{ConstDefault, RingBuffer};

use crate::machine::inb;

/// Keyboard command/status port.
const KBD_CMD: u16 = 0x64;
/// Keyboard data port.
const KBD_DATA: u16 = 0x60;

const RELEASED: u8 = 0x80;

/// Named virtual keys, decoupled from the PS/2 scan-code set so a future
/// second keyboard (or scan-code set 2/3) only needs a new translation
/// table, not a new event shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VirtualKey {
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    Space,
    Escape,
    Return,
    Backspace,
    Tab,
    LShift,
    RShift,
    LCtrl,
    CapsLock,
    Unknown,
}

/// An edge-triggered key event, as delivered to `POLL_KBD`'s output struct.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct KeyboardEvent {
    pub vkey: VirtualKey,
    pub pressed: u8,
}

impl ConstDefault for KeyboardEvent {
    const DEFAULT: Self = KeyboardEvent {
        vkey: VirtualKey::Unknown,
        pressed: 0,
    };
}

const BUFFER_LEN: usize = 32;

static BUFFER: spin::Mutex<Option<RingBuffer<KeyboardEvent, BUFFER_LEN>>> = spin::Mutex::new(None);

static mut SHIFT: bool = false;
static mut CAPS: bool = false;

fn scancode_to_vkey(code: u8) -> Option<VirtualKey> {
    use VirtualKey::*;
    Some(match code {
        0x02 => Digit1,
        0x03 => Digit2,
        0x04 => Digit3,
        0x05 => Digit4,
        0x06 => Digit5,
        0x07 => Digit6,
        0x08 => Digit7,
        0x09 => Digit8,
        0x0a => Digit9,
        0x0b => Digit0,
        0x10 => Q,
        0x11 => W,
        0x12 => E,
        0x13 => R,
        0x14 => T,
        0x15 => Y,
        0x16 => U,
        0x17 => I,
        0x18 => O,
        0x19 => P,
        0x1e => A,
        0x1f => S,
        0x20 => D,
        0x21 => F,
        0x22 => G,
        0x23 => H,
        0x24 => J,
        0x25 => K,
        0x26 => L,
        0x2c => Z,
        0x2d => X,
        0x2e => C,
        0x2f => V,
        0x30 => B,
        0x31 => N,
        0x32 => M,
        0x39 => Space,
        0x1c => Return,
        0x0e => Backspace,
        0x0f => Tab,
        0x01 => Escape,
        0x2a | 0x36 => LShift,
        0x1d => LCtrl,
        0x3a => CapsLock,
        _ => return None,
    })
}

/// The keyboard interrupt handler. Reads exactly one scan code from the data
/// port and, if it maps to a known key, pushes an event into the buffer.
/// Must only run in response to IRQ1; calling it otherwise reads a byte the
/// controller never offered.
pub unsafe fn handler() {
    while inb(KBD_CMD) & 1 == 0 {}
    let code = inb(KBD_DATA);
    let pressed = code & RELEASED == 0;
    let raw = code & !RELEASED;

    if let Some(vkey) = scancode_to_vkey(raw) {
        match vkey {
            VirtualKey::LShift | VirtualKey::RShift => SHIFT = pressed,
            VirtualKey::CapsLock if pressed => CAPS = !CAPS,
            _ => {}
        }
        if let Some(buf) = BUFFER.lock().as_mut() {
            buf.push(KeyboardEvent {
                vkey,
                pressed: pressed as u8,
            });
        }
    }
}

/// Is Shift (physical shift xor caps-lock, for letters) currently active?
/// Exposed for the ASCII translation the command shell does from
/// `VirtualKey`.
pub fn shift_active() -> bool {
    unsafe { SHIFT ^ CAPS }
}

pub fn init() {
    *BUFFER.lock() = Some(RingBuffer::new());
}

/// Pop the oldest buffered event, if any. Backs the `POLL_KBD` syscall,
/// which reports 1 (event delivered) or 0 (buffer empty) to user space.
pub fn poll() -> Option<KeyboardEvent> {
    BUFFER.lock().as_mut().and_then(|b| b.pop())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scancodes_are_filtered() {
        assert!(scancode_to_vkey(0xff).is_none());
    }

    #[test]
    fn letter_scancodes_map_to_expected_vkey() {
        assert_eq!(scancode_to_vkey(0x1e), Some(VirtualKey::A));
        assert_eq!(scancode_to_vkey(0x32), Some(VirtualKey::M));
    }
}
