//! Minimal VGA text-mode console output. A collaborator, not core: `devfs`'s
//! `vga` file is the only caller.

const VGA_BASE: usize = 0xB8000;
const COLUMNS: usize = 80;
const ROWS: usize = 25;
const ATTR: u8 = 0x07; // light grey on black

static CURSOR: spin::Mutex<usize> = spin::Mutex::new(0);

fn cell(offset: usize) -> *mut u8 {
    (VGA_BASE + offset * 2) as *mut u8
}

/// Write one byte to the framebuffer at the shared cursor position,
/// advancing it (with wraparound) and honoring `\n`. No scrolling: past the
/// last cell the cursor wraps back to the top, overwriting old output.
pub fn put_char(byte: u8) {
    let mut cursor = CURSOR.lock();
    if byte == b'\n' {
        *cursor = (*cursor / COLUMNS + 1) * COLUMNS % (COLUMNS * ROWS);
        return;
    }
    unsafe {
        cell(*cursor).write_volatile(byte);
        cell(*cursor).add(1).write_volatile(ATTR);
    }
    *cursor = (*cursor + 1) % (COLUMNS * ROWS);
}
