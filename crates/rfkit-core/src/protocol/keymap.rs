//! Mosart key code lookup.
//!
//! Mosart keyboards send one code per key (modifier keys included). The
//! lookup translates between that code and a HID usage / modifier pair.

/// Left/right modifier bits in HID order.
pub mod modifier {
    pub const LEFT_CTRL: u8 = 0x01;
    pub const LEFT_SHIFT: u8 = 0x02;
    pub const LEFT_ALT: u8 = 0x04;
    pub const LEFT_GUI: u8 = 0x08;
    pub const RIGHT_CTRL: u8 = 0x10;
    pub const RIGHT_SHIFT: u8 = 0x20;
    pub const RIGHT_ALT: u8 = 0x40;
    pub const RIGHT_GUI: u8 = 0x80;
}

/// Bidirectional key code lookup service.
pub trait KeyLookup: Send + Sync {
    /// Mosart code to `(hid_code, modifiers)`. Unknown codes give `(None, None)`.
    fn to_hid(&self, code: u8) -> (Option<u8>, Option<u8>);

    /// HID usage (or a bare modifier with `hid_code == 0`) to Mosart code.
    fn to_mosart(&self, hid_code: u8, modifiers: u8) -> Option<u8>;
}

/// (mosart code, hid code, modifiers)
type Entry = (u8, u8, u8);

#[rustfmt::skip]
const BUILTIN: &[Entry] = &[
    // letters
    (0x29, 0x04, 0), (0x2D, 0x05, 0), (0x2B, 0x06, 0), (0x2A, 0x07, 0),
    (0x22, 0x08, 0), (0x32, 0x09, 0), (0x33, 0x0A, 0), (0x35, 0x0B, 0),
    (0x44, 0x0C, 0), (0x36, 0x0D, 0), (0x3A, 0x0E, 0), (0x4A, 0x0F, 0),
    (0x3D, 0x10, 0), (0x3C, 0x11, 0), (0x45, 0x12, 0), (0x4D, 0x13, 0),
    (0x21, 0x14, 0), (0x23, 0x15, 0), (0x1A, 0x16, 0), (0x24, 0x17, 0),
    (0x25, 0x18, 0), (0x2C, 0x19, 0), (0x1E, 0x1A, 0), (0x1B, 0x1B, 0),
    (0x26, 0x1C, 0), (0x1C, 0x1D, 0),
    // 1..9, 0
    (0x11, 0x1E, 0), (0x12, 0x1F, 0), (0x13, 0x20, 0), (0x14, 0x21, 0),
    (0x15, 0x22, 0), (0x16, 0x23, 0), (0x17, 0x24, 0), (0x18, 0x25, 0),
    (0x19, 0x26, 0), (0x10, 0x27, 0),
    // enter, escape, backspace, tab, space, minus, equal
    (0x4E, 0x28, 0), (0x01, 0x29, 0), (0x4F, 0x2A, 0), (0x09, 0x2B, 0),
    (0x5D, 0x2C, 0), (0x1F, 0x2D, 0), (0x20, 0x2E, 0),
    // arrows: right, left, down, up
    (0x5F, 0x4F, 0), (0x5E, 0x50, 0), (0x5C, 0x51, 0), (0x5B, 0x52, 0),
    // F1..F12
    (0x61, 0x3A, 0), (0x62, 0x3B, 0), (0x63, 0x3C, 0), (0x64, 0x3D, 0),
    (0x65, 0x3E, 0), (0x66, 0x3F, 0), (0x67, 0x40, 0), (0x68, 0x41, 0),
    (0x69, 0x42, 0), (0x6A, 0x43, 0), (0x6B, 0x44, 0), (0x6C, 0x45, 0),
    // modifiers
    (0x07, 0x00, modifier::LEFT_CTRL), (0x0E, 0x00, modifier::LEFT_SHIFT),
    (0x0F, 0x00, modifier::LEFT_ALT), (0x6D, 0x00, modifier::LEFT_GUI),
    (0x6E, 0x00, modifier::RIGHT_CTRL), (0x6F, 0x00, modifier::RIGHT_SHIFT),
    (0x70, 0x00, modifier::RIGHT_ALT), (0x71, 0x00, modifier::RIGHT_GUI),
];

/// Mouse button codes carried by action frames.
pub const MOUSE_BUTTON_LEFT: u8 = 0xA0;
pub const MOUSE_BUTTON_RIGHT: u8 = 0xA1;
pub const MOUSE_BUTTON_MIDDLE: u8 = 0xA2;

pub fn is_mouse_button(code: u8) -> bool {
    matches!(code, MOUSE_BUTTON_LEFT | MOUSE_BUTTON_RIGHT | MOUSE_BUTTON_MIDDLE)
}

/// Table-backed [`KeyLookup`].
#[derive(Debug, Clone, Copy)]
pub struct MosartKeymap {
    entries: &'static [Entry],
}

impl MosartKeymap {
    pub const fn builtin() -> Self {
        Self { entries: BUILTIN }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MosartKeymap {
    fn default() -> Self {
        Self::builtin()
    }
}

impl KeyLookup for MosartKeymap {
    fn to_hid(&self, code: u8) -> (Option<u8>, Option<u8>) {
        self.entries
            .iter()
            .find(|(c, _, _)| *c == code)
            .map_or((None, None), |(_, hid, mods)| (Some(*hid), Some(*mods)))
    }

    fn to_mosart(&self, hid_code: u8, modifiers: u8) -> Option<u8> {
        if hid_code == 0 {
            // Bare modifier press.
            return self
                .entries
                .iter()
                .find(|(_, hid, mods)| *hid == 0 && *mods == modifiers)
                .map(|(c, _, _)| *c);
        }
        self.entries
            .iter()
            .find(|(_, hid, _)| *hid == hid_code)
            .map(|(c, _, _)| *c)
    }
}
