//! Mosart 2.4GHz HID framing.
//!
//! Plaintext layout, as held by [`MosartFrame`]:
//!
//! ```text
//! F0 F0 | address (4) | type << 4 | seq | payload
//! ```
//!
//! On the air every byte after the preamble is XORed with `0x5A`, followed by
//! a CRC-16 (poly 0x1021, init 0xFFFF, big-endian) over the whitened bytes and
//! a `0xA5` terminator.

use tracing::warn;

use crate::dissector::{DecodeError, Dissect, require_len};
use crate::protocol::keymap::{KeyLookup, MosartKeymap, is_mouse_button};

pub const PREAMBLE: u16 = 0xF0F0;
pub const PREAMBLE_BYTES: [u8; 2] = [0xF0, 0xF0];
pub const WHITENING_KEY: u8 = 0x5A;
pub const TERMINATOR: u8 = 0xA5;
pub const ADDRESS_SIZE: usize = 4;
pub const CRC_SIZE: usize = 2;

/// Marker observed in a dongle sync payload, used to pace synchronized injection.
pub const SYNC_MARKER: [u8; 2] = [0x4B, 0x78];

pub const STATE_PRESSED: u8 = 0x81;
pub const STATE_RELEASED: u8 = 0x01;

const CRC_POLY: u16 = 0x1021;
const CRC_TABLE: [u16; 256] = crc_table();

const fn crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Table-driven CRC-16/CCITT-FALSE.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[((crc >> 8) as u8 ^ byte) as usize]
    })
}

pub fn whiten(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b ^ WHITENING_KEY).collect()
}

/// Whitening is an involution.
pub fn dewhiten(data: &[u8]) -> Vec<u8> {
    whiten(data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    DongleSync = 0x1,
    MouseMovement = 0x4,
    Action = 0x7,
}

impl FrameType {
    pub fn payload_len(self) -> usize {
        match self {
            FrameType::DongleSync => 1,
            FrameType::MouseMovement => 4,
            FrameType::Action => 2,
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x1 => Ok(FrameType::DongleSync),
            0x4 => Ok(FrameType::MouseMovement),
            0x7 => Ok(FrameType::Action),
            other => Err(DecodeError::UnknownType {
                field: "mosart frame type",
                value: other as u16,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MosartPayload {
    DongleSync { value: u8 },
    MouseMovement { x1: i8, y1: i8, x2: i8, y2: i8 },
    Action { state: u8, code: u8 },
}

impl MosartPayload {
    pub fn frame_type(&self) -> FrameType {
        match self {
            MosartPayload::DongleSync { .. } => FrameType::DongleSync,
            MosartPayload::MouseMovement { .. } => FrameType::MouseMovement,
            MosartPayload::Action { .. } => FrameType::Action,
        }
    }

    fn parse(frame_type: FrameType, data: &[u8]) -> Result<Self, DecodeError> {
        require_len(data, frame_type.payload_len())?;
        Ok(match frame_type {
            FrameType::DongleSync => MosartPayload::DongleSync { value: data[0] },
            FrameType::MouseMovement => MosartPayload::MouseMovement {
                x1: data[0] as i8,
                y1: data[1] as i8,
                x2: data[2] as i8,
                y2: data[3] as i8,
            },
            FrameType::Action => MosartPayload::Action {
                state: data[0],
                code: data[1],
            },
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match *self {
            MosartPayload::DongleSync { value } => buf.push(value),
            MosartPayload::MouseMovement { x1, y1, x2, y2 } => {
                buf.extend_from_slice(&[x1 as u8, y1 as u8, x2 as u8, y2 as u8])
            }
            MosartPayload::Action { state, code } => buf.extend_from_slice(&[state, code]),
        }
    }
}

/// A plaintext Mosart frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosartFrame {
    pub address: [u8; ADDRESS_SIZE],
    /// Low nibble only.
    pub sequence: u8,
    pub payload: MosartPayload,
}

impl MosartFrame {
    pub fn new(address: [u8; ADDRESS_SIZE], sequence: u8, payload: MosartPayload) -> Self {
        Self {
            address,
            sequence: sequence & 0x0F,
            payload,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.payload.frame_type()
    }

    /// Address + type/sequence + payload.
    fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(ADDRESS_SIZE + 1 + 4);
        body.extend_from_slice(&self.address);
        body.push(((self.frame_type() as u8) << 4) | (self.sequence & 0x0F));
        self.payload.write(&mut body);
        body
    }

    /// Action frame decoded through the built-in keymap.
    pub fn action(&self) -> Option<MosartAction> {
        match self.payload {
            MosartPayload::Action { state, code } => {
                Some(MosartAction::from_raw(state, code, &MosartKeymap::builtin()))
            }
            _ => None,
        }
    }

    pub fn is_dongle_sync(&self) -> bool {
        self.frame_type() == FrameType::DongleSync
    }

    /// Whitened, CRC-protected frame without terminator.
    pub fn encode_wire(&self) -> Vec<u8> {
        let whitened = whiten(&self.body());
        let crc = crc16(&whitened);
        let mut out = Vec::with_capacity(2 + whitened.len() + CRC_SIZE);
        out.extend_from_slice(&PREAMBLE_BYTES);
        out.extend_from_slice(&whitened);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    /// Bytes handed to the radio for transmission.
    pub fn to_air(&self) -> Vec<u8> {
        let mut out = self.encode_wire();
        out.push(TERMINATOR);
        out
    }
}

impl Dissect for MosartFrame {
    fn dissect(data: &[u8]) -> Result<Self, DecodeError> {
        require_len(data, 2 + ADDRESS_SIZE + 1)?;
        check_preamble(data)?;
        let mut address = [0u8; ADDRESS_SIZE];
        address.copy_from_slice(&data[2..2 + ADDRESS_SIZE]);
        let type_seq = data[2 + ADDRESS_SIZE];
        let frame_type = FrameType::try_from(type_seq >> 4)?;
        let payload = MosartPayload::parse(frame_type, &data[2 + ADDRESS_SIZE + 1..])?;
        Ok(Self {
            address,
            sequence: type_seq & 0x0F,
            payload,
        })
    }

    fn build(&self) -> Vec<u8> {
        let mut out = PREAMBLE_BYTES.to_vec();
        out.extend_from_slice(&self.body());
        out
    }
}

fn check_preamble(data: &[u8]) -> Result<(), DecodeError> {
    let actual = u16::from_be_bytes([data[0], data[1]]);
    if actual != PREAMBLE {
        return Err(DecodeError::InvalidPreamble {
            expected: PREAMBLE,
            actual,
        });
    }
    Ok(())
}

/// Length of the on-air frame starting at `data[0]` (terminator excluded).
pub fn wire_len(data: &[u8]) -> Result<usize, DecodeError> {
    require_len(data, 2 + ADDRESS_SIZE + 1)?;
    let type_seq = data[2 + ADDRESS_SIZE] ^ WHITENING_KEY;
    let frame_type = FrameType::try_from(type_seq >> 4)?;
    Ok(2 + ADDRESS_SIZE + 1 + frame_type.payload_len() + CRC_SIZE)
}

/// Decode an on-air frame starting at `data[0]`. Trailing bytes are ignored.
pub fn decode_wire(data: &[u8]) -> Result<MosartFrame, DecodeError> {
    require_len(data, 2)?;
    check_preamble(data)?;
    let total = wire_len(data)?;
    require_len(data, total)?;

    let whitened = &data[2..total - CRC_SIZE];
    let expected = u16::from_be_bytes([data[total - 2], data[total - 1]]);
    let computed = crc16(whitened);
    if expected != computed {
        return Err(DecodeError::CrcMismatch {
            expected: expected as u32,
            computed: computed as u32,
        });
    }

    let mut plain = PREAMBLE_BYTES.to_vec();
    plain.extend_from_slice(&dewhiten(whitened));
    MosartFrame::dissect(&plain)
}

/// Find the first offset at which a valid frame starts.
///
/// The radio does not delimit frames in promiscuous mode, so leading bytes
/// are dropped one at a time until a frame decodes with a matching CRC.
pub fn resync(buf: &[u8]) -> Option<(usize, MosartFrame)> {
    (0..buf.len()).find_map(|offset| decode_wire(&buf[offset..]).ok().map(|f| (offset, f)))
}

/// True if `data` contains the dongle sync marker.
pub fn contains_sync_marker(data: &[u8]) -> bool {
    data.windows(SYNC_MARKER.len()).any(|w| w == SYNC_MARKER)
}

/// Keystroke carried in an action frame payload (`state`, `code`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosartKeystroke {
    pub hid_code: Option<u8>,
    pub modifiers: Option<u8>,
    pub pressed: bool,
}

impl MosartKeystroke {
    pub fn new(hid_code: u8, modifiers: u8) -> Self {
        Self {
            hid_code: Some(hid_code),
            modifiers: Some(modifiers),
            pressed: true,
        }
    }

    pub fn released(mut self) -> Self {
        self.pressed = false;
        self
    }

    pub fn from_raw(state: u8, code: u8, keymap: &dyn KeyLookup) -> Self {
        let (hid_code, modifiers) = keymap.to_hid(code);
        Self {
            hid_code,
            modifiers,
            pressed: state == STATE_PRESSED,
        }
    }

    /// Mosart code, `None` when the key has no mapping.
    pub fn code(&self, keymap: &dyn KeyLookup) -> Option<u8> {
        keymap.to_mosart(self.hid_code?, self.modifiers.unwrap_or(0))
    }

    pub fn state(&self) -> u8 {
        if self.pressed { STATE_PRESSED } else { STATE_RELEASED }
    }

    pub fn to_payload(&self, keymap: &dyn KeyLookup) -> Option<MosartPayload> {
        Some(MosartPayload::Action {
            state: self.state(),
            code: self.code(keymap)?,
        })
    }
}

impl Dissect for MosartKeystroke {
    fn dissect(data: &[u8]) -> Result<Self, DecodeError> {
        require_len(data, 2)?;
        Ok(Self::from_raw(data[0], data[1], &MosartKeymap::builtin()))
    }

    /// A key with no Mosart mapping is written as code `0x00`, which carries
    /// no key. Use [`MosartKeystroke::to_payload`] to reject it instead.
    fn build(&self) -> Vec<u8> {
        let code = self.code(&MosartKeymap::builtin()).unwrap_or_else(|| {
            warn!(
                hid_code = ?self.hid_code,
                modifiers = ?self.modifiers,
                "No Mosart code for key, writing 0x00"
            );
            0
        });
        vec![self.state(), code]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MosartAction {
    Keystroke(MosartKeystroke),
    MouseClick { button: u8, pressed: bool },
}

impl MosartAction {
    pub fn from_raw(state: u8, code: u8, keymap: &dyn KeyLookup) -> Self {
        if is_mouse_button(code) {
            MosartAction::MouseClick {
                button: code,
                pressed: state == STATE_PRESSED,
            }
        } else {
            MosartAction::Keystroke(MosartKeystroke::from_raw(state, code, keymap))
        }
    }
}
