//! Ubertooth USB report framing.
//!
//! Every report starts with a 14-byte header. BLE packets (`LE_PACKET`)
//! carry their own length byte at offset 19, and the decoder trims the
//! (padded) USB buffer to the real frame size before parsing. Promiscuous
//! reports (`LE_PROMISC`) carry one recovered connection parameter each.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::dissector::{DecodeError, Dissect, require_len};
use crate::protocol::ble::check_crc24;

/// Report header size.
pub const HEADER_SIZE: usize = 14;

/// Offset of the BLE length byte in an `LE_PACKET` report.
pub const LE_LENGTH_OFFSET: usize = HEADER_SIZE + 5;

/// Access address (4) + LL header (2) + CRC (3).
const LE_OVERHEAD: usize = 4 + 2 + 3;

/// USB report size returned by the firmware.
pub const REPORT_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    BrPacket = 0x00,
    LePacket = 0x01,
    Message = 0x02,
    KeepAlive = 0x03,
    Specan = 0x04,
    LePromisc = 0x05,
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => PacketType::BrPacket,
            0x01 => PacketType::LePacket,
            0x02 => PacketType::Message,
            0x03 => PacketType::KeepAlive,
            0x04 => PacketType::Specan,
            0x05 => PacketType::LePromisc,
            other => {
                return Err(DecodeError::UnknownType {
                    field: "ubertooth packet type",
                    value: other as u16,
                });
            }
        })
    }
}

/// Fixed report header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UbertoothHeader {
    pub packet_type: PacketType,
    pub status: u8,
    pub channel: u8,
    pub clkn_high: u8,
    pub clk100ns: u32,
    pub rssi_max: i8,
    pub rssi_min: i8,
    pub rssi_avg: i8,
    pub rssi_count: u8,
}

impl UbertoothHeader {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            status: 0,
            channel: 0,
            clkn_high: 0,
            clk100ns: 0,
            rssi_max: 0,
            rssi_min: 0,
            rssi_avg: 0,
            rssi_count: 0,
        }
    }

    fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        require_len(data, HEADER_SIZE)?;
        let mut cursor = Cursor::new(data);
        let packet_type = PacketType::try_from(cursor.read_u8()?)?;
        Ok(Self {
            packet_type,
            status: cursor.read_u8()?,
            channel: cursor.read_u8()?,
            clkn_high: cursor.read_u8()?,
            clk100ns: cursor.read_u32::<LittleEndian>()?,
            rssi_max: cursor.read_i8()?,
            rssi_min: cursor.read_i8()?,
            rssi_avg: cursor.read_i8()?,
            rssi_count: cursor.read_u8()?,
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.push(self.packet_type as u8);
        buf.push(self.status);
        buf.push(self.channel);
        buf.push(self.clkn_high);
        buf.extend_from_slice(&self.clk100ns.to_le_bytes());
        buf.push(self.rssi_max as u8);
        buf.push(self.rssi_min as u8);
        buf.push(self.rssi_avg as u8);
        buf.push(self.rssi_count);
        // reserved
        buf.extend_from_slice(&[0, 0]);
    }
}

/// BLE frame captured by the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LePacket {
    pub access_address: u32,
    /// LL header and payload.
    pub pdu: Vec<u8>,
    /// CRC as received (3 bytes, little-endian).
    pub crc: u32,
}

impl LePacket {
    pub fn length(&self) -> u8 {
        self.pdu.get(1).copied().unwrap_or(0)
    }

    pub fn crc_matches(&self, crc_init: u32) -> bool {
        check_crc24(crc_init, &self.pdu, &self.crc.to_le_bytes()[..3])
    }
}

/// Connection parameter recovered in promiscuous mode, keyed by `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiscuousReport {
    AccessAddress(u32),
    CrcInit(u32),
    HopInterval(u16),
    HopIncrement(u8),
}

impl PromiscuousReport {
    fn state(&self) -> u8 {
        match self {
            PromiscuousReport::AccessAddress(_) => 0,
            PromiscuousReport::CrcInit(_) => 1,
            PromiscuousReport::HopInterval(_) => 2,
            PromiscuousReport::HopIncrement(_) => 3,
        }
    }

    fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        require_len(data, 1)?;
        let mut cursor = Cursor::new(&data[1..]);
        Ok(match data[0] {
            0 => PromiscuousReport::AccessAddress(cursor.read_u32::<LittleEndian>()?),
            1 => PromiscuousReport::CrcInit(cursor.read_u24::<LittleEndian>()?),
            2 => PromiscuousReport::HopInterval(cursor.read_u16::<LittleEndian>()?),
            3 => PromiscuousReport::HopIncrement(cursor.read_u8()?),
            other => {
                return Err(DecodeError::UnknownType {
                    field: "promiscuous state",
                    value: other as u16,
                });
            }
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.push(self.state());
        match *self {
            PromiscuousReport::AccessAddress(aa) => buf.extend_from_slice(&aa.to_le_bytes()),
            PromiscuousReport::CrcInit(crc) => {
                buf.extend_from_slice(&(crc & 0xFF_FFFF).to_le_bytes()[..3])
            }
            PromiscuousReport::HopInterval(v) => buf.extend_from_slice(&v.to_le_bytes()),
            PromiscuousReport::HopIncrement(v) => buf.push(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UbertoothPayload {
    Le(LePacket),
    Promiscuous(PromiscuousReport),
    Other(Vec<u8>),
}

/// One decoded USB report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UbertoothFrame {
    pub header: UbertoothHeader,
    pub payload: UbertoothPayload,
}

impl UbertoothFrame {
    pub fn le_packet(&self) -> Option<&LePacket> {
        match &self.payload {
            UbertoothPayload::Le(pkt) => Some(pkt),
            _ => None,
        }
    }

    pub fn promiscuous_report(&self) -> Option<PromiscuousReport> {
        match &self.payload {
            UbertoothPayload::Promiscuous(report) => Some(*report),
            _ => None,
        }
    }
}

/// Real frame size of an `LE_PACKET` report, read from its length byte.
pub fn le_frame_len(data: &[u8]) -> Result<usize, DecodeError> {
    require_len(data, LE_LENGTH_OFFSET + 1)?;
    Ok(HEADER_SIZE + LE_OVERHEAD + data[LE_LENGTH_OFFSET] as usize)
}

impl Dissect for UbertoothFrame {
    fn dissect(data: &[u8]) -> Result<Self, DecodeError> {
        let header = UbertoothHeader::parse(data)?;
        let payload = match header.packet_type {
            PacketType::LePacket => {
                let total = le_frame_len(data)?;
                require_len(data, total)?;
                let frame = &data[HEADER_SIZE..total];
                let mut cursor = Cursor::new(frame);
                let access_address = cursor.read_u32::<LittleEndian>()?;
                let pdu = frame[4..frame.len() - 3].to_vec();
                let mut crc_cursor = Cursor::new(&frame[frame.len() - 3..]);
                let crc = crc_cursor.read_u24::<LittleEndian>()?;
                UbertoothPayload::Le(LePacket {
                    access_address,
                    pdu,
                    crc,
                })
            }
            PacketType::LePromisc => {
                UbertoothPayload::Promiscuous(PromiscuousReport::parse(&data[HEADER_SIZE..])?)
            }
            _ => UbertoothPayload::Other(data[HEADER_SIZE..].to_vec()),
        };
        Ok(Self { header, payload })
    }

    fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REPORT_SIZE);
        self.header.write(&mut buf);
        match &self.payload {
            UbertoothPayload::Le(pkt) => {
                buf.extend_from_slice(&pkt.access_address.to_le_bytes());
                buf.extend_from_slice(&pkt.pdu);
                buf.extend_from_slice(&(pkt.crc & 0xFF_FFFF).to_le_bytes()[..3]);
            }
            UbertoothPayload::Promiscuous(report) => report.write(&mut buf),
            UbertoothPayload::Other(raw) => buf.extend_from_slice(raw),
        }
        buf
    }
}
