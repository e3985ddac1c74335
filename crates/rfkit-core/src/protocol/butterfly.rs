//! ButteRFly USB message framing.
//!
//! ```text
//! | 5A 17 | type | ... type specific ... |
//!   command / response : command_type (u16 LE) | body
//!   packet             : packet_type (u8) | packet fields
//!   notification       : notification_type (u8) | notification fields
//! ```
//!
//! A response answers the command whose bytes 3..5 (the command type) it
//! repeats.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::dissector::{DecodeError, Dissect, require_len};

pub const PREAMBLE: u16 = 0x5A17;

/// Byte range used to pair a response with its command.
pub const TRANSACTION_TAG: std::ops::Range<usize> = 3..5;

pub const MESSAGE_COMMAND: u8 = 0x01;
pub const MESSAGE_RESPONSE: u8 = 0x02;
pub const MESSAGE_PACKET: u8 = 0x03;
pub const MESSAGE_NOTIFICATION: u8 = 0x04;

pub const PACKET_BLE: u8 = 0x01;

macro_rules! u16_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<u16> for $name {
            type Error = DecodeError;

            fn try_from(value: u16) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(DecodeError::UnknownType { field: $field, value: other }),
                }
            }
        }
    };
}

u16_enum!(
    /// Command set understood by the firmware.
    CommandType, "command type" {
        GetVersion = 0x0001,
        GetController = 0x0002,
        SelectController = 0x0003,
        EnableController = 0x0004,
        DisableController = 0x0005,
        GetChannel = 0x0006,
        SetChannel = 0x0007,
        SetFilter = 0x0008,
        SetFollowMode = 0x0009,
        StartAttack = 0x000A,
        SendPayload = 0x000B,
        SetReactiveJammer = 0x000C,
        StartExistingConnectionSniffing = 0x000D,
        SetAccessAddress = 0x000E,
        SetCrcInit = 0x000F,
        SetChannelMap = 0x0010,
        SetHopInterval = 0x0011,
    }
);

u16_enum!(
    /// Radio controller selected with SELECT_CONTROLLER.
    Controller, "controller" {
        Ble = 0x0000,
    }
);

/// Origin of a captured BLE frame on a followed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketSource {
    General = 0x00,
    Master = 0x01,
    Slave = 0x02,
}

impl TryFrom<u8> for PacketSource {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PacketSource::General),
            0x01 => Ok(PacketSource::Master),
            0x02 => Ok(PacketSource::Slave),
            other => Err(DecodeError::UnknownType {
                field: "packet source",
                value: other as u16,
            }),
        }
    }
}

/// Attack requested with START_ATTACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttackCode {
    None = 0x00,
    Injection = 0x01,
    SlaveHijacking = 0x02,
    MasterHijacking = 0x03,
    Mitm = 0x04,
}

/// Status carried by a Connection_Report notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Started = 0x00,
    Lost = 0x01,
    AttackStarted = 0x02,
    AttackSuccess = 0x03,
    AttackFailure = 0x04,
}

impl TryFrom<u8> for ConnectionStatus {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => ConnectionStatus::Started,
            0x01 => ConnectionStatus::Lost,
            0x02 => ConnectionStatus::AttackStarted,
            0x03 => ConnectionStatus::AttackSuccess,
            0x04 => ConnectionStatus::AttackFailure,
            other => {
                return Err(DecodeError::UnknownType {
                    field: "connection status",
                    value: other as u16,
                });
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub command_type: CommandType,
    pub body: Vec<u8>,
}

impl Command {
    pub fn new(command_type: CommandType) -> Self {
        Self {
            command_type,
            body: Vec::new(),
        }
    }

    pub fn with_body(command_type: CommandType, body: Vec<u8>) -> Self {
        Self { command_type, body }
    }

    pub fn select_controller(controller: Controller) -> Self {
        Self::with_body(
            CommandType::SelectController,
            (controller as u16).to_le_bytes().to_vec(),
        )
    }

    pub fn set_channel(channel: u8) -> Self {
        Self::with_body(CommandType::SetChannel, vec![channel])
    }

    /// Address filter; an all-zero address with `enabled = false` clears it.
    pub fn set_filter(address_air: [u8; 6], enabled: bool) -> Self {
        let mut body = address_air.to_vec();
        body.push(enabled as u8);
        Self::with_body(CommandType::SetFilter, body)
    }

    pub fn set_follow_mode(follow: bool) -> Self {
        Self::with_body(CommandType::SetFollowMode, vec![follow as u8])
    }

    pub fn start_attack(attack: AttackCode) -> Self {
        Self::with_body(CommandType::StartAttack, vec![attack as u8])
    }

    pub fn send_payload(source: PacketSource, pdu: &[u8]) -> Self {
        let mut body = Vec::with_capacity(pdu.len() + 1);
        body.push(source as u8);
        body.extend_from_slice(pdu);
        Self::with_body(CommandType::SendPayload, body)
    }

    pub fn set_reactive_jammer(offset: u8, pattern: &[u8]) -> Self {
        let mut body = vec![offset, pattern.len() as u8];
        body.extend_from_slice(pattern);
        Self::with_body(CommandType::SetReactiveJammer, body)
    }

    pub fn set_access_address(aa: u32) -> Self {
        Self::with_body(CommandType::SetAccessAddress, aa.to_le_bytes().to_vec())
    }

    pub fn set_crc_init(crc_init: u32) -> Self {
        Self::with_body(
            CommandType::SetCrcInit,
            (crc_init & 0xFF_FFFF).to_le_bytes()[..3].to_vec(),
        )
    }

    pub fn set_channel_map(channel_map: u64) -> Self {
        Self::with_body(
            CommandType::SetChannelMap,
            channel_map.to_le_bytes()[..5].to_vec(),
        )
    }

    pub fn set_hop_interval(hop_interval: u16) -> Self {
        Self::with_body(CommandType::SetHopInterval, hop_interval.to_le_bytes().to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub command_type: CommandType,
    pub body: Vec<u8>,
}

impl Response {
    /// Firmware version as (major, minor) for GET_VERSION responses.
    pub fn version(&self) -> Option<(u8, u8)> {
        match (self.command_type, self.body.as_slice()) {
            (CommandType::GetVersion, [major, minor, ..]) => Some((*major, *minor)),
            _ => None,
        }
    }

    /// Status byte, 0x00 meaning success.
    pub fn succeeded(&self) -> bool {
        self.body.first().is_none_or(|status| *status == 0x00)
    }
}

/// BLE frame forwarded by the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlePacket {
    pub timestamp: u32,
    pub rssi: i8,
    pub channel: u8,
    pub source: PacketSource,
    pub access_address: u32,
    /// LL header and payload.
    pub pdu: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Debug(String),
    ConnectionReport(ConnectionStatus),
    InjectionReport { success: bool, injection_count: u32 },
    AccessAddressReport(u32),
    CrcInitReport(u32),
    ChannelMapReport(u64),
    HopIntervalReport(u16),
    HopIncrementReport(u8),
}

impl Notification {
    fn type_code(&self) -> u8 {
        match self {
            Notification::Debug(_) => 0x00,
            Notification::ConnectionReport(_) => 0x01,
            Notification::InjectionReport { .. } => 0x02,
            Notification::AccessAddressReport(_) => 0x03,
            Notification::CrcInitReport(_) => 0x04,
            Notification::ChannelMapReport(_) => 0x05,
            Notification::HopIntervalReport(_) => 0x06,
            Notification::HopIncrementReport(_) => 0x07,
        }
    }

    fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        require_len(data, 1)?;
        let body = &data[1..];
        let mut cursor = Cursor::new(body);
        Ok(match data[0] {
            0x00 => Notification::Debug(
                String::from_utf8_lossy(body)
                    .trim_end_matches('\0')
                    .to_string(),
            ),
            0x01 => Notification::ConnectionReport(ConnectionStatus::try_from(cursor.read_u8()?)?),
            0x02 => Notification::InjectionReport {
                success: cursor.read_u8()? == 0x00,
                injection_count: cursor.read_u32::<LittleEndian>()?,
            },
            0x03 => Notification::AccessAddressReport(cursor.read_u32::<LittleEndian>()?),
            0x04 => Notification::CrcInitReport(cursor.read_u24::<LittleEndian>()?),
            0x05 => Notification::ChannelMapReport(cursor.read_uint::<LittleEndian>(5)?),
            0x06 => Notification::HopIntervalReport(cursor.read_u16::<LittleEndian>()?),
            0x07 => Notification::HopIncrementReport(cursor.read_u8()?),
            other => {
                return Err(DecodeError::UnknownType {
                    field: "notification type",
                    value: other as u16,
                });
            }
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.push(self.type_code());
        match self {
            Notification::Debug(text) => buf.extend_from_slice(text.as_bytes()),
            Notification::ConnectionReport(status) => buf.push(*status as u8),
            Notification::InjectionReport {
                success,
                injection_count,
            } => {
                buf.push(if *success { 0x00 } else { 0x01 });
                buf.extend_from_slice(&injection_count.to_le_bytes());
            }
            Notification::AccessAddressReport(aa) => buf.extend_from_slice(&aa.to_le_bytes()),
            Notification::CrcInitReport(crc) => {
                buf.extend_from_slice(&(crc & 0xFF_FFFF).to_le_bytes()[..3])
            }
            Notification::ChannelMapReport(map) => buf.extend_from_slice(&map.to_le_bytes()[..5]),
            Notification::HopIntervalReport(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Notification::HopIncrementReport(v) => buf.push(*v),
        }
    }
}

/// Any message exchanged with the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButterflyMessage {
    Command(Command),
    Response(Response),
    Packet(BlePacket),
    Notification(Notification),
}

impl ButterflyMessage {
    pub fn ble_packet(&self) -> Option<&BlePacket> {
        match self {
            ButterflyMessage::Packet(pkt) => Some(pkt),
            _ => None,
        }
    }
}

impl Dissect for ButterflyMessage {
    fn dissect(data: &[u8]) -> Result<Self, DecodeError> {
        require_len(data, 3)?;
        let preamble = u16::from_be_bytes([data[0], data[1]]);
        if preamble != PREAMBLE {
            return Err(DecodeError::InvalidPreamble {
                expected: PREAMBLE,
                actual: preamble,
            });
        }
        let body = &data[3..];
        match data[2] {
            MESSAGE_COMMAND | MESSAGE_RESPONSE => {
                require_len(body, 2)?;
                let command_type = CommandType::try_from(u16::from_le_bytes([body[0], body[1]]))?;
                let rest = body[2..].to_vec();
                if data[2] == MESSAGE_COMMAND {
                    Ok(ButterflyMessage::Command(Command {
                        command_type,
                        body: rest,
                    }))
                } else {
                    Ok(ButterflyMessage::Response(Response {
                        command_type,
                        body: rest,
                    }))
                }
            }
            MESSAGE_PACKET => {
                require_len(body, 1)?;
                if body[0] != PACKET_BLE {
                    return Err(DecodeError::UnknownType {
                        field: "packet type",
                        value: body[0] as u16,
                    });
                }
                // timestamp(4) rssi(1) channel(1) source(1) access address(4)
                require_len(body, 12)?;
                let mut cursor = Cursor::new(&body[1..]);
                let timestamp = cursor.read_u32::<LittleEndian>()?;
                let rssi = cursor.read_i8()?;
                let channel = cursor.read_u8()?;
                let source = PacketSource::try_from(cursor.read_u8()?)?;
                let access_address = cursor.read_u32::<LittleEndian>()?;
                Ok(ButterflyMessage::Packet(BlePacket {
                    timestamp,
                    rssi,
                    channel,
                    source,
                    access_address,
                    pdu: body[12..].to_vec(),
                }))
            }
            MESSAGE_NOTIFICATION => Ok(ButterflyMessage::Notification(Notification::parse(body)?)),
            other => Err(DecodeError::UnknownType {
                field: "message type",
                value: other as u16,
            }),
        }
    }

    fn build(&self) -> Vec<u8> {
        let mut buf = PREAMBLE.to_be_bytes().to_vec();
        match self {
            ButterflyMessage::Command(cmd) => {
                buf.push(MESSAGE_COMMAND);
                buf.extend_from_slice(&(cmd.command_type as u16).to_le_bytes());
                buf.extend_from_slice(&cmd.body);
            }
            ButterflyMessage::Response(resp) => {
                buf.push(MESSAGE_RESPONSE);
                buf.extend_from_slice(&(resp.command_type as u16).to_le_bytes());
                buf.extend_from_slice(&resp.body);
            }
            ButterflyMessage::Packet(pkt) => {
                buf.push(MESSAGE_PACKET);
                buf.push(PACKET_BLE);
                buf.extend_from_slice(&pkt.timestamp.to_le_bytes());
                buf.push(pkt.rssi as u8);
                buf.push(pkt.channel);
                buf.push(pkt.source as u8);
                buf.extend_from_slice(&pkt.access_address.to_le_bytes());
                buf.extend_from_slice(&pkt.pdu);
            }
            ButterflyMessage::Notification(notification) => {
                buf.push(MESSAGE_NOTIFICATION);
                notification.write(&mut buf);
            }
        }
        buf
    }
}

/// True if `response` answers `command` (same transaction tag).
pub fn is_response_to(command: &[u8], response: &[u8]) -> bool {
    response.len() >= TRANSACTION_TAG.end
        && command.len() >= TRANSACTION_TAG.end
        && response[2] == MESSAGE_RESPONSE
        && response[..2] == PREAMBLE.to_be_bytes()
        && command[TRANSACTION_TAG] == response[TRANSACTION_TAG]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissector::Packet;

    #[test]
    fn test_command_layout() {
        let cmd = ButterflyMessage::Command(Command::set_channel(37));
        assert_eq!(cmd.build(), vec![0x5A, 0x17, 0x01, 0x07, 0x00, 37]);
    }

    #[test]
    fn test_transaction_tag_pairing() {
        let cmd = ButterflyMessage::Command(Command::set_channel(12)).build();
        let good = ButterflyMessage::Response(Response {
            command_type: CommandType::SetChannel,
            body: vec![0x00],
        })
        .build();
        let other = ButterflyMessage::Response(Response {
            command_type: CommandType::GetVersion,
            body: vec![1, 0],
        })
        .build();
        assert!(is_response_to(&cmd, &good));
        assert!(!is_response_to(&cmd, &other));
        // A command is not its own response.
        assert!(!is_response_to(&cmd, &cmd));
    }

    #[test]
    fn test_ble_packet_roundtrip() {
        let msg = ButterflyMessage::Packet(BlePacket {
            timestamp: 123456,
            rssi: -62,
            channel: 12,
            source: PacketSource::Slave,
            access_address: 0x50654A2B,
            pdu: vec![0x0E, 0x02, 0x01, 0x02],
        });
        let pkt = Packet::<ButterflyMessage>::from_bytes(&msg.build()).unwrap();
        assert_eq!(pkt.fields(), &msg);
        assert_eq!(pkt.fields().ble_packet().unwrap().source, PacketSource::Slave);
    }

    #[test]
    fn test_notifications_roundtrip() {
        let notifications = [
            Notification::Debug("hello".into()),
            Notification::ConnectionReport(ConnectionStatus::Lost),
            Notification::InjectionReport {
                success: true,
                injection_count: 3,
            },
            Notification::AccessAddressReport(0xAF9A9CEC),
            Notification::CrcInitReport(0x0A0B0C),
            Notification::ChannelMapReport(0x1FFFFFFFFF),
            Notification::HopIntervalReport(75),
            Notification::HopIncrementReport(9),
        ];
        for n in notifications {
            let msg = ButterflyMessage::Notification(n);
            assert_eq!(ButterflyMessage::dissect(&msg.build()).unwrap(), msg);
        }
    }

    #[test]
    fn test_invalid_messages() {
        assert!(matches!(
            ButterflyMessage::dissect(&[0x12, 0x34, 0x01, 0x01, 0x00]),
            Err(DecodeError::InvalidPreamble { .. })
        ));
        assert!(ButterflyMessage::dissect(&[0x5A, 0x17, 0x09]).is_err());
        assert!(ButterflyMessage::dissect(&[0x5A, 0x17, 0x04, 0x01, 0x09]).is_err());
        assert!(ButterflyMessage::dissect(&[0x5A, 0x17, 0x01, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn test_version_response() {
        let resp = Response {
            command_type: CommandType::GetVersion,
            body: vec![1, 2],
        };
        assert_eq!(resp.version(), Some((1, 2)));
    }
}
