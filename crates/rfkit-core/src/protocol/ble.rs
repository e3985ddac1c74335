//! Bluetooth Low Energy link-layer helpers shared by the BLE drivers.

use std::fmt;
use std::str::FromStr;

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::dissector::{DecodeError, require_len};

/// Access address used on the three advertising channels.
pub const ADVERTISING_ACCESS_ADDRESS: u32 = 0x8E89_BED6;

/// CRCInit of advertising channel PDUs.
pub const ADVERTISING_CRC_INIT: u32 = 0x55_5555;

/// Channel map with all 37 data channels in use.
pub const ALL_CHANNELS_MAP: u64 = 0x1F_FFFF_FFFF;

pub const ADVERTISING_CHANNELS: [u8; 3] = [37, 38, 39];

/// Advertising PDU type carried in the low nibble of the first header byte.
pub const PDU_TYPE_CONNECT_REQ: u8 = 0x05;

/// Map a BLE channel index to its centre frequency in MHz.
pub fn channel_to_frequency(channel: u8) -> Option<u16> {
    match channel {
        37 => Some(2402),
        38 => Some(2426),
        39 => Some(2480),
        0..=10 => Some(2404 + 2 * channel as u16),
        11..=36 => Some(2428 + 2 * (channel as u16 - 11)),
        _ => None,
    }
}

/// Inverse of [`channel_to_frequency`].
pub fn frequency_to_channel(frequency: u16) -> Option<u8> {
    (0..=39).find(|&ch| channel_to_frequency(ch) == Some(frequency))
}

/// Data channels enabled in a 37-bit channel map.
pub fn used_channels(channel_map: u64) -> Vec<u8> {
    (0..37u8)
        .filter(|&ch| channel_map & (1u64 << ch) != 0)
        .collect()
}

/// Bluetooth device address, displayed most significant byte first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddress(pub [u8; 6]);

impl BdAddress {
    /// Parse from over-the-air order (least significant byte first).
    pub fn from_air(bytes: &[u8]) -> Result<Self, DecodeError> {
        require_len(bytes, 6)?;
        let mut addr = [0u8; 6];
        for (i, b) in bytes[..6].iter().rev().enumerate() {
            addr[i] = *b;
        }
        Ok(Self(addr))
    }

    pub fn to_air(&self) -> [u8; 6] {
        let mut out = self.0;
        out.reverse();
        out
    }
}

impl fmt::Display for BdAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{}", parts.join(":"))
    }
}

impl fmt::Debug for BdAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BdAddress({})", self)
    }
}

impl FromStr for BdAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(format!("Invalid BD address: {}", s));
        }
        let mut addr = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            addr[i] = u8::from_str_radix(part, 16)
                .map_err(|_| format!("Invalid BD address: {}", s))?;
        }
        Ok(Self(addr))
    }
}

/// CONNECT_REQ (CONNECT_IND) advertising PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub initiator: BdAddress,
    pub advertiser: BdAddress,
    pub access_address: u32,
    pub crc_init: u32,
    pub win_size: u8,
    pub win_offset: u16,
    pub hop_interval: u16,
    pub latency: u16,
    pub timeout: u16,
    pub channel_map: u64,
    pub hop_increment: u8,
    pub sca: u8,
}

impl ConnectRequest {
    /// LL header (2) + LLData payload (34).
    pub const PDU_SIZE: usize = 36;

    /// Parse from an advertising PDU (header included).
    pub fn from_pdu(pdu: &[u8]) -> Result<Self, DecodeError> {
        require_len(pdu, 2)?;
        let pdu_type = pdu[0] & 0x0F;
        if pdu_type != PDU_TYPE_CONNECT_REQ {
            return Err(DecodeError::UnknownType {
                field: "advertising PDU type",
                value: pdu_type as u16,
            });
        }
        require_len(pdu, Self::PDU_SIZE)?;

        let initiator = BdAddress::from_air(&pdu[2..8])?;
        let advertiser = BdAddress::from_air(&pdu[8..14])?;
        let mut cursor = Cursor::new(&pdu[14..]);
        let access_address = cursor.read_u32::<LittleEndian>()?;
        let crc_init = cursor.read_u24::<LittleEndian>()?;
        let win_size = cursor.read_u8()?;
        let win_offset = cursor.read_u16::<LittleEndian>()?;
        let hop_interval = cursor.read_u16::<LittleEndian>()?;
        let latency = cursor.read_u16::<LittleEndian>()?;
        let timeout = cursor.read_u16::<LittleEndian>()?;
        let channel_map = cursor.read_uint::<LittleEndian>(5)?;
        let hop_sca = cursor.read_u8()?;

        Ok(Self {
            initiator,
            advertiser,
            access_address,
            crc_init,
            win_size,
            win_offset,
            hop_interval,
            latency,
            timeout,
            channel_map,
            hop_increment: hop_sca & 0x1F,
            sca: hop_sca >> 5,
        })
    }

    pub fn to_pdu(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::PDU_SIZE);
        buf.push(PDU_TYPE_CONNECT_REQ);
        buf.push(34);
        buf.extend_from_slice(&self.initiator.to_air());
        buf.extend_from_slice(&self.advertiser.to_air());
        buf.extend_from_slice(&self.access_address.to_le_bytes());
        buf.extend_from_slice(&(self.crc_init & 0xFF_FFFF).to_le_bytes()[..3]);
        buf.push(self.win_size);
        buf.extend_from_slice(&self.win_offset.to_le_bytes());
        buf.extend_from_slice(&self.hop_interval.to_le_bytes());
        buf.extend_from_slice(&self.latency.to_le_bytes());
        buf.extend_from_slice(&self.timeout.to_le_bytes());
        buf.extend_from_slice(&(self.channel_map & ALL_CHANNELS_MAP).to_le_bytes()[..5]);
        buf.push((self.hop_increment & 0x1F) | (self.sca << 5));
        buf
    }
}

/// True if an advertising PDU is a CONNECT_REQ.
pub fn is_connect_request(pdu: &[u8]) -> bool {
    pdu.first().is_some_and(|b| b & 0x0F == PDU_TYPE_CONNECT_REQ)
}

fn reverse24(value: u32) -> u32 {
    (value & 0xFF_FFFF).reverse_bits() >> 8
}

/// BLE CRC-24 over a PDU, returned in over-the-air byte order.
pub fn crc24(crc_init: u32, pdu: &[u8]) -> [u8; 3] {
    let mut state = reverse24(crc_init);
    const LFSR_MASK: u32 = 0x5A_6000;
    for &byte in pdu {
        let mut cur = byte;
        for _ in 0..8 {
            let next_bit = (state ^ cur as u32) & 1;
            cur >>= 1;
            state >>= 1;
            if next_bit != 0 {
                state |= 1 << 23;
                state ^= LFSR_MASK;
            }
        }
    }
    [state as u8, (state >> 8) as u8, (state >> 16) as u8]
}

/// Compare a received CRC (over-the-air order) against the one computed for `pdu`.
pub fn check_crc24(crc_init: u32, pdu: &[u8], crc: &[u8]) -> bool {
    crc.len() == 3 && crc24(crc_init, pdu) == [crc[0], crc[1], crc[2]]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> ConnectRequest {
        ConnectRequest {
            initiator: "11:22:33:44:55:66".parse().unwrap(),
            advertiser: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            access_address: 0x50654A2B,
            crc_init: 0x1A2B3C,
            win_size: 2,
            win_offset: 5,
            hop_interval: 36,
            latency: 0,
            timeout: 500,
            channel_map: ALL_CHANNELS_MAP,
            hop_increment: 7,
            sca: 1,
        }
    }

    #[test]
    fn test_channel_frequencies() {
        assert_eq!(channel_to_frequency(37), Some(2402));
        assert_eq!(channel_to_frequency(0), Some(2404));
        assert_eq!(channel_to_frequency(10), Some(2424));
        assert_eq!(channel_to_frequency(11), Some(2428));
        assert_eq!(channel_to_frequency(36), Some(2478));
        assert_eq!(channel_to_frequency(40), None);
        assert_eq!(frequency_to_channel(2426), Some(38));
        assert_eq!(frequency_to_channel(2403), None);
    }

    #[test]
    fn test_connect_request_roundtrip() {
        let req = sample_request();
        let pdu = req.to_pdu();
        assert_eq!(pdu.len(), ConnectRequest::PDU_SIZE);
        assert!(is_connect_request(&pdu));
        assert_eq!(ConnectRequest::from_pdu(&pdu).unwrap(), req);
    }

    #[test]
    fn test_connect_request_rejects_other_pdu() {
        let mut pdu = sample_request().to_pdu();
        pdu[0] = 0x00;
        assert!(ConnectRequest::from_pdu(&pdu).is_err());
        assert!(ConnectRequest::from_pdu(&pdu[..10]).is_err());
    }

    #[test]
    fn test_crc24_detects_corruption() {
        let pdu = [0x02, 0x05, 0x01, 0x02, 0x03, 0x04, 0x05];
        let crc = crc24(0x123456, &pdu);
        assert!(check_crc24(0x123456, &pdu, &crc));

        let mut corrupted = pdu;
        corrupted[3] ^= 0x10;
        assert!(!check_crc24(0x123456, &corrupted, &crc));
    }

    #[test]
    fn test_crc24_known_answers() {
        // ADV_IND, AdvA F6:E5:D4:C3:B2:A1, flags AD structure
        let adv = [0x40, 0x09, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6, 0x02, 0x01, 0x06];
        assert_eq!(crc24(ADVERTISING_CRC_INIT, &adv), [0x87, 0xEA, 0xF6]);

        // LL_VERSION_IND on a connection
        let version_ind = [0x03, 0x06, 0x0C, 0x08, 0x0F, 0x00, 0x0D, 0x41];
        assert_eq!(crc24(0x0BB1E4, &version_ind), [0x1E, 0xCE, 0x3A]);
        assert_eq!(crc24(0x123456, &version_ind), [0x92, 0x78, 0xF0]);
        assert!(check_crc24(0x0BB1E4, &version_ind, &[0x1E, 0xCE, 0x3A]));
        assert!(!check_crc24(0x0BB1E4, &version_ind, &[0x3A, 0xCE, 0x1E]));
        assert!(!check_crc24(0x0BB1E4, &version_ind, &[0x1E, 0xCE]));
    }

    #[test]
    fn test_used_channels() {
        assert_eq!(used_channels(ALL_CHANNELS_MAP).len(), 37);
        assert_eq!(used_channels(0b1010), vec![1, 3]);
    }

    #[test]
    fn test_bd_address_air_order() {
        let addr: BdAddress = "11:22:33:44:55:66".parse().unwrap();
        assert_eq!(addr.to_air(), [0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
        assert_eq!(BdAddress::from_air(&addr.to_air()).unwrap(), addr);
        assert_eq!(addr.to_string(), "11:22:33:44:55:66");
        assert!("11:22".parse::<BdAddress>().is_err());
    }
}
