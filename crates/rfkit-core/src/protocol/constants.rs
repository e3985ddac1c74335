//! USB identifiers and vendor request codes for the supported radios.

// ============================================================================
// Ubertooth One
// ============================================================================

pub const UBERTOOTH_VENDOR_ID: u16 = 0x1D50;
pub const UBERTOOTH_PRODUCT_ID: u16 = 0x6002;

/// Vendor control requests (subset used by the BLE driver).
pub mod ubertooth_request {
    pub const PING: u8 = 0;
    pub const GET_CHANNEL: u8 = 11;
    pub const SET_CHANNEL: u8 = 12;
    pub const RESET: u8 = 13;
    pub const STOP: u8 = 21;
    pub const SET_MOD: u8 = 23;
    pub const BTLE_SNIFFING: u8 = 42;
    pub const SET_ACCESS_ADDRESS: u8 = 44;
    pub const SET_CRC_VERIFY: u8 = 48;
    pub const POLL: u8 = 49;
    pub const BTLE_PROMISC: u8 = 50;
    pub const BTLE_SET_TARGET: u8 = 56;
    pub const JAM_MODE: u8 = 59;
    pub const GET_API_VERSION: u8 = 64;
}

/// Modulation selected with SET_MOD.
pub const UBERTOOTH_MOD_BT_LOW_ENERGY: u16 = 1;

/// JAM_MODE values.
pub const UBERTOOTH_JAM_NONE: u16 = 0;
pub const UBERTOOTH_JAM_ONCE: u16 = 1;
pub const UBERTOOTH_JAM_CONTINUOUS: u16 = 2;

/// BTLE_SNIFFING follow flag: stay on the advertising channel.
pub const UBERTOOTH_FOLLOW_NONE: u16 = 0;
/// BTLE_SNIFFING follow flag: follow connections from CONNECT_REQ.
pub const UBERTOOTH_FOLLOW_CONNECTIONS: u16 = 2;

// ============================================================================
// ButteRFly (nRF52840 firmware)
// ============================================================================

pub const BUTTERFLY_VENDOR_ID: u16 = 0x5A17;
pub const BUTTERFLY_PRODUCT_ID: u16 = 0x0000;

// ============================================================================
// RFStorm (nRF24LU1+ research firmware)
// ============================================================================

pub const RFSTORM_VENDOR_ID: u16 = 0x1915;
pub const RFSTORM_PRODUCT_ID: u16 = 0x0102;

/// Bulk commands; every command is answered with a 64-byte IN report.
pub mod rfstorm_request {
    pub const TRANSMIT_PAYLOAD: u8 = 0x04;
    pub const ENTER_SNIFFER_MODE: u8 = 0x05;
    pub const ENTER_PROMISCUOUS_MODE: u8 = 0x06;
    pub const ENTER_TONE_TEST_MODE: u8 = 0x07;
    pub const TRANSMIT_ACK_PAYLOAD: u8 = 0x08;
    pub const SET_CHANNEL: u8 = 0x09;
    pub const GET_CHANNEL: u8 = 0x0A;
    pub const ENABLE_LNA_PA: u8 = 0x0B;
    pub const TRANSMIT_PAYLOAD_GENERIC: u8 = 0x0C;
    pub const ENTER_PROMISCUOUS_MODE_GENERIC: u8 = 0x0D;
    pub const RECEIVE_PAYLOAD: u8 = 0x12;
}

pub const RFSTORM_REPORT_SIZE: usize = 64;

/// First byte of a RECEIVE_PAYLOAD report when nothing was received.
pub const RFSTORM_NO_PAYLOAD: u8 = 0xFF;

/// Data rates for generic promiscuous mode.
pub const RF_RATE_250K: u8 = 0;
pub const RF_RATE_1M: u8 = 1;
pub const RF_RATE_2M: u8 = 2;
