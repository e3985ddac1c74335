//! BLE connection parameter tracking.
//!
//! Sniffers recover the parameters of an existing connection one at a time,
//! always in the same order: access address, CRCInit, channel map, hop
//! interval, hop increment.

use std::fmt;

use tracing::info;

use crate::device::DeviceError;
use crate::protocol::ble::ConnectRequest;

/// Parameters of a followed connection, `None` while unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionParameters {
    pub access_address: Option<u32>,
    pub crc_init: Option<u32>,
    pub channel_map: Option<u64>,
    pub hop_interval: Option<u16>,
    pub hop_increment: Option<u8>,
}

impl ConnectionParameters {
    pub fn is_complete(&self) -> bool {
        self.access_address.is_some()
            && self.crc_init.is_some()
            && self.channel_map.is_some()
            && self.hop_interval.is_some()
            && self.hop_increment.is_some()
    }
}

impl fmt::Display for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::UpperHex>(v: Option<T>) -> String {
            v.map_or_else(|| "?".to_string(), |v| format!("0x{:X}", v))
        }
        write!(
            f,
            "aa={} crc_init={} channel_map={} hop_interval={} hop_increment={}",
            opt(self.access_address),
            opt(self.crc_init),
            opt(self.channel_map),
            self.hop_interval.map_or_else(|| "?".to_string(), |v| v.to_string()),
            self.hop_increment.map_or_else(|| "?".to_string(), |v| v.to_string()),
        )
    }
}

/// Next parameter to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecoveryPhase {
    AccessAddress,
    CrcInit,
    ChannelMap,
    HopInterval,
    HopIncrement,
    Complete,
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPhase::AccessAddress => write!(f, "ACCESS_ADDRESS"),
            RecoveryPhase::CrcInit => write!(f, "CRC_INIT"),
            RecoveryPhase::ChannelMap => write!(f, "CHANNEL_MAP"),
            RecoveryPhase::HopInterval => write!(f, "HOP_INTERVAL"),
            RecoveryPhase::HopIncrement => write!(f, "HOP_INCREMENT"),
            RecoveryPhase::Complete => write!(f, "COMPLETE"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionTracker {
    params: ConnectionParameters,
    /// Set by the latest loss report, cleared by any new recovery.
    lost: bool,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameters(&self) -> ConnectionParameters {
        self.params
    }

    pub fn is_synchronized(&self) -> bool {
        self.params.is_complete() && !self.lost
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// First parameter still unknown.
    pub fn phase(&self) -> RecoveryPhase {
        let p = &self.params;
        if p.access_address.is_none() {
            RecoveryPhase::AccessAddress
        } else if p.crc_init.is_none() {
            RecoveryPhase::CrcInit
        } else if p.channel_map.is_none() {
            RecoveryPhase::ChannelMap
        } else if p.hop_interval.is_none() {
            RecoveryPhase::HopInterval
        } else if p.hop_increment.is_none() {
            RecoveryPhase::HopIncrement
        } else {
            RecoveryPhase::Complete
        }
    }

    fn expect_phase(&self, update: RecoveryPhase) -> Result<(), DeviceError> {
        let phase = self.phase();
        if phase < update {
            return Err(DeviceError::StateTransition(format!(
                "{} received while waiting for {}",
                update, phase
            )));
        }
        Ok(())
    }

    /// Start a new recovery from a freshly detected access address.
    pub fn update_access_address(&mut self, access_address: u32) -> RecoveryPhase {
        self.params = ConnectionParameters {
            access_address: Some(access_address),
            ..Default::default()
        };
        self.lost = false;
        info!(aa = %format!("0x{:08X}", access_address), "Access address recovered");
        self.phase()
    }

    pub fn update_crc_init(&mut self, crc_init: u32) -> Result<RecoveryPhase, DeviceError> {
        self.expect_phase(RecoveryPhase::CrcInit)?;
        self.params.crc_init = Some(crc_init & 0xFF_FFFF);
        info!(crc_init = %format!("0x{:06X}", crc_init), "CRCInit recovered");
        Ok(self.phase())
    }

    pub fn update_channel_map(&mut self, channel_map: u64) -> Result<RecoveryPhase, DeviceError> {
        self.expect_phase(RecoveryPhase::ChannelMap)?;
        self.params.channel_map = Some(channel_map);
        info!(channel_map = %format!("0x{:010X}", channel_map), "Channel map recovered");
        Ok(self.phase())
    }

    pub fn update_hop_interval(&mut self, hop_interval: u16) -> Result<RecoveryPhase, DeviceError> {
        self.expect_phase(RecoveryPhase::HopInterval)?;
        self.params.hop_interval = Some(hop_interval);
        info!(hop_interval, "Hop interval recovered");
        Ok(self.phase())
    }

    pub fn update_hop_increment(
        &mut self,
        hop_increment: u8,
    ) -> Result<RecoveryPhase, DeviceError> {
        self.expect_phase(RecoveryPhase::HopIncrement)?;
        self.params.hop_increment = Some(hop_increment);
        info!(hop_increment, "Hop increment recovered");
        Ok(self.phase())
    }

    /// Seed every parameter from a sniffed CONNECT_REQ.
    pub fn apply_connect_request(&mut self, request: &ConnectRequest) {
        self.params = ConnectionParameters {
            access_address: Some(request.access_address),
            crc_init: Some(request.crc_init),
            channel_map: Some(request.channel_map),
            hop_interval: Some(request.hop_interval),
            hop_increment: Some(request.hop_increment),
        };
        self.lost = false;
        info!(params = %self.params, "Connection parameters from CONNECT_REQ");
    }

    /// Seed the parameters a caller already knows; the rest are recovered.
    pub fn seed(
        &mut self,
        access_address: Option<u32>,
        crc_init: Option<u32>,
        channel_map: Option<u64>,
    ) {
        self.clear();
        self.params.access_address = access_address;
        if access_address.is_some() {
            self.params.crc_init = crc_init.map(|c| c & 0xFF_FFFF);
            if self.params.crc_init.is_some() {
                self.params.channel_map = channel_map;
            }
        }
    }

    pub fn mark_lost(&mut self) {
        self.params = ConnectionParameters::default();
        self.lost = true;
    }

    pub fn clear(&mut self) {
        self.params = ConnectionParameters::default();
        self.lost = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_in_order() {
        let mut tracker = ConnectionTracker::new();
        assert_eq!(tracker.phase(), RecoveryPhase::AccessAddress);

        assert_eq!(tracker.update_access_address(0x50654A2B), RecoveryPhase::CrcInit);
        assert_eq!(tracker.update_crc_init(0x123456).unwrap(), RecoveryPhase::ChannelMap);
        assert_eq!(
            tracker.update_channel_map(0x1F_FFFF_FFFF).unwrap(),
            RecoveryPhase::HopInterval
        );
        assert!(!tracker.is_synchronized());
        assert_eq!(tracker.update_hop_interval(36).unwrap(), RecoveryPhase::HopIncrement);
        assert!(!tracker.is_synchronized());
        assert_eq!(tracker.update_hop_increment(7).unwrap(), RecoveryPhase::Complete);
        assert!(tracker.is_synchronized());
    }

    #[test]
    fn test_out_of_order_update_rejected() {
        let mut tracker = ConnectionTracker::new();
        assert!(matches!(
            tracker.update_hop_interval(36),
            Err(DeviceError::StateTransition(_))
        ));
        tracker.update_access_address(1);
        assert!(tracker.update_channel_map(1).is_err());
        assert_eq!(tracker.parameters().channel_map, None);
    }

    #[test]
    fn test_loss_clears_everything() {
        let mut tracker = ConnectionTracker::new();
        tracker.seed(Some(1), Some(2), Some(3));
        tracker.update_hop_interval(4).unwrap();
        tracker.update_hop_increment(5).unwrap();
        assert!(tracker.is_synchronized());

        tracker.mark_lost();
        assert!(tracker.is_lost());
        assert!(!tracker.is_synchronized());
        assert_eq!(tracker.parameters(), ConnectionParameters::default());
    }

    #[test]
    fn test_seed_respects_order() {
        let mut tracker = ConnectionTracker::new();
        tracker.seed(None, Some(2), Some(3));
        assert_eq!(tracker.phase(), RecoveryPhase::AccessAddress);
        assert_eq!(tracker.parameters().crc_init, None);
    }
}
