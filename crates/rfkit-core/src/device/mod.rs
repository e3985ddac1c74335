//! Polymorphic radio devices.
//!
//! Every back-end (USB dongle, capture file) implements [`Device`]. Optional
//! features are exposed as capability traits reached through the
//! `as_*` accessors, so callers check support without knowing the concrete
//! driver.

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::dissector::{DecodeError, Packet};
use crate::events::{DeviceEvent, EventReply, Subscriber, SubscriberList};
use crate::pcap::PcapError;
use crate::protocol::ble::BdAddress;
use crate::protocol::butterfly::ButterflyMessage;
use crate::protocol::mosart::MosartFrame;
use crate::protocol::ubertooth::UbertoothFrame;
use crate::state::{AttackKind, AttackStatus, ConnectionParameters};
use crate::transport::TransportError;

pub mod butterfly;
pub mod pcap;
pub mod registry;
pub mod rfstorm;
pub mod subdevice;
pub mod ubertooth;

pub use butterfly::ButterflyDevice;
pub use pcap::PcapDevice;
pub use rfstorm::{RfStormDevice, RfStormMode};
pub use subdevice::SubDevice;
pub use ubertooth::UbertoothDevice;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No device available for interface {0}")]
    NotFound(String),

    #[error("Failed to initialise {interface}: {message}")]
    Init { interface: String, message: String },

    #[error("Device I/O error: {0}")]
    Io(#[from] TransportError),

    #[error("No answer to {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid state transition: {0}")]
    StateTransition(String),

    #[error("{operation} is not supported by {interface}")]
    Unsupported {
        interface: String,
        operation: &'static str,
    },

    #[error("Device {0} is not ready")]
    NotReady(String),

    #[error("Unknown interface name: {0}")]
    UnknownInterface(String),

    #[error("Capture file error: {0}")]
    Pcap(#[from] PcapError),
}

/// Feature tags advertised by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    SniffingAdvertisements,
    SniffingNewConnection,
    SniffingExistingConnection,
    ChangingChannel,
    JammingConnections,
    JammingAdvertisements,
    Injecting,
    HijackingMaster,
    HijackingSlave,
    MitmingExistingConnection,
    CommunicatingAsMaster,
    CommunicatingAsSlave,
    SniffingNormal,
    SniffingPromiscuous,
    InjectingSync,
    Scanning,
    Replaying,
    Recording,
}

const CAPABILITY_TAGS: &[(Capability, &str)] = &[
    (Capability::SniffingAdvertisements, "SNIFFING_ADVERTISEMENTS"),
    (Capability::SniffingNewConnection, "SNIFFING_NEW_CONNECTION"),
    (Capability::SniffingExistingConnection, "SNIFFING_EXISTING_CONNECTION"),
    (Capability::ChangingChannel, "CHANGING_CHANNEL"),
    (Capability::JammingConnections, "JAMMING_CONNECTIONS"),
    (Capability::JammingAdvertisements, "JAMMING_ADVERTISEMENTS"),
    (Capability::Injecting, "INJECTING"),
    (Capability::HijackingMaster, "HIJACKING_MASTER"),
    (Capability::HijackingSlave, "HIJACKING_SLAVE"),
    (Capability::MitmingExistingConnection, "MITMING_EXISTING_CONNECTION"),
    (Capability::CommunicatingAsMaster, "COMMUNICATING_AS_MASTER"),
    (Capability::CommunicatingAsSlave, "COMMUNICATING_AS_SLAVE"),
    (Capability::SniffingNormal, "SNIFFING_NORMAL"),
    (Capability::SniffingPromiscuous, "SNIFFING_PROMISCUOUS"),
    (Capability::InjectingSync, "INJECTING_SYNC"),
    (Capability::Scanning, "SCANNING"),
    (Capability::Replaying, "REPLAYING"),
    (Capability::Recording, "RECORDING"),
];

impl Capability {
    pub fn tag(self) -> &'static str {
        CAPABILITY_TAGS
            .iter()
            .find(|(c, _)| *c == self)
            .map_or("UNKNOWN", |(_, tag)| tag)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CAPABILITY_TAGS
            .iter()
            .find(|(_, tag)| tag.eq_ignore_ascii_case(s.trim()))
            .map(|(c, _)| *c)
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

/// A frame moving through a device, typed by the codec that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioPacket {
    Ubertooth(Packet<UbertoothFrame>),
    Butterfly(Packet<ButterflyMessage>),
    Mosart(Packet<MosartFrame>),
    /// Bytes with no codec attached (capture files, BLE payloads to inject).
    Raw { timestamp: Duration, data: Vec<u8> },
}

impl RadioPacket {
    pub fn raw(data: &[u8]) -> Self {
        RadioPacket::Raw {
            timestamp: Duration::ZERO,
            data: data.to_vec(),
        }
    }

    /// Serialized bytes of the frame.
    pub fn data(&self) -> Vec<u8> {
        match self {
            RadioPacket::Ubertooth(p) => p.data(),
            RadioPacket::Butterfly(p) => p.data(),
            RadioPacket::Mosart(p) => p.data(),
            RadioPacket::Raw { data, .. } => data.clone(),
        }
    }
}

/// One followed connection, as reported to attack orchestration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub handle: u16,
    pub address: String,
}

/// Hardware or file back-end.
///
/// `init` is idempotent. Missing hardware is not an error: `init` returns
/// `Ok(())` and `is_up` stays false. `recv` never blocks longer than the
/// transport's bounded read timeout.
pub trait Device: Send + Sync {
    fn interface(&self) -> &str;

    fn init(&self) -> Result<(), DeviceError>;

    fn is_up(&self) -> bool;

    fn send(&self, packet: &RadioPacket) -> Result<(), DeviceError>;

    fn recv(&self) -> Option<RadioPacket>;

    fn close(&self);

    fn capabilities(&self) -> Vec<Capability>;

    fn subscribers(&self) -> &SubscriberList;

    fn as_any(&self) -> &dyn Any;

    /// True iff every capability in `required` is supported.
    fn has_capabilities(&self, required: &[Capability]) -> bool {
        let supported = self.capabilities();
        required.iter().all(|c| supported.contains(c))
    }

    fn subscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        self.subscribers().subscribe(subscriber);
    }

    fn publish(&self, event: DeviceEvent) -> Option<EventReply> {
        self.subscribers().publish(self.interface(), &event)
    }

    /// Interfaces of the (master, slave) role proxies, when available.
    fn get_sub_interfaces(&self) -> (Option<String>, Option<String>) {
        (None, None)
    }

    fn get_connections(&self) -> Vec<ConnectionInfo> {
        Vec::new()
    }

    /// Role proxy named `name` (`<interface>:sub1` / `<interface>:sub2`).
    fn sub_device(&self, _name: &str) -> Option<Arc<dyn Device>> {
        None
    }

    fn as_channel_control(&self) -> Option<&dyn ChannelControl> {
        None
    }

    fn as_jammable(&self) -> Option<&dyn Jammable> {
        None
    }

    fn as_hijackable(&self) -> Option<&dyn Hijackable> {
        None
    }

    fn as_ble_sniffer(&self) -> Option<&dyn BleSniffer> {
        None
    }
}

pub trait ChannelControl {
    fn set_channel(&self, channel: u8) -> Result<(), DeviceError>;

    fn channel(&self) -> Result<u8, DeviceError>;
}

pub trait Jammable {
    fn set_jamming(&self, enabled: bool) -> Result<(), DeviceError>;

    fn is_jamming(&self) -> bool;
}

pub trait Hijackable {
    fn start_attack(&self, attack: AttackKind) -> Result<(), DeviceError>;

    fn attack_status(&self) -> (AttackKind, AttackStatus);
}

/// BLE sniffing modes shared by the Ubertooth and ButteRFly drivers.
pub trait BleSniffer {
    fn sniff_advertisements(
        &self,
        target: Option<BdAddress>,
        channel: u8,
    ) -> Result<(), DeviceError>;

    fn sniff_new_connections(
        &self,
        target: Option<BdAddress>,
        channel: u8,
    ) -> Result<(), DeviceError>;

    /// Follow a connection already in progress, recovering whatever is not given.
    fn sniff_existing_connection(
        &self,
        access_address: Option<u32>,
        crc_init: Option<u32>,
        channel_map: Option<u64>,
    ) -> Result<(), DeviceError>;

    fn is_synchronized(&self) -> bool;

    fn connection_parameters(&self) -> ConnectionParameters;
}

/// Split `name<N>` into (`name`, N).
pub(crate) fn split_index(interface: &str) -> Result<(&str, usize), DeviceError> {
    let digits = interface
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(interface.len());
    let (name, index) = interface.split_at(digits);
    let index = if index.is_empty() {
        0
    } else {
        index
            .parse()
            .map_err(|_| DeviceError::UnknownInterface(interface.to_string()))?
    };
    Ok((name, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_tags() {
        assert_eq!(Capability::HijackingMaster.to_string(), "HIJACKING_MASTER");
        assert_eq!(
            "sniffing_new_connection".parse::<Capability>().unwrap(),
            Capability::SniffingNewConnection
        );
        assert!("FLYING".parse::<Capability>().is_err());
        for (cap, tag) in CAPABILITY_TAGS {
            assert_eq!(tag.parse::<Capability>().unwrap(), *cap);
        }
    }

    #[test]
    fn test_split_index() {
        assert_eq!(split_index("ubertooth0").unwrap(), ("ubertooth", 0));
        assert_eq!(split_index("rfstorm12").unwrap(), ("rfstorm", 12));
        assert_eq!(split_index("butterfly").unwrap(), ("butterfly", 0));
    }
}
