//! ButteRFly (nRF52840) BLE sniffer/attack firmware driver.
//!
//! Commands are answered by responses carrying the same transaction tag.
//! Packets and notifications read while waiting for a response are kept and
//! handed to the receive path later.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, instrument, warn};

use super::subdevice::{RoleLink, SubDevice};
use super::{
    BleSniffer, Capability, ChannelControl, ConnectionInfo, Device, DeviceError, Hijackable,
    RadioPacket,
};
use crate::config::DriverConfig;
use crate::dissector::{Dissect, Packet, hex};
use crate::events::{DeviceEvent, SubscriberList};
use crate::lock;
use crate::protocol::ble::{
    ADVERTISING_ACCESS_ADDRESS, BdAddress, ConnectRequest, is_connect_request,
};
use crate::protocol::butterfly::{
    ButterflyMessage, Command, CommandType, ConnectionStatus, Controller, Notification,
    PacketSource, Response, is_response_to,
};
use crate::protocol::constants::{BUTTERFLY_PRODUCT_ID, BUTTERFLY_VENDOR_ID};
use crate::state::{
    AttackKind, AttackSession, AttackStatus, ConnectionParameters, LinkState, Role, SessionAction,
    SniffingMode,
};
use crate::transport::{NusbTransport, TransportError, TransportOpener, UsbTransport};

/// Largest message the firmware sends in one transfer.
const MAX_MESSAGE_SIZE: usize = 512;

/// Frames kept for the main interface while only sub-devices are polled.
const BACKLOG_LIMIT: usize = 1024;

struct RoleProxy {
    role: Role,
    device: Arc<SubDevice>,
    queue: Sender<RadioPacket>,
}

struct Inner {
    transport: Option<Arc<dyn UsbTransport>>,
    session: AttackSession,
    channel: u8,
    target: Option<BdAddress>,
    version: Option<(u8, u8)>,
    /// Raw messages read while waiting for a response.
    pending: VecDeque<Vec<u8>>,
    /// Frames for the main interface read on behalf of a sub-device.
    backlog: VecDeque<RadioPacket>,
    roles: Vec<RoleProxy>,
}

impl Inner {
    fn transport(&self) -> Result<Arc<dyn UsbTransport>, DeviceError> {
        self.transport
            .clone()
            .ok_or_else(|| DeviceError::NotReady("butterfly".into()))
    }

    /// Send `command` and wait for its response, retransmitting up to
    /// `retries` times.
    fn exchange(&mut self, command: Command, retries: u32) -> Result<Response, DeviceError> {
        let transport = self.transport()?;
        let command_type = command.command_type;
        let bytes = ButterflyMessage::Command(command).build();
        let attempts = retries.max(1);

        for attempt in 1..=attempts {
            transport.write(&bytes)?;
            loop {
                let data = match transport.read(MAX_MESSAGE_SIZE) {
                    Ok(data) => data,
                    Err(e) if e.is_timeout() => break,
                    Err(e) => return Err(e.into()),
                };
                if is_response_to(&bytes, &data) {
                    if let ButterflyMessage::Response(response) =
                        ButterflyMessage::dissect(&data)?
                    {
                        debug!(command = ?command_type, body = %hex(&response.body), "Response");
                        return Ok(response);
                    }
                }
                self.pending.push_back(data);
            }
            debug!(command = ?command_type, attempt, "No response, retransmitting");
        }

        Err(DeviceError::Timeout {
            what: format!("{:?}", command_type),
            attempts,
        })
    }

    fn command(&mut self, command: Command, retries: u32) -> Result<(), DeviceError> {
        let command_type = command.command_type;
        let response = self.exchange(command, retries)?;
        if !response.succeeded() {
            warn!(command = ?command_type, body = %hex(&response.body), "Command rejected");
        }
        Ok(())
    }

    /// Configure the firmware for `mode` and reset the session accordingly.
    fn start_sniffing(&mut self, mode: SniffingMode, retries: u32) -> Result<(), DeviceError> {
        self.roles.clear();
        match mode {
            SniffingMode::Advertisements | SniffingMode::NewConnection => {
                self.session.restart_sniffing(mode);
                let follow = mode == SniffingMode::NewConnection;
                self.command(Command::set_follow_mode(follow), retries)?;
                let (address, enabled) = match self.target {
                    Some(target) => (target.to_air(), true),
                    None => ([0u8; 6], false),
                };
                self.command(Command::set_filter(address, enabled), retries)?;
                self.command(Command::set_channel(self.channel), retries)?;
            }
            SniffingMode::ExistingConnection => {
                let known = self.session.connection().parameters();
                self.session.restart_sniffing(mode);
                self.session.connection_mut().seed(
                    known.access_address,
                    known.crc_init,
                    known.channel_map,
                );
                self.command(Command::new(CommandType::StartExistingConnectionSniffing), retries)?;
                if let Some(aa) = known.access_address {
                    self.command(Command::set_access_address(aa), retries)?;
                }
                let seeded = self.session.connection().parameters();
                if let Some(crc_init) = seeded.crc_init {
                    self.command(Command::set_crc_init(crc_init), retries)?;
                }
                if let Some(channel_map) = seeded.channel_map {
                    self.command(Command::set_channel_map(channel_map), retries)?;
                }
            }
        }
        info!(mode = %mode, channel = self.channel, "Sniffing mode set");
        Ok(())
    }

    fn proxy(&self, role: Role) -> Option<&RoleProxy> {
        self.roles.iter().find(|p| p.role == role)
    }
}

pub(crate) struct ButterflyShared {
    interface: String,
    config: DriverConfig,
    inner: Mutex<Inner>,
    subscribers: SubscriberList,
    me: Weak<ButterflyShared>,
}

impl ButterflyShared {
    fn retries(&self) -> u32 {
        self.config.command_retries
    }

    fn sub_interface(&self, role: Role) -> String {
        match role {
            Role::Master => format!("{}:sub1", self.interface),
            Role::Slave => format!("{}:sub2", self.interface),
        }
    }

    /// Read and dispatch one message. Returns BLE frames meant for the main
    /// interface.
    fn step(&self) -> Option<RadioPacket> {
        let mut events = Vec::new();
        let packet = {
            let mut inner = lock(&self.inner);
            let data = match inner.pending.pop_front() {
                Some(data) => data,
                None => match inner.transport.as_ref()?.read(MAX_MESSAGE_SIZE) {
                    Ok(data) => data,
                    Err(e) if e.is_timeout() => return None,
                    Err(e) => {
                        warn!(error = %e, "ButteRFly read failed");
                        return None;
                    }
                },
            };
            let message = match ButterflyMessage::dissect(&data) {
                Ok(message) => message,
                Err(e) => {
                    debug!(error = %e, data = %hex(&data), "Dropping undecodable message");
                    return None;
                }
            };
            self.dispatch(&mut inner, message, &data, &mut events)
        };

        for event in events {
            self.subscribers.publish(&self.interface, &event);
        }
        packet
    }

    fn dispatch(
        &self,
        inner: &mut Inner,
        message: ButterflyMessage,
        data: &[u8],
        events: &mut Vec<DeviceEvent>,
    ) -> Option<RadioPacket> {
        match message {
            ButterflyMessage::Packet(ble) => {
                if inner.session.mode() == SniffingMode::NewConnection
                    && ble.access_address == ADVERTISING_ACCESS_ADDRESS
                    && is_connect_request(&ble.pdu)
                {
                    match ConnectRequest::from_pdu(&ble.pdu) {
                        Ok(request) => {
                            inner.session.connection_mut().apply_connect_request(&request)
                        }
                        Err(e) => debug!(error = %e, "Malformed CONNECT_REQ"),
                    }
                }

                // Frames sent by one role are delivered to whoever plays the other.
                let destination = match ble.source {
                    PacketSource::Slave => Some(Role::Master),
                    PacketSource::Master => Some(Role::Slave),
                    PacketSource::General => None,
                };
                let packet =
                    RadioPacket::Butterfly(Packet::from_fields(ButterflyMessage::Packet(ble)));
                if let Some(proxy) = destination.and_then(|role| inner.proxy(role)) {
                    if proxy.queue.send(packet.clone()).is_ok() {
                        return None;
                    }
                }
                Some(packet)
            }
            ButterflyMessage::Notification(notification) => {
                self.handle_notification(inner, notification, events);
                None
            }
            ButterflyMessage::Response(response) => {
                debug!(command = ?response.command_type, "Late response dropped");
                None
            }
            ButterflyMessage::Command(_) => {
                debug!(data = %hex(data), "Unexpected command from firmware");
                None
            }
        }
    }

    fn handle_notification(
        &self,
        inner: &mut Inner,
        notification: Notification,
        events: &mut Vec<DeviceEvent>,
    ) {
        let retries = self.retries();
        let existing = inner.session.mode() == SniffingMode::ExistingConnection;
        let result = match notification {
            Notification::Debug(text) => {
                info!(interface = %self.interface, "[firmware] {}", text);
                return;
            }
            Notification::ConnectionReport(status) => {
                let previous = inner.session.status();
                match inner.session.apply_connection_report(status) {
                    Ok(action) => {
                        if status == ConnectionStatus::Lost {
                            events.push(DeviceEvent::ConnectionLost);
                        }
                        if inner.session.status() != previous {
                            events.push(DeviceEvent::AttackStatusChanged {
                                attack: inner.session.attack(),
                                status: inner.session.status(),
                            });
                        }
                        self.apply_action(inner, action, events);
                    }
                    Err(e) => debug!(error = %e, "Connection report ignored"),
                }
                return;
            }
            Notification::InjectionReport {
                success,
                injection_count,
            } => {
                if inner
                    .session
                    .apply_injection_report(success, injection_count)
                    .is_ok()
                {
                    events.push(DeviceEvent::AttackStatusChanged {
                        attack: inner.session.attack(),
                        status: inner.session.status(),
                    });
                }
                return;
            }
            Notification::AccessAddressReport(aa) => {
                inner.session.connection_mut().update_access_address(aa);
                if existing {
                    inner.command(Command::set_access_address(aa), retries)
                } else {
                    Ok(())
                }
            }
            Notification::CrcInitReport(crc_init) => inner
                .session
                .connection_mut()
                .update_crc_init(crc_init)
                .and_then(|_| {
                    if existing {
                        inner.command(Command::set_crc_init(crc_init), retries)
                    } else {
                        Ok(())
                    }
                }),
            Notification::ChannelMapReport(channel_map) => inner
                .session
                .connection_mut()
                .update_channel_map(channel_map)
                .and_then(|_| {
                    if existing {
                        inner.command(Command::set_channel_map(channel_map), retries)
                    } else {
                        Ok(())
                    }
                }),
            Notification::HopIntervalReport(interval) => inner
                .session
                .connection_mut()
                .update_hop_interval(interval)
                .and_then(|_| {
                    if existing {
                        inner.command(Command::set_hop_interval(interval), retries)
                    } else {
                        Ok(())
                    }
                }),
            Notification::HopIncrementReport(increment) => inner
                .session
                .connection_mut()
                .update_hop_increment(increment)
                .map(|_| {
                    let action = inner.session.recovery_complete();
                    self.apply_action(inner, action, events);
                }),
        };
        if let Err(e) = result {
            warn!(error = %e, "Connection parameter report not applied");
        }
    }

    fn apply_action(
        &self,
        inner: &mut Inner,
        action: SessionAction,
        events: &mut Vec<DeviceEvent>,
    ) {
        match action {
            SessionAction::None | SessionAction::StatusChanged => {}
            SessionAction::Synchronized => {
                let parameters = inner.session.connection().parameters();
                if inner.session.is_synchronized() {
                    info!(params = %parameters, "Synchronized with connection");
                    events.push(DeviceEvent::ConnectionSynchronized { parameters });
                }
            }
            SessionAction::RestartSniffing(mode) => {
                if let Err(e) = inner.start_sniffing(mode, self.retries()) {
                    warn!(error = %e, mode = %mode, "Failed to restart sniffing");
                }
            }
            SessionAction::RolesAvailable { master, slave } => {
                inner.roles.clear();
                let link: Weak<dyn RoleLink> = self.me.clone();
                for (role, wanted) in [(Role::Master, master), (Role::Slave, slave)] {
                    if wanted {
                        let (device, queue) =
                            SubDevice::new(self.sub_interface(role), role, link.clone());
                        inner.roles.push(RoleProxy { role, device, queue });
                    }
                }
                events.push(DeviceEvent::SubInterfacesReady {
                    master: master.then(|| self.sub_interface(Role::Master)),
                    slave: slave.then(|| self.sub_interface(Role::Slave)),
                });
            }
        }
    }

    fn inject(
        &self,
        inner: &mut Inner,
        source: PacketSource,
        pdu: &[u8],
    ) -> Result<(), DeviceError> {
        let response = inner.exchange(Command::send_payload(source, pdu), self.retries())?;
        if !response.succeeded() {
            return Err(DeviceError::Io(TransportError::WriteFailed(format!(
                "payload rejected by firmware: {}",
                hex(&response.body)
            ))));
        }
        Ok(())
    }
}

impl RoleLink for ButterflyShared {
    fn send_as(&self, role: Role, packet: &RadioPacket) -> Result<(), DeviceError> {
        let source = match role {
            Role::Master => PacketSource::Master,
            Role::Slave => PacketSource::Slave,
        };
        let pdu = match packet {
            RadioPacket::Butterfly(p) => match p.fields().ble_packet() {
                Some(ble) => ble.pdu.clone(),
                None => p.data(),
            },
            other => other.data(),
        };
        let mut inner = lock(&self.inner);
        self.inject(&mut inner, source, &pdu)
    }

    fn pump(&self) {
        if let Some(packet) = self.step() {
            let mut inner = lock(&self.inner);
            if inner.backlog.len() >= BACKLOG_LIMIT {
                inner.backlog.pop_front();
            }
            inner.backlog.push_back(packet);
        }
    }

    fn role_active(&self, role: Role) -> bool {
        lock(&self.inner).proxy(role).is_some()
    }
}

/// ButteRFly driver.
pub struct ButterflyDevice {
    shared: Arc<ButterflyShared>,
    opener: TransportOpener,
}

impl ButterflyDevice {
    pub fn new(interface: &str, index: usize, config: DriverConfig) -> Self {
        let opener =
            NusbTransport::opener(BUTTERFLY_VENDOR_ID, BUTTERFLY_PRODUCT_ID, index, config.clone());
        Self::with_opener(interface, config, opener)
    }

    pub fn with_opener(interface: &str, config: DriverConfig, opener: TransportOpener) -> Self {
        let shared = Arc::new_cyclic(|me| ButterflyShared {
            interface: interface.to_string(),
            config,
            inner: Mutex::new(Inner {
                transport: None,
                session: AttackSession::new(),
                channel: 37,
                target: None,
                version: None,
                pending: VecDeque::new(),
                backlog: VecDeque::new(),
                roles: Vec::new(),
            }),
            subscribers: SubscriberList::new(),
            me: me.clone(),
        });
        Self { shared, opener }
    }

    /// Firmware version reported at init.
    pub fn version(&self) -> Option<(u8, u8)> {
        lock(&self.shared.inner).version
    }

    pub fn link_state(&self) -> LinkState {
        lock(&self.shared.inner).session.link()
    }

    /// Jam frames whose bytes at `offset` match `pattern`.
    pub fn set_reactive_jamming(&self, offset: u8, pattern: &[u8]) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        inner.command(Command::set_reactive_jammer(offset, pattern), self.shared.retries())
    }

    fn switch_mode(
        &self,
        mode: SniffingMode,
        target: Option<BdAddress>,
        channel: Option<u8>,
    ) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        inner.target = target;
        if let Some(channel) = channel {
            inner.channel = channel;
        }
        inner.start_sniffing(mode, self.shared.retries())
    }
}

impl Device for ButterflyDevice {
    fn interface(&self) -> &str {
        &self.shared.interface
    }

    #[instrument(level = "info", skip(self), fields(interface = %self.shared.interface))]
    fn init(&self) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        if inner.transport.is_some() {
            return Ok(());
        }
        let transport = match (self.opener)() {
            Ok(t) => t,
            Err(TransportError::DeviceNotFound { .. }) => {
                warn!("No ButteRFly device found");
                return Ok(());
            }
            Err(e) => {
                return Err(DeviceError::Init {
                    interface: self.shared.interface.clone(),
                    message: e.to_string(),
                });
            }
        };
        inner.transport = Some(transport);

        let retries = self.shared.retries();
        let configured = (|| {
            let version = inner.exchange(Command::new(CommandType::GetVersion), retries)?;
            inner.version = version.version();
            inner.command(Command::select_controller(Controller::Ble), retries)?;
            inner.command(Command::new(CommandType::EnableController), retries)?;
            inner.start_sniffing(SniffingMode::Advertisements, retries)
        })();
        if let Err(e) = configured {
            inner.transport = None;
            return Err(DeviceError::Init {
                interface: self.shared.interface.clone(),
                message: e.to_string(),
            });
        }
        info!(version = ?inner.version, "ButteRFly ready");
        Ok(())
    }

    fn is_up(&self) -> bool {
        lock(&self.shared.inner)
            .transport
            .as_ref()
            .is_some_and(|t| t.is_connected())
    }

    fn send(&self, packet: &RadioPacket) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        match packet {
            RadioPacket::Butterfly(p) => match p.fields() {
                ButterflyMessage::Command(command) => {
                    inner.command(command.clone(), self.shared.retries())
                }
                ButterflyMessage::Packet(ble) => {
                    self.shared.inject(&mut inner, ble.source, &ble.pdu)
                }
                _ => Err(DeviceError::Unsupported {
                    interface: self.shared.interface.clone(),
                    operation: "sending responses or notifications",
                }),
            },
            RadioPacket::Raw { data, .. } => {
                self.shared.inject(&mut inner, PacketSource::General, data)
            }
            _ => Err(DeviceError::Unsupported {
                interface: self.shared.interface.clone(),
                operation: "foreign frame transmission",
            }),
        }
    }

    fn recv(&self) -> Option<RadioPacket> {
        if let Some(packet) = lock(&self.shared.inner).backlog.pop_front() {
            return Some(packet);
        }
        self.shared.step()
    }

    fn close(&self) {
        let mut inner = lock(&self.shared.inner);
        if inner.transport.is_none() {
            return;
        }
        if let Err(e) = inner.command(Command::new(CommandType::DisableController), 1) {
            warn!(error = %e, "Failed to disable controller");
        }
        inner.roles.clear();
        inner.pending.clear();
        inner.transport = None;
        info!(interface = %self.shared.interface, "ButteRFly closed");
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::SniffingAdvertisements,
            Capability::SniffingNewConnection,
            Capability::SniffingExistingConnection,
            Capability::ChangingChannel,
            Capability::Injecting,
            Capability::HijackingMaster,
            Capability::HijackingSlave,
            Capability::MitmingExistingConnection,
            Capability::JammingAdvertisements,
        ]
    }

    fn subscribers(&self) -> &SubscriberList {
        &self.shared.subscribers
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_sub_interfaces(&self) -> (Option<String>, Option<String>) {
        let inner = lock(&self.shared.inner);
        (
            inner.proxy(Role::Master).map(|p| p.device.interface().to_string()),
            inner.proxy(Role::Slave).map(|p| p.device.interface().to_string()),
        )
    }

    fn get_connections(&self) -> Vec<ConnectionInfo> {
        let inner = lock(&self.shared.inner);
        match inner.session.connection().parameters().access_address {
            Some(aa) if inner.session.is_synchronized() => vec![ConnectionInfo {
                handle: 0,
                address: format!("0x{:08X}", aa),
            }],
            _ => Vec::new(),
        }
    }

    fn sub_device(&self, name: &str) -> Option<Arc<dyn Device>> {
        let inner = lock(&self.shared.inner);
        inner
            .roles
            .iter()
            .find(|p| p.device.interface() == name)
            .map(|p| p.device.clone() as Arc<dyn Device>)
    }

    fn as_channel_control(&self) -> Option<&dyn ChannelControl> {
        Some(self)
    }

    fn as_hijackable(&self) -> Option<&dyn Hijackable> {
        Some(self)
    }

    fn as_ble_sniffer(&self) -> Option<&dyn BleSniffer> {
        Some(self)
    }
}

impl ChannelControl for ButterflyDevice {
    fn set_channel(&self, channel: u8) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        inner.command(Command::set_channel(channel), self.shared.retries())?;
        inner.channel = channel;
        Ok(())
    }

    fn channel(&self) -> Result<u8, DeviceError> {
        let mut inner = lock(&self.shared.inner);
        let response =
            inner.exchange(Command::new(CommandType::GetChannel), self.shared.retries())?;
        Ok(response.body.first().copied().unwrap_or(inner.channel))
    }
}

impl Hijackable for ButterflyDevice {
    fn start_attack(&self, attack: AttackKind) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        inner.session.launch(attack)?;
        if let Err(e) = inner.command(Command::start_attack(attack.code()), self.shared.retries()) {
            inner.session.cancel_launch();
            return Err(e);
        }
        Ok(())
    }

    fn attack_status(&self) -> (AttackKind, AttackStatus) {
        let inner = lock(&self.shared.inner);
        (inner.session.attack(), inner.session.status())
    }
}

impl BleSniffer for ButterflyDevice {
    fn sniff_advertisements(
        &self,
        target: Option<BdAddress>,
        channel: u8,
    ) -> Result<(), DeviceError> {
        self.switch_mode(SniffingMode::Advertisements, target, Some(channel))
    }

    fn sniff_new_connections(
        &self,
        target: Option<BdAddress>,
        channel: u8,
    ) -> Result<(), DeviceError> {
        self.switch_mode(SniffingMode::NewConnection, target, Some(channel))
    }

    fn sniff_existing_connection(
        &self,
        access_address: Option<u32>,
        crc_init: Option<u32>,
        channel_map: Option<u64>,
    ) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        inner
            .session
            .connection_mut()
            .seed(access_address, crc_init, channel_map);
        inner.start_sniffing(SniffingMode::ExistingConnection, self.shared.retries())
    }

    fn is_synchronized(&self) -> bool {
        lock(&self.shared.inner).session.is_synchronized()
    }

    fn connection_parameters(&self) -> ConnectionParameters {
        lock(&self.shared.inner).session.connection().parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::butterfly::BlePacket;
    use crate::transport::MockTransport;

    /// Mock that acknowledges every command with an empty success response.
    fn firmware() -> MockTransport {
        let mock = MockTransport::new(BUTTERFLY_VENDOR_ID, BUTTERFLY_PRODUCT_ID);
        mock.set_responder(|data| match ButterflyMessage::dissect(data) {
            Ok(ButterflyMessage::Command(cmd)) => {
                let body = match cmd.command_type {
                    CommandType::GetVersion => vec![3, 1],
                    CommandType::GetChannel => vec![12],
                    _ => vec![0x00],
                };
                vec![
                    ButterflyMessage::Response(Response {
                        command_type: cmd.command_type,
                        body,
                    })
                    .build(),
                ]
            }
            _ => Vec::new(),
        });
        mock
    }

    fn device(mock: &MockTransport) -> ButterflyDevice {
        let device =
            ButterflyDevice::with_opener("butterfly0", DriverConfig::default(), mock.opener());
        device.init().unwrap();
        assert!(device.is_up());
        device
    }

    fn notification(n: Notification) -> Vec<u8> {
        ButterflyMessage::Notification(n).build()
    }

    fn connection_report(status: ConnectionStatus) -> Vec<u8> {
        notification(Notification::ConnectionReport(status))
    }

    fn ble(source: PacketSource, pdu: &[u8]) -> Vec<u8> {
        ButterflyMessage::Packet(BlePacket {
            timestamp: 1,
            rssi: -50,
            channel: 3,
            source,
            access_address: 0x50654A2B,
            pdu: pdu.to_vec(),
        })
        .build()
    }

    fn connect_request() -> Vec<u8> {
        let request = ConnectRequest {
            initiator: BdAddress([1, 2, 3, 4, 5, 6]),
            advertiser: BdAddress([6, 5, 4, 3, 2, 1]),
            access_address: 0x50654A2B,
            crc_init: 0x0BB1E4,
            win_size: 3,
            win_offset: 1,
            hop_interval: 24,
            latency: 0,
            timeout: 72,
            channel_map: 0x1F_FFFF_FFFF,
            hop_increment: 9,
            sca: 0,
        };
        ButterflyMessage::Packet(BlePacket {
            timestamp: 0,
            rssi: -40,
            channel: 37,
            source: PacketSource::General,
            access_address: ADVERTISING_ACCESS_ADDRESS,
            pdu: request.to_pdu(),
        })
        .build()
    }

    fn synchronized(mock: &MockTransport) -> ButterflyDevice {
        let device = device(mock);
        device.sniff_new_connections(None, 37).unwrap();
        mock.queue_read(&connect_request());
        mock.queue_read(&connection_report(ConnectionStatus::Started));
        assert!(device.recv().is_some());
        assert!(device.recv().is_none());
        assert!(device.is_synchronized());
        device
    }

    #[test]
    fn test_init_queries_version() {
        let mock = firmware();
        let device = device(&mock);
        assert_eq!(device.version(), Some((3, 1)));
        assert_eq!(device.as_channel_control().unwrap().channel().unwrap(), 12);
    }

    #[test]
    fn test_command_times_out_after_retries() {
        let mock = MockTransport::new(BUTTERFLY_VENDOR_ID, BUTTERFLY_PRODUCT_ID);
        let config = DriverConfig {
            command_retries: 3,
            ..Default::default()
        };
        let device = ButterflyDevice::with_opener("butterfly0", config, mock.opener());
        assert!(matches!(device.init(), Err(DeviceError::Init { .. })));
        assert_eq!(mock.get_writes().len(), 3);
        assert!(!device.is_up());
    }

    #[test]
    fn test_messages_received_during_exchange_are_kept() {
        let mock = firmware();
        let device = device(&mock);
        mock.queue_read(&ble(PacketSource::General, &[0x02, 0x01, 0xAA]));
        device.as_channel_control().unwrap().set_channel(5).unwrap();

        match device.recv() {
            Some(RadioPacket::Butterfly(p)) => {
                assert_eq!(p.fields().ble_packet().unwrap().pdu, vec![0x02, 0x01, 0xAA])
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_connect_request_then_hop_reports_synchronize_last() {
        let mock = firmware();
        let device = device(&mock);
        device.sniff_new_connections(None, 37).unwrap();

        mock.queue_read(&connect_request());
        assert!(device.recv().is_some());
        assert!(!device.is_synchronized());

        mock.queue_read(&notification(Notification::HopIntervalReport(24)));
        assert!(device.recv().is_none());
        assert!(!device.is_synchronized());

        mock.queue_read(&notification(Notification::HopIncrementReport(9)));
        assert!(device.recv().is_none());
        assert!(device.is_synchronized());
    }

    #[test]
    fn test_existing_connection_recovery_answers_reports() {
        let mock = firmware();
        let device = device(&mock);
        device.sniff_existing_connection(None, None, None).unwrap();
        mock.clear_writes();

        for n in [
            Notification::AccessAddressReport(0x50654A2B),
            Notification::CrcInitReport(0x123456),
            Notification::ChannelMapReport(0x1F_FFFF_FFFF),
            Notification::HopIntervalReport(36),
        ] {
            mock.queue_read(&notification(n));
            device.recv();
            assert!(!device.is_synchronized());
        }
        mock.queue_read(&notification(Notification::HopIncrementReport(7)));
        device.recv();
        assert!(device.is_synchronized());

        let sent: Vec<CommandType> = mock
            .get_writes()
            .iter()
            .filter_map(|w| match ButterflyMessage::dissect(w) {
                Ok(ButterflyMessage::Command(c)) => Some(c.command_type),
                _ => None,
            })
            .collect();
        assert_eq!(
            sent,
            vec![
                CommandType::SetAccessAddress,
                CommandType::SetCrcInit,
                CommandType::SetChannelMap,
                CommandType::SetHopInterval,
            ]
        );
    }

    #[test]
    fn test_connection_lost_clears_parameters() {
        let mock = firmware();
        let device = synchronized(&mock);

        mock.queue_read(&connection_report(ConnectionStatus::Lost));
        device.recv();
        assert!(!device.is_synchronized());
        assert_eq!(device.connection_parameters(), ConnectionParameters::default());
        assert_eq!(device.link_state(), LinkState::Synchronizing);
    }

    #[test]
    fn test_mitm_routes_frames_to_sub_devices() {
        let mock = firmware();
        let device = synchronized(&mock);
        assert_eq!(device.get_connections().len(), 1);

        device.start_attack(AttackKind::Mitm).unwrap();
        mock.queue_read(&connection_report(ConnectionStatus::AttackSuccess));
        device.recv();
        assert_eq!(
            device.get_sub_interfaces(),
            (Some("butterfly0:sub1".to_string()), Some("butterfly0:sub2".to_string()))
        );

        let master = device.sub_device("butterfly0:sub1").unwrap();
        let slave = device.sub_device("butterfly0:sub2").unwrap();
        assert!(master.is_up() && slave.is_up());

        mock.queue_read(&ble(PacketSource::Slave, &[0x0E, 0x01, 0x42]));
        mock.queue_read(&ble(PacketSource::Master, &[0x0E, 0x01, 0x43]));
        mock.queue_read(&ble(PacketSource::General, &[0x0E, 0x01, 0x44]));

        // Polling the master proxy pumps the main device once.
        assert!(master.recv().is_some());
        assert!(slave.recv().is_some());
        assert!(slave.recv().is_none());
        // The general frame was parked for the main interface.
        assert!(device.recv().is_some());

        mock.clear_writes();
        master.send(&RadioPacket::raw(&[0x03, 0x01, 0x02])).unwrap();
        let sent = ButterflyMessage::dissect(&mock.get_writes()[0]).unwrap();
        assert_eq!(
            sent,
            ButterflyMessage::Command(Command::send_payload(
                PacketSource::Master,
                &[0x03, 0x01, 0x02]
            ))
        );
    }

    #[test]
    fn test_single_hijack_exposes_one_interface() {
        let mock = firmware();
        let device = synchronized(&mock);
        device.start_attack(AttackKind::SlaveHijacking).unwrap();
        mock.queue_read(&connection_report(ConnectionStatus::AttackStarted));
        mock.queue_read(&connection_report(ConnectionStatus::AttackSuccess));
        device.recv();
        device.recv();
        assert_eq!(device.attack_status(), (AttackKind::SlaveHijacking, AttackStatus::Success));
        assert_eq!(device.get_sub_interfaces(), (None, Some("butterfly0:sub2".to_string())));
    }

    #[test]
    fn test_attack_requires_synchronization() {
        let mock = firmware();
        let device = device(&mock);
        assert!(matches!(
            device.start_attack(AttackKind::MasterHijacking),
            Err(DeviceError::StateTransition(_))
        ));
    }
}
