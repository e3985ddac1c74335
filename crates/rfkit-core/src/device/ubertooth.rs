//! Ubertooth One BLE sniffer driver.
//!
//! The Ubertooth is driven by vendor control requests and streams 64-byte
//! reports on its bulk IN endpoint. Every reconfiguration runs
//! stop → set frequency → configure → start while holding the device lock.

use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, instrument, warn};

use super::{BleSniffer, Capability, ChannelControl, Device, DeviceError, Jammable, RadioPacket};
use crate::config::DriverConfig;
use crate::dissector::{Dissect, Packet, hex};
use crate::events::{DeviceEvent, SubscriberList};
use crate::lock;
use crate::protocol::ble::{
    ADVERTISING_ACCESS_ADDRESS, ADVERTISING_CRC_INIT, ALL_CHANNELS_MAP, BdAddress, ConnectRequest,
    channel_to_frequency, frequency_to_channel, is_connect_request,
};
use crate::protocol::constants::{
    UBERTOOTH_FOLLOW_CONNECTIONS, UBERTOOTH_FOLLOW_NONE, UBERTOOTH_JAM_CONTINUOUS,
    UBERTOOTH_JAM_NONE, UBERTOOTH_MOD_BT_LOW_ENERGY, UBERTOOTH_PRODUCT_ID, UBERTOOTH_VENDOR_ID,
    ubertooth_request as req,
};
use crate::protocol::ubertooth::{LePacket, PromiscuousReport, REPORT_SIZE, UbertoothFrame};
use crate::state::{ConnectionParameters, ConnectionTracker, SniffingMode};
use crate::task::{BackgroundTask, TaskEvent};
use crate::transport::{NusbTransport, TransportError, TransportOpener, UsbTransport};

/// Prefix length handed to BTLE_SET_TARGET: match all 48 address bits.
const TARGET_MASK_BITS: u8 = 48;

struct Inner {
    transport: Option<Arc<dyn UsbTransport>>,
    mode: SniffingMode,
    channel: u8,
    target: Option<BdAddress>,
    jamming: bool,
    crc_checking: bool,
    connection: ConnectionTracker,
    sweeping: bool,
    sweep_channels: Vec<u8>,
    sweep: Option<BackgroundTask>,
    api_version: Option<u16>,
}

impl Inner {
    fn transport(&self) -> Result<&Arc<dyn UsbTransport>, DeviceError> {
        self.transport
            .as_ref()
            .ok_or_else(|| DeviceError::NotReady("ubertooth".into()))
    }

    fn control(&self, request: u8, value: u16, data: &[u8]) -> Result<(), DeviceError> {
        self.transport()?.control_out(request, value, 0, data)?;
        Ok(())
    }

    /// Stop, tune, configure and start again in the current mode.
    fn restart(&mut self) -> Result<(), DeviceError> {
        let frequency = channel_to_frequency(self.channel).ok_or(DeviceError::Unsupported {
            interface: "ubertooth".into(),
            operation: "channel outside 0-39",
        })?;
        self.control(req::STOP, 0, &[])?;
        self.control(req::SET_CHANNEL, frequency, &[])?;
        self.control(req::SET_MOD, UBERTOOTH_MOD_BT_LOW_ENERGY, &[])?;
        self.control(req::SET_CRC_VERIFY, self.crc_checking as u16, &[])?;
        let jam = if self.jamming {
            UBERTOOTH_JAM_CONTINUOUS
        } else {
            UBERTOOTH_JAM_NONE
        };
        self.control(req::JAM_MODE, jam, &[])?;
        if let Some(target) = self.target {
            let mut data = target.to_air().to_vec();
            data.push(TARGET_MASK_BITS);
            self.control(req::BTLE_SET_TARGET, 0, &data)?;
        }

        match self.mode {
            SniffingMode::Advertisements => {
                self.control(req::BTLE_SNIFFING, UBERTOOTH_FOLLOW_NONE, &[])?
            }
            SniffingMode::NewConnection => {
                self.control(req::BTLE_SNIFFING, UBERTOOTH_FOLLOW_CONNECTIONS, &[])?
            }
            SniffingMode::ExistingConnection => {
                self.control(req::BTLE_PROMISC, 0, &[])?;
                if let Some(aa) = self.connection.parameters().access_address {
                    self.control(req::SET_ACCESS_ADDRESS, 0, &aa.to_le_bytes())?;
                }
            }
        }
        debug!(mode = %self.mode, channel = self.channel, "Ubertooth restarted");
        Ok(())
    }

    /// CRCInit protecting `le`, if it is known.
    fn crc_init_for(&self, le: &LePacket) -> Option<u32> {
        if le.access_address == ADVERTISING_ACCESS_ADDRESS {
            return Some(ADVERTISING_CRC_INIT);
        }
        let parameters = self.connection.parameters();
        match parameters.access_address {
            Some(aa) if aa == le.access_address => parameters.crc_init,
            _ => None,
        }
    }

    fn sweep_needed(&self) -> bool {
        self.sweeping
            && self.mode != SniffingMode::ExistingConnection
            && self.connection.parameters().access_address.is_none()
    }

    /// Apply one recovered parameter in acquisition order.
    fn apply_report(&mut self, report: PromiscuousReport) -> Result<(), DeviceError> {
        match report {
            PromiscuousReport::AccessAddress(aa) => {
                self.connection.update_access_address(aa);
            }
            PromiscuousReport::CrcInit(crc_init) => {
                self.connection.update_crc_init(crc_init)?;
                // Firmware can only follow connections using every data channel.
                self.connection.update_channel_map(ALL_CHANNELS_MAP)?;
            }
            PromiscuousReport::HopInterval(interval) => {
                self.connection.update_hop_interval(interval)?;
            }
            PromiscuousReport::HopIncrement(increment) => {
                self.connection.update_hop_increment(increment)?;
            }
        }
        Ok(())
    }
}

struct Shared {
    inner: Mutex<Inner>,
}

/// Ubertooth One driver.
pub struct UbertoothDevice {
    interface: String,
    config: DriverConfig,
    opener: TransportOpener,
    shared: Arc<Shared>,
    subscribers: SubscriberList,
}

impl UbertoothDevice {
    /// Driver for the `index`-th Ubertooth on the bus.
    pub fn new(interface: &str, index: usize, config: DriverConfig) -> Self {
        let opener =
            NusbTransport::opener(UBERTOOTH_VENDOR_ID, UBERTOOTH_PRODUCT_ID, index, config.clone());
        Self::with_opener(interface, config, opener)
    }

    pub fn with_opener(interface: &str, config: DriverConfig, opener: TransportOpener) -> Self {
        let inner = Inner {
            transport: None,
            mode: SniffingMode::Advertisements,
            channel: 37,
            target: None,
            jamming: false,
            crc_checking: true,
            connection: ConnectionTracker::new(),
            sweeping: false,
            sweep_channels: config.sweep_channels.clone(),
            sweep: None,
            api_version: None,
        };
        Self {
            interface: interface.to_string(),
            config,
            opener,
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
            }),
            subscribers: SubscriberList::new(),
        }
    }

    pub fn api_version(&self) -> Option<u16> {
        lock(&self.shared.inner).api_version
    }

    pub fn mode(&self) -> SniffingMode {
        lock(&self.shared.inner).mode
    }

    pub fn set_crc_checking(&self, enabled: bool) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        inner.crc_checking = enabled;
        inner.restart()
    }

    /// Cycle through `channels` (default: configured sweep channels) until a
    /// connection is detected.
    pub fn set_sweeping(
        &self,
        enabled: bool,
        channels: Option<Vec<u8>>,
    ) -> Result<(), DeviceError> {
        let stale = {
            let mut inner = lock(&self.shared.inner);
            inner.sweeping = enabled;
            if let Some(channels) = channels {
                inner.sweep_channels = channels;
            }
            inner.sweep.take()
        };
        if let Some(mut task) = stale {
            task.stop();
        }
        if enabled {
            self.start_sweep()?;
        }
        Ok(())
    }

    pub fn is_sweeping(&self) -> bool {
        lock(&self.shared.inner)
            .sweep
            .as_ref()
            .is_some_and(BackgroundTask::is_running)
    }

    fn start_sweep(&self) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        if !inner.sweep_needed() || inner.transport.is_none() || inner.sweep.is_some() {
            return Ok(());
        }
        let channels = inner.sweep_channels.clone();
        if channels.is_empty() {
            return Ok(());
        }
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let dwell = self.config.sweep_dwell();
        let tick = self.config.task_poll();

        let task = BackgroundTask::spawn(&format!("{}-sweep", self.interface), move |token, tx| {
            for &channel in channels.iter().cycle() {
                if token.is_cancelled() {
                    return;
                }
                let hopped = {
                    let Some(shared) = shared.upgrade() else {
                        return;
                    };
                    let mut inner = lock(&shared.inner);
                    if inner.connection.parameters().access_address.is_some() {
                        let _ = tx.send(TaskEvent::ConnectionDetected {
                            channel: inner.channel,
                        });
                        return;
                    }
                    inner.channel = channel;
                    inner.restart()
                };
                match hopped {
                    Ok(()) => {
                        let _ = tx.send(TaskEvent::ChannelChanged { channel });
                    }
                    Err(e) => {
                        let _ = tx.send(TaskEvent::Failed {
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
                if !token.sleep(dwell, tick) {
                    return;
                }
            }
        })
        .map_err(|e| DeviceError::Init {
            interface: self.interface.clone(),
            message: format!("cannot spawn sweep task: {}", e),
        })?;
        inner.sweep = Some(task);
        Ok(())
    }

    fn switch_mode(
        &self,
        mode: SniffingMode,
        target: Option<BdAddress>,
        channel: Option<u8>,
    ) -> Result<(), DeviceError> {
        let stale = {
            let mut inner = lock(&self.shared.inner);
            inner.mode = mode;
            inner.target = target;
            if let Some(channel) = channel {
                inner.channel = channel;
            }
            if mode != SniffingMode::ExistingConnection {
                inner.connection.clear();
            }
            inner.restart()?;
            info!(
                interface = %self.interface,
                mode = %mode,
                channel = inner.channel,
                "Sniffing mode set"
            );
            inner.sweep.take()
        };
        if let Some(mut task) = stale {
            task.stop();
        }
        self.start_sweep()
    }

    fn handle_sweep_events(&self, task: &BackgroundTask) {
        for event in task.drain_events() {
            match event {
                TaskEvent::ChannelChanged { channel } => debug!(channel, "Sweep hop"),
                TaskEvent::ConnectionDetected { channel } => {
                    info!(channel, "Sweep stopped: connection detected")
                }
                TaskEvent::Failed { reason } => warn!(reason = %reason, "Sweep failed"),
                TaskEvent::DeviceFound { .. } => {}
            }
        }
    }
}

impl Device for UbertoothDevice {
    fn interface(&self) -> &str {
        &self.interface
    }

    #[instrument(level = "info", skip(self), fields(interface = %self.interface))]
    fn init(&self) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        if inner.transport.is_some() {
            return Ok(());
        }
        let transport = match (self.opener)() {
            Ok(t) => t,
            Err(TransportError::DeviceNotFound { .. }) => {
                warn!("No Ubertooth found");
                return Ok(());
            }
            Err(e) => {
                return Err(DeviceError::Init {
                    interface: self.interface.clone(),
                    message: e.to_string(),
                });
            }
        };

        let init_err = |e: TransportError| DeviceError::Init {
            interface: self.interface.clone(),
            message: e.to_string(),
        };
        transport.control_in(req::PING, 0, 0, 0).map_err(init_err)?;
        let version = transport
            .control_in(req::GET_API_VERSION, 0, 0, 2)
            .map_err(init_err)?;
        inner.api_version =
            (version.len() >= 2).then(|| u16::from_le_bytes([version[0], version[1]]));
        inner.transport = Some(transport);

        if let Err(e) = inner.restart() {
            inner.transport = None;
            return Err(DeviceError::Init {
                interface: self.interface.clone(),
                message: e.to_string(),
            });
        }
        info!(api_version = ?inner.api_version, "Ubertooth ready");
        Ok(())
    }

    fn is_up(&self) -> bool {
        lock(&self.shared.inner)
            .transport
            .as_ref()
            .is_some_and(|t| t.is_connected())
    }

    fn send(&self, _packet: &RadioPacket) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported {
            interface: self.interface.clone(),
            operation: "transmission",
        })
    }

    fn recv(&self) -> Option<RadioPacket> {
        let mut events = Vec::new();
        let (frame, finished_sweep) = {
            let mut inner = lock(&self.shared.inner);
            if let Some(task) = inner.sweep.as_ref() {
                self.handle_sweep_events(task);
            }

            let data = match inner.transport.as_ref()?.read(REPORT_SIZE) {
                Ok(data) => data,
                Err(e) if e.is_timeout() => return None,
                Err(e) => {
                    warn!(error = %e, "Ubertooth read failed");
                    return None;
                }
            };
            let frame = match UbertoothFrame::dissect(&data) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, data = %hex(&data), "Dropping undecodable report");
                    return None;
                }
            };

            if let Some(le) = frame.le_packet() {
                if inner.crc_checking
                    && inner.crc_init_for(le).is_some_and(|crc_init| !le.crc_matches(crc_init))
                {
                    debug!(
                        aa = format_args!("0x{:08X}", le.access_address),
                        "Dropping frame with bad CRC"
                    );
                    return None;
                }
            }

            let was_synchronized = inner.connection.is_synchronized();
            if let Some(le) = frame.le_packet() {
                if inner.mode == SniffingMode::NewConnection
                    && le.access_address == ADVERTISING_ACCESS_ADDRESS
                    && is_connect_request(&le.pdu)
                {
                    match ConnectRequest::from_pdu(&le.pdu) {
                        Ok(request) => inner.connection.apply_connect_request(&request),
                        Err(e) => debug!(error = %e, "Malformed CONNECT_REQ"),
                    }
                }
            } else if let Some(report) = frame.promiscuous_report() {
                if let Err(e) = inner.apply_report(report) {
                    warn!(error = %e, "Out-of-order promiscuous report");
                }
            }
            if !was_synchronized && inner.connection.is_synchronized() {
                events.push(DeviceEvent::ConnectionSynchronized {
                    parameters: inner.connection.parameters(),
                });
            }

            let finished = if inner.connection.parameters().access_address.is_some() {
                inner.sweep.take()
            } else {
                None
            };
            (frame, finished)
        };

        if let Some(mut task) = finished_sweep {
            task.stop();
        }
        for event in events {
            self.publish(event);
        }
        Some(RadioPacket::Ubertooth(Packet::from_fields(frame)))
    }

    fn close(&self) {
        let stale = lock(&self.shared.inner).sweep.take();
        if let Some(mut task) = stale {
            task.stop();
        }
        let mut inner = lock(&self.shared.inner);
        if let Some(transport) = inner.transport.take() {
            if let Err(e) = transport.control_out(req::STOP, 0, 0, &[]) {
                warn!(error = %e, "Failed to stop Ubertooth");
            }
            info!(interface = %self.interface, "Ubertooth closed");
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::SniffingAdvertisements,
            Capability::SniffingNewConnection,
            Capability::SniffingExistingConnection,
            Capability::ChangingChannel,
            Capability::JammingConnections,
            Capability::JammingAdvertisements,
        ]
    }

    fn subscribers(&self) -> &SubscriberList {
        &self.subscribers
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_channel_control(&self) -> Option<&dyn ChannelControl> {
        Some(self)
    }

    fn as_jammable(&self) -> Option<&dyn Jammable> {
        Some(self)
    }

    fn as_ble_sniffer(&self) -> Option<&dyn BleSniffer> {
        Some(self)
    }
}

impl ChannelControl for UbertoothDevice {
    fn set_channel(&self, channel: u8) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        let previous = inner.channel;
        inner.channel = channel;
        if let Err(e) = inner.restart() {
            inner.channel = previous;
            return Err(e);
        }
        Ok(())
    }

    fn channel(&self) -> Result<u8, DeviceError> {
        let inner = lock(&self.shared.inner);
        let data = inner.transport()?.control_in(req::GET_CHANNEL, 0, 0, 2)?;
        if data.len() >= 2 {
            let frequency = u16::from_le_bytes([data[0], data[1]]);
            if let Some(channel) = frequency_to_channel(frequency) {
                return Ok(channel);
            }
        }
        Ok(inner.channel)
    }
}

impl Jammable for UbertoothDevice {
    fn set_jamming(&self, enabled: bool) -> Result<(), DeviceError> {
        let mut inner = lock(&self.shared.inner);
        inner.jamming = enabled;
        let value = if enabled {
            UBERTOOTH_JAM_CONTINUOUS
        } else {
            UBERTOOTH_JAM_NONE
        };
        inner.control(req::JAM_MODE, value, &[])
    }

    fn is_jamming(&self) -> bool {
        lock(&self.shared.inner).jamming
    }
}

impl BleSniffer for UbertoothDevice {
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
        lock(&self.shared.inner)
            .connection
            .seed(access_address, crc_init, channel_map);
        self.switch_mode(SniffingMode::ExistingConnection, None, None)
    }

    fn is_synchronized(&self) -> bool {
        lock(&self.shared.inner).connection.is_synchronized()
    }

    fn connection_parameters(&self) -> ConnectionParameters {
        lock(&self.shared.inner).connection.parameters()
    }
}

impl Drop for UbertoothDevice {
    fn drop(&mut self) {
        let stale = lock(&self.shared.inner).sweep.take();
        if let Some(mut task) = stale {
            task.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ubertooth::{PacketType, UbertoothHeader, UbertoothPayload};
    use crate::transport::{ControlRequest, MockTransport};
    use std::time::Duration;

    fn report(report: PromiscuousReport) -> Vec<u8> {
        let mut bytes = UbertoothFrame {
            header: UbertoothHeader::new(PacketType::LePromisc),
            payload: UbertoothPayload::Promiscuous(report),
        }
        .build();
        bytes.resize(REPORT_SIZE, 0);
        bytes
    }

    fn le_packet(access_address: u32, crc_init: u32, pdu: Vec<u8>) -> LePacket {
        let crc = crate::protocol::ble::crc24(crc_init, &pdu);
        LePacket {
            access_address,
            pdu,
            crc: u32::from_le_bytes([crc[0], crc[1], crc[2], 0]),
        }
    }

    fn le_report(packet: LePacket) -> Vec<u8> {
        UbertoothFrame {
            header: UbertoothHeader::new(PacketType::LePacket),
            payload: UbertoothPayload::Le(packet),
        }
        .build()
    }

    fn device(mock: &MockTransport) -> UbertoothDevice {
        let device =
            UbertoothDevice::with_opener("ubertooth0", DriverConfig::default(), mock.opener());
        device.init().unwrap();
        assert!(device.is_up());
        device
    }

    #[test]
    fn test_init_configures_advertisement_mode() {
        let mock = MockTransport::new(UBERTOOTH_VENDOR_ID, UBERTOOTH_PRODUCT_ID);
        mock.queue_control_response(&[]);
        mock.queue_control_response(&[0x08, 0x01]);
        let device = device(&mock);
        assert_eq!(device.api_version(), Some(0x0108));

        let requests: Vec<u8> = mock.get_control_requests().iter().map(|r| r.request()).collect();
        let stop = requests.iter().position(|r| *r == req::STOP).unwrap();
        let tune = requests.iter().position(|r| *r == req::SET_CHANNEL).unwrap();
        let start = requests.iter().position(|r| *r == req::BTLE_SNIFFING).unwrap();
        assert!(stop < tune && tune < start);
        assert!(mock.get_control_requests().contains(&ControlRequest::Out {
            request: req::SET_CHANNEL,
            value: 2402,
            index: 0,
            data: vec![],
        }));
    }

    #[test]
    fn test_missing_hardware_is_not_an_error() {
        let device = UbertoothDevice::with_opener(
            "ubertooth3",
            DriverConfig::default(),
            Box::new(|| Err(TransportError::DeviceNotFound { vid: 0, pid: 0, index: 3 })),
        );
        assert!(device.init().is_ok());
        assert!(!device.is_up());
        assert!(device.recv().is_none());
    }

    #[test]
    fn test_existing_connection_synchronizes_on_last_report() {
        let mock = MockTransport::new(UBERTOOTH_VENDOR_ID, UBERTOOTH_PRODUCT_ID);
        let device = device(&mock);
        device.sniff_existing_connection(None, None, None).unwrap();

        mock.queue_read(&report(PromiscuousReport::AccessAddress(0x50654A2B)));
        mock.queue_read(&report(PromiscuousReport::CrcInit(0x123456)));
        mock.queue_read(&report(PromiscuousReport::HopInterval(36)));
        assert!(device.recv().is_some());
        assert!(device.recv().is_some());
        assert!(device.recv().is_some());
        assert!(!device.is_synchronized());
        assert_eq!(device.connection_parameters().channel_map, Some(ALL_CHANNELS_MAP));

        mock.queue_read(&report(PromiscuousReport::HopIncrement(7)));
        assert!(device.recv().is_some());
        assert!(device.is_synchronized());
        assert!(device.recv().is_none());
    }

    #[test]
    fn test_connect_request_seeds_parameters() {
        let mock = MockTransport::new(UBERTOOTH_VENDOR_ID, UBERTOOTH_PRODUCT_ID);
        let device = device(&mock);
        device.sniff_new_connections(None, 37).unwrap();

        let request = ConnectRequest {
            initiator: BdAddress([1, 2, 3, 4, 5, 6]),
            advertiser: BdAddress([6, 5, 4, 3, 2, 1]),
            access_address: 0xAF9A9330,
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
        let frame = UbertoothFrame {
            header: UbertoothHeader::new(PacketType::LePacket),
            payload: UbertoothPayload::Le(le_packet(
                ADVERTISING_ACCESS_ADDRESS,
                ADVERTISING_CRC_INIT,
                request.to_pdu(),
            )),
        };
        mock.queue_read(&frame.build());
        device.recv().unwrap();
        assert!(device.is_synchronized());
        assert_eq!(device.connection_parameters().hop_increment, Some(9));
    }

    #[test]
    fn test_bad_crc_frames_are_dropped() {
        let mock = MockTransport::new(UBERTOOTH_VENDOR_ID, UBERTOOTH_PRODUCT_ID);
        let device = device(&mock);
        let adv = vec![0x40, 0x09, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6, 0x02, 0x01, 0x06];

        let good = le_packet(ADVERTISING_ACCESS_ADDRESS, ADVERTISING_CRC_INIT, adv.clone());
        assert_eq!(good.crc, 0xF6EA87);
        let mut bad = good.clone();
        bad.crc ^= 0x000100;
        mock.queue_read(&le_report(bad.clone()));
        mock.queue_read(&le_report(good));
        assert!(device.recv().is_none());
        assert!(device.recv().is_some());

        // Data frames are only checked once the connection's CRCInit is known.
        device.sniff_existing_connection(Some(0x50654A2B), None, None).unwrap();
        let version_ind = vec![0x03, 0x06, 0x0C, 0x08, 0x0F, 0x00, 0x0D, 0x41];
        let mut data = le_packet(0x50654A2B, 0x0BB1E4, version_ind);
        data.crc ^= 1;
        mock.queue_read(&le_report(data.clone()));
        assert!(device.recv().is_some());

        device.sniff_existing_connection(Some(0x50654A2B), Some(0x0BB1E4), None).unwrap();
        mock.queue_read(&le_report(data.clone()));
        assert!(device.recv().is_none());
        data.crc ^= 1;
        mock.queue_read(&le_report(data));
        assert!(device.recv().is_some());

        device.set_crc_checking(false).unwrap();
        mock.queue_read(&le_report(bad));
        assert!(device.recv().is_some());
    }

    #[test]
    fn test_sweep_stops_once_access_address_known() {
        let mock = MockTransport::new(UBERTOOTH_VENDOR_ID, UBERTOOTH_PRODUCT_ID);
        let config = DriverConfig {
            sweep_dwell_ms: 2,
            task_poll_ms: 1,
            ..Default::default()
        };
        let device = UbertoothDevice::with_opener("ubertooth0", config, mock.opener());
        device.init().unwrap();
        device.sniff_new_connections(None, 37).unwrap();
        device.set_sweeping(true, Some(vec![37, 38, 39])).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(device.is_sweeping());

        // Existing-connection mode disables the sweep, then AA recovery ends it for good.
        device.sniff_existing_connection(None, None, None).unwrap();
        mock.queue_read(&report(PromiscuousReport::AccessAddress(0x50654A2B)));
        device.recv().unwrap();
        assert!(!device.is_sweeping());
    }

    #[test]
    fn test_jamming_and_capabilities() {
        let mock = MockTransport::new(UBERTOOTH_VENDOR_ID, UBERTOOTH_PRODUCT_ID);
        let device = device(&mock);
        let jammer = device.as_jammable().unwrap();
        jammer.set_jamming(true).unwrap();
        assert!(jammer.is_jamming());
        assert!(device.has_capabilities(&[
            Capability::JammingConnections,
            Capability::ChangingChannel
        ]));
        assert!(!device.has_capabilities(&[Capability::Injecting]));
        assert!(device.has_capabilities(&[]));
        assert!(device.as_hijackable().is_none());
        assert!(matches!(
            device.send(&RadioPacket::raw(&[1])),
            Err(DeviceError::Unsupported { .. })
        ));
    }
}
