//! RFStorm (nRF24LU1+ research firmware) driver for Mosart dongles.
//!
//! Every request is a bulk write `[request, data...]` answered by one 64-byte
//! report. Received frames are fetched by polling RECEIVE_PAYLOAD.

use std::any::Any;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use tracing::{debug, info, instrument, trace, warn};

use super::{Capability, ChannelControl, Device, DeviceError, RadioPacket};
use crate::config::DriverConfig;
use crate::dissector::{Packet, hex};
use crate::events::{DeviceEvent, SubscriberList};
use crate::lock;
use crate::protocol::constants::{
    RF_RATE_2M, RFSTORM_NO_PAYLOAD, RFSTORM_PRODUCT_ID, RFSTORM_REPORT_SIZE, RFSTORM_VENDOR_ID,
    rfstorm_request as req,
};
use crate::protocol::keymap::MosartKeymap;
use crate::protocol::mosart::{
    ADDRESS_SIZE, MosartFrame, MosartKeystroke, PREAMBLE_BYTES, contains_sync_marker, decode_wire,
    resync, whiten,
};
use crate::task::{BackgroundTask, TaskEvent};
use crate::transport::{NusbTransport, TransportError, TransportOpener, UsbTransport};

/// Payload length requested from the radio in promiscuous mode.
const PROMISCUOUS_PAYLOAD_LEN: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfStormMode {
    /// No address filter; frame boundaries are recovered by CRC search.
    Promiscuous {
        /// Surface dongle sync frames instead of dropping them.
        surface_sync: bool,
    },
    /// Only frames sent to `address`.
    Sniffer { address: [u8; ADDRESS_SIZE] },
}

impl Default for RfStormMode {
    fn default() -> Self {
        RfStormMode::Promiscuous {
            surface_sync: false,
        }
    }
}

struct Inner {
    transport: Option<Arc<dyn UsbTransport>>,
    mode: RfStormMode,
    channel: u8,
    sync_injection: bool,
    scan: Option<BackgroundTask>,
    found: Option<(u8, [u8; ADDRESS_SIZE])>,
}

impl Inner {
    fn command(&self, request: u8, data: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| DeviceError::NotReady("rfstorm".into()))?;
        let mut out = Vec::with_capacity(data.len() + 1);
        out.push(request);
        out.extend_from_slice(data);
        transport.write(&out)?;
        match transport.read(RFSTORM_REPORT_SIZE) {
            Ok(report) => Ok(report),
            Err(e) if e.is_timeout() => Err(DeviceError::Timeout {
                what: format!("RFStorm request 0x{:02X}", request),
                attempts: 1,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn enter_mode(&mut self, mode: RfStormMode) -> Result<(), DeviceError> {
        match mode {
            RfStormMode::Promiscuous { .. } => {
                let mut data = vec![
                    PREAMBLE_BYTES.len() as u8,
                    RF_RATE_2M,
                    PROMISCUOUS_PAYLOAD_LEN,
                ];
                data.extend_from_slice(&PREAMBLE_BYTES);
                self.command(req::ENTER_PROMISCUOUS_MODE_GENERIC, &data)?;
            }
            RfStormMode::Sniffer { address } => {
                self.command(req::ENTER_SNIFFER_MODE, &whiten(&address))?;
            }
        }
        self.mode = mode;
        self.command(req::SET_CHANNEL, &[self.channel])?;
        debug!(mode = ?mode, channel = self.channel, "RFStorm mode set");
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), DeviceError> {
        self.command(req::SET_CHANNEL, &[channel])?;
        self.channel = channel;
        Ok(())
    }

    /// One RECEIVE_PAYLOAD poll. `None` when the radio had nothing.
    fn receive(&self) -> Result<Option<Vec<u8>>, DeviceError> {
        let report = match self.command(req::RECEIVE_PAYLOAD, &[]) {
            Ok(report) => report,
            Err(DeviceError::Timeout { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        match report.first() {
            None | Some(&RFSTORM_NO_PAYLOAD) => Ok(None),
            Some(_) => Ok(Some(report)),
        }
    }

    /// Poll once and decode a Mosart frame from whatever arrived.
    fn poll_frame(&self) -> Result<Option<MosartFrame>, DeviceError> {
        let Some(report) = self.receive()? else {
            return Ok(None);
        };
        trace!(report = %hex(&report), "RFStorm report");
        let frame = match self.mode {
            RfStormMode::Promiscuous { surface_sync } => {
                let mut buf = PREAMBLE_BYTES.to_vec();
                buf.extend_from_slice(&report);
                match resync(&buf) {
                    Some((offset, frame)) => {
                        if offset > 0 {
                            trace!(offset, "Realigned frame");
                        }
                        if frame.is_dongle_sync() && !surface_sync {
                            return Ok(None);
                        }
                        frame
                    }
                    None => return Ok(None),
                }
            }
            RfStormMode::Sniffer { address } => {
                // Status byte first; the radio strips preamble and address.
                let mut buf = PREAMBLE_BYTES.to_vec();
                buf.extend_from_slice(&whiten(&address));
                buf.extend_from_slice(report.get(1..).unwrap_or_default());
                match decode_wire(&buf) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(error = %e, "Dropping sniffed frame");
                        return Ok(None);
                    }
                }
            }
        };
        Ok(Some(frame))
    }

    /// Poll until a dongle sync marker shows up or `attempts` polls passed.
    fn wait_for_sync(&self, attempts: u32) -> Result<bool, DeviceError> {
        for _ in 0..attempts {
            if let Some(report) = self.receive()? {
                if contains_sync_marker(&report) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn transmit(&self, air: &[u8]) -> Result<(), DeviceError> {
        let (prefix, payload) = air.split_at(PREAMBLE_BYTES.len().min(air.len()));
        let mut data = vec![payload.len() as u8, prefix.len() as u8];
        data.extend_from_slice(payload);
        data.extend_from_slice(prefix);
        let response = self.command(req::TRANSMIT_PAYLOAD_GENERIC, &data)?;
        if response.first() == Some(&0) {
            return Err(TransportError::WriteFailed("transmission not acknowledged".into()).into());
        }
        Ok(())
    }
}

struct Shared {
    inner: Mutex<Inner>,
}

/// RFStorm driver.
pub struct RfStormDevice {
    interface: String,
    config: DriverConfig,
    opener: TransportOpener,
    shared: Arc<Shared>,
    subscribers: SubscriberList,
}

impl RfStormDevice {
    pub fn new(interface: &str, index: usize, config: DriverConfig) -> Self {
        let opener =
            NusbTransport::opener(RFSTORM_VENDOR_ID, RFSTORM_PRODUCT_ID, index, config.clone());
        Self::with_opener(interface, config, opener)
    }

    pub fn with_opener(interface: &str, config: DriverConfig, opener: TransportOpener) -> Self {
        Self {
            interface: interface.to_string(),
            config,
            opener,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    transport: None,
                    mode: RfStormMode::default(),
                    channel: 0,
                    sync_injection: false,
                    scan: None,
                    found: None,
                }),
            }),
            subscribers: SubscriberList::new(),
        }
    }

    pub fn mode(&self) -> RfStormMode {
        lock(&self.shared.inner).mode
    }

    pub fn set_mode(&self, mode: RfStormMode) -> Result<(), DeviceError> {
        lock(&self.shared.inner).enter_mode(mode)
    }

    /// Defer every transmission until the dongle's sync marker is seen.
    pub fn set_sync_injection(&self, enabled: bool) {
        lock(&self.shared.inner).sync_injection = enabled;
    }

    pub fn enable_lna(&self) -> Result<(), DeviceError> {
        lock(&self.shared.inner).command(req::ENABLE_LNA_PA, &[])?;
        Ok(())
    }

    /// Emit an unmodulated carrier on the current channel.
    pub fn enter_tone_test(&self) -> Result<(), DeviceError> {
        lock(&self.shared.inner).command(req::ENTER_TONE_TEST_MODE, &[])?;
        Ok(())
    }

    /// Channel and address of the transmitter a scan locked onto.
    pub fn scan_result(&self) -> Option<(u8, [u8; ADDRESS_SIZE])> {
        lock(&self.shared.inner).found
    }

    /// Send `keystroke` as a press/release pair. Returns the next sequence number.
    pub fn inject_keystroke(
        &self,
        address: [u8; ADDRESS_SIZE],
        sequence: u8,
        keystroke: MosartKeystroke,
    ) -> Result<u8, DeviceError> {
        let keymap = MosartKeymap::builtin();
        let mut sequence = sequence;
        for stroke in [keystroke, keystroke.released()] {
            let payload = stroke.to_payload(&keymap).ok_or(DeviceError::Unsupported {
                interface: self.interface.clone(),
                operation: "keys without a Mosart code",
            })?;
            self.inject(&MosartFrame::new(address, sequence, payload))?;
            sequence = sequence.wrapping_add(1) & 0x0F;
        }
        Ok(sequence)
    }

    fn inject(&self, frame: &MosartFrame) -> Result<(), DeviceError> {
        self.transmit(&frame.to_air())
    }

    fn transmit(&self, air: &[u8]) -> Result<(), DeviceError> {
        let inner = lock(&self.shared.inner);
        if inner.sync_injection && !inner.wait_for_sync(self.config.sync_injection_attempts)? {
            debug!("No sync marker seen, transmitting anyway");
        }
        inner.transmit(air)
    }

    /// Hop through the configured scan channels in promiscuous mode until a
    /// Mosart frame is received.
    pub fn start_scan(&self) -> Result<(), DeviceError> {
        let stale = {
            let mut inner = lock(&self.shared.inner);
            inner.found = None;
            inner.enter_mode(RfStormMode::Promiscuous { surface_sync: true })?;
            inner.scan.take()
        };
        if let Some(mut task) = stale {
            task.stop();
        }

        let channels = self.config.scan_channels.clone();
        if channels.is_empty() {
            return Ok(());
        }
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let dwell = self.config.scan_dwell();
        let tick = self.config.task_poll();

        let task = BackgroundTask::spawn(&format!("{}-scan", self.interface), move |token, tx| {
            for &channel in channels.iter().cycle() {
                if token.is_cancelled() {
                    return;
                }
                let hopped = match shared.upgrade() {
                    Some(shared) => lock(&shared.inner).set_channel(channel),
                    None => return,
                };
                if let Err(e) = hopped {
                    let _ = tx.send(TaskEvent::Failed {
                        reason: e.to_string(),
                    });
                    return;
                }
                let _ = tx.send(TaskEvent::ChannelChanged { channel });

                let deadline = Instant::now() + dwell;
                while Instant::now() < deadline {
                    let polled = match shared.upgrade() {
                        Some(shared) => lock(&shared.inner).poll_frame(),
                        None => return,
                    };
                    match polled {
                        Ok(Some(frame)) => {
                            let _ = tx.send(TaskEvent::DeviceFound {
                                channel,
                                address: frame.address,
                            });
                            return;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(TaskEvent::Failed {
                                reason: e.to_string(),
                            });
                            return;
                        }
                    }
                    if !token.sleep(tick, tick) {
                        return;
                    }
                }
            }
        })
        .map_err(|e| DeviceError::Init {
            interface: self.interface.clone(),
            message: format!("cannot spawn scan task: {}", e),
        })?;
        lock(&self.shared.inner).scan = Some(task);
        info!(interface = %self.interface, "Scan started");
        Ok(())
    }

    pub fn stop_scan(&self) {
        let task = lock(&self.shared.inner).scan.take();
        if let Some(mut task) = task {
            task.stop();
        }
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.shared.inner)
            .scan
            .as_ref()
            .is_some_and(BackgroundTask::is_running)
    }

    /// Collect scan progress. Returns true while the scan still owns the radio.
    fn poll_scan(&self) -> bool {
        let (finished, mut events) = {
            let mut inner = lock(&self.shared.inner);
            let Some(task) = inner.scan.as_ref() else {
                return false;
            };
            let mut events = task.drain_events();
            let done = !task.is_running()
                || events
                    .iter()
                    .any(|e| matches!(e, TaskEvent::DeviceFound { .. } | TaskEvent::Failed { .. }));
            if done {
                events.extend(task.drain_events());
                (inner.scan.take(), events)
            } else {
                (None, events)
            }
        };
        let running = finished.is_none();
        if let Some(mut task) = finished {
            task.stop();
            events.extend(task.drain_events());
        }

        for event in events {
            match event {
                TaskEvent::ChannelChanged { channel } => trace!(channel, "Scan hop"),
                TaskEvent::DeviceFound { channel, address } => {
                    {
                        let mut inner = lock(&self.shared.inner);
                        inner.found = Some((channel, address));
                        inner.channel = channel;
                    }
                    info!(channel, address = %hex(&address), "Scan locked on device");
                    self.subscribers
                        .publish(&self.interface, &DeviceEvent::DeviceFound { channel, address });
                }
                TaskEvent::Failed { reason } => warn!(reason = %reason, "Scan failed"),
                TaskEvent::ConnectionDetected { .. } => {}
            }
        }
        running
    }
}

impl Device for RfStormDevice {
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
                warn!("No RFStorm dongle found");
                return Ok(());
            }
            Err(e) => {
                return Err(DeviceError::Init {
                    interface: self.interface.clone(),
                    message: e.to_string(),
                });
            }
        };
        inner.transport = Some(transport);

        let mode = inner.mode;
        if let Err(e) = inner.enter_mode(mode) {
            inner.transport = None;
            return Err(DeviceError::Init {
                interface: self.interface.clone(),
                message: e.to_string(),
            });
        }
        info!(mode = ?mode, "RFStorm ready");
        Ok(())
    }

    fn is_up(&self) -> bool {
        lock(&self.shared.inner)
            .transport
            .as_ref()
            .is_some_and(|t| t.is_connected())
    }

    fn send(&self, packet: &RadioPacket) -> Result<(), DeviceError> {
        match packet {
            RadioPacket::Mosart(p) => self.inject(p.fields()),
            RadioPacket::Raw { data, .. } => self.transmit(data),
            _ => Err(DeviceError::Unsupported {
                interface: self.interface.clone(),
                operation: "non-Mosart transmission",
            }),
        }
    }

    fn recv(&self) -> Option<RadioPacket> {
        if self.poll_scan() {
            return None;
        }
        let polled = lock(&self.shared.inner).poll_frame();
        match polled {
            Ok(frame) => frame.map(|f| RadioPacket::Mosart(Packet::from_fields(f))),
            Err(e) => {
                warn!(error = %e, "RFStorm poll failed");
                None
            }
        }
    }

    fn close(&self) {
        self.stop_scan();
        if lock(&self.shared.inner).transport.take().is_some() {
            info!(interface = %self.interface, "RFStorm closed");
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::SniffingNormal,
            Capability::SniffingPromiscuous,
            Capability::Injecting,
            Capability::InjectingSync,
            Capability::Scanning,
            Capability::ChangingChannel,
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
}

impl ChannelControl for RfStormDevice {
    fn set_channel(&self, channel: u8) -> Result<(), DeviceError> {
        lock(&self.shared.inner).set_channel(channel)
    }

    fn channel(&self) -> Result<u8, DeviceError> {
        let inner = lock(&self.shared.inner);
        let report = inner.command(req::GET_CHANNEL, &[])?;
        Ok(report.first().copied().unwrap_or(inner.channel))
    }
}

impl Drop for RfStormDevice {
    fn drop(&mut self) {
        self.stop_scan();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use crate::protocol::mosart::{MosartPayload, SYNC_MARKER};
    use crate::transport::MockTransport;

    const ADDRESS: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    /// Dongle whose RECEIVE_PAYLOAD reports come from `air`, keyed by the
    /// channel the radio is tuned to (`None` = any channel).
    struct Dongle {
        mock: MockTransport,
        air: Arc<Mutex<VecDeque<(Option<u8>, Vec<u8>)>>>,
    }

    impl Dongle {
        fn new() -> Self {
            let mock = MockTransport::new(RFSTORM_VENDOR_ID, RFSTORM_PRODUCT_ID);
            let air: Arc<Mutex<VecDeque<(Option<u8>, Vec<u8>)>>> = Arc::default();
            let tuned = Arc::new(Mutex::new(0u8));
            let queue = air.clone();
            mock.set_responder(move |data| {
                let reply = match data {
                    [req::RECEIVE_PAYLOAD] => {
                        let channel = *lock(&tuned);
                        let mut queue = lock(&queue);
                        let pos = queue
                            .iter()
                            .position(|(ch, _)| ch.is_none_or(|ch| ch == channel));
                        match pos.and_then(|i| queue.remove(i)) {
                            Some((_, report)) => report,
                            None => vec![RFSTORM_NO_PAYLOAD],
                        }
                    }
                    [req::SET_CHANNEL, channel] => {
                        *lock(&tuned) = *channel;
                        vec![1]
                    }
                    [req::GET_CHANNEL] => vec![*lock(&tuned)],
                    _ => vec![1],
                };
                vec![reply]
            });
            Self { mock, air }
        }

        fn push(&self, channel: Option<u8>, report: Vec<u8>) {
            lock(&self.air).push_back((channel, report));
        }

        fn device(&self, config: DriverConfig) -> RfStormDevice {
            let device = RfStormDevice::with_opener("rfstorm0", config, self.mock.opener());
            device.init().unwrap();
            assert!(device.is_up());
            device
        }

        fn requests(&self) -> Vec<u8> {
            self.mock.get_writes().iter().filter_map(|w| w.first().copied()).collect()
        }
    }

    fn click() -> MosartFrame {
        MosartFrame::new(ADDRESS, 2, MosartPayload::Action { state: 0x81, code: 0xA0 })
    }

    fn recv_frame(device: &RfStormDevice) -> Option<MosartFrame> {
        match device.recv()? {
            RadioPacket::Mosart(p) => Some(*p.fields()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_promiscuous_realigns_frames() {
        let dongle = Dongle::new();
        let device = dongle.device(DriverConfig::default());

        dongle.push(None, click().encode_wire()[2..].to_vec());
        let mut shifted = vec![0x13, 0x37, 0x00];
        shifted.extend_from_slice(&click().encode_wire());
        dongle.push(None, shifted);

        assert_eq!(recv_frame(&device), Some(click()));
        assert_eq!(recv_frame(&device), Some(click()));
        assert_eq!(recv_frame(&device), None);
    }

    #[test]
    fn test_dongle_sync_frames_surface_on_request() {
        let dongle = Dongle::new();
        let device = dongle.device(DriverConfig::default());
        let sync = MosartFrame::new(ADDRESS, 0, MosartPayload::DongleSync { value: 0x05 });

        dongle.push(None, sync.encode_wire()[2..].to_vec());
        assert_eq!(recv_frame(&device), None);

        device
            .set_mode(RfStormMode::Promiscuous { surface_sync: true })
            .unwrap();
        dongle.push(None, sync.encode_wire()[2..].to_vec());
        assert_eq!(recv_frame(&device), Some(sync));
    }

    #[test]
    fn test_sniffer_rebuilds_address() {
        let dongle = Dongle::new();
        let device = dongle.device(DriverConfig::default());
        device.set_mode(RfStormMode::Sniffer { address: ADDRESS }).unwrap();
        assert_eq!(
            dongle.mock.get_writes().iter().rev().nth(1).unwrap()[1..].to_vec(),
            whiten(&ADDRESS)
        );

        let wire = click().encode_wire();
        let mut report = vec![0x00];
        report.extend_from_slice(&wire[2 + ADDRESS_SIZE..]);
        dongle.push(None, report);
        assert_eq!(recv_frame(&device), Some(click()));

        // Corrupted CRC is dropped.
        let mut report = vec![0x00];
        report.extend_from_slice(&wire[2 + ADDRESS_SIZE..]);
        let last = report.len() - 1;
        report[last] ^= 0x01;
        dongle.push(None, report);
        assert_eq!(recv_frame(&device), None);
    }

    #[test]
    fn test_sync_injection_waits_for_marker() {
        let dongle = Dongle::new();
        let device = dongle.device(DriverConfig::default());
        device.set_sync_injection(true);
        dongle.push(None, vec![0x00, 0x10, 0x20]);
        dongle.push(None, vec![0x00, SYNC_MARKER[0], SYNC_MARKER[1], 0x99]);
        dongle.mock.clear_writes();

        device.send(&RadioPacket::Mosart(Packet::from_fields(click()))).unwrap();

        assert_eq!(
            dongle.requests(),
            vec![req::RECEIVE_PAYLOAD, req::RECEIVE_PAYLOAD, req::TRANSMIT_PAYLOAD_GENERIC]
        );
        let air = click().to_air();
        let writes = dongle.mock.get_writes();
        let transmit = writes.last().unwrap();
        assert_eq!(transmit[1] as usize, air.len() - 2);
        assert_eq!(transmit[2], 2);
        assert_eq!(&transmit[3..3 + air.len() - 2], &air[2..]);
        assert_eq!(&transmit[3 + air.len() - 2..], &PREAMBLE_BYTES);
    }

    #[test]
    fn test_sync_injection_gives_up_after_bounded_polls() {
        let dongle = Dongle::new();
        let config = DriverConfig {
            sync_injection_attempts: 4,
            ..Default::default()
        };
        let device = dongle.device(config);
        device.set_sync_injection(true);
        dongle.mock.clear_writes();

        device.send(&RadioPacket::raw(&click().to_air())).unwrap();
        let requests = dongle.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests.last(), Some(&req::TRANSMIT_PAYLOAD_GENERIC));
    }

    #[test]
    fn test_keystroke_injection_sends_press_and_release() {
        let dongle = Dongle::new();
        let device = dongle.device(DriverConfig::default());
        dongle.mock.clear_writes();

        let next = device
            .inject_keystroke(ADDRESS, 15, MosartKeystroke::new(0x05, 0))
            .unwrap();
        assert_eq!(next, 1);
        assert_eq!(dongle.requests().len(), 2);

        assert!(device.inject_keystroke(ADDRESS, 0, MosartKeystroke::new(0xE0, 0)).is_err());
    }

    #[test]
    fn test_scan_locks_on_transmitting_channel() {
        let dongle = Dongle::new();
        let config = DriverConfig {
            scan_channels: vec![5, 9, 12],
            scan_dwell_ms: 5,
            task_poll_ms: 1,
            ..Default::default()
        };
        let device = dongle.device(config);
        dongle.push(Some(9), click().encode_wire()[2..].to_vec());

        device.start_scan().unwrap();
        for _ in 0..500 {
            if !device.is_scanning() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(!device.is_scanning());
        assert_eq!(device.recv(), None);
        assert_eq!(device.scan_result(), Some((9, ADDRESS)));
        assert_eq!(device.channel().unwrap(), 9);
    }

    #[test]
    fn test_missing_dongle_is_not_an_error() {
        let opener: TransportOpener = Box::new(|| {
            Err(TransportError::DeviceNotFound {
                vid: RFSTORM_VENDOR_ID,
                pid: RFSTORM_PRODUCT_ID,
                index: 0,
            })
        });
        let device = RfStormDevice::with_opener("rfstorm0", DriverConfig::default(), opener);
        device.init().unwrap();
        assert!(!device.is_up());
        assert!(device.recv().is_none());
    }
}
