//! nusb-based USB transport implementation.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nusb::transfer::{Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient, TransferError};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{TransportError, TransportOpener, UsbTransport};
use crate::config::DriverConfig;

/// nusb-based USB transport.
pub struct NusbTransport {
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
    vid: u16,
    pid: u16,
    read_timeout: Duration,
    control_timeout: Duration,
    connected: AtomicBool,
}

impl NusbTransport {
    /// Open the `index`-th device (enumeration order) with the given VID/PID.
    #[instrument(
        level = "info",
        fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid))
    )]
    pub fn open_nth(
        vid: u16,
        pid: u16,
        index: usize,
        config: &DriverConfig,
    ) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .filter(|d| d.vendor_id() == vid && d.product_id() == pid)
            .nth(index)
            .ok_or(TransportError::DeviceNotFound { vid, pid, index })?;

        Self::open_device_info(device_info, config)
    }

    /// Opener that defers [`NusbTransport::open_nth`] until a driver inits.
    pub fn opener(vid: u16, pid: u16, index: usize, config: DriverConfig) -> TransportOpener {
        Box::new(move || {
            let transport = Self::open_nth(vid, pid, index, &config)?;
            Ok(Arc::new(transport) as Arc<dyn UsbTransport>)
        })
    }

    fn open_device_info(
        device_info: nusb::DeviceInfo,
        config: &DriverConfig,
    ) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface =
            device
                .claim_interface(0)
                .wait()
                .map_err(|e| TransportError::ClaimInterfaceFailed {
                    interface: 0,
                    message: e.to_string(),
                })?;

        // Find BULK endpoints
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == 0 {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                                if ep.direction() == nusb::transfer::Direction::In {
                                    in_endpoint = ep.address();
                                } else {
                                    out_endpoint = ep.address();
                                }
                            }
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }

        // Ubertooth is driven by control transfers only and may lack a bulk OUT.
        if out_endpoint == 0 {
            debug!("No bulk OUT endpoint on interface 0");
        }

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Device opened successfully"
        );

        Ok(Self {
            interface,
            in_endpoint,
            out_endpoint,
            vid,
            pid,
            read_timeout: config.read_timeout(),
            control_timeout: config.control_timeout(),
            connected: AtomicBool::new(true),
        })
    }

    fn map_transfer_error(&self, request: u8, err: TransferError) -> TransportError {
        match err {
            TransferError::Cancelled => TransportError::Timeout {
                timeout_ms: self.control_timeout.as_millis() as u64,
            },
            TransferError::Disconnected => {
                self.connected.store(false, Ordering::Relaxed);
                TransportError::Disconnected
            }
            other => TransportError::ControlFailed {
                request,
                message: other.to_string(),
            },
        }
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if self.out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }
        let ep = self
            .interface
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut writer = ep.writer(4096);
        writer
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(level = "trace", skip(self), fields(max_len))]
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, In>(self.in_endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let mut reader = ep.reader(4096).with_read_timeout(self.read_timeout);
        let mut buf = vec![0u8; max_len];

        let n = reader.read(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::TimedOut => TransportError::Timeout {
                timeout_ms: self.read_timeout.as_millis() as u64,
            },
            ErrorKind::BrokenPipe | ErrorKind::NotConnected => {
                self.connected.store(false, Ordering::Relaxed);
                TransportError::Disconnected
            }
            _ => TransportError::ReadFailed(e.to_string()),
        })?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    #[instrument(level = "debug", skip(self), fields(request = format!("0x{:02X}", request)))]
    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Result<Vec<u8>, TransportError> {
        self.interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    length,
                },
                self.control_timeout,
            )
            .wait()
            .map_err(|e| self.map_transfer_error(request, e))
    }

    #[instrument(
        level = "debug",
        skip(self, data),
        fields(request = format!("0x{:02X}", request), len = data.len())
    )]
    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data,
                },
                self.control_timeout,
            )
            .wait()
            .map_err(|e| self.map_transfer_error(request, e))
    }

    fn is_connected(&self) -> bool {
        // nusb has no liveness probe; a failed transfer flips this flag.
        self.connected.load(Ordering::Relaxed)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
