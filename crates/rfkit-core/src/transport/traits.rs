//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait used by every radio driver, allowing
//! different implementations (nusb, mock, etc.).

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X} index={index}")]
    DeviceNotFound { vid: u16, pid: u16, index: usize },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Control transfer 0x{request:02X} failed: {message}")]
    ControlFailed { request: u8, message: String },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// A poll that simply found nothing to read.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Abstract USB transport interface.
///
/// All methods take `&self`; callers serialize multi-transfer sequences
/// with their own lock.
pub trait UsbTransport: Send + Sync {
    /// Write raw bytes to the bulk OUT endpoint.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read one report from the bulk IN endpoint.
    ///
    /// Returns `TransportError::Timeout` when nothing arrived within the
    /// configured read timeout.
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Vendor, device-recipient IN control transfer.
    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Result<Vec<u8>, TransportError>;

    /// Vendor, device-recipient OUT control transfer.
    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}

/// Deferred transport construction, run by a driver's `init`.
pub type TransportOpener =
    Box<dyn Fn() -> Result<Arc<dyn UsbTransport>, TransportError> + Send + Sync>;
