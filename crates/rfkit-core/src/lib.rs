//! rfkit-core: device abstraction and protocol layer for short-range radio
//! security research.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Dissector**: generic bidirectional byte/field codec
//! - **Protocol**: Ubertooth, ButteRFly and Mosart framing, BLE helpers, key lookup
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **State**: BLE connection tracking and the attack/session state machine
//! - **Device**: polymorphic drivers, capability traits and the registry
//! - **Events**: device-to-consumer publish/subscribe
//! - **PCAP / SDR**: capture file store and SDR pipeline interfaces
//!
//! # Example
//!
//! ```no_run
//! use rfkit_core::{DeviceRegistry, DriverConfig};
//!
//! let registry = DeviceRegistry::with_default_drivers(DriverConfig::default());
//! let device = registry.get("ubertooth0").expect("no Ubertooth plugged in");
//! while let Some(packet) = device.recv() {
//!     println!("{:?}", packet);
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod config;
pub mod device;
pub mod dissector;
pub mod events;
pub mod pcap;
pub mod protocol;
pub mod sdr;
pub mod state;
pub mod task;
pub mod transport;

// Re-exports for convenience
pub use config::DriverConfig;
pub use device::registry::DeviceRegistry;
pub use device::{Capability, Device, DeviceError, RadioPacket};
pub use dissector::{DecodeError, Dissect, Packet};
pub use events::{DeviceEvent, EventKind, EventReply, Subscriber, TracingSubscriber};
pub use pcap::{PcapFile, PcapStore, StreamItem};
pub use state::{AttackKind, AttackStatus, ConnectionParameters, SniffingMode};
pub use transport::{MockTransport, NusbTransport, TransportError, UsbTransport};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
