//! Role proxies for hijacked and MITM'd connections.
//!
//! A sub-device never touches the hardware. It holds a weak reference to the
//! device that owns the radio and a queue that device fills while
//! demultiplexing received frames by role.

use std::any::Any;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use super::{Capability, Device, DeviceError, RadioPacket};
use crate::events::SubscriberList;
use crate::lock;
use crate::state::Role;

/// What a sub-device needs from the device that owns the radio.
pub(crate) trait RoleLink: Send + Sync {
    /// Transmit `packet` while playing `role`.
    fn send_as(&self, role: Role, packet: &RadioPacket) -> Result<(), DeviceError>;

    /// Run one receive step so pending frames get routed.
    fn pump(&self);

    fn role_active(&self, role: Role) -> bool;
}

pub struct SubDevice {
    interface: String,
    role: Role,
    link: Weak<dyn RoleLink>,
    queue: Mutex<Receiver<RadioPacket>>,
    subscribers: SubscriberList,
}

impl SubDevice {
    /// New proxy and the sender its owner feeds.
    pub(crate) fn new(
        interface: String,
        role: Role,
        link: Weak<dyn RoleLink>,
    ) -> (Arc<Self>, Sender<RadioPacket>) {
        let (tx, rx) = mpsc::channel();
        let device = Arc::new(Self {
            interface,
            role,
            link,
            queue: Mutex::new(rx),
            subscribers: SubscriberList::new(),
        });
        (device, tx)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn link(&self) -> Result<Arc<dyn RoleLink>, DeviceError> {
        self.link
            .upgrade()
            .ok_or_else(|| DeviceError::NotReady(self.interface.clone()))
    }
}

impl Device for SubDevice {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn init(&self) -> Result<(), DeviceError> {
        self.link().map(|_| ())
    }

    fn is_up(&self) -> bool {
        self.link.upgrade().is_some_and(|l| l.role_active(self.role))
    }

    fn send(&self, packet: &RadioPacket) -> Result<(), DeviceError> {
        let link = self.link()?;
        if !link.role_active(self.role) {
            return Err(DeviceError::NotReady(self.interface.clone()));
        }
        link.send_as(self.role, packet)
    }

    fn recv(&self) -> Option<RadioPacket> {
        if let Ok(packet) = lock(&self.queue).try_recv() {
            return Some(packet);
        }
        self.link.upgrade()?.pump();
        lock(&self.queue).try_recv().ok()
    }

    fn close(&self) {
        debug!(interface = %self.interface, "Sub-device closed");
    }

    fn capabilities(&self) -> Vec<Capability> {
        match self.role {
            Role::Master => vec![Capability::CommunicatingAsMaster, Capability::Injecting],
            Role::Slave => vec![Capability::CommunicatingAsSlave, Capability::Injecting],
        }
    }

    fn subscribers(&self) -> &SubscriberList {
        &self.subscribers
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
