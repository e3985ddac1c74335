//! Device-to-consumer event dispatch.
//!
//! A device publishes [`DeviceEvent`]s to the consumers that subscribed to
//! it. Subscribers are held weakly: a device never keeps its consumers alive.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::device::RadioPacket;
use crate::lock;
use crate::state::{AttackKind, AttackStatus, ConnectionParameters};

/// Events emitted by a device.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The device ran out of data (end of a capture file) or was closed.
    Stop,
    /// Raw bytes the consumer should convert to its own packet model.
    ConvertRaw { timestamp: Duration, data: Vec<u8> },
    /// All connection parameters are known.
    ConnectionSynchronized { parameters: ConnectionParameters },
    /// The followed connection was lost.
    ConnectionLost,
    AttackStatusChanged {
        attack: AttackKind,
        status: AttackStatus,
    },
    /// Role proxies became available after a successful attack.
    SubInterfacesReady {
        master: Option<String>,
        slave: Option<String>,
    },
    /// A scan locked onto a transmitter.
    DeviceFound { channel: u8, address: [u8; 4] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Stop,
    ConvertRaw,
    ConnectionSynchronized,
    ConnectionLost,
    AttackStatusChanged,
    SubInterfacesReady,
    DeviceFound,
}

impl DeviceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DeviceEvent::Stop => EventKind::Stop,
            DeviceEvent::ConvertRaw { .. } => EventKind::ConvertRaw,
            DeviceEvent::ConnectionSynchronized { .. } => EventKind::ConnectionSynchronized,
            DeviceEvent::ConnectionLost => EventKind::ConnectionLost,
            DeviceEvent::AttackStatusChanged { .. } => EventKind::AttackStatusChanged,
            DeviceEvent::SubInterfacesReady { .. } => EventKind::SubInterfacesReady,
            DeviceEvent::DeviceFound { .. } => EventKind::DeviceFound,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Stop => "stop",
            EventKind::ConvertRaw => "convert_raw",
            EventKind::ConnectionSynchronized => "connection_synchronized",
            EventKind::ConnectionLost => "connection_lost",
            EventKind::AttackStatusChanged => "attack_status_changed",
            EventKind::SubInterfacesReady => "sub_interfaces_ready",
            EventKind::DeviceFound => "device_found",
        };
        f.write_str(name)
    }
}

/// Value handed back by the subscriber that handled an event.
#[derive(Debug, Clone)]
pub enum EventReply {
    Ack,
    Packet(RadioPacket),
}

/// Consumer side of a device.
///
/// Implement this trait in the layer that drives a device to receive its
/// notifications.
pub trait Subscriber: Send + Sync {
    /// Whether this subscriber handles events of `kind`.
    fn accepts(&self, _kind: EventKind) -> bool {
        true
    }

    /// Called when an accepted event occurs.
    fn on_event(&self, event: &DeviceEvent) -> Option<EventReply>;
}

/// Subscriber that logs events using tracing.
pub struct TracingSubscriber;

impl Subscriber for TracingSubscriber {
    fn on_event(&self, event: &DeviceEvent) -> Option<EventReply> {
        match event {
            DeviceEvent::Stop => tracing::info!("Device stopped"),
            DeviceEvent::ConvertRaw { timestamp, data } => {
                tracing::trace!(ts = ?timestamp, len = data.len(), "Raw frame")
            }
            DeviceEvent::ConnectionSynchronized { parameters } => {
                tracing::info!(params = %parameters, "Connection synchronized")
            }
            DeviceEvent::ConnectionLost => tracing::warn!("Connection lost"),
            DeviceEvent::AttackStatusChanged { attack, status } => {
                tracing::info!(attack = %attack, status = %status, "Attack status changed")
            }
            DeviceEvent::SubInterfacesReady { master, slave } => {
                tracing::info!(master = ?master, slave = ?slave, "Sub-interfaces ready")
            }
            DeviceEvent::DeviceFound { channel, address } => tracing::info!(
                channel,
                address = %crate::dissector::hex(address),
                "Device found"
            ),
        }
        None
    }
}

/// Weakly held subscribers of one device.
#[derive(Default)]
pub struct SubscriberList {
    entries: Mutex<Vec<Weak<dyn Subscriber>>>,
}

impl SubscriberList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        lock(&self.entries).push(Arc::downgrade(subscriber));
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `event` to the first live subscriber that accepts it and return
    /// its reply. Dead entries are pruned on the way.
    pub fn publish(&self, source: &str, event: &DeviceEvent) -> Option<EventReply> {
        let live: Vec<Arc<dyn Subscriber>> = {
            let mut entries = lock(&self.entries);
            entries.retain(|w| w.strong_count() > 0);
            entries.iter().filter_map(Weak::upgrade).collect()
        };

        let kind = event.kind();
        let target = live.iter().find(|s| s.accepts(kind));
        tracing::trace!(device = source, event = %kind, handled = target.is_some(), "Publish");
        target.and_then(|s| s.on_event(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        kinds: Vec<EventKind>,
        calls: AtomicUsize,
    }

    impl Counter {
        fn new(kinds: &[EventKind]) -> Arc<Self> {
            Arc::new(Self {
                kinds: kinds.to_vec(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Subscriber for Counter {
        fn accepts(&self, kind: EventKind) -> bool {
            self.kinds.contains(&kind)
        }

        fn on_event(&self, _event: &DeviceEvent) -> Option<EventReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(EventReply::Ack)
        }
    }

    #[test]
    fn test_first_accepting_subscriber_wins() {
        let list = SubscriberList::new();
        let stop_only = Counter::new(&[EventKind::Stop]);
        let everything = Counter::new(&[EventKind::Stop, EventKind::ConnectionLost]);
        let a: Arc<dyn Subscriber> = stop_only.clone();
        let b: Arc<dyn Subscriber> = everything.clone();
        list.subscribe(&a);
        list.subscribe(&b);

        assert!(list.publish("test0", &DeviceEvent::Stop).is_some());
        assert_eq!(stop_only.calls.load(Ordering::SeqCst), 1);
        assert_eq!(everything.calls.load(Ordering::SeqCst), 0);

        assert!(list.publish("test0", &DeviceEvent::ConnectionLost).is_some());
        assert_eq!(everything.calls.load(Ordering::SeqCst), 1);

        assert!(list
            .publish("test0", &DeviceEvent::DeviceFound { channel: 1, address: [0; 4] })
            .is_none());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let list = SubscriberList::new();
        {
            let sub: Arc<dyn Subscriber> = Counter::new(&[EventKind::Stop]);
            list.subscribe(&sub);
            assert_eq!(list.len(), 1);
        }
        assert!(list.is_empty());
        assert!(list.publish("test0", &DeviceEvent::Stop).is_none());
    }
}
