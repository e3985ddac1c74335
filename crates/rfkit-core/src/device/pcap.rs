//! Capture file back-end.
//!
//! An existing file is replayed; a missing one is created and every sent
//! frame is recorded into it.

use std::any::Any;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::{Capability, Device, DeviceError, RadioPacket};
use crate::events::{DeviceEvent, EventReply, SubscriberList};
use crate::lock;
use crate::pcap::{
    LINKTYPE_BLUETOOTH_LE_LL, PcapError, PcapFile, PcapStore, StreamItem, write_header,
    write_record,
};

enum Backend {
    Closed,
    Replay { file: PcapFile, stopped: bool },
    Record { writer: BufWriter<File>, started: Instant },
}

pub struct PcapDevice {
    interface: String,
    path: PathBuf,
    link_type: u32,
    backend: Mutex<Backend>,
    subscribers: SubscriberList,
}

impl PcapDevice {
    /// Device backed by the file named `interface`.
    pub fn new(interface: &str) -> Self {
        Self::with_link_type(interface, LINKTYPE_BLUETOOTH_LE_LL)
    }

    pub fn with_link_type(interface: &str, link_type: u32) -> Self {
        Self {
            interface: interface.to_string(),
            path: PathBuf::from(interface),
            link_type,
            backend: Mutex::new(Backend::Closed),
            subscribers: SubscriberList::new(),
        }
    }

    pub fn is_replaying(&self) -> bool {
        matches!(*lock(&self.backend), Backend::Replay { .. })
    }

    /// Every frame of the replayed file with inter-frame delays.
    pub fn stream(&self) -> Vec<StreamItem> {
        match &*lock(&self.backend) {
            Backend::Replay { file, .. } => file.generate_stream(),
            _ => Vec::new(),
        }
    }
}

impl Device for PcapDevice {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn init(&self) -> Result<(), DeviceError> {
        let mut backend = lock(&self.backend);
        if !matches!(*backend, Backend::Closed) {
            return Ok(());
        }
        *backend = if self.path.exists() {
            let file = PcapFile::open(&self.path)?;
            info!(path = %self.path.display(), frames = file.len(), "Replaying capture");
            Backend::Replay {
                file,
                stopped: false,
            }
        } else {
            let handle = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&self.path)
                .map_err(|e| DeviceError::Init {
                    interface: self.interface.clone(),
                    message: e.to_string(),
                })?;
            let mut writer = BufWriter::new(handle);
            write_header(&mut writer, self.link_type).map_err(PcapError::from)?;
            info!(path = %self.path.display(), "Recording capture");
            Backend::Record {
                writer,
                started: Instant::now(),
            }
        };
        Ok(())
    }

    fn is_up(&self) -> bool {
        !matches!(*lock(&self.backend), Backend::Closed)
    }

    fn send(&self, packet: &RadioPacket) -> Result<(), DeviceError> {
        let mut backend = lock(&self.backend);
        match &mut *backend {
            Backend::Record { writer, started } => {
                let timestamp = match packet {
                    RadioPacket::Raw { timestamp, .. } if !timestamp.is_zero() => *timestamp,
                    _ => started.elapsed(),
                };
                write_record(writer, timestamp, &packet.data())
                    .and_then(|_| writer.flush())
                    .map_err(PcapError::from)?;
                Ok(())
            }
            Backend::Replay { .. } => Err(DeviceError::Unsupported {
                interface: self.interface.clone(),
                operation: "writing to a replayed capture",
            }),
            Backend::Closed => Err(DeviceError::NotReady(self.interface.clone())),
        }
    }

    fn recv(&self) -> Option<RadioPacket> {
        let next = {
            let mut backend = lock(&self.backend);
            match &mut *backend {
                Backend::Replay { file, stopped } => match file.get_packet() {
                    Some(frame) => Some(frame),
                    None if *stopped => return None,
                    None => {
                        *stopped = true;
                        None
                    }
                },
                _ => return None,
            }
        };

        let Some((timestamp, data)) = next else {
            debug!(interface = %self.interface, "End of capture");
            self.publish(DeviceEvent::Stop);
            return None;
        };
        match self.publish(DeviceEvent::ConvertRaw {
            timestamp,
            data: data.clone(),
        }) {
            Some(EventReply::Packet(packet)) => Some(packet),
            _ => Some(RadioPacket::Raw { timestamp, data }),
        }
    }

    fn close(&self) {
        let mut backend = lock(&self.backend);
        if let Backend::Record { writer, .. } = &mut *backend {
            if let Err(e) = writer.flush() {
                warn!(error = %e, "Failed to flush capture");
            }
        }
        *backend = Backend::Closed;
    }

    fn capabilities(&self) -> Vec<Capability> {
        match *lock(&self.backend) {
            Backend::Replay { .. } => vec![Capability::Replaying],
            Backend::Record { .. } => vec![Capability::Recording],
            Backend::Closed => vec![Capability::Replaying, Capability::Recording],
        }
    }

    fn subscribers(&self) -> &SubscriberList {
        &self.subscribers
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for PcapDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::events::{EventKind, Subscriber};

    fn temp_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rfkit-{}-{}.pcap", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    struct Converter;

    impl Subscriber for Converter {
        fn accepts(&self, kind: EventKind) -> bool {
            kind == EventKind::ConvertRaw
        }

        fn on_event(&self, event: &DeviceEvent) -> Option<EventReply> {
            match event {
                DeviceEvent::ConvertRaw { data, .. } => {
                    let mut converted = data.clone();
                    converted.reverse();
                    Some(EventReply::Packet(RadioPacket::raw(&converted)))
                }
                _ => None,
            }
        }
    }

    #[test]
    fn test_record_then_replay() {
        let path = temp_path("record");
        let name = path.to_string_lossy().to_string();
        {
            let recorder = PcapDevice::new(&name);
            recorder.init().unwrap();
            assert_eq!(recorder.capabilities(), vec![Capability::Recording]);
            recorder
                .send(&RadioPacket::Raw {
                    timestamp: Duration::from_secs(1),
                    data: vec![1, 2, 3],
                })
                .unwrap();
            recorder
                .send(&RadioPacket::Raw {
                    timestamp: Duration::from_secs(2),
                    data: vec![4],
                })
                .unwrap();
            recorder.close();
            assert!(!recorder.is_up());
        }

        let player = PcapDevice::new(&name);
        player.init().unwrap();
        assert!(player.is_replaying());
        let stream = player.stream();
        assert_eq!(stream.len(), 3);
        assert_eq!(stream[1], StreamItem::Wait(Duration::from_secs(1)));
        let converter: Arc<dyn Subscriber> = Arc::new(Converter);
        player.subscribe(&converter);

        assert_eq!(player.recv(), Some(RadioPacket::raw(&[3, 2, 1])));
        assert_eq!(player.recv(), Some(RadioPacket::raw(&[4])));
        assert_eq!(player.recv(), None);
        assert!(player.send(&RadioPacket::raw(&[0])).is_err());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unconverted_frames_come_back_raw() {
        let path = temp_path("raw");
        let mut file = PcapFile::new(LINKTYPE_BLUETOOTH_LE_LL);
        file.put_packet(&[9, 9], Duration::from_millis(10));
        file.save(&path).unwrap();

        let player = PcapDevice::new(&path.to_string_lossy());
        player.init().unwrap();
        assert_eq!(
            player.recv(),
            Some(RadioPacket::Raw {
                timestamp: Duration::from_millis(10),
                data: vec![9, 9]
            })
        );
        assert_eq!(player.recv(), None);
        let _ = std::fs::remove_file(&path);
    }
}
