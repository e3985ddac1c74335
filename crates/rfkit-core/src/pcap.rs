//! Classic libpcap capture files.
//!
//! Only the original microsecond/nanosecond format is handled, in either
//! byte order. Files written here are little-endian with microsecond
//! timestamps.

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::device::RadioPacket;

pub const MAGIC_MICROS: u32 = 0xA1B2_C3D4;
pub const MAGIC_NANOS: u32 = 0xA1B2_3C4D;

pub const LINKTYPE_USER0: u32 = 147;
pub const LINKTYPE_BLUETOOTH_LE_LL: u32 = 251;

const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65_535;
pub const GLOBAL_HEADER_SIZE: usize = 24;

#[derive(Error, Debug)]
pub enum PcapError {
    #[error("Not a pcap file (magic 0x{0:08X})")]
    BadMagic(u32),

    #[error("Capture file ends in the middle of a record")]
    Truncated,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Access to stored frames, as consumed by replay and record devices.
pub trait PcapStore {
    fn put_packet(&mut self, data: &[u8], timestamp: Duration);

    /// Next frame in file order, `None` once every frame was read.
    fn get_packet(&mut self) -> Option<(Duration, Vec<u8>)>;

    fn get_all_packets(&self) -> Vec<(Duration, Vec<u8>)>;

    /// Frames interleaved with the delays that separated them.
    fn generate_stream(&self) -> Vec<StreamItem> {
        let mut stream = Vec::new();
        let mut previous: Option<Duration> = None;
        for (timestamp, data) in self.get_all_packets() {
            if let Some(previous) = previous {
                let gap = timestamp.saturating_sub(previous);
                if !gap.is_zero() {
                    stream.push(StreamItem::Wait(gap));
                }
            }
            previous = Some(timestamp);
            stream.push(StreamItem::Packet(RadioPacket::Raw { timestamp, data }));
        }
        stream
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Packet(RadioPacket),
    Wait(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcapRecord {
    pub timestamp: Duration,
    pub data: Vec<u8>,
}

/// In-memory capture with a read cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcapFile {
    link_type: u32,
    records: Vec<PcapRecord>,
    cursor: usize,
}

impl PcapFile {
    pub fn new(link_type: u32) -> Self {
        Self {
            link_type,
            records: Vec::new(),
            cursor: 0,
        }
    }

    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PcapError> {
        Self::from_bytes(&fs::read(path)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PcapError> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PcapError> {
        if bytes.len() < GLOBAL_HEADER_SIZE {
            return Err(PcapError::Truncated);
        }
        let le_magic = LittleEndian::read_u32(&bytes[..4]);
        let be_magic = BigEndian::read_u32(&bytes[..4]);
        match (le_magic, be_magic) {
            (MAGIC_MICROS, _) => read_records::<LittleEndian>(bytes, false),
            (MAGIC_NANOS, _) => read_records::<LittleEndian>(bytes, true),
            (_, MAGIC_MICROS) => read_records::<BigEndian>(bytes, false),
            (_, MAGIC_NANOS) => read_records::<BigEndian>(bytes, true),
            _ => Err(PcapError::BadMagic(le_magic)),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writes into a Vec cannot fail.
        let _ = write_header(&mut out, self.link_type);
        for record in &self.records {
            let _ = write_record(&mut out, record.timestamp, &record.data);
        }
        out
    }
}

fn read_records<B: ByteOrder>(bytes: &[u8], nanos: bool) -> Result<PcapFile, PcapError> {
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(20);
    let link_type = cursor.read_u32::<B>()?;

    let mut records = Vec::new();
    while (cursor.position() as usize) < bytes.len() {
        let header = (|| -> io::Result<(u32, u32, u32)> {
            let seconds = cursor.read_u32::<B>()?;
            let fraction = cursor.read_u32::<B>()?;
            let captured = cursor.read_u32::<B>()?;
            let _original = cursor.read_u32::<B>()?;
            Ok((seconds, fraction, captured))
        })();
        let (seconds, fraction, captured) = header.map_err(|_| PcapError::Truncated)?;

        let remaining = bytes.len() - cursor.position() as usize;
        if captured as usize > remaining {
            return Err(PcapError::Truncated);
        }
        let mut data = vec![0u8; captured as usize];
        cursor.read_exact(&mut data).map_err(|_| PcapError::Truncated)?;
        let subsec = if nanos {
            Duration::from_nanos(fraction as u64)
        } else {
            Duration::from_micros(fraction as u64)
        };
        records.push(PcapRecord {
            timestamp: Duration::from_secs(seconds as u64) + subsec,
            data,
        });
    }
    Ok(PcapFile {
        link_type,
        records,
        cursor: 0,
    })
}

pub fn write_header<W: Write>(out: &mut W, link_type: u32) -> io::Result<()> {
    out.write_u32::<LittleEndian>(MAGIC_MICROS)?;
    out.write_u16::<LittleEndian>(VERSION_MAJOR)?;
    out.write_u16::<LittleEndian>(VERSION_MINOR)?;
    out.write_i32::<LittleEndian>(0)?;
    out.write_u32::<LittleEndian>(0)?;
    out.write_u32::<LittleEndian>(SNAPLEN)?;
    out.write_u32::<LittleEndian>(link_type)
}

pub fn write_record<W: Write>(out: &mut W, timestamp: Duration, data: &[u8]) -> io::Result<()> {
    out.write_u32::<LittleEndian>(timestamp.as_secs() as u32)?;
    out.write_u32::<LittleEndian>(timestamp.subsec_micros())?;
    out.write_u32::<LittleEndian>(data.len() as u32)?;
    out.write_u32::<LittleEndian>(data.len() as u32)?;
    out.write_all(data)
}

impl PcapStore for PcapFile {
    fn put_packet(&mut self, data: &[u8], timestamp: Duration) {
        self.records.push(PcapRecord {
            timestamp,
            data: data.to_vec(),
        });
    }

    fn get_packet(&mut self) -> Option<(Duration, Vec<u8>)> {
        let record = self.records.get(self.cursor)?;
        self.cursor += 1;
        Some((record.timestamp, record.data.clone()))
    }

    fn get_all_packets(&self) -> Vec<(Duration, Vec<u8>)> {
        self.records
            .iter()
            .map(|r| (r.timestamp, r.data.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> PcapFile {
        let mut file = PcapFile::new(LINKTYPE_BLUETOOTH_LE_LL);
        file.put_packet(&[0xD6, 0xBE, 0x89, 0x8E, 0x00], Duration::from_millis(1_500));
        file.put_packet(&[0x01, 0x02], Duration::from_millis(1_750));
        file.put_packet(&[0x03], Duration::from_millis(1_750));
        file
    }

    #[test]
    fn test_file_layout() {
        let bytes = capture().to_bytes();
        assert_eq!(&bytes[..4], &[0xD4, 0xC3, 0xB2, 0xA1]);
        assert_eq!(LittleEndian::read_u32(&bytes[20..24]), LINKTYPE_BLUETOOTH_LE_LL);
        // first record: 1 s, 500000 us, 5 bytes captured
        assert_eq!(LittleEndian::read_u32(&bytes[24..28]), 1);
        assert_eq!(LittleEndian::read_u32(&bytes[28..32]), 500_000);
        assert_eq!(LittleEndian::read_u32(&bytes[32..36]), 5);
        assert_eq!(bytes.len(), GLOBAL_HEADER_SIZE + 3 * 16 + 5 + 2 + 1);
    }

    #[test]
    fn test_reads_big_endian_nanosecond_files() {
        let mut bytes = Vec::new();
        bytes.write_u32::<BigEndian>(MAGIC_NANOS).unwrap();
        bytes.write_u16::<BigEndian>(2).unwrap();
        bytes.write_u16::<BigEndian>(4).unwrap();
        bytes.extend_from_slice(&[0; 8]);
        bytes.write_u32::<BigEndian>(SNAPLEN).unwrap();
        bytes.write_u32::<BigEndian>(LINKTYPE_USER0).unwrap();
        for v in [3u32, 250, 2, 2] {
            bytes.write_u32::<BigEndian>(v).unwrap();
        }
        bytes.extend_from_slice(&[0xAA, 0xBB]);

        let mut file = PcapFile::from_bytes(&bytes).unwrap();
        assert_eq!(file.link_type(), LINKTYPE_USER0);
        assert_eq!(
            file.get_packet(),
            Some((Duration::new(3, 250), vec![0xAA, 0xBB]))
        );
        assert_eq!(file.get_packet(), None);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            PcapFile::from_bytes(&[0u8; 24]),
            Err(PcapError::BadMagic(0))
        ));
        let mut bytes = capture().to_bytes();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(PcapFile::from_bytes(&bytes), Err(PcapError::Truncated)));
    }

    #[test]
    fn test_oversized_record_length_is_truncated() {
        let mut bytes = capture().to_bytes();
        bytes.truncate(GLOBAL_HEADER_SIZE + 16);
        let captured = GLOBAL_HEADER_SIZE + 8;
        LittleEndian::write_u32(&mut bytes[captured..captured + 4], 0x7FFF_FFFF);
        assert!(matches!(PcapFile::from_bytes(&bytes), Err(PcapError::Truncated)));
    }

    #[test]
    fn test_stream_carries_gaps() {
        let stream = capture().generate_stream();
        assert_eq!(stream.len(), 4);
        assert_eq!(stream[1], StreamItem::Wait(Duration::from_millis(250)));
        assert!(matches!(
            &stream[3],
            StreamItem::Packet(RadioPacket::Raw { data, .. }) if data == &[0x03]
        ));
    }

    #[test]
    fn test_cursor_walks_file_order() {
        let mut file = PcapFile::from_bytes(&capture().to_bytes()).unwrap();
        assert_eq!(file.len(), 3);
        assert_eq!(file.get_packet().unwrap().1, vec![0xD6, 0xBE, 0x89, 0x8E, 0x00]);
        assert_eq!(file.get_all_packets().len(), 3);
        file.rewind();
        assert_eq!(file.get_packet().unwrap().0, Duration::from_millis(1_500));
    }
}
