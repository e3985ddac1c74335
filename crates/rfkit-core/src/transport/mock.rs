//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{TransportError, TransportOpener, UsbTransport};
use crate::lock;

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

/// A control transfer seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    In { request: u8, value: u16, index: u16, length: u16 },
    Out { request: u8, value: u16, index: u16, data: Vec<u8> },
}

impl ControlRequest {
    pub fn request(&self) -> u8 {
        match self {
            ControlRequest::In { request, .. } | ControlRequest::Out { request, .. } => *request,
        }
    }
}

/// Mock transport for driver tests.
///
/// Clones share state, so a test can keep a handle while the driver owns
/// another.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued bulk IN reports.
    read_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Queued IN control responses.
    control_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured bulk writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Captured control transfers.
    control_log: Arc<Mutex<Vec<ControlRequest>>>,
    /// Produces reads in reaction to writes.
    responder: Arc<Mutex<Option<Responder>>>,
    /// Simulated VID/PID.
    vid: u16,
    pid: u16,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new(vid: u16, pid: u16) -> Self {
        Self {
            read_queue: Arc::new(Mutex::new(VecDeque::new())),
            control_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            control_log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(Mutex::new(None)),
            vid,
            pid,
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Opener handing out clones of this mock.
    pub fn opener(&self) -> TransportOpener {
        let mock = self.clone();
        Box::new(move || Ok(Arc::new(mock.clone()) as Arc<dyn UsbTransport>))
    }

    /// Queue a bulk IN report to be returned on next read.
    pub fn queue_read(&self, data: &[u8]) {
        lock(&self.read_queue).push_back(data.to_vec());
    }

    /// Queue the payload of the next IN control transfer.
    pub fn queue_control_response(&self, data: &[u8]) {
        lock(&self.control_queue).push_back(data.to_vec());
    }

    /// Install a function whose output is queued after every write.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        *lock(&self.responder) = Some(Box::new(responder));
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        lock(&self.write_log).clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        lock(&self.write_log).clear();
    }

    /// Get all captured control transfers.
    pub fn get_control_requests(&self) -> Vec<ControlRequest> {
        lock(&self.control_log).clone()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *lock(&self.connected) = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *lock(&self.connected) = true;
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if *lock(&self.connected) {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }
}

impl UsbTransport for MockTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.ensure_connected()?;
        lock(&self.write_log).push(data.to_vec());
        if let Some(responder) = lock(&self.responder).as_ref() {
            let replies = responder(data);
            lock(&self.read_queue).extend(replies);
        }
        Ok(data.len())
    }

    fn read(&self, _max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.ensure_connected()?;
        lock(&self.read_queue)
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 0 })
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Result<Vec<u8>, TransportError> {
        self.ensure_connected()?;
        lock(&self.control_log).push(ControlRequest::In {
            request,
            value,
            index,
            length,
        });
        Ok(lock(&self.control_queue).pop_front().unwrap_or_default())
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        lock(&self.control_log).push(ControlRequest::Out {
            request,
            value,
            index,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *lock(&self.connected)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_read_queue() {
        let mock = MockTransport::new(0x1234, 0x5678);
        mock.queue_read(&[1, 2]);
        mock.queue_read(&[3]);

        assert_eq!(mock.read(64).unwrap(), vec![1, 2]);
        assert_eq!(mock.read(64).unwrap(), vec![3]);

        // Queue is empty now
        assert!(mock.read(64).unwrap_err().is_timeout());
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new(0x1234, 0x5678);
        mock.write(b"Hello").unwrap();
        mock.write(b"World").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
    }

    #[test]
    fn test_mock_responder() {
        let mock = MockTransport::new(0x1234, 0x5678);
        mock.set_responder(|data| vec![data.iter().rev().copied().collect()]);
        mock.write(&[1, 2, 3]).unwrap();
        assert_eq!(mock.read(64).unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn test_mock_control_log() {
        let mock = MockTransport::new(0x1234, 0x5678);
        mock.queue_control_response(&[0x42]);
        mock.control_out(12, 2402, 0, &[]).unwrap();
        assert_eq!(mock.control_in(64, 0, 0, 1).unwrap(), vec![0x42]);

        let log = mock.get_control_requests();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].request(), 12);
        assert!(matches!(log[1], ControlRequest::In { request: 64, .. }));
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new(0x1234, 0x5678);
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.write(b"test").is_err());

        mock.reconnect();
        assert!(mock.write(b"test").is_ok());
    }
}
