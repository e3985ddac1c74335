//! Background tasks owned by a device (channel sweep, channel scan).
//!
//! A task runs on a dedicated thread, observes a [`CancelToken`] between
//! poll iterations and reports back to its device through a channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Cooperative stop flag shared between a device and its task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking every `tick` to check the flag.
    /// Returns `false` if cancelled before the full duration elapsed.
    pub fn sleep(&self, duration: Duration, tick: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < duration {
            if self.is_cancelled() {
                return false;
            }
            let remaining = duration.saturating_sub(start.elapsed());
            thread::sleep(tick.min(remaining));
        }
        !self.is_cancelled()
    }
}

/// Events sent from a task back to its device.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Sweep stopped because a connection was detected.
    ConnectionDetected { channel: u8 },
    /// Scan locked onto a transmitting device.
    DeviceFound { channel: u8, address: [u8; 4] },
    /// Task hopped to a new channel.
    ChannelChanged { channel: u8 },
    /// Task stopped on a transport failure.
    Failed { reason: String },
}

pub struct BackgroundTask {
    name: String,
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
    events: Receiver<TaskEvent>,
}

impl BackgroundTask {
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(CancelToken, Sender<TaskEvent>) + Send + 'static,
    {
        let token = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let thread_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_token, tx))?;
        debug!(task = name, "Background task started");
        Ok(Self {
            name: name.to_string(),
            token,
            handle: Some(handle),
            events: rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the task to stop without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel and join. Idempotent.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(task = %self.name, "Background task panicked");
            }
            debug!(task = %self.name, "Background task stopped");
        }
    }

    /// Drain pending events without blocking.
    pub fn drain_events(&self) -> Vec<TaskEvent> {
        self.events.try_iter().collect()
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_stops_on_cancel() {
        let mut task = BackgroundTask::spawn("test-loop", |token, tx| {
            let mut n = 0u8;
            while !token.is_cancelled() {
                n = n.wrapping_add(1);
                let _ = tx.send(TaskEvent::ChannelChanged { channel: n });
                token.sleep(Duration::from_millis(5), Duration::from_millis(1));
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(task.is_running());
        task.stop();
        assert!(!task.is_running());
        assert!(!task.drain_events().is_empty());

        // Second stop is a no-op.
        task.stop();
    }

    #[test]
    fn test_sleep_interrupted() {
        let token = CancelToken::new();
        token.cancel();
        assert!(!token.sleep(Duration::from_secs(5), Duration::from_millis(1)));
    }
}
