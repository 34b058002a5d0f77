//! Mock transport for testing
//!
//! [`MockTransport`] is the driver-facing half; [`TestPort`] is the test's
//! handle to the same buffers, playing the role of the adapter: it reads
//! what the driver wrote and injects the frames the "firmware" sends back.

use super::Transport;
use crate::error::{Error, Result};
use crate::frame::MtFrame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Buffers {
    /// Bytes the driver will read (written by the test side)
    to_driver: VecDeque<u8>,
    /// Bytes the driver wrote (read by the test side)
    from_driver: Vec<u8>,
}

struct Shared {
    buffers: Mutex<Buffers>,
    wrote: Condvar,
    disconnected: AtomicBool,
}

/// Mock transport handed to the bus in unit tests.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new() -> (Self, TestPort) {
        let shared = Arc::new(Shared {
            buffers: Mutex::new(Buffers::default()),
            wrote: Condvar::new(),
            disconnected: AtomicBool::new(false),
        });

        (
            MockTransport {
                shared: Arc::clone(&shared),
            },
            TestPort { shared },
        )
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if self.shared.disconnected.load(Ordering::Relaxed) {
            return Err(Error::Disconnected);
        }

        let mut buffers = self.shared.buffers.lock().unwrap();
        let available = buffers.to_driver.len().min(buffer.len());
        for slot in buffer.iter_mut().take(available) {
            *slot = buffers.to_driver.pop_front().unwrap();
        }

        if available == 0 {
            // Emulate the serial read timeout
            drop(buffers);
            std::thread::sleep(Duration::from_millis(1));
        }

        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.shared.disconnected.load(Ordering::Relaxed) {
            return Err(Error::Disconnected);
        }

        let mut buffers = self.shared.buffers.lock().unwrap();
        buffers.from_driver.extend_from_slice(data);
        self.shared.wrote.notify_all();
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The adapter side of a [`MockTransport`] pair.
pub struct TestPort {
    shared: Arc<Shared>,
}

impl TestPort {
    /// Queue raw bytes for the driver to read.
    pub fn inject(&self, data: &[u8]) {
        let mut buffers = self.shared.buffers.lock().unwrap();
        buffers.to_driver.extend(data.iter().copied());
    }

    /// Queue a frame for the driver to read.
    pub fn inject_frame(&self, frame: &MtFrame) {
        self.inject(&frame.to_wire());
    }

    /// All bytes the driver has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared.buffers.lock().unwrap().from_driver.clone()
    }

    /// Block until the driver has written at least `len` bytes in total.
    pub fn wait_for_written(&self, len: usize, timeout: Duration) -> Vec<u8> {
        let mut buffers = self.shared.buffers.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;

        while buffers.from_driver.len() < len {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .shared
                .wrote
                .wait_timeout(buffers, deadline - now)
                .unwrap();
            buffers = guard;
        }

        buffers.from_driver.clone()
    }

    /// Drop the link: subsequent driver reads and writes fail.
    pub fn disconnect(&self) {
        self.shared.disconnected.store(true, Ordering::Relaxed);
    }
}
