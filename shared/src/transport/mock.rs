//! In-memory transport for tests

use super::{PortOpener, SerialLink};
use crate::error::{Result, SharedError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Read timeout used by mock links unless overridden
pub const MOCK_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Port opener over a set of named mock ports
#[derive(Clone, Default)]
pub struct MockPortOpener {
    ports: Arc<Mutex<HashMap<String, MockLink>>>,
}

impl MockPortOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port; opening it afterwards succeeds
    pub fn add_port(&self, name: &str) -> MockLink {
        let link = MockLink::new(name);
        relock(&self.ports).insert(name.to_string(), link.clone());
        link
    }

    /// Remove a port; opening it afterwards fails as if the device was missing
    pub fn remove_port(&self, name: &str) -> Option<MockLink> {
        relock(&self.ports).remove(name)
    }
}

impl PortOpener for MockPortOpener {
    fn open_port(&self, name: &str) -> Result<Box<dyn SerialLink>> {
        let link = relock(&self.ports)
            .get(name)
            .cloned()
            .ok_or_else(|| SharedError::transport(name, "no such port"))?;

        {
            let mut state = link.state();
            if state.unplugged {
                return Err(SharedError::transport(name, "device disconnected"));
            }
            state.open_count += 1;
        }
        Ok(Box::new(link))
    }
}

#[derive(Default)]
struct GateState {
    waiting: usize,
    permits: usize,
}

#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

/// Mock opener whose `open_port` blocks until the test releases it.
/// Clones share the same gate and ports.
#[derive(Clone, Default)]
pub struct GatedPortOpener {
    ports: MockPortOpener,
    gate: Arc<Gate>,
}

impl GatedPortOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_port(&self, name: &str) -> MockLink {
        self.ports.add_port(name)
    }

    /// Wait until an `open_port` call is blocked in the gate
    pub fn wait_for_attempt(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = relock(&self.gate.state);
        while state.waiting == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .gate
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Let one blocked or future `open_port` call through
    pub fn release(&self) {
        relock(&self.gate.state).permits += 1;
        self.gate.changed.notify_all();
    }
}

impl PortOpener for GatedPortOpener {
    fn open_port(&self, name: &str) -> Result<Box<dyn SerialLink>> {
        {
            let mut state = relock(&self.gate.state);
            state.waiting += 1;
            self.gate.changed.notify_all();
            while state.permits == 0 {
                state = self
                    .gate
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.permits -= 1;
            state.waiting -= 1;
        }
        self.ports.open_port(name)
    }
}

#[derive(Default)]
struct MockState {
    read_buffer: VecDeque<u8>,
    written: Vec<u8>,
    failing_reads: usize,
    unplugged: bool,
    open_count: usize,
}

struct MockInner {
    state: Mutex<MockState>,
    data_ready: Condvar,
    read_timeout: Duration,
}

/// A mock serial port. Clones share the same device state.
#[derive(Clone)]
pub struct MockLink {
    name: String,
    inner: Arc<MockInner>,
}

impl MockLink {
    pub fn new(name: &str) -> Self {
        Self::with_read_timeout(name, MOCK_READ_TIMEOUT)
    }

    pub fn with_read_timeout(name: &str, read_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            inner: Arc::new(MockInner {
                state: Mutex::new(MockState::default()),
                data_ready: Condvar::new(),
                read_timeout,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        relock(&self.inner.state)
    }

    /// Queue bytes the device "sends" to us
    pub fn inject_read(&self, data: &[u8]) {
        self.state().read_buffer.extend(data);
        self.inner.data_ready.notify_all();
    }

    /// Everything written to the device so far
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn clear_written(&self) {
        self.state().written.clear();
    }

    /// Make the next `count` reads fail with a transport error
    pub fn fail_next_reads(&self, count: usize) {
        self.state().failing_reads = count;
        self.inner.data_ready.notify_all();
    }

    /// Simulate pulling the cable: reads, writes and opens fail
    pub fn unplug(&self) {
        self.state().unplugged = true;
        self.inner.data_ready.notify_all();
    }

    pub fn replug(&self) {
        self.state().unplugged = false;
    }

    /// How many times this port has been opened
    pub fn open_count(&self) -> usize {
        self.state().open_count
    }

    /// Bytes injected but not yet read
    pub fn unread_len(&self) -> usize {
        self.state().read_buffer.len()
    }
}

impl SerialLink for MockLink {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state();
        if state.read_buffer.is_empty() && !state.unplugged && state.failing_reads == 0 {
            state = self
                .inner
                .data_ready
                .wait_timeout(state, self.inner.read_timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        if state.unplugged {
            return Err(SharedError::transport(&self.name, "device disconnected"));
        }
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(SharedError::transport(&self.name, "read failed"));
        }

        let count = state.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(state.read_buffer.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        // One byte at a time so that unsynchronized writers would interleave
        for &byte in data {
            {
                let mut state = self.state();
                if state.unplugged {
                    return Err(SharedError::transport(&self.name, "device disconnected"));
                }
                state.written.push(byte);
            }
            thread::yield_now();
        }
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn SerialLink>> {
        Ok(Box::new(self.clone()))
    }
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port_fails() {
        let opener = MockPortOpener::new();
        let err = opener.open_port("/dev/ttyUSB9").err().unwrap();
        assert!(err.is_transport());
    }

    #[test]
    fn test_read_times_out_empty() {
        let opener = MockPortOpener::new();
        opener.add_port("gps");
        let mut link = opener.open_port("gps").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(link.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_inject_and_read_in_pieces() {
        let opener = MockPortOpener::new();
        let device = opener.add_port("gps");
        let mut link = opener.open_port("gps").unwrap();
        device.inject_read(b"hello");

        let mut buf = [0u8; 3];
        assert_eq!(link.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(link.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(device.open_count(), 1);
    }

    #[test]
    fn test_unplug_fails_io_and_open() {
        let opener = MockPortOpener::new();
        let device = opener.add_port("laser");
        let mut link = opener.open_port("laser").unwrap();
        device.unplug();

        let mut buf = [0u8; 4];
        assert!(link.read(&mut buf).is_err());
        assert!(link.write_all(&[1, 2, 3]).is_err());
        assert!(opener.open_port("laser").is_err());

        device.replug();
        assert!(opener.open_port("laser").is_ok());
    }

    #[test]
    fn test_clone_shares_device() {
        let opener = MockPortOpener::new();
        let device = opener.add_port("laser");
        let link = opener.open_port("laser").unwrap();
        let mut writer = link.try_clone().unwrap();
        writer.write_all(&[0xAA, 0x55, 0x00]).unwrap();
        assert_eq!(device.written(), vec![0xAA, 0x55, 0x00]);
    }

    #[test]
    fn test_gated_open_waits_for_release() {
        let opener = GatedPortOpener::new();
        let device = opener.add_port("gps");
        assert!(!opener.wait_for_attempt(Duration::from_millis(5)));

        let worker = {
            let opener = opener.clone();
            thread::spawn(move || opener.open_port("gps").is_ok())
        };
        assert!(opener.wait_for_attempt(Duration::from_secs(5)));
        assert_eq!(device.open_count(), 0);

        opener.release();
        assert!(worker.join().unwrap());
        assert_eq!(device.open_count(), 1);
    }
}
