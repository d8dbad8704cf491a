/*!
Connection to the laser pointing system.

The link is split in two halves once a port is open: the reader thread keeps
one handle for the feedback stream and a cloned handle is parked behind the
send lock for outbound frames. Operator commands and auto-forwarded GPS fixes
both go through [`LaserLink::send`], so whole frames never interleave.
*/

use crate::lifecycle::{ConnectionLifecycle, LinkWorker, Session};
use crate::recorder::{RawLog, RecordingOptions};
use crate::sink::LogSink;
use shared::error::{Result, SharedError};
use shared::{PortOpener, SerialLink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

const LINK_NAME: &str = "laser";
const READ_CHUNK_SIZE: usize = 4096;

/// Shared state of the laser link
pub struct LaserLink {
    lifecycle: ConnectionLifecycle,
    writer: Mutex<Option<Box<dyn SerialLink>>>,
    frames_sent: AtomicU64,
}

impl LaserLink {
    pub fn new() -> Self {
        Self {
            lifecycle: ConnectionLifecycle::new(),
            writer: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
        }
    }

    fn writer(&self) -> MutexGuard<'_, Option<Box<dyn SerialLink>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }

    /// Connect to the pointing system on `port`
    pub fn open(&self, port: &str) -> bool {
        self.lifecycle.open(port)
    }

    pub fn close(&self) {
        self.lifecycle.close();
        self.writer().take();
    }

    pub fn stop(&self) {
        self.lifecycle.stop();
        self.writer().take();
    }

    /// Whether a port is open and frames can be sent
    pub fn is_connected(&self) -> bool {
        self.writer().is_some()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Write one complete frame. Blocks while another frame is being sent.
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer();
        let link = writer
            .as_mut()
            .ok_or_else(|| SharedError::not_connected(LINK_NAME))?;
        link.write_all(frame)?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        debug!("➡️ {} bytes to pointing system: {}", frame.len(), hex::encode(frame));
        Ok(())
    }

    /// Park the writer half unless `session` was closed or replaced meanwhile
    fn install_writer(&self, session: u64, link: Box<dyn SerialLink>) -> bool {
        let mut writer = self.writer();
        // `close` clears the slot after leaving Open, so checking under the lock is enough
        if !self.lifecycle.is_current(session) {
            return false;
        }
        *writer = Some(link);
        true
    }

    fn clear_writer(&self) {
        self.writer().take();
    }
}

impl Default for LaserLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader half: forwards the feedback stream to the sink and the raw log
pub struct LaserReader {
    link: Arc<LaserLink>,
    opener: Arc<dyn PortOpener>,
    sink: Arc<dyn LogSink>,
    recording: RecordingOptions,
    port: Option<Box<dyn SerialLink>>,
    raw_log: Option<RawLog>,
    buffer: Vec<u8>,
}

impl LaserReader {
    pub fn new(
        link: Arc<LaserLink>,
        opener: Arc<dyn PortOpener>,
        sink: Arc<dyn LogSink>,
        recording: RecordingOptions,
    ) -> Self {
        Self {
            link,
            opener,
            sink,
            recording,
            port: None,
            raw_log: None,
            buffer: vec![0u8; READ_CHUNK_SIZE],
        }
    }
}

impl LinkWorker for LaserReader {
    fn link_name(&self) -> &str {
        LINK_NAME
    }

    fn begin_session(&mut self, session: &Session) -> Result<()> {
        let port = self.opener.open_port(&session.port)?;
        let writer = port.try_clone()?;
        if !self.link.install_writer(session.id, writer) {
            debug!("Laser session {} on {} ended before it started", session.id, session.port);
            return Ok(());
        }
        self.port = Some(port);

        self.raw_log = match (&self.recording.directory, self.recording.raw) {
            (Some(dir), true) => RawLog::create_in(dir)
                .map_err(|e| warn!("Laser raw log disabled for this session: {}", e))
                .ok(),
            _ => None,
        };

        self.sink
            .report(&format!("Connected to pointing system on {}", session.port));
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Ok(()),
        };

        let n = port.read(&mut self.buffer)?;
        if n == 0 {
            return Ok(());
        }
        let data = &self.buffer[..n];

        if let Some(log) = self.raw_log.as_mut() {
            if let Err(e) = log.write(data) {
                warn!("Failed to write laser raw log {}: {}", log.path().display(), e);
                self.raw_log = None;
            }
        }

        self.sink.feedback(&String::from_utf8_lossy(data));
        Ok(())
    }

    fn end_session(&mut self) {
        self.link.clear_writer();
        self.port = None;
        if let Some(log) = self.raw_log.take() {
            debug!("Closed {} after {} bytes", log.path().display(), log.bytes_written());
        }
    }

    fn report_error(&mut self, error: &SharedError) {
        self.sink
            .report(&format!("Pointing system connection failed: {}", error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{run_reader_loop, ConnectionState};
    use crate::sink::testing::MemorySink;
    use shared::transport::mock::{GatedPortOpener, MockPortOpener};
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn start(
        opener: Arc<dyn PortOpener>,
        recording: RecordingOptions,
    ) -> (Arc<LaserLink>, Arc<MemorySink>, thread::JoinHandle<()>) {
        let link = Arc::new(LaserLink::new());
        let sink = Arc::new(MemorySink::default());
        let mut reader = LaserReader::new(
            Arc::clone(&link),
            opener,
            sink.clone(),
            recording,
        );
        let loop_link = Arc::clone(&link);
        let handle = thread::spawn(move || run_reader_loop(loop_link.lifecycle(), &mut reader));
        (link, sink, handle)
    }

    #[test]
    fn test_send_requires_connection() {
        let link = LaserLink::new();
        let err = link.send(&[0xAA, 0x55, 0x00]).unwrap_err();
        assert!(matches!(err, SharedError::NotConnected(_)));
    }

    #[test]
    fn test_feedback_reaches_sink_and_raw_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let opener = MockPortOpener::new();
        let device = opener.add_port("laser0");
        let recording = RecordingOptions {
            directory: Some(dir.path().to_path_buf()),
            raw: true,
            locations: false,
        };
        let (link, sink, handle) = start(Arc::new(opener.clone()), recording);

        link.open("laser0");
        wait_for(|| link.is_connected());
        device.inject_read(b"PONG\n");
        wait_for(|| sink.feedback_text() == "PONG\n");

        link.send(&[0xAA, 0x55, 0x00]).unwrap();
        assert_eq!(device.written(), vec![0xAA, 0x55, 0x00]);

        link.stop();
        handle.join().unwrap();

        let logs: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(logs.len(), 1);
        assert_eq!(std::fs::read(logs[0].path()).unwrap(), b"PONG\n");
    }

    #[test]
    fn test_close_disconnects_writer() {
        let opener = MockPortOpener::new();
        opener.add_port("laser0");
        let (link, _sink, handle) = start(Arc::new(opener.clone()), RecordingOptions::default());

        link.open("laser0");
        wait_for(|| link.is_connected());
        link.close();
        assert!(!link.is_connected());
        assert!(link.send(&[0xAA, 0x55, 0x02]).is_err());

        link.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_unplug_reverts_to_idle_and_reopens() {
        let opener = MockPortOpener::new();
        let device = opener.add_port("laser0");
        let (link, sink, handle) = start(Arc::new(opener.clone()), RecordingOptions::default());

        link.open("laser0");
        wait_for(|| link.is_connected());
        device.unplug();
        wait_for(|| link.lifecycle().state() == ConnectionState::Idle);
        assert!(!link.is_connected());
        assert!(sink.reports().iter().any(|r| r.contains("failed")));

        device.replug();
        link.open("laser0");
        wait_for(|| link.is_connected());
        assert_eq!(device.open_count(), 2);

        link.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_close_during_open_leaves_link_idle() {
        let opener = GatedPortOpener::new();
        let device = opener.add_port("laser0");
        let (link, sink, handle) = start(Arc::new(opener.clone()), RecordingOptions::default());

        link.open("laser0");
        assert!(opener.wait_for_attempt(Duration::from_secs(5)));
        link.close();
        opener.release();
        wait_for(|| device.open_count() == 1);
        thread::sleep(Duration::from_millis(30));

        assert_eq!(link.lifecycle().state(), ConnectionState::Idle);
        assert!(!link.is_connected());
        assert!(matches!(link.send(&[0xAA, 0x55, 0x00]), Err(SharedError::NotConnected(_))));
        assert!(device.written().is_empty());
        assert!(sink.reports().is_empty());

        // the reader went back to waiting and serves the next open normally
        link.open("laser0");
        assert!(opener.wait_for_attempt(Duration::from_secs(5)));
        opener.release();
        wait_for(|| link.is_connected());
        link.send(&[0xAA, 0x55, 0x00]).unwrap();
        assert_eq!(device.written(), vec![0xAA, 0x55, 0x00]);

        link.stop();
        handle.join().unwrap();
    }
}
