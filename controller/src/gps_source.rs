/*!
RTK GPS receivers.

A [`GpsSource`] is the state the rest of the program sees: its lifecycle,
its height calibration and the last fix it produced. The matching
[`GpsReader`] runs on the source's reader thread, owns the port and the
[`NmeaStreamParser`] and is the only writer of the last fix.
*/

use crate::lifecycle::{ConnectionLifecycle, LinkWorker, Session};
use crate::recorder::{LocationLog, RawLog, RecordingOptions};
use crate::sink::LogSink;
use shared::error::{Result, SharedError};
use shared::{Location, NmeaStreamParser, PortOpener, SerialLink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

const READ_CHUNK_SIZE: usize = 4096;

/// One tracked GPS receiver
#[derive(Debug)]
pub struct GpsSource {
    label: String,
    lifecycle: ConnectionLifecycle,
    height_offset: f64,
    last_location: Mutex<Option<Location>>,
    fixes: AtomicU64,
}

impl GpsSource {
    pub fn new(label: impl Into<String>, height_offset: f64) -> Self {
        Self {
            label: label.into(),
            lifecycle: ConnectionLifecycle::new(),
            height_offset,
            last_location: Mutex::new(None),
            fixes: AtomicU64::new(0),
        }
    }

    fn last(&self) -> MutexGuard<'_, Option<Location>> {
        self.last_location.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }

    pub fn open(&self, port: &str) -> bool {
        self.lifecycle.open(port)
    }

    pub fn close(&self) {
        self.lifecycle.close();
    }

    pub fn stop(&self) {
        self.lifecycle.stop();
    }

    /// Last calibrated fix, if any was received yet
    pub fn last_location(&self) -> Option<Location> {
        *self.last()
    }

    pub fn fixes_received(&self) -> u64 {
        self.fixes.load(Ordering::Relaxed)
    }

    /// Apply the height calibration and remember the result
    pub fn record(&self, raw: Location) -> Location {
        let calibrated = raw.calibrated(self.height_offset);
        *self.last() = Some(calibrated);
        self.fixes.fetch_add(1, Ordering::Relaxed);
        calibrated
    }
}

/// Callback receiving each calibrated fix, on the reader thread
pub type LocationHandler = Box<dyn FnMut(Location) + Send>;

/// Reader half of a GPS source
pub struct GpsReader {
    source: Arc<GpsSource>,
    opener: Arc<dyn PortOpener>,
    sink: Arc<dyn LogSink>,
    recording: RecordingOptions,
    on_location: LocationHandler,
    parser: NmeaStreamParser,
    session: Option<u64>,
    port: Option<Box<dyn SerialLink>>,
    raw_log: Option<RawLog>,
    location_log: Option<LocationLog>,
    buffer: Vec<u8>,
}

impl GpsReader {
    pub fn new(
        source: Arc<GpsSource>,
        opener: Arc<dyn PortOpener>,
        sink: Arc<dyn LogSink>,
        recording: RecordingOptions,
        on_location: LocationHandler,
    ) -> Self {
        Self {
            source,
            opener,
            sink,
            recording,
            on_location,
            parser: NmeaStreamParser::new(),
            session: None,
            port: None,
            raw_log: None,
            location_log: None,
            buffer: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    fn open_logs(&mut self) {
        let Some(dir) = self.recording.directory.clone() else {
            return;
        };
        if self.recording.raw {
            self.raw_log = RawLog::create_in(&dir.join("raw"))
                .map_err(|e| warn!("{} raw log disabled for this session: {}", self.source.label(), e))
                .ok();
        }
        if self.recording.locations {
            self.location_log = LocationLog::create_in(&dir.join("location"))
                .map_err(|e| warn!("{} location log disabled for this session: {}", self.source.label(), e))
                .ok();
        }
    }

    fn handle_fix(&mut self, raw: Location) {
        let location = self.source.record(raw);

        if let Some(log) = self.location_log.as_mut() {
            if let Err(e) = log.write(&location) {
                warn!("Failed to write location log {}: {}", log.path().display(), e);
                self.location_log = None;
            }
        }

        (self.on_location)(location);
    }
}

impl LinkWorker for GpsReader {
    fn link_name(&self) -> &str {
        self.source.label()
    }

    fn begin_session(&mut self, session: &Session) -> Result<()> {
        self.port = Some(self.opener.open_port(&session.port)?);
        self.session = Some(session.id);
        // a new connection is not aligned with whatever was buffered before
        self.parser.reset();
        self.open_logs();
        self.sink
            .report(&format!("{} connected on {}", self.source.label(), session.port));
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
        // closed while the read was blocked
        if !self
            .session
            .is_some_and(|id| self.source.lifecycle().is_current(id))
        {
            return Ok(());
        }

        if let Some(log) = self.raw_log.as_mut() {
            if let Err(e) = log.write(&self.buffer[..n]) {
                warn!("Failed to write raw log {}: {}", log.path().display(), e);
                self.raw_log = None;
            }
        }

        let results = self.parser.feed(&self.buffer[..n]);
        for result in results {
            match result {
                Ok(raw) => self.handle_fix(raw),
                Err(e) => warn!("{}: dropped GGA sentence: {}", self.source.label(), e),
            }
        }
        Ok(())
    }

    fn end_session(&mut self) {
        let (lines, fixes, errors, overflows) = self.parser.stats();
        debug!(
            "{} session ended: {} lines, {} fixes, {} parse errors, {} overflows",
            self.source.label(),
            lines,
            fixes,
            errors,
            overflows
        );
        self.session = None;
        self.port = None;
        self.raw_log = None;
        self.location_log = None;
        self.parser.reset();
    }

    fn report_error(&mut self, error: &SharedError) {
        self.sink
            .report(&format!("Reading from {} failed: {}", self.source.label(), error));
    }
}
