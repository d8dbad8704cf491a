/*!
Routing of GPS fixes to the pointing system.

The controller owns the laser link and both GPS sources, and one reader thread
per link. Its decision logic runs inside whichever GPS reader delivered a fix:
the fix is forwarded only if its source is the active target at that moment.
Switching target immediately resends the newly active source's last fix.
*/

use crate::gps_source::{GpsReader, GpsSource};
use crate::laser_link::{LaserLink, LaserReader};
use crate::lifecycle::{run_reader_loop, ConnectionState};
use crate::recorder::RecordingOptions;
use crate::sink::LogSink;
use serde::{Deserialize, Serialize};
use shared::error::{Result, SharedError};
use shared::{Command, Location, PortOpener};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Which balloon the laser follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointingTarget {
    #[serde(rename = "a")]
    BalloonA,
    #[serde(rename = "b")]
    BalloonB,
}

impl PointingTarget {
    pub const ALL: [PointingTarget; 2] = [PointingTarget::BalloonA, PointingTarget::BalloonB];

    pub fn index(self) -> usize {
        match self {
            PointingTarget::BalloonA => 0,
            PointingTarget::BalloonB => 1,
        }
    }

    /// Label of the matching GPS source
    pub fn source_label(self) -> &'static str {
        match self {
            PointingTarget::BalloonA => "GPS A",
            PointingTarget::BalloonB => "GPS B",
        }
    }
}

impl fmt::Display for PointingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointingTarget::BalloonA => write!(f, "balloon A"),
            PointingTarget::BalloonB => write!(f, "balloon B"),
        }
    }
}

impl FromStr for PointingTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "0" => Ok(PointingTarget::BalloonA),
            "b" | "1" => Ok(PointingTarget::BalloonB),
            other => Err(format!("unknown target '{}', expected a or b", other)),
        }
    }
}

/// How one link is opened and what it records
#[derive(Clone)]
pub struct LinkSetup {
    pub opener: Arc<dyn PortOpener>,
    pub recording: RecordingOptions,
}

/// Everything needed to start a [`PointingController`]
#[derive(Clone)]
pub struct ControllerSetup {
    pub laser: LinkSetup,
    /// GPS links, indexed by [`PointingTarget::index`]
    pub gps: [LinkSetup; 2],
    pub height_offsets: [f64; 2],
    pub initial_target: PointingTarget,
}

/// Snapshot of one link for status output
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
    pub name: String,
    pub state: ConnectionState,
    pub port: Option<String>,
    pub last_location: Option<Location>,
}

/// State shared between the operator API and the reader threads
struct PointingCore {
    laser: Arc<LaserLink>,
    sources: [Arc<GpsSource>; 2],
    // held across check-and-send so a target switch and a fix cannot reorder
    target: Mutex<PointingTarget>,
    sink: Arc<dyn LogSink>,
    forwarded: AtomicU64,
}

impl PointingCore {
    fn target(&self) -> MutexGuard<'_, PointingTarget> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn source(&self, target: PointingTarget) -> &Arc<GpsSource> {
        &self.sources[target.index()]
    }

    /// Called on the reader thread of `from` with an already calibrated fix
    fn on_new_location(&self, from: PointingTarget, location: Location) {
        let active = self.target();
        if *active == from {
            self.forward(from, &location);
        }
    }

    fn set_pointing_target(&self, target: PointingTarget) {
        let mut active = self.target();
        *active = target;
        info!("🎯 Pointing at {}", target);
        if let Some(location) = self.source(target).last_location() {
            self.forward(target, &location);
        }
    }

    fn forward(&self, from: PointingTarget, location: &Location) {
        let frame = Command::gps(location).encode();
        match self.laser.send(&frame) {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                debug!("Forwarded {} fix {}", from.source_label(), location);
            }
            // fixes keep arriving while the laser is unplugged
            Err(SharedError::NotConnected(_)) => {
                debug!("Dropped {} fix, pointing system not connected", from.source_label());
            }
            Err(e) => {
                warn!("Failed to forward {} fix: {}", from.source_label(), e);
                self.sink.report(&format!("Failed to send location: {}", e));
            }
        }
    }
}

/// The laser link, both GPS sources and their reader threads
pub struct PointingController {
    core: Arc<PointingCore>,
    readers: Vec<JoinHandle<()>>,
}

impl PointingController {
    /// Start all three reader loops. Links stay idle until opened.
    pub fn start(setup: ControllerSetup, sink: Arc<dyn LogSink>) -> Result<Self> {
        let laser = Arc::new(LaserLink::new());
        let sources = [
            Arc::new(GpsSource::new(
                PointingTarget::BalloonA.source_label(),
                setup.height_offsets[0],
            )),
            Arc::new(GpsSource::new(
                PointingTarget::BalloonB.source_label(),
                setup.height_offsets[1],
            )),
        ];
        let core = Arc::new(PointingCore {
            laser: Arc::clone(&laser),
            sources,
            target: Mutex::new(setup.initial_target),
            sink: Arc::clone(&sink),
            forwarded: AtomicU64::new(0),
        });

        // dropped on any spawn failure below, which stops and joins what already runs
        let mut controller = Self {
            core,
            readers: Vec::with_capacity(3),
        };

        let mut laser_reader = LaserReader::new(
            Arc::clone(&laser),
            setup.laser.opener,
            Arc::clone(&sink),
            setup.laser.recording,
        );
        controller.spawn_reader("laser-reader", move || {
            run_reader_loop(laser.lifecycle(), &mut laser_reader)
        })?;

        for (target, link) in PointingTarget::ALL.into_iter().zip(setup.gps) {
            let source = Arc::clone(controller.core.source(target));
            let core = Arc::clone(&controller.core);
            let mut reader = GpsReader::new(
                Arc::clone(&source),
                link.opener,
                Arc::clone(&sink),
                link.recording,
                Box::new(move |location| core.on_new_location(target, location)),
            );
            let name = format!("gps-{}-reader", target.index());
            controller.spawn_reader(&name, move || run_reader_loop(source.lifecycle(), &mut reader))?;
        }

        info!("🚀 Pointing controller started, target {}", setup.initial_target);
        Ok(controller)
    }

    fn spawn_reader(&mut self, name: &str, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = thread::Builder::new().name(name.to_string()).spawn(body)?;
        self.readers.push(handle);
        Ok(())
    }

    pub fn open_laser(&self, port: &str) -> bool {
        self.core.laser.open(port)
    }

    pub fn close_laser(&self) {
        self.core.laser.close();
    }

    pub fn open_gps(&self, target: PointingTarget, port: &str) -> bool {
        self.core.source(target).open(port)
    }

    pub fn close_gps(&self, target: PointingTarget) {
        self.core.source(target).close();
    }

    pub fn set_pointing_target(&self, target: PointingTarget) {
        self.core.set_pointing_target(target);
    }

    pub fn pointing_target(&self) -> PointingTarget {
        *self.core.target()
    }

    pub fn last_location(&self, target: PointingTarget) -> Option<Location> {
        self.core.source(target).last_location()
    }

    /// Frames written to the pointing system, GPS and operator commands alike
    pub fn frames_sent(&self) -> u64 {
        self.core.laser.frames_sent()
    }

    /// Number of GPS frames forwarded to the pointing system
    pub fn locations_forwarded(&self) -> u64 {
        self.core.forwarded.load(Ordering::Relaxed)
    }

    /// Encode and send an operator telecommand. Nothing is sent on error.
    pub fn send_command<S: AsRef<str>>(&self, name: &str, args: &[S]) -> Result<Command> {
        let command = Command::parse(name, args)?;
        self.send(command)
    }

    /// Same as [`Self::send_command`] for a whitespace-separated line
    pub fn send_command_line(&self, line: &str) -> Result<Command> {
        let command = Command::parse_line(line)?;
        self.send(command)
    }

    fn send(&self, command: Command) -> Result<Command> {
        self.core.laser.send(&command.encode())?;
        info!("Sent {:?}", command);
        Ok(command)
    }

    pub fn status(&self) -> Vec<LinkStatus> {
        let laser = self.core.laser.lifecycle();
        let mut status = vec![LinkStatus {
            name: "laser".to_string(),
            state: laser.state(),
            port: laser.port(),
            last_location: None,
        }];
        for source in &self.core.sources {
            status.push(LinkStatus {
                name: source.label().to_string(),
                state: source.lifecycle().state(),
                port: source.lifecycle().port(),
                last_location: source.last_location(),
            });
        }
        status
    }

    /// Stop every link and wait for all reader threads to exit
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if self.readers.is_empty() {
            return;
        }
        self.core.laser.stop();
        for source in &self.core.sources {
            source.stop();
        }
        for handle in self.readers.drain(..) {
            let name = handle.thread().name().unwrap_or("reader").to_string();
            if handle.join().is_err() {
                error!("{} thread panicked", name);
            }
        }
        info!("🛑 Pointing controller stopped");
    }
}

impl Drop for PointingController {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
