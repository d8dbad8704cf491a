/*!
Reusable open/close/stop state machine for a serial link.

Each physical link has exactly one reader thread for the whole life of the
process. The thread is created once and then parked while the link is idle;
`open` wakes it, `close` sends it back to waiting and `stop` ends it for good.

```text
        open            stop
 Idle ---------> Open ---------> Stopped
   ^   <---------  |               ^
   |   close/fail  |               |
   +---------------+---------------+
                     stop
```
*/

use shared::error::{Result, SharedError};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Connection state of one physical link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No I/O, reader waiting for `open` or `stop`
    Idle,
    /// Reader actively consuming bytes
    Open,
    /// Terminal, reader has exited or is about to
    Stopped,
}

/// One open period of a link, on one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: u64,
    pub port: String,
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    port: Option<String>,
    session: u64,
}

/// The open/close/stop contract shared by every link
#[derive(Debug)]
pub struct ConnectionLifecycle {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                port: None,
                session: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the link on `port` and wake the reader.
    ///
    /// Re-opening on the port that is already open is a no-op; opening on a
    /// different port starts a new session there. Returns `false` once stopped.
    pub fn open(&self, port: impl Into<String>) -> bool {
        let port = port.into();
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Stopped => return false,
            ConnectionState::Open if inner.port.as_deref() == Some(port.as_str()) => return true,
            _ => {}
        }
        inner.state = ConnectionState::Open;
        inner.port = Some(port);
        inner.session += 1;
        drop(inner);
        self.changed.notify_all();
        true
    }

    /// Put the link back into idle; the reader leaves its read step and waits
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state == ConnectionState::Open {
            inner.state = ConnectionState::Idle;
            drop(inner);
            self.changed.notify_all();
        }
    }

    /// Terminal stop, wakes a reader parked in the idle wait
    pub fn stop(&self) {
        self.lock().state = ConnectionState::Stopped;
        self.changed.notify_all();
    }

    /// Revert to idle after `session` hit an error, unless it was superseded
    pub fn fail(&self, session: u64) -> bool {
        let mut inner = self.lock();
        if inner.state == ConnectionState::Open && inner.session == session {
            inner.state = ConnectionState::Idle;
            drop(inner);
            self.changed.notify_all();
            true
        } else {
            false
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Whether `session` is still the one the reader should serve
    pub fn is_current(&self, session: u64) -> bool {
        let inner = self.lock();
        inner.state == ConnectionState::Open && inner.session == session
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ConnectionState::Stopped
    }

    /// Port of the current or most recent session
    pub fn port(&self) -> Option<String> {
        self.lock().port.clone()
    }

    /// The session the reader should be serving right now, if the link is open
    pub fn current_session(&self) -> Option<Session> {
        let inner = self.lock();
        match (inner.state, &inner.port) {
            (ConnectionState::Open, Some(port)) => Some(Session {
                id: inner.session,
                port: port.clone(),
            }),
            _ => None,
        }
    }

    /// Block while idle. Returns `false` if the link was stopped.
    pub fn wait_while_idle(&self) -> bool {
        let mut inner = self.lock();
        // a wake-up does not imply a state change, always re-check
        while inner.state == ConnectionState::Idle {
            inner = self
                .changed
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner.state != ConnectionState::Stopped
    }
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-link behaviour driven by [`run_reader_loop`]
pub trait LinkWorker {
    /// Name used in diagnostics ("laser", "GPS A", ...)
    fn link_name(&self) -> &str;

    /// Acquire the port and reset per-session state
    fn begin_session(&mut self, session: &Session) -> Result<()>;

    /// One blocking read-and-dispatch step, bounded by the read timeout
    fn poll(&mut self) -> Result<()>;

    /// Release the port and per-session resources
    fn end_session(&mut self);

    /// Report an error that sent the link back to idle
    fn report_error(&mut self, _error: &SharedError) {}
}

/// Reader loop: wait while idle, serve open sessions, exit when stopped.
///
/// Errors never end the loop; they revert the link to idle so it can be
/// reopened later, possibly on another port.
pub fn run_reader_loop<W: LinkWorker>(lifecycle: &ConnectionLifecycle, worker: &mut W) {
    let mut active: Option<u64> = None;

    loop {
        if lifecycle.is_stopped() {
            break;
        }

        let session = match lifecycle.current_session() {
            Some(session) => session,
            None => {
                if active.take().is_some() {
                    debug!("{} link closed", worker.link_name());
                    worker.end_session();
                }
                if !lifecycle.wait_while_idle() {
                    break;
                }
                continue;
            }
        };

        if active != Some(session.id) {
            if active.take().is_some() {
                worker.end_session();
            }
            match worker.begin_session(&session) {
                Ok(()) => {
                    debug!("{} link session {} on {}", worker.link_name(), session.id, session.port);
                    active = Some(session.id);
                }
                Err(e) => {
                    warn!("{} link failed to open {}: {}", worker.link_name(), session.port, e);
                    worker.report_error(&e);
                    lifecycle.fail(session.id);
                    continue;
                }
            }
        }

        // closed or retargeted while the port was being opened
        if !lifecycle.is_current(session.id) {
            continue;
        }

        if let Err(e) = worker.poll() {
            warn!("{} link read failed: {}", worker.link_name(), e);
            worker.report_error(&e);
            worker.end_session();
            active = None;
            lifecycle.fail(session.id);
        }
    }

    if active.is_some() {
        worker.end_session();
    }
    debug!("{} reader loop exited", worker.link_name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Records calls; each poll sleeps briefly like a timed-out read
    #[derive(Default)]
    struct Counters {
        begins: AtomicUsize,
        polls: AtomicUsize,
        ends: AtomicUsize,
        errors: AtomicUsize,
        ports: Mutex<Vec<String>>,
    }

    struct TestWorker {
        counters: Arc<Counters>,
        fail_open_on: Option<String>,
        fail_poll_once: bool,
    }

    impl LinkWorker for TestWorker {
        fn link_name(&self) -> &str {
            "test"
        }

        fn begin_session(&mut self, session: &Session) -> Result<()> {
            self.counters.begins.fetch_add(1, Ordering::SeqCst);
            self.counters.ports.lock().unwrap().push(session.port.clone());
            if self.fail_open_on.as_deref() == Some(session.port.as_str()) {
                return Err(SharedError::transport(&session.port, "no such port"));
            }
            Ok(())
        }

        fn poll(&mut self) -> Result<()> {
            self.counters.polls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            if self.fail_poll_once {
                self.fail_poll_once = false;
                return Err(SharedError::transport("p", "unplugged"));
            }
            Ok(())
        }

        fn end_session(&mut self) {
            self.counters.ends.fetch_add(1, Ordering::SeqCst);
        }

        fn report_error(&mut self, _error: &SharedError) {
            self.counters.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spawn(
        fail_open_on: Option<&str>,
        fail_poll_once: bool,
    ) -> (Arc<ConnectionLifecycle>, Arc<Counters>, thread::JoinHandle<()>) {
        let lifecycle = Arc::new(ConnectionLifecycle::new());
        let counters = Arc::new(Counters::default());
        let mut worker = TestWorker {
            counters: Arc::clone(&counters),
            fail_open_on: fail_open_on.map(str::to_string),
            fail_poll_once,
        };
        let loop_lifecycle = Arc::clone(&lifecycle);
        let handle = thread::spawn(move || run_reader_loop(&loop_lifecycle, &mut worker));
        (lifecycle, counters, handle)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_state_transitions() {
        let lifecycle = ConnectionLifecycle::new();
        assert_eq!(lifecycle.state(), ConnectionState::Idle);
        assert!(lifecycle.current_session().is_none());

        assert!(lifecycle.open("/dev/ttyUSB0"));
        let first = lifecycle.current_session().unwrap();
        assert_eq!(first.port, "/dev/ttyUSB0");

        // same port while open is idempotent
        assert!(lifecycle.open("/dev/ttyUSB0"));
        assert_eq!(lifecycle.current_session().unwrap(), first);

        lifecycle.close();
        assert_eq!(lifecycle.state(), ConnectionState::Idle);
        assert!(lifecycle.open("/dev/ttyUSB0"));
        assert!(lifecycle.current_session().unwrap().id > first.id);

        lifecycle.stop();
        assert!(!lifecycle.open("/dev/ttyUSB1"));
        lifecycle.close();
        assert_eq!(lifecycle.state(), ConnectionState::Stopped);
    }

    #[test]
    fn test_fail_ignores_superseded_session() {
        let lifecycle = ConnectionLifecycle::new();
        lifecycle.open("a");
        let old = lifecycle.current_session().unwrap().id;
        lifecycle.open("b");
        assert!(!lifecycle.fail(old));
        assert!(lifecycle.is_current(lifecycle.current_session().unwrap().id));
        let current = lifecycle.current_session().unwrap().id;
        assert!(lifecycle.fail(current));
        assert_eq!(lifecycle.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_wake_without_state_change_keeps_waiting() {
        let lifecycle = Arc::new(ConnectionLifecycle::new());
        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            thread::spawn(move || lifecycle.wait_while_idle())
        };
        thread::sleep(Duration::from_millis(20));

        lifecycle.changed.notify_all();
        // close while idle changes nothing either
        lifecycle.close();
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        lifecycle.stop();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_stop_wakes_idle_reader_without_open() {
        let (lifecycle, counters, handle) = spawn(None, false);
        thread::sleep(Duration::from_millis(20));
        lifecycle.stop();
        handle.join().unwrap();
        assert_eq!(counters.begins.load(Ordering::SeqCst), 0);
        assert_eq!(counters.polls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reopen_after_close_reuses_thread() {
        let (lifecycle, counters, handle) = spawn(None, false);

        lifecycle.open("first");
        wait_for(|| counters.polls.load(Ordering::SeqCst) > 0);
        lifecycle.close();
        wait_for(|| counters.ends.load(Ordering::SeqCst) == 1);

        lifecycle.open("second");
        wait_for(|| counters.begins.load(Ordering::SeqCst) == 2);
        lifecycle.stop();
        handle.join().unwrap();

        assert_eq!(counters.ends.load(Ordering::SeqCst), 2);
        assert_eq!(*counters.ports.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_open_failure_reverts_to_idle() {
        let (lifecycle, counters, handle) = spawn(Some("missing"), false);

        lifecycle.open("missing");
        wait_for(|| lifecycle.state() == ConnectionState::Idle);
        assert_eq!(counters.errors.load(Ordering::SeqCst), 1);
        assert_eq!(counters.polls.load(Ordering::SeqCst), 0);

        lifecycle.open("present");
        wait_for(|| counters.polls.load(Ordering::SeqCst) > 0);
        lifecycle.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_read_error_reverts_to_idle_not_stopped() {
        let (lifecycle, counters, handle) = spawn(None, true);

        lifecycle.open("flaky");
        wait_for(|| counters.errors.load(Ordering::SeqCst) == 1);
        wait_for(|| lifecycle.state() == ConnectionState::Idle);
        assert_eq!(counters.ends.load(Ordering::SeqCst), 1);

        lifecycle.open("flaky");
        wait_for(|| counters.begins.load(Ordering::SeqCst) == 2);
        lifecycle.stop();
        handle.join().unwrap();
        assert_eq!(counters.ends.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_switching_port_starts_new_session() {
        let (lifecycle, counters, handle) = spawn(None, false);

        lifecycle.open("a");
        wait_for(|| counters.polls.load(Ordering::SeqCst) > 0);
        lifecycle.open("b");
        wait_for(|| counters.begins.load(Ordering::SeqCst) == 2);
        assert_eq!(counters.ends.load(Ordering::SeqCst), 1);

        lifecycle.stop();
        handle.join().unwrap();
        assert_eq!(*counters.ports.lock().unwrap(), vec!["a", "b"]);
    }
}
