//! The boundary to Bear and to the helper listener.
//!
//! Requests are fire-and-forget: Bear reports back through x-callback URLs that
//! the listener receives, never through the submitting call. The driver only
//! sees the two traits here, so tests swap in [`RecordingChannel`] and
//! [`StubListener`].

use crate::utils::MigrateError;
use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Hands x-callback requests to the note application.
pub trait Channel {
    fn submit_create(&mut self, request: &str);
    fn submit_exists_check(&mut self, request: &str);
}

/// The local process that receives Bear's callbacks.
pub trait Listener {
    /// Start and wait until live. Fails without leaving anything running.
    fn start(&mut self) -> Result<(), MigrateError>;
    /// Tear down. Safe to call when not started.
    fn stop(&mut self);
}

/// Stops the listener when dropped, whichever way the run ends.
pub struct ListenerGuard<'a> {
    listener: &'a mut dyn Listener,
}

impl<'a> ListenerGuard<'a> {
    pub fn start(listener: &'a mut dyn Listener) -> Result<Self, MigrateError> {
        listener.start()?;
        Ok(Self { listener })
    }
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.listener.stop();
    }
}

// ── macOS URL handler ─────────────────────────────────────────────────────────

/// Opens each request with `open -g`, which routes `bear://` URLs to Bear
/// without bringing it to the foreground.
pub struct OpenChannel {
    program: String,
}

impl Default for OpenChannel {
    fn default() -> Self {
        Self {
            program: "open".to_string(),
        }
    }
}

impl OpenChannel {
    fn open(&self, request: &str) {
        match Command::new(&self.program)
            .arg("-g")
            .arg(request)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
        {
            Ok(out) if out.status.success() => {}
            Ok(out) => warn!(
                status = %out.status,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "{} returned an error", self.program
            ),
            Err(e) => warn!(error = %e, "failed to run {}", self.program),
        }
    }
}

impl Channel for OpenChannel {
    fn submit_create(&mut self, request: &str) {
        self.open(request);
    }

    fn submit_exists_check(&mut self, request: &str) {
        self.open(request);
    }
}

// ── Spawned listener ──────────────────────────────────────────────────────────

/// Runs the callback listener as a child process for the duration of a pass.
pub struct ProcessListener {
    command: Vec<String>,
    probe: Url,
    startup_timeout: Duration,
    child: Option<Child>,
}

impl ProcessListener {
    pub fn new(command: Vec<String>, probe: Url, startup_timeout: Duration) -> Self {
        Self {
            command,
            probe,
            startup_timeout,
            child: None,
        }
    }

    fn probe_addrs(&self) -> Vec<SocketAddr> {
        self.probe.socket_addrs(|| None).unwrap_or_default()
    }

    fn accepts_connections(addrs: &[SocketAddr]) -> bool {
        addrs
            .iter()
            .any(|addr| TcpStream::connect_timeout(addr, POLL_INTERVAL).is_ok())
    }
}

impl Listener for ProcessListener {
    fn start(&mut self) -> Result<(), MigrateError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| MigrateError::ChannelStartup("empty listener command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MigrateError::ChannelStartup(format!("could not spawn {program}: {e}")))?;

        let addrs = self.probe_addrs();
        let deadline = Instant::now() + self.startup_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let mut stderr = String::new();
                    if let Some(mut pipe) = child.stderr.take() {
                        let _ = pipe.read_to_string(&mut stderr);
                    }
                    return Err(MigrateError::ChannelStartup(format!(
                        "{program} exited with {status}: {}",
                        stderr.trim()
                    )));
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(MigrateError::ChannelStartup(e.to_string()));
                }
            }

            if Self::accepts_connections(&addrs) {
                info!(pid = child.id(), url = %self.probe, "listener is running");
                self.child = Some(child);
                return Ok(());
            }

            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MigrateError::ChannelStartup(format!(
                    "{} not reachable after {} ms",
                    self.probe,
                    self.startup_timeout.as_millis()
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!(error = %e, "listener already gone");
            }
            let _ = child.wait();
            info!("listener process terminated");
        }
    }
}

impl Drop for ProcessListener {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Test doubles ──────────────────────────────────────────────────────────────

type Responder = Box<dyn FnMut(&str)>;

/// Records every request instead of sending it. An optional responder plays
/// the part of Bear answering an existence check.
#[derive(Default)]
pub struct RecordingChannel {
    pub created: Vec<String>,
    pub checks: Vec<String>,
    responder: Option<Responder>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder(responder: impl FnMut(&str) + 'static) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }
}

impl Channel for RecordingChannel {
    fn submit_create(&mut self, request: &str) {
        self.created.push(request.to_string());
    }

    fn submit_exists_check(&mut self, request: &str) {
        self.checks.push(request.to_string());
        if let Some(respond) = self.responder.as_mut() {
            respond(request);
        }
    }
}

/// Listener stand-in that counts lifecycle calls.
#[derive(Debug, Default)]
pub struct StubListener {
    pub fail_start: bool,
    pub starts: usize,
    pub stops: usize,
}

impl StubListener {
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }
}

impl Listener for StubListener {
    fn start(&mut self) -> Result<(), MigrateError> {
        self.starts += 1;
        if self.fail_start {
            return Err(MigrateError::ChannelStartup("stub refused to start".into()));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stops += 1;
    }
}
