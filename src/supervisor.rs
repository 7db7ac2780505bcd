//! Spawns and watches one encoder process at a time.
//!
//! stdout and stderr are pumped by two reader threads into a single channel.
//! A watcher thread waits for the exit, then gives the readers a bounded time
//! to drain before it reports the termination. Output that arrives later is
//! dropped, so no chunk of a process is delivered after its termination.
//!
//! On unix the encoder leads its own process group. Stop requests and kills
//! go to the whole group, and Ctrl-C on the terminal does not reach it.

use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::SpawnError;

const CHUNK_SIZE: usize = 4096;
const OUTPUT_LOG_LIMIT: usize = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const READER_DRAIN: Duration = Duration::from_millis(500);

pub const ERROR_MARKERS: [&str; 10] = [
    "Unknown encoder",
    "Unrecognized option",
    "Invalid argument",
    "No such file or directory",
    "Permission denied",
    "Error while opening encoder",
    "Invalid data found when processing input",
    "Conversion failed!",
    "Encoder not found",
    "Unknown decoder",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Starting,
    Running,
    Finished,
    Killed,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code zero.
    Normal,
    Crashed,
    Killed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SupervisorEvent {
    Output(String),
    Terminated,
}

enum PumpMessage {
    Output(String),
    Exited(Option<ExitStatus>),
}

pub struct Supervisor {
    state: ProcessState,
    program: PathBuf,
    child: Option<Arc<Mutex<Child>>>,
    events: Option<Receiver<PumpMessage>>,
    pid: Option<u32>,
    stop_requested: bool,
    exit: Option<ExitKind>,
    exit_code: Option<i32>,
    output_log: String,
    error: Option<String>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Supervisor::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor {
            state: ProcessState::Idle,
            program: PathBuf::new(),
            child: None,
            events: None,
            pid: None,
            stop_requested: false,
            exit: None,
            exit_code: None,
            output_log: String::new(),
            error: None,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ProcessState::Starting | ProcessState::Running)
    }

    /// The process is gone or was never started, but `close` was not called.
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, ProcessState::Finished | ProcessState::Killed | ProcessState::Error)
    }

    pub fn start<I, S>(&mut self, executable: &Path, args: I) -> Result<(), SpawnError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if self.is_active() || self.events.is_some() {
            return Err(SpawnError::Busy);
        }
        self.state = ProcessState::Starting;
        self.program = executable.to_path_buf();
        self.stop_requested = false;
        self.exit = None;
        self.exit_code = None;
        self.output_log.clear();
        self.error = None;

        let mut cmd = Command::new(executable);
        cmd.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        isolate(&mut cmd);
        let spawned = cmd.spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                self.state = ProcessState::Idle;
                return Err(SpawnError::from_io(executable, err));
            },
        };

        let (tx, rx) = mpsc::channel();
        let mut readers = vec![];
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx.clone()));
        }

        let pid = child.id();
        let child = Arc::new(Mutex::new(child));
        let watched = Arc::clone(&child);
        thread::spawn(move || {
            let status = wait_for_exit(&watched);
            let deadline = Instant::now() + READER_DRAIN;
            while !readers.iter().all(|r| r.is_finished()) && Instant::now() < deadline {
                thread::sleep(POLL_INTERVAL);
            }
            if !readers.iter().all(|r| r.is_finished()) {
                debug!(pid, "encoder output still open after exit; not waiting for it");
            }
            let _ = tx.send(PumpMessage::Exited(status));
        });

        debug!(pid, program = %executable.display(), "encoder started");
        self.pid = Some(pid);
        self.child = Some(child);
        self.events = Some(rx);
        self.state = ProcessState::Running;
        Ok(())
    }

    /// Block until the next event. `None` once the process was reported terminated.
    pub fn next_event(&mut self) -> Option<SupervisorEvent> {
        let msg = self.events.as_ref()?.recv();
        match msg {
            Ok(msg) => Some(self.handle(msg)),
            Err(_) => Some(self.handle(PumpMessage::Exited(None))),
        }
    }

    pub fn next_event_timeout(&mut self, timeout: Duration) -> Option<SupervisorEvent> {
        let msg = self.events.as_ref()?.recv_timeout(timeout);
        match msg {
            Ok(msg) => Some(self.handle(msg)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(self.handle(PumpMessage::Exited(None))),
        }
    }

    fn handle(&mut self, msg: PumpMessage) -> SupervisorEvent {
        match msg {
            PumpMessage::Output(chunk) => {
                self.append_output(&chunk);
                SupervisorEvent::Output(chunk)
            },
            PumpMessage::Exited(status) => {
                self.events = None;
                self.exit_code = status.and_then(|s| s.code());
                let kind = match status {
                    Some(s) if s.success() => ExitKind::Normal,
                    _ if self.stop_requested => ExitKind::Killed,
                    _ => ExitKind::Crashed,
                };
                self.state = match kind {
                    ExitKind::Normal => ProcessState::Finished,
                    ExitKind::Killed => ProcessState::Killed,
                    ExitKind::Crashed => ProcessState::Error,
                };
                self.exit = Some(kind);
                debug!(pid = ?self.pid, code = ?self.exit_code, ?kind, "encoder exited");
                SupervisorEvent::Terminated
            },
        }
    }

    fn append_output(&mut self, chunk: &str) {
        self.output_log.push_str(chunk);
        if self.output_log.len() > OUTPUT_LOG_LIMIT {
            let mut cut = self.output_log.len() - OUTPUT_LOG_LIMIT;
            while !self.output_log.is_char_boundary(cut) {
                cut += 1;
            }
            self.output_log.drain(..cut);
        }
    }

    /// Ask the process to terminate and wait up to `grace` for it.
    /// Returns whether it is gone.
    pub fn request_stop(&mut self, grace: Duration) -> bool {
        let (Some(child), Some(pid)) = (self.child.as_ref().map(Arc::clone), self.pid) else {
            return true;
        };
        self.stop_requested = true;
        if has_exited(&child) {
            return true;
        }
        if !send_signal(pid, false) {
            warn!(pid, "unable to request termination");
        }
        let deadline = Instant::now() + grace;
        loop {
            if has_exited(&child) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn kill(&mut self) {
        let (Some(child), Some(pid)) = (self.child.as_ref(), self.pid) else {
            return;
        };
        self.stop_requested = true;
        if !has_exited(child) {
            send_signal(pid, true);
        }
        match child.lock() {
            Ok(mut child) => {
                if let Err(err) = child.kill() {
                    debug!("kill: {}", err);
                }
            },
            Err(_) => warn!("encoder handle poisoned; unable to kill"),
        }
    }

    /// Release the process. Kills it when still running.
    pub fn close(&mut self) {
        if let Some(child) = self.child.as_ref() {
            if !has_exited(child) {
                self.kill();
            }
        }
        self.child = None;
        self.events = None;
        self.pid = None;
        self.state = ProcessState::Idle;
    }

    pub fn exit_status(&self) -> Option<ExitKind> {
        self.exit
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn output(&self) -> &str {
        &self.output_log
    }

    /// Look for a known fatal message in the output seen so far.
    pub fn catch_errors(&mut self) -> bool {
        if self.error.is_some() {
            return true;
        }
        let found = self
            .output_log
            .lines()
            .flat_map(|l| l.split('\r'))
            .find(|l| ERROR_MARKERS.iter().any(|m| l.contains(m)));
        match found {
            Some(line) => {
                self.error = Some(String::from(line.trim()));
                true
            },
            None => false,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut stream: R,
    tx: Sender<PumpMessage>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; CHUNK_SIZE];
        let mut pending = vec![];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    let chunk = take_decoded(&mut pending);
                    if !chunk.is_empty() && tx.send(PumpMessage::Output(chunk)).is_err() {
                        return;
                    }
                },
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        if !pending.is_empty() {
            let _ = tx.send(PumpMessage::Output(String::from_utf8_lossy(&pending).into_owned()));
        }
    })
}

/// Decode the complete characters in `pending` and leave a trailing partial
/// sequence for the next read. Invalid bytes become U+FFFD.
fn take_decoded(pending: &mut Vec<u8>) -> String {
    let mut decoded = String::new();
    let mut rest = &pending[..];
    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                decoded.push_str(text);
                rest = &[];
                break;
            },
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                decoded.push_str(&String::from_utf8_lossy(valid));
                match err.error_len() {
                    Some(len) => {
                        decoded.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    },
                    None => {
                        rest = after;
                        break;
                    },
                }
            },
        }
    }
    let kept = rest.len();
    pending.drain(..pending.len() - kept);
    decoded
}

fn wait_for_exit(child: &Mutex<Child>) -> Option<ExitStatus> {
    loop {
        match child.lock() {
            Ok(mut child) => match child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => (),
                Err(_) => return None,
            },
            Err(_) => return None,
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn has_exited(child: &Mutex<Child>) -> bool {
    match child.lock() {
        Ok(mut child) => !matches!(child.try_wait(), Ok(None)),
        Err(_) => true,
    }
}

#[cfg(unix)]
fn isolate(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn isolate(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

/// Signal the encoder and everything it started.
#[cfg(unix)]
fn signal_command(pid: u32, force: bool) -> Command {
    let mut cmd = Command::new("kill");
    cmd.arg(if force { "-KILL" } else { "-TERM" }).arg("--").arg(format!("-{pid}"));
    cmd
}

#[cfg(windows)]
fn signal_command(pid: u32, force: bool) -> Command {
    let mut cmd = Command::new("taskkill");
    cmd.arg("/T").arg("/PID").arg(pid.to_string());
    if force {
        cmd.arg("/F");
    }
    cmd
}

fn send_signal(pid: u32, force: bool) -> bool {
    let status = signal_command(pid, force)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => true,
        Ok(status) => {
            debug!(pid, force, "signal returned {}", status);
            false
        },
        Err(err) => {
            debug!(pid, force, "unable to signal: {}", err);
            false
        },
    }
}
