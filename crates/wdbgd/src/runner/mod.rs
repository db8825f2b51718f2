//! Debugger process runner.
//!
//! Owns one cdb child process: spawns it with piped stdio, writes commands
//! to stdin, and turns the unframed stdout stream back into per-command
//! output using the rules in [`completion`].
//!
//! # Locking
//!
//! Three independent locks, so that status queries and kills never wait on
//! a running command:
//! - `output` (async): held for the whole exchange of one command.
//! - `stdin` (async): held only while writing.
//! - `child` (sync): held only for `try_wait` / `start_kill`, never across
//!   an `.await`.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Poisoned std mutexes are recovered, not propagated
//! - Reader task failures surface as end-of-stream

mod completion;

pub use completion::{MAX_LINE_BYTES, MAX_OUTPUT_LINES};

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use wdbg_core::CommandStatus;

use completion::{MarkerSet, OutputCollector, Progress};

/// How long `terminate` waits after sending the quit command.
const QUIT_GRACE: Duration = Duration::from_secs(1);

/// How long `terminate` waits after a forced kill.
const KILL_GRACE: Duration = Duration::from_secs(3);

/// Poll interval while waiting for the child to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to keep reading after a failed write.
const WRITE_FAILURE_GRACE: Duration = Duration::from_secs(1);

/// Timeout for writing to the debugger's stdin.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer size for the stdout reader task.
const READ_CHUNK: usize = 8192;

/// Longest wait any single exchange is allowed.
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// `start + wait`, capped at `MAX_COMMAND_TIMEOUT` so huge waits cannot
/// overflow the clock.
fn deadline_after(start: Instant, wait: Duration) -> Instant {
    start
        .checked_add(wait.min(MAX_COMMAND_TIMEOUT))
        .unwrap_or(start)
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while starting a debugger process.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The executable could not be spawned (missing, not executable, ...).
    #[error("failed to start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child was spawned without one of its piped streams.
    #[error("debugger process has no {0} pipe")]
    MissingPipe(&'static str),

    /// The completion marker pattern could not be built.
    #[error("invalid completion marker: {0}")]
    Marker(String),
}

// ============================================================================
// Launch Spec
// ============================================================================

/// Everything needed to start one debugger process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Debugger executable.
    pub program: PathBuf,
    /// Command-line arguments, in order.
    pub args: Vec<OsString>,
    /// Working directory for the child; inherits ours when `None`.
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Creates a spec with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

// ============================================================================
// Raw Output
// ============================================================================

/// Unsanitized result of one exchange with the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub lines: Vec<String>,
    pub truncated: bool,
    pub status: CommandStatus,
    pub elapsed: Duration,
}

// ============================================================================
// Reader Tasks
// ============================================================================

#[derive(Debug)]
enum StreamEvent {
    Stdout(Vec<u8>),
    Stderr(String),
    StdoutClosed,
}

fn spawn_stdout_reader<R>(mut stream: R, tx: mpsc::UnboundedSender<StreamEvent>, pid: Option<u32>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = buf.get(..n).map(<[u8]>::to_vec).unwrap_or_default();
                    trace!(?pid, bytes = n, "stdout chunk");
                    if tx.send(StreamEvent::Stdout(chunk)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(?pid, error = %e, "stdout read failed");
                    break;
                }
            }
        }
        let _ = tx.send(StreamEvent::StdoutClosed);
    });
}

fn spawn_stderr_reader<R>(stream: R, tx: mpsc::UnboundedSender<StreamEvent>, pid: Option<u32>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(StreamEvent::Stderr(line)).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    debug!(?pid, error = %e, "stderr read failed");
                    return;
                }
            }
        }
    });
}

/// Process-unique nonce for completion markers.
fn marker_nonce(pid: Option<u32>) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}{:x}{:x}", pid.unwrap_or_default(), nanos, n)
}

// ============================================================================
// Output Stream
// ============================================================================

/// Receiving side of the reader tasks plus the collector state.
struct OutputStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    collector: OutputCollector,
    closed: bool,
}

impl OutputStream {
    /// Reads until the command with `seq` completes, the process exits, or
    /// `deadline` passes.
    async fn read_until_complete(
        &mut self,
        seq: u64,
        deadline: Instant,
        prompt_idle: Duration,
    ) -> CommandStatus {
        if self.collector.push_bytes(&[], seq) == Progress::Completed {
            return CommandStatus::Completed;
        }
        if self.closed {
            return CommandStatus::ProcessExited;
        }

        loop {
            let now = Instant::now();
            if now >= deadline {
                return CommandStatus::TimedOut;
            }

            let wait_until = if self.collector.tail_is_prompt() {
                deadline.min(deadline_after(now, prompt_idle))
            } else {
                deadline
            };

            match tokio::time::timeout_at(wait_until, self.events.recv()).await {
                Ok(Some(StreamEvent::Stdout(bytes))) => {
                    if self.collector.push_bytes(&bytes, seq) == Progress::Completed {
                        return CommandStatus::Completed;
                    }
                }
                Ok(Some(StreamEvent::Stderr(line))) => {
                    if self.collector.push_line(line, seq) == Progress::Completed {
                        return CommandStatus::Completed;
                    }
                }
                Ok(Some(StreamEvent::StdoutClosed)) | Ok(None) => {
                    self.closed = true;
                    self.collector.flush_tail();
                    return CommandStatus::ProcessExited;
                }
                Err(_) => {
                    if Instant::now() >= deadline {
                        return CommandStatus::TimedOut;
                    }
                    debug!(seq, "Prompt idle, treating command as complete");
                    return CommandStatus::Completed;
                }
            }
        }
    }
}

// ============================================================================
// Debugger Process
// ============================================================================

/// A running debugger child process.
///
/// Dropping it kills the child (`kill_on_drop`), but callers should use
/// [`terminate`](Self::terminate) for the polite quit sequence.
pub struct DebuggerProcess {
    pid: Option<u32>,
    child: Mutex<Child>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    output: tokio::sync::Mutex<OutputStream>,
    next_seq: AtomicU64,
    prompt_idle: Duration,
}

impl std::fmt::Debug for DebuggerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebuggerProcess")
            .field("pid", &self.pid)
            .field("prompt_idle", &self.prompt_idle)
            .finish_non_exhaustive()
    }
}

impl DebuggerProcess {
    /// Spawns the debugger and its reader tasks.
    ///
    /// Returns as soon as the process exists; use
    /// [`drain_startup`](Self::drain_startup) to wait for it to be ready.
    ///
    /// # Errors
    ///
    /// - `RunnerError::Launch` if the executable cannot be spawned
    pub fn start(spec: &LaunchSpec, prompt_idle: Duration) -> Result<Self, RunnerError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Launch {
            program: spec.program.display().to_string(),
            source,
        })?;
        let pid = child.id();

        let stdin = child.stdin.take().ok_or(RunnerError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(RunnerError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(RunnerError::MissingPipe("stderr"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_stdout_reader(stdout, tx.clone(), pid);
        spawn_stderr_reader(stderr, tx, pid);

        let markers = MarkerSet::new(&marker_nonce(pid))?;

        info!(
            ?pid,
            program = %spec.program.display(),
            args = ?spec.args,
            "Debugger process started"
        );

        Ok(Self {
            pid,
            child: Mutex::new(child),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            output: tokio::sync::Mutex::new(OutputStream {
                events: rx,
                collector: OutputCollector::new(markers),
                closed: false,
            }),
            next_seq: AtomicU64::new(1),
            prompt_idle,
        })
    }

    /// OS process id, if the process was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns true while the child has not exited.
    pub fn is_alive(&self) -> bool {
        matches!(self.lock_child().try_wait(), Ok(None))
    }

    /// Exit code, once the child has exited.
    pub fn exit_code(&self) -> Option<i32> {
        match self.lock_child().try_wait() {
            Ok(Some(status)) => status.code(),
            _ => None,
        }
    }

    /// Waits for the startup banner and first prompt.
    ///
    /// Sends only the completion marker, so the collected output is
    /// everything the debugger printed while loading.
    pub async fn drain_startup(&self, timeout: Duration) -> RawOutput {
        self.exchange(None, timeout).await
    }

    /// Runs one command and collects its output.
    ///
    /// Never fails outright: problems are reported through
    /// `RawOutput::status` alongside whatever output was collected.
    pub async fn send_command(&self, command: &str, timeout: Duration) -> RawOutput {
        self.exchange(Some(command), timeout).await
    }

    async fn exchange(&self, command: Option<&str>, timeout: Duration) -> RawOutput {
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);

        let mut output = self.output.lock().await;
        // Taken under the lock so markers reach the debugger in seq order.
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        output.collector.begin();

        let marker = output.collector.markers().marker(seq);
        let payload = match command {
            Some(command) => format!(
                "{}\n.echo {marker}\n",
                command.trim_end_matches(['\r', '\n'])
            ),
            None => format!(".echo {marker}\n"),
        };

        let status = match self.write_input(&payload).await {
            Ok(()) => {
                output
                    .read_until_complete(seq, deadline, self.prompt_idle)
                    .await
            }
            Err(e) => {
                warn!(pid = ?self.pid, error = %e, "Failed to write to debugger");
                // Keep whatever it printed before going away.
                let grace = deadline.min(deadline_after(Instant::now(), WRITE_FAILURE_GRACE));
                match output.read_until_complete(seq, grace, self.prompt_idle).await {
                    CommandStatus::ProcessExited => CommandStatus::ProcessExited,
                    _ => CommandStatus::Error,
                }
            }
        };

        let (lines, truncated) = output.collector.take();
        let elapsed = started.elapsed();
        debug!(
            pid = ?self.pid,
            seq,
            status = %status,
            lines = lines.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Exchange finished"
        );

        RawOutput {
            lines,
            truncated,
            status,
            elapsed,
        }
    }

    async fn write_input(&self, text: &str) -> std::io::Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "debugger stdin closed")
        })?;

        let write = async {
            stdin.write_all(text.as_bytes()).await?;
            stdin.flush().await
        };
        match tokio::time::timeout(WRITE_TIMEOUT, write).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write to debugger stdin timed out",
            )),
        }
    }

    /// Stops the debugger.
    ///
    /// If no command holds stdin, sends `quit_command` and gives the
    /// process `QUIT_GRACE` to leave; otherwise (or if it lingers) kills
    /// it. Idempotent, and safe to call while a command is running: the
    /// in-flight read then sees end-of-stream.
    pub async fn terminate(&self, quit_command: &str) {
        let polite = match self.stdin.try_lock() {
            Ok(mut guard) => {
                let sent = match guard.as_mut() {
                    Some(stdin) if self.is_alive() => {
                        let line = format!("{quit_command}\n");
                        let write = async {
                            stdin.write_all(line.as_bytes()).await?;
                            stdin.flush().await
                        };
                        matches!(tokio::time::timeout(WRITE_TIMEOUT, write).await, Ok(Ok(())))
                    }
                    _ => false,
                };
                guard.take();
                sent
            }
            Err(_) => false,
        };

        if !self.is_alive() {
            debug!(pid = ?self.pid, "Debugger already exited");
            return;
        }

        if polite && self.wait_for_exit(QUIT_GRACE).await {
            info!(pid = ?self.pid, "Debugger exited after quit command");
            return;
        }

        if let Err(e) = self.lock_child().start_kill() {
            debug!(pid = ?self.pid, error = %e, "Kill failed");
        }

        if self.wait_for_exit(KILL_GRACE).await {
            info!(pid = ?self.pid, "Debugger killed");
        } else {
            warn!(pid = ?self.pid, "Debugger did not exit after kill");
        }
    }

    async fn wait_for_exit(&self, grace: Duration) -> bool {
        let deadline = deadline_after(Instant::now(), grace);
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    fn lock_child(&self) -> MutexGuard<'_, Child> {
        match self.child.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
