//! One debugger session: a target, its cdb process and its lifecycle state.
//!
//! State lives behind a short-held std mutex, separate from the process
//! I/O, so `summary()` and `state()` answer immediately even while a long
//! command is running.
//!
//! ```text
//! Starting ──▶ Ready ◀──▶ Busy
//!    │           │          │
//!    └──────▶ Closing ◀─────┘        (explicit close, reap)
//!                │
//!                ▼
//!             Closed ◀── Ready/Busy  (process died)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Poisoned state locks are recovered

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use wdbg_core::{
    clean_lines, CommandResult, CommandStatus, SessionKey, SessionState, SessionSummary, Target,
};

use crate::runner::{DebuggerProcess, LaunchSpec, RunnerError};

// ============================================================================
// Errors
// ============================================================================

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The debugger executable could not be started.
    #[error("failed to launch debugger for {key}: {source}")]
    Launch {
        key: SessionKey,
        #[source]
        source: RunnerError,
    },

    /// The debugger started but the session never became ready.
    #[error("failed to open session {key}: {reason}")]
    Open { key: SessionKey, reason: String },

    /// Another command is in flight on this session.
    #[error("session {0} is busy running another command")]
    Busy(SessionKey),

    /// The session is closing or closed.
    #[error("session {0} is closed")]
    Closed(SessionKey),
}

// ============================================================================
// Open Parameters
// ============================================================================

/// Settings used to start a session's debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenParams {
    /// Debugger executable.
    pub debugger: PathBuf,
    /// Symbol search path passed with `-y`.
    pub symbols_path: Option<String>,
    /// Extra arguments appended after the target and symbol arguments.
    pub extra_args: Vec<String>,
    /// Working directory for the debugger.
    pub working_dir: Option<PathBuf>,
    /// How long to wait for the first prompt.
    pub startup_timeout: Duration,
    /// Quiet period after a trailing prompt that counts as completion.
    pub prompt_idle: Duration,
}

impl OpenParams {
    /// Creates parameters with default timeouts and no extra arguments.
    pub fn new(debugger: impl Into<PathBuf>) -> Self {
        Self {
            debugger: debugger.into(),
            symbols_path: None,
            extra_args: Vec::new(),
            working_dir: None,
            startup_timeout: Duration::from_secs(120),
            prompt_idle: Duration::from_secs(2),
        }
    }

    /// Builds the command line for a target.
    pub fn launch_spec(&self, target: &Target) -> LaunchSpec {
        let mut spec = LaunchSpec::new(&self.debugger).args(target.debugger_args());
        if let Some(symbols) = &self.symbols_path {
            spec = spec.arg("-y").arg(symbols);
        }
        spec = spec.args(&self.extra_args);
        spec.working_dir = self.working_dir.clone();
        spec
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    last_activity: DateTime<Utc>,
}

/// A live debugger session.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    target: Target,
    created_at: DateTime<Utc>,
    lifecycle: Mutex<Lifecycle>,
    process: DebuggerProcess,
    startup_output: Vec<String>,
}

impl Session {
    /// Starts a debugger for `target` and waits until it is ready.
    ///
    /// # Errors
    ///
    /// - `SessionError::Open` if the dump file does not exist, or the
    ///   debugger exits or stays silent past `startup_timeout`
    /// - `SessionError::Launch` if the debugger cannot be spawned
    ///
    /// No process is left running when this returns an error.
    pub async fn open(target: Target, params: &OpenParams) -> Result<Self, SessionError> {
        let key = target.key();

        if let Some(path) = target.dump_path() {
            if !path.is_file() {
                return Err(SessionError::Open {
                    key,
                    reason: format!("dump file not found: {}", path.display()),
                });
            }
        }

        let spec = params.launch_spec(&target);
        let process =
            DebuggerProcess::start(&spec, params.prompt_idle).map_err(|source| {
                SessionError::Launch {
                    key: key.clone(),
                    source,
                }
            })?;

        let now = Utc::now();
        let mut session = Self {
            key,
            target,
            created_at: now,
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Starting,
                last_activity: now,
            }),
            process,
            startup_output: Vec::new(),
        };

        let startup = session.process.drain_startup(params.startup_timeout).await;
        if startup.status != CommandStatus::Completed {
            let reason = match startup.status {
                CommandStatus::TimedOut => format!(
                    "debugger did not become ready within {}s",
                    params.startup_timeout.as_secs()
                ),
                CommandStatus::ProcessExited => match session.process.exit_code() {
                    Some(code) => format!("debugger exited during startup (exit code {code})"),
                    None => "debugger exited during startup".to_string(),
                },
                _ => "could not communicate with debugger".to_string(),
            };
            let detail = clean_lines(&startup.lines);
            warn!(
                key = %session.key,
                status = %startup.status,
                output = ?detail.last(),
                "Session failed to start"
            );
            session.close().await;
            let reason = match detail.last() {
                Some(last) => format!("{reason}: {last}"),
                None => reason,
            };
            return Err(SessionError::Open {
                key: session.key.clone(),
                reason,
            });
        }

        session.startup_output = clean_lines(&startup.lines);
        session.transition(SessionState::Ready);
        info!(
            key = %session.key,
            pid = ?session.process.pid(),
            elapsed_ms = startup.elapsed.as_millis() as u64,
            "Session ready"
        );
        Ok(session)
    }

    /// Canonical key.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// What the debugger is attached to.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Cleaned output printed while the debugger loaded the target.
    pub fn startup_output(&self) -> &[String] {
        &self.startup_output
    }

    /// Debugger process id.
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Returns true if the session can accept commands now or after the
    /// current one finishes.
    pub fn is_usable(&self) -> bool {
        self.state().is_live() && self.process.is_alive()
    }

    /// Snapshot for listings. Never waits on a running command.
    pub fn summary(&self) -> SessionSummary {
        let lifecycle = self.lock();
        SessionSummary {
            key: self.key.clone(),
            state: lifecycle.state,
            pid: self.process.pid(),
            created_at: self.created_at,
            last_activity: lifecycle.last_activity,
        }
    }

    /// Runs one debugger command.
    ///
    /// Timeouts and process death are not errors: they come back as a
    /// `CommandResult` with the matching status and any partial output.
    ///
    /// # Errors
    ///
    /// - `SessionError::Busy` if another command is running
    /// - `SessionError::Closed` if the session is closing or closed
    pub async fn run(&self, command: &str, timeout: Duration) -> Result<CommandResult, SessionError> {
        self.begin_command()?;

        if !self.process.is_alive() {
            warn!(key = %self.key, "Debugger exited between commands");
            self.mark_dead().await;
            return Ok(CommandResult {
                command: command.to_string(),
                lines: Vec::new(),
                truncated: false,
                elapsed: Duration::ZERO,
                status: CommandStatus::ProcessExited,
            });
        }

        debug!(key = %self.key, command, timeout_ms = timeout.as_millis() as u64, "Running command");
        let raw = self.process.send_command(command, timeout).await;
        let result = CommandResult {
            command: command.to_string(),
            lines: clean_lines(&raw.lines),
            truncated: raw.truncated,
            elapsed: raw.elapsed,
            status: raw.status,
        };

        match result.status {
            CommandStatus::Completed => {}
            CommandStatus::TimedOut => {
                warn!(key = %self.key, command, "Command timed out");
            }
            CommandStatus::ProcessExited | CommandStatus::Error => {
                warn!(key = %self.key, command, status = %result.status, "Command failed");
            }
        }

        if self.process.is_alive() {
            self.end_command();
        } else {
            self.mark_dead().await;
        }

        Ok(result)
    }

    /// Closes the session and stops its debugger.
    ///
    /// Idempotent. May be called while a command runs; that command then
    /// finishes with `ProcessExited`. Returns true if this call did the
    /// closing.
    pub async fn close(&self) -> bool {
        if !self.begin_close() {
            return false;
        }
        self.finish_close().await;
        true
    }

    /// Moves an idle Ready session to Closing.
    ///
    /// Busy sessions are never reaped. Returns true if the caller now owns
    /// the close and must call [`finish_close`](Self::finish_close).
    pub fn try_begin_reap(&self, idle_threshold: Duration, now: DateTime<Utc>) -> bool {
        let mut lifecycle = self.lock();
        if lifecycle.state != SessionState::Ready {
            return false;
        }
        let idle = now
            .signed_duration_since(lifecycle.last_activity)
            .to_std()
            .unwrap_or_default();
        if idle < idle_threshold {
            return false;
        }
        debug!(key = %self.key, idle_secs = idle.as_secs(), "Reaping idle session");
        Self::apply(&self.key, &mut lifecycle, SessionState::Closing)
    }

    /// Returns true if the debugger died while the session was idle.
    pub fn is_dead(&self) -> bool {
        match self.state() {
            SessionState::Closed => true,
            SessionState::Ready => !self.process.is_alive(),
            _ => false,
        }
    }

    /// Completes a close started by `close` or `try_begin_reap`.
    pub async fn finish_close(&self) {
        self.process.terminate(self.target.quit_command()).await;
        self.transition(SessionState::Closed);
        info!(key = %self.key, "Session closed");
    }

    /// Releases a session whose debugger already exited.
    pub async fn mark_dead(&self) {
        self.transition(SessionState::Closed);
        self.process.terminate(self.target.quit_command()).await;
        info!(
            key = %self.key,
            exit_code = ?self.process.exit_code(),
            "Session closed, debugger exited"
        );
    }

    fn begin_command(&self) -> Result<(), SessionError> {
        let mut lifecycle = self.lock();
        match lifecycle.state {
            SessionState::Ready => {
                Self::apply(&self.key, &mut lifecycle, SessionState::Busy);
                lifecycle.last_activity = Utc::now();
                Ok(())
            }
            SessionState::Busy | SessionState::Starting => Err(SessionError::Busy(self.key.clone())),
            SessionState::Closing | SessionState::Closed => {
                Err(SessionError::Closed(self.key.clone()))
            }
        }
    }

    fn end_command(&self) {
        let mut lifecycle = self.lock();
        lifecycle.last_activity = Utc::now();
        if lifecycle.state == SessionState::Busy {
            Self::apply(&self.key, &mut lifecycle, SessionState::Ready);
        }
    }

    fn begin_close(&self) -> bool {
        let mut lifecycle = self.lock();
        if lifecycle.state.is_terminal() {
            return false;
        }
        Self::apply(&self.key, &mut lifecycle, SessionState::Closing)
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut lifecycle = self.lock();
        Self::apply(&self.key, &mut lifecycle, next)
    }

    fn apply(key: &SessionKey, lifecycle: &mut Lifecycle, next: SessionState) -> bool {
        if lifecycle.state == next {
            return false;
        }
        if !lifecycle.state.can_transition_to(next) {
            debug!(%key, from = %lifecycle.state, to = %next, "Ignoring invalid transition");
            return false;
        }
        debug!(%key, from = %lifecycle.state, to = %next, "Session state change");
        lifecycle.state = next;
        true
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
