//! Agent-facing tools.
//!
//! Each tool is a thin composition of registry and session calls that
//! turns results into agent-readable text. Tool calls are independent:
//! many may be in flight at once, and only calls on the same session key
//! contend with each other.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use wdbg_core::{CommandResult, CommandStatus, DomainError, SessionKey, SessionSummary, Target};
use wdbg_protocol::{ErrorKind, ToolCall, ToolOutput};

use crate::registry::{RegistryError, RegistryHandle};
use crate::runner::MAX_COMMAND_TIMEOUT;
use crate::session::{Session, SessionError};

/// Dump file extension, compared case-insensitively.
const DUMP_EXTENSION: &str = "dmp";

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by tool calls.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The request parameters are unusable.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// The call needs an existing session and there is none.
    #[error("No active session for {0}")]
    NoSession(SessionKey),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Wire category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParams(_) => ErrorKind::InvalidParams,
            Self::NoSession(_) => ErrorKind::SessionClosed,
            Self::Registry(RegistryError::RegistryFull { .. }) => ErrorKind::RegistryFull,
            Self::Registry(RegistryError::ChannelClosed) => ErrorKind::Internal,
            Self::Registry(RegistryError::Session(e)) => session_error_kind(e),
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<SessionError> for ToolError {
    fn from(e: SessionError) -> Self {
        Self::Registry(RegistryError::Session(e))
    }
}

impl From<DomainError> for ToolError {
    fn from(e: DomainError) -> Self {
        Self::InvalidParams(e.to_string())
    }
}

fn session_error_kind(e: &SessionError) -> ErrorKind {
    match e {
        SessionError::Launch { .. } => ErrorKind::Launch,
        SessionError::Open { .. } => ErrorKind::SessionOpen,
        SessionError::Busy(_) => ErrorKind::SessionBusy,
        SessionError::Closed(_) => ErrorKind::SessionClosed,
    }
}

// ============================================================================
// Tool Facade
// ============================================================================

/// Entry point for all tool calls.
#[derive(Clone)]
pub struct Tools {
    registry: RegistryHandle,
    command_timeout: Duration,
}

impl Tools {
    pub fn new(registry: RegistryHandle, command_timeout: Duration) -> Self {
        Self {
            registry,
            command_timeout: command_timeout.min(MAX_COMMAND_TIMEOUT),
        }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Dispatches a decoded tool call. `Ping` is answered by the server
    /// and is rejected here.
    pub async fn call(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        debug!(tool = call.name(), "Tool call");
        match call {
            ToolCall::OpenDumpAnalysis {
                dump_path,
                include_stack_trace,
                include_modules,
                include_threads,
            } => {
                self.open_dump_analysis(
                    &dump_path,
                    AnalysisSections {
                        stack_trace: include_stack_trace,
                        modules: include_modules,
                        threads: include_threads,
                    },
                )
                .await
            }
            ToolCall::AttachProcess { pid } => self.attach_process(pid).await,
            ToolCall::RunCommand {
                session,
                command,
                timeout_secs,
            } => {
                self.run_command(&session, &command, timeout_secs.map(Duration::from_secs))
                    .await
            }
            ToolCall::CloseSession { session } => self.close_session(&session).await,
            ToolCall::ListSessions => self.list_sessions().await,
            ToolCall::ListDumps {
                directory_path,
                recursive,
            } => self.list_dumps(&directory_path, recursive).await,
            ToolCall::Ping { .. } => Err(ToolError::InvalidParams(
                "ping is not a tool".to_string(),
            )),
        }
    }

    /// Opens (or reuses) a dump session and runs the triage commands.
    pub async fn open_dump_analysis(
        &self,
        dump_path: &str,
        sections: AnalysisSections,
    ) -> Result<ToolOutput, ToolError> {
        let target = Target::dump(dump_path)?;
        let session = self.registry.get_or_create(target).await?;

        let mut plan = vec![
            ("Crash Information", ".lastevent"),
            ("Crash Analysis", "!analyze -v"),
        ];
        if sections.stack_trace {
            plan.push(("Stack Trace", "kb"));
        }
        if sections.modules {
            plan.push(("Loaded Modules", "lm"));
        }
        if sections.threads {
            plan.push(("Threads", "~"));
        }

        let mut text = format!("## Crash Dump Analysis\n\nSession: {}\n", session.key());
        let mut status = CommandStatus::Completed;
        let mut truncated = false;

        for (title, command) in plan {
            let result = session.run(command, self.command_timeout).await?;
            render_section(&mut text, title, &result);
            truncated |= result.truncated;
            status = worse_status(status, result.status);
            if result.status == CommandStatus::ProcessExited {
                break;
            }
        }

        info!(key = %session.key(), %status, "Dump analysis finished");
        Ok(ToolOutput {
            text,
            session: Some(session.key().clone()),
            status: Some(status),
            truncated,
            is_error: status != CommandStatus::Completed,
            sessions: None,
        })
    }

    /// Attaches a debugger to a running process.
    pub async fn attach_process(&self, pid: u32) -> Result<ToolOutput, ToolError> {
        let session = self.registry.get_or_create(Target::attach(pid)).await?;

        let result = session.run(".lastevent", self.command_timeout).await?;

        let mut text = format!("Attached to process {pid}.\n\nSession: {}\n", session.key());
        if !session.startup_output().is_empty() {
            text.push_str("\n```\n");
            text.push_str(&session.startup_output().join("\n"));
            text.push_str("\n```\n");
        }
        render_section(&mut text, "Last Event", &result);
        Ok(ToolOutput::text(text)
            .with_session(session.key().clone())
            .with_command(&result))
    }

    /// Runs one debugger command.
    ///
    /// `session` is a session key or a dump path. A dump without a session
    /// is opened on demand; attach sessions must already exist. `timeout`
    /// is capped at `MAX_COMMAND_TIMEOUT`.
    pub async fn run_command(
        &self,
        session: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ToolError::InvalidParams("command is empty".to_string()));
        }

        let timeout = timeout
            .unwrap_or(self.command_timeout)
            .min(MAX_COMMAND_TIMEOUT);
        let session = self.resolve(session).await?;
        let result = session.run(command, timeout).await?;

        let mut text = format!("Command: {command}\n\nOutput:\n```\n{}\n```", result.text());
        if let Some(note) = status_note(&result) {
            text.push_str("\n\n");
            text.push_str(&note);
        }
        Ok(ToolOutput::text(text)
            .with_session(session.key().clone())
            .with_command(&result))
    }

    /// Closes a session. Closing an unknown session is not an error.
    pub async fn close_session(&self, session: &str) -> Result<ToolOutput, ToolError> {
        let key = Target::parse(session)?.key();
        let closed = self.registry.close_session(&key).await?;
        let text = if closed {
            format!("Closed session: {key}")
        } else {
            format!("No active session found for: {key}")
        };
        Ok(ToolOutput::text(text).with_session(key))
    }

    /// Lists open sessions.
    pub async fn list_sessions(&self) -> Result<ToolOutput, ToolError> {
        let sessions = self.registry.list().await?;
        let text = render_session_list(&sessions);
        Ok(ToolOutput {
            text,
            sessions: Some(sessions),
            ..ToolOutput::default()
        })
    }

    /// Lists `.dmp` files under a directory.
    pub async fn list_dumps(&self, directory: &str, recursive: bool) -> Result<ToolOutput, ToolError> {
        let directory = PathBuf::from(directory.trim());
        if !directory.is_dir() {
            return Err(ToolError::InvalidParams(format!(
                "directory not found: {}",
                directory.display()
            )));
        }

        let dir = directory.clone();
        let dumps = tokio::task::spawn_blocking(move || find_dumps(&dir, recursive))
            .await
            .map_err(|e| ToolError::Internal(e.to_string()))?;

        Ok(ToolOutput::text(render_dump_list(&directory, &dumps)))
    }

    async fn resolve(&self, session: &str) -> Result<Arc<Session>, ToolError> {
        let target = Target::parse(session)?;
        match target {
            Target::Attach { .. } => {
                let key = target.key();
                self.registry
                    .get(&key)
                    .await?
                    .ok_or(ToolError::NoSession(key))
            }
            Target::Dump { .. } => Ok(self.registry.get_or_create(target).await?),
        }
    }
}

/// Optional sections of `open_dump_analysis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisSections {
    pub stack_trace: bool,
    pub modules: bool,
    pub threads: bool,
}

impl Default for AnalysisSections {
    fn default() -> Self {
        Self {
            stack_trace: true,
            modules: true,
            threads: true,
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn render_section(text: &mut String, title: &str, result: &CommandResult) {
    let _ = write!(text, "\n### {title}\n```\n{}\n```\n", result.text());
    if let Some(note) = status_note(result) {
        let _ = writeln!(text, "{note}");
    }
}

/// The more severe of two statuses: a lost debugger outranks a broken
/// channel, which outranks a timeout.
fn worse_status(a: CommandStatus, b: CommandStatus) -> CommandStatus {
    fn rank(status: CommandStatus) -> u8 {
        match status {
            CommandStatus::Completed => 0,
            CommandStatus::TimedOut => 1,
            CommandStatus::Error => 2,
            CommandStatus::ProcessExited => 3,
        }
    }
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

fn status_note(result: &CommandResult) -> Option<String> {
    let secs = result.elapsed.as_secs_f64();
    let note = match result.status {
        CommandStatus::Completed if result.truncated => "(output truncated)".to_string(),
        CommandStatus::Completed => return None,
        CommandStatus::TimedOut => {
            format!("(command timed out after {secs:.1}s; output above is partial)")
        }
        CommandStatus::ProcessExited => "(debugger exited; session closed)".to_string(),
        CommandStatus::Error => "(could not communicate with debugger)".to_string(),
    };
    Some(note)
}

fn render_session_list(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return "No active sessions.".to_string();
    }
    let now = Utc::now();
    let mut text = format!("{} active session(s):\n", sessions.len());
    for s in sessions {
        let pid = s
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = write!(
            text,
            "\n- {} [{}] pid {pid}, age {}, idle {}",
            s.key,
            s.state,
            SessionSummary::format_age(s.age_secs(now)),
            SessionSummary::format_age(s.idle_secs(now)),
        );
    }
    text
}

/// A dump file found by `list_dumps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Finds dump files, sorted by path. Blocking; run via `spawn_blocking`.
pub fn find_dumps(dir: &Path, recursive: bool) -> Vec<DumpFile> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %current.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if is_dump(&path) {
                found.push(DumpFile {
                    path,
                    size: meta.len(),
                });
            }
        }
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

fn is_dump(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DUMP_EXTENSION))
}

fn render_dump_list(dir: &Path, dumps: &[DumpFile]) -> String {
    if dumps.is_empty() {
        return format!("No crash dump files (*.dmp) found in {}", dir.display());
    }
    let mut text = format!(
        "Found {} crash dump file(s) in {}:\n",
        dumps.len(),
        dir.display()
    );
    for (i, dump) in dumps.iter().enumerate() {
        let mb = dump.size as f64 / (1024.0 * 1024.0);
        let _ = write!(text, "\n{}. {} ({mb:.2} MB)", i + 1, dump.path.display());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_dumps_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.dmp"), vec![0u8; 2048]).unwrap();
        std::fs::write(dir.path().join("a.DMP"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.dmp"), b"x").unwrap();

        let flat = find_dumps(dir.path(), false);
        let names: Vec<String> = flat
            .iter()
            .map(|d| d.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.DMP", "b.dmp"]);
        assert_eq!(flat[1].size, 2048);

        let deep = find_dumps(dir.path(), true);
        assert_eq!(deep.len(), 3);
    }

    #[test]
    fn test_render_dump_list() {
        let dumps = vec![DumpFile {
            path: PathBuf::from("/d/crash.dmp"),
            size: 3 * 1024 * 1024,
        }];
        let text = render_dump_list(Path::new("/d"), &dumps);
        assert!(text.starts_with("Found 1 crash dump file(s) in /d:"));
        assert!(text.contains("1. /d/crash.dmp (3.00 MB)"));

        let empty = render_dump_list(Path::new("/d"), &[]);
        assert!(empty.starts_with("No crash dump files"));
    }

    #[test]
    fn test_status_note() {
        let mut result = CommandResult {
            command: "kb".to_string(),
            lines: vec![],
            truncated: false,
            elapsed: Duration::from_millis(1500),
            status: CommandStatus::Completed,
        };
        assert!(status_note(&result).is_none());

        result.status = CommandStatus::TimedOut;
        assert_eq!(
            status_note(&result).unwrap(),
            "(command timed out after 1.5s; output above is partial)"
        );
    }

    #[test]
    fn test_worse_status() {
        use CommandStatus::*;
        assert_eq!(worse_status(Completed, Completed), Completed);
        assert_eq!(worse_status(Completed, TimedOut), TimedOut);
        assert_eq!(worse_status(TimedOut, Completed), TimedOut);
        assert_eq!(worse_status(TimedOut, Error), Error);
        assert_eq!(worse_status(Error, TimedOut), Error);
        assert_eq!(worse_status(Error, ProcessExited), ProcessExited);
    }

    #[test]
    fn test_error_kinds() {
        let key = SessionKey::new("attach:1");
        assert_eq!(
            ToolError::from(SessionError::Busy(key.clone())).kind(),
            ErrorKind::SessionBusy
        );
        assert_eq!(
            ToolError::from(SessionError::Closed(key.clone())).kind(),
            ErrorKind::SessionClosed
        );
        assert_eq!(
            ToolError::Registry(RegistryError::RegistryFull { max: 1 }).kind(),
            ErrorKind::RegistryFull
        );
        assert_eq!(ToolError::NoSession(key).kind(), ErrorKind::SessionClosed);
        assert_eq!(
            ToolError::from(DomainError::invalid_target("", "empty")).kind(),
            ErrorKind::InvalidParams
        );
    }

    #[test]
    fn test_session_list_text() {
        assert_eq!(render_session_list(&[]), "No active sessions.");
    }
}
