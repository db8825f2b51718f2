//! Command results and session summaries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SessionKey, SessionState};

// ============================================================================
// Command Status
// ============================================================================

/// How a debugger command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// The completion sentinel was seen.
    Completed,

    /// The deadline passed first. The process is left running and the
    /// output is whatever arrived before the deadline.
    TimedOut,

    /// The debugger exited while the command was running.
    ProcessExited,

    /// Writing the command or reading its output failed.
    Error,
}

impl CommandStatus {
    /// Returns the display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::ProcessExited => "process_exited",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Command Result
// ============================================================================

/// Output of one debugger command, after sanitization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// The command as sent.
    pub command: String,

    /// Cleaned output lines.
    pub lines: Vec<String>,

    /// True if output was cut at the size cap.
    pub truncated: bool,

    /// Wall time from write to completion.
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,

    pub status: CommandStatus,
}

impl CommandResult {
    /// Returns the output joined with newlines.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Returns true if the command ran to completion.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == CommandStatus::Completed
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Session Summary
// ============================================================================

/// Point-in-time view of a session for diagnostics and `list_sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: SessionKey,
    pub state: SessionState,

    /// Debugger process ID, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionSummary {
    /// Seconds since the session was created.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_seconds().max(0)
    }

    /// Seconds since the last command.
    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_activity)
            .num_seconds()
            .max(0)
    }

    /// Formats an age in seconds compactly ("42s", "3m 5s", "2h 10m").
    pub fn format_age(secs: i64) -> String {
        if secs < 60 {
            format!("{secs}s")
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn sample_result(status: CommandStatus) -> CommandResult {
        CommandResult {
            command: "lm".to_string(),
            lines: vec!["start end module name".to_string(), "ntdll".to_string()],
            truncated: false,
            elapsed: Duration::from_millis(1500),
            status,
        }
    }

    #[test]
    fn test_result_text_joins_lines() {
        let result = sample_result(CommandStatus::Completed);
        assert_eq!(result.text(), "start end module name\nntdll");
        assert!(result.is_completed());
        assert!(!sample_result(CommandStatus::TimedOut).is_completed());
    }

    #[test]
    fn test_result_serializes_elapsed_as_millis() {
        let json = serde_json::to_value(sample_result(CommandStatus::TimedOut)).unwrap();
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(json["status"], "timed_out");

        let back: CommandResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.elapsed, Duration::from_millis(1500));
    }

    #[test]
    fn test_summary_ages() {
        let now = Utc::now();
        let summary = SessionSummary {
            key: SessionKey::new("c:\\dumps\\a.dmp"),
            state: SessionState::Ready,
            pid: Some(10),
            created_at: now - ChronoDuration::seconds(125),
            last_activity: now - ChronoDuration::seconds(5),
        };
        assert_eq!(summary.age_secs(now), 125);
        assert_eq!(summary.idle_secs(now), 5);
    }

    #[test]
    fn test_format_age() {
        assert_eq!(SessionSummary::format_age(42), "42s");
        assert_eq!(SessionSummary::format_age(185), "3m 5s");
        assert_eq!(SessionSummary::format_age(7800), "2h 10m");
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(CommandStatus::ProcessExited.to_string(), "process_exited");
        assert_eq!(
            serde_json::to_string(&CommandStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}
