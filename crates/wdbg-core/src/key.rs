//! Session keys and debugger targets.
//!
//! A `Target` says what the debugger is pointed at; its `SessionKey` is the
//! canonical string used to find the session again. Equivalent spellings of
//! the same dump path (relative vs absolute, `.`/`..` segments, case on
//! Windows) collapse to one key.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Prefix used for live-attach session keys (`attach:<pid>`).
pub const ATTACH_KEY_PREFIX: &str = "attach:";

// ============================================================================
// Session Key
// ============================================================================

/// Canonical identifier for a debugger session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Wraps an already-canonical key string.
    ///
    /// Prefer `Target::key()`; this does no normalization.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this key names a live-attach target.
    #[must_use]
    pub fn is_attach(&self) -> bool {
        self.0.starts_with(ATTACH_KEY_PREFIX)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Target
// ============================================================================

/// What a debugger session is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// A crash dump file, analyzed post-mortem. The path is normalized.
    Dump { path: PathBuf },

    /// A running process, attached by PID.
    Attach { pid: u32 },
}

impl Target {
    /// Creates a dump target, normalizing the path.
    ///
    /// The path does not have to exist; existence is checked when the
    /// session opens so the error surfaces as an open failure.
    pub fn dump(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(DomainError::invalid_target("", "dump path is empty"));
        }
        Ok(Self::Dump {
            path: normalize_dump_path(path)?,
        })
    }

    /// Creates a live-attach target.
    pub fn attach(pid: u32) -> Self {
        Self::Attach { pid }
    }

    /// Parses user input: `attach:<pid>` or a dump path.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let trimmed = input.trim();
        match trimmed.strip_prefix(ATTACH_KEY_PREFIX) {
            Some(pid) => pid
                .trim()
                .parse::<u32>()
                .map(Self::attach)
                .map_err(|_| DomainError::invalid_target(input, "pid is not a number")),
            None => Self::dump(trimmed),
        }
    }

    /// Returns the canonical session key for this target.
    pub fn key(&self) -> SessionKey {
        match self {
            Self::Dump { path } => {
                let display = path.display().to_string();
                if cfg!(windows) {
                    SessionKey(display.to_lowercase())
                } else {
                    SessionKey(display)
                }
            }
            Self::Attach { pid } => SessionKey(format!("{ATTACH_KEY_PREFIX}{pid}")),
        }
    }

    /// Returns the dump path, if this is a dump target.
    pub fn dump_path(&self) -> Option<&Path> {
        match self {
            Self::Dump { path } => Some(path),
            Self::Attach { .. } => None,
        }
    }

    /// Debugger arguments that select this target.
    pub fn debugger_args(&self) -> Vec<String> {
        match self {
            Self::Dump { path } => vec!["-z".to_string(), path.display().to_string()],
            Self::Attach { pid } => vec!["-p".to_string(), pid.to_string()],
        }
    }

    /// Command that ends the debugger without harming the target.
    ///
    /// `qd` detaches from a live process instead of terminating it.
    pub fn quit_command(&self) -> &'static str {
        match self {
            Self::Dump { .. } => "q",
            Self::Attach { .. } => "qd",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dump { path } => write!(f, "dump {}", path.display()),
            Self::Attach { pid } => write!(f, "process {pid}"),
        }
    }
}

// ============================================================================
// Path Normalization
// ============================================================================

/// Makes a dump path absolute and canonical.
fn normalize_dump_path(path: &Path) -> DomainResult<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| {
        DomainError::invalid_target(path.display().to_string(), e.to_string())
    })?;
    let lexical = lexically_normalize(&absolute);

    // Canonicalize resolves symlinks and casing when the file exists; a
    // missing file keeps its lexical form and fails later at open.
    Ok(match std::fs::canonicalize(&lexical) {
        Ok(resolved) => strip_verbatim_prefix(resolved),
        Err(_) => lexical,
    })
}

/// Removes `.` and resolves `..` without touching the filesystem.
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Turns `\\?\C:\x` into `C:\x` and `\\?\UNC\srv\x` into `\\srv\x`.
fn strip_verbatim_prefix(path: PathBuf) -> PathBuf {
    let text = path.display().to_string();
    if let Some(rest) = text.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{rest}"));
    }
    match text.strip_prefix(r"\\?\") {
        Some(rest) => PathBuf::from(rest),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_key() {
        let target = Target::attach(4242);
        assert_eq!(target.key().as_str(), "attach:4242");
        assert!(target.key().is_attach());
        assert_eq!(target.quit_command(), "qd");
        assert_eq!(target.debugger_args(), vec!["-p", "4242"]);
    }

    #[test]
    fn test_parse_attach() {
        assert_eq!(Target::parse("attach:17").unwrap(), Target::attach(17));
        assert_eq!(Target::parse("  attach: 17 ").unwrap(), Target::attach(17));
        assert!(matches!(
            Target::parse("attach:abc"),
            Err(DomainError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_empty_dump_path_rejected() {
        assert!(Target::dump("").is_err());
        assert!(Target::parse("   ").is_err());
    }

    #[test]
    fn test_equivalent_paths_share_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("crash.dmp");
        std::fs::write(&dump, b"MDMP").unwrap();

        let direct = Target::dump(&dump).unwrap();
        let dotted = Target::dump(dir.path().join(".").join("sub").join("..").join("crash.dmp"))
            .unwrap();

        assert_eq!(direct.key(), dotted.key());
    }

    #[test]
    fn test_missing_dump_still_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("a").join("..").join("gone.dmp");
        let target = Target::dump(&missing).unwrap();
        let path = target.dump_path().unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("gone.dmp"));
        assert!(!path.components().any(|c| c == Component::ParentDir));
    }

    #[test]
    fn test_dump_args() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("x.dmp");
        std::fs::write(&dump, b"MDMP").unwrap();
        let target = Target::dump(&dump).unwrap();
        let args = target.debugger_args();
        assert_eq!(args.first().map(String::as_str), Some("-z"));
        assert_eq!(args.len(), 2);
        assert_eq!(target.quit_command(), "q");
    }

    #[test]
    fn test_strip_verbatim_prefix() {
        assert_eq!(
            strip_verbatim_prefix(PathBuf::from(r"\\?\C:\dumps\a.dmp")),
            PathBuf::from(r"C:\dumps\a.dmp")
        );
        assert_eq!(
            strip_verbatim_prefix(PathBuf::from(r"\\?\UNC\srv\share\a.dmp")),
            PathBuf::from(r"\\srv\share\a.dmp")
        );
        assert_eq!(
            strip_verbatim_prefix(PathBuf::from("/tmp/a.dmp")),
            PathBuf::from("/tmp/a.dmp")
        );
    }
}
