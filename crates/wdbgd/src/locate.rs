//! Finding the cdb executable.
//!
//! Checks the configured path first, then the standard Windows SDK and
//! Debugging Tools install locations. Performs blocking filesystem checks;
//! call it once at startup.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Program name used when nothing is found, resolved through `PATH` at
/// spawn time.
pub const FALLBACK_PROGRAM: &str = "cdb.exe";

/// Standard install locations, in preference order.
pub const DEFAULT_LOCATIONS: &[&str] = &[
    r"C:\Program Files (x86)\Windows Kits\10\Debuggers\x64\cdb.exe",
    r"C:\Program Files (x86)\Windows Kits\10\Debuggers\x86\cdb.exe",
    r"C:\Program Files\Debugging Tools for Windows (x64)\cdb.exe",
    r"C:\Program Files\Debugging Tools for Windows (x86)\cdb.exe",
];

/// Returns the first existing debugger among `configured` and `candidates`.
pub fn find_debugger<P: AsRef<Path>>(configured: Option<&Path>, candidates: &[P]) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            debug!(path = %path.display(), "Using configured debugger");
            return Some(path.to_path_buf());
        }
        warn!(path = %path.display(), "Configured debugger not found, searching defaults");
    }

    for candidate in candidates {
        let candidate: &Path = candidate.as_ref();
        if candidate.is_file() {
            return Some(candidate.to_path_buf());
        }
    }
    None
}

/// Resolves the debugger to launch.
///
/// Never fails: when nothing is found the configured path (or else the
/// bare program name) is returned, and each session open then reports a
/// launch error naming it.
pub fn resolve_debugger(configured: Option<&Path>) -> PathBuf {
    match (find_debugger(configured, DEFAULT_LOCATIONS), configured) {
        (Some(path), _) => {
            info!(path = %path.display(), "Found debugger");
            path
        }
        (None, Some(path)) => path.to_path_buf(),
        (None, None) => {
            warn!(
                "cdb not found in default locations; relying on PATH for {}",
                FALLBACK_PROGRAM
            );
            PathBuf::from(FALLBACK_PROGRAM)
        }
    }
}
