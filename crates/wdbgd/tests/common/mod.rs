//! Shared helpers: a fake cdb written as a POSIX shell script.
//!
//! The script prints the real banner and prompt shapes, echoes `.echo`
//! arguments, and has a few magic commands:
//! - `!analyze -v` prints a short analysis
//! - `slow...` sleeps 2 seconds before answering
//! - `crash` exits with code 3
//! - `q` / `qd` exit cleanly
//!
//! Dump names containing `die-on-start` exit during startup; names
//! containing `hang-on-start` never reach the prompt. Every launch appends
//! a line to `spawn.log`.
//!
//! [`FakeDebugger::without_markers`] builds a script that swallows `.echo`
//! lines, so commands can only complete through the idle-prompt rule.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use wdbgd::registry::RegistryConfig;
use wdbgd::session::OpenParams;

const SCRIPT: &str = r#"#!/bin/sh
echo "spawn $$ $*" >> '__SPAWN_LOG__'
printf '\nMicrosoft (R) Windows Debugger Version 10.0.22621.2428 AMD64\n'
printf 'Copyright (c) Microsoft Corporation. All rights reserved.\n\n'
case "$1" in
  -z) printf 'Loading Dump File [%s]\n' "$2" ;;
  -p) printf 'Attaching to process %s\n' "$2" ;;
esac
case "$2" in
  *die-on-start*) printf 'Could not open dump file\n'; exit 5 ;;
  *hang-on-start*) exec sleep 30 ;;
esac
printf '0:000> '
while IFS= read -r line; do
  case "$line" in
    ".echo "*)
      if [ '__ECHO__' = on ]; then printf '%s\n' "${line#.echo }"; else continue; fi
      ;;
    q|qd) exit 0 ;;
    "!analyze -v")
      printf '*******************************************************************************\n'
      printf 'FAULTING_IP: \n'
      printf 'fakeapp!main+0x10\n'
      printf 'EXCEPTION_CODE: (NTSTATUS) 0xc0000005 - Access violation\n'
      ;;
    slow*) sleep 2; printf 'slow done\n' ;;
    crash) exit 3 ;;
    *) printf 'output for %s\n' "$line" ;;
  esac
  printf '0:000> '
done
"#;

/// A temp directory holding the fake debugger and dump files.
pub struct FakeDebugger {
    pub dir: TempDir,
    pub program: PathBuf,
    pub spawn_log: PathBuf,
}

impl FakeDebugger {
    pub fn new() -> Self {
        Self::build(true)
    }

    /// A debugger that never answers `.echo`.
    pub fn without_markers() -> Self {
        Self::build(false)
    }

    fn build(echo_markers: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let spawn_log = dir.path().join("spawn.log");
        let program = dir.path().join("fake-cdb.sh");

        let script = SCRIPT
            .replace("__SPAWN_LOG__", &spawn_log.display().to_string())
            .replace("__ECHO__", if echo_markers { "on" } else { "off" });
        std::fs::write(&program, script).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            dir,
            program,
            spawn_log,
        }
    }

    /// Creates a dump file and returns its path.
    pub fn dump(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"MDMP fake dump").unwrap();
        path
    }

    /// Number of debugger launches so far.
    pub fn spawn_count(&self) -> usize {
        std::fs::read_to_string(&self.spawn_log)
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }

    pub fn open_params(&self) -> OpenParams {
        let mut params = OpenParams::new(&self.program);
        params.startup_timeout = Duration::from_secs(10);
        params.prompt_idle = Duration::from_secs(2);
        params
    }

    /// Registry settings with the background reaper effectively off.
    pub fn registry_config(&self) -> RegistryConfig {
        let mut config = RegistryConfig::new(self.open_params());
        config.reap_interval = Duration::from_secs(3600);
        config
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// True if a process with this pid still exists (and isn't a zombie we
/// already reaped).
pub fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}
