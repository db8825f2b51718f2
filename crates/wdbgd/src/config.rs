//! Server configuration.
//!
//! Loaded from an optional TOML file, then overridden by command-line
//! flags. Every field has a default, so an empty file is valid.
//!
//! ```toml
//! cdb_path = 'C:\Program Files (x86)\Windows Kits\10\Debuggers\x64\cdb.exe'
//! symbols_path = 'srv*C:\symbols*https://msdl.microsoft.com/download/symbols'
//! command_timeout_secs = 30
//! idle_timeout_secs = 1800
//! max_sessions = 16
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::locate::resolve_debugger;
use crate::registry::RegistryConfig;
use crate::runner::MAX_COMMAND_TIMEOUT;
use crate::session::OpenParams;

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tool server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Explicit cdb path. Searched in standard locations when unset.
    pub cdb_path: Option<PathBuf>,
    /// Symbol search path passed to every session.
    pub symbols_path: Option<String>,
    /// Default per-command timeout.
    pub command_timeout_secs: u64,
    /// Time allowed for a debugger to load its target.
    pub startup_timeout_secs: u64,
    /// Ready sessions idle this long are closed.
    pub idle_timeout_secs: u64,
    /// How often idle sessions are looked for.
    pub reap_interval_secs: u64,
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
    /// Quiet period after a trailing prompt that completes a command.
    pub prompt_idle_ms: u64,
    /// Working directory for debugger processes.
    pub working_dir: Option<PathBuf>,
    /// Extra arguments for every debugger launch.
    pub extra_args: Vec<String>,
    /// Debug-level logging, mirrored to stderr.
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cdb_path: None,
            symbols_path: None,
            command_timeout_secs: 30,
            startup_timeout_secs: 120,
            idle_timeout_secs: 30 * 60,
            reap_interval_secs: 30,
            max_sessions: crate::registry::MAX_SESSIONS,
            prompt_idle_ms: 2000,
            working_dir: None,
            extra_args: Vec::new(),
            verbose: false,
        }
    }
}

impl ServerConfig {
    /// Parses TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Rejects values that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_secs = MAX_COMMAND_TIMEOUT.as_secs();
        for (name, value) in [
            ("command_timeout_secs", self.command_timeout_secs),
            ("startup_timeout_secs", self.startup_timeout_secs),
            ("reap_interval_secs", self.reap_interval_secs),
        ] {
            if value == 0 || value > max_secs {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 1 and {max_secs}"
                )));
            }
        }
        if self.prompt_idle_ms > MAX_COMMAND_TIMEOUT.as_millis() as u64 {
            return Err(ConfigError::Invalid(format!(
                "prompt_idle_ms must be at most {}",
                MAX_COMMAND_TIMEOUT.as_millis()
            )));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Session launch settings, resolving the debugger location.
    pub fn open_params(&self) -> OpenParams {
        OpenParams {
            debugger: resolve_debugger(self.cdb_path.as_deref()),
            symbols_path: self.symbols_path.clone(),
            extra_args: self.extra_args.clone(),
            working_dir: self.working_dir.clone(),
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            prompt_idle: Duration::from_millis(self.prompt_idle_ms),
        }
    }

    /// Registry settings.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            open_params: self.open_params(),
            max_sessions: self.max_sessions,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs),
        }
    }
}
