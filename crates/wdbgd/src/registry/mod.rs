//! Session registry using Actor pattern.
//!
//! The registry maps canonical session keys to debugger sessions. An actor
//! owns the table; every tool call goes through a cloneable
//! `RegistryHandle`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  RegistryCommand  ┌─────────────────┐
//! │ RegistryHandle  │──────────────────▶│  RegistryActor  │
//! │ (per tool call) │   (mpsc channel)  │ HashMap<Key,    │
//! └────────┬────────┘                   │   SessionSlot>  │
//!          │                            └─────────────────┘
//!          │ create_lock per slot
//!          ▼
//! ┌─────────────────┐                   ┌─────────────────┐
//! │    Session      │──────────────────▶│ DebuggerProcess │
//! │ (state machine) │                   │  (cdb child)    │
//! └─────────────────┘                   └─────────────────┘
//! ```
//!
//! A background reaper ticks every `reap_interval` and closes sessions that
//! have been Ready and idle for longer than `idle_timeout`.
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod actor;
mod commands;
mod handle;
mod slot;

pub use actor::{RegistryActor, IDLE_THRESHOLD_SECS, MAX_SESSIONS};
pub use commands::{RegistryCommand, RegistryError, RemovalReason, SessionEvent};
pub use handle::RegistryHandle;
pub use slot::SessionSlot;

use crate::session::OpenParams;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Upper bound on the reaper tick period.
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Registry settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How new sessions are started.
    pub open_params: OpenParams,
    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,
    /// Ready sessions idle this long are closed.
    pub idle_timeout: Duration,
    /// How often the reaper runs.
    pub reap_interval: Duration,
}

impl RegistryConfig {
    /// Defaults for everything except how to start the debugger.
    pub fn new(open_params: OpenParams) -> Self {
        Self {
            open_params,
            max_sessions: MAX_SESSIONS,
            idle_timeout: Duration::from_secs(IDLE_THRESHOLD_SECS),
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Spawns the idle-session reaper
/// 4. Returns a RegistryHandle for client use
///
/// # Example
///
/// ```no_run
/// use wdbgd::registry::{spawn_registry, RegistryConfig};
/// use wdbgd::session::OpenParams;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(RegistryConfig::new(OpenParams::new("cdb.exe")));
///     let sessions = handle.list().await;
///     handle.shutdown().await;
/// }
/// ```
pub fn spawn_registry(config: RegistryConfig) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();

    let actor = RegistryActor::new(cmd_rx, config.max_sessions.max(1));
    tokio::spawn(actor.run());

    let handle = RegistryHandle::new(
        cmd_tx,
        event_tx,
        Arc::new(config.open_params),
        cancel.clone(),
    );

    spawn_reaper(handle.clone(), config.reap_interval, config.idle_timeout, cancel);

    handle
}

/// Spawn a background task that periodically reaps idle sessions.
fn spawn_reaper(
    handle: RegistryHandle,
    every: Duration,
    idle_timeout: Duration,
    cancel: CancellationToken,
) {
    let every = every.clamp(Duration::from_millis(10), MAX_REAP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Reaper stopping: registry shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = handle.reap_idle(idle_timeout).await {
                        warn!(error = %e, "Reaper stopping");
                        break;
                    }
                }
            }
        }
    });
}
