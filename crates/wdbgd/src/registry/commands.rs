//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `SessionEvent`: Events published by the registry for subscribers
//!
//! The actor only manages the key → slot table. Slow work (starting and
//! stopping debuggers) happens in the calling task, outside the actor.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

use wdbg_core::{SessionKey, SessionSummary};

use super::slot::SessionSlot;
use crate::session::{Session, SessionError};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Get the slot for a key, creating an empty one if absent.
    ///
    /// # Errors
    /// - `RegistryError::RegistryFull` if a new slot would exceed capacity
    Acquire {
        key: SessionKey,
        respond_to: oneshot::Sender<Result<Arc<SessionSlot>, RegistryError>>,
    },

    /// Get the slot for a key without creating one.
    Lookup {
        key: SessionKey,
        respond_to: oneshot::Sender<Option<Arc<SessionSlot>>>,
    },

    /// Remove a slot from the table and mark it detached.
    Detach {
        key: SessionKey,
        respond_to: oneshot::Sender<Option<Arc<SessionSlot>>>,
    },

    /// Summaries of every slot, sorted by key.
    List {
        respond_to: oneshot::Sender<Vec<SessionSummary>>,
    },

    /// Remove idle and dead sessions. The returned sessions are already
    /// out of the table; the caller finishes closing them.
    Reap {
        idle_threshold: Duration,
        respond_to: oneshot::Sender<Vec<(Arc<Session>, RemovalReason)>>,
    },

    /// Detach every slot and stop the actor.
    Shutdown {
        respond_to: oneshot::Sender<Vec<Arc<SessionSlot>>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registry has reached maximum capacity.
    #[error("Registry full: maximum {max} sessions")]
    RegistryFull { max: usize },

    /// The actor has stopped.
    #[error("Registry channel closed")]
    ChannelClosed,

    /// Opening or using the session failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

// ============================================================================
// Session Events
// ============================================================================

/// Events published by the registry.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A debugger session became ready.
    Opened { key: SessionKey, pid: Option<u32> },

    /// A session was removed and its debugger stopped.
    Closed {
        key: SessionKey,
        reason: RemovalReason,
    },
}

/// Reason a session was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// `close_session` was called.
    Explicit,
    /// Ready with no activity for longer than the idle timeout.
    Idle,
    /// The debugger exited on its own.
    ProcessExited,
    /// Server shutdown.
    Shutdown,
}

impl RemovalReason {
    /// Returns the display label for this reason.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Idle => "idle",
            Self::ProcessExited => "process_exited",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
