//! Session lifecycle state machine.
//!
//! ```text
//!  Starting ──▶ Ready ◀──▶ Busy
//!     │           │         │
//!     │           ▼         ▼
//!     └──────▶ Closing ──▶ Closed
//!                 ▲
//!  Ready ─────────┴──────▶ Closed   (process found dead)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a debugger session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Debugger launched, startup banner and dump load still being drained.
    #[default]
    Starting,

    /// Idle and accepting commands.
    Ready,

    /// A command is in flight; new commands are rejected.
    Busy,

    /// Termination in progress.
    Closing,

    /// Process released. Terminal state, never reused.
    Closed,
}

impl SessionState {
    /// Returns the display label for this state.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Returns true if a session in this state may be handed out to callers.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Ready | Self::Busy)
    }

    /// Returns true once the session is on its way out or gone.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Returns true if the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Starting, Ready)
                | (Starting, Closing)
                | (Ready, Busy)
                | (Busy, Ready)
                | (Ready, Closing)
                | (Busy, Closing)
                | (Ready, Closed)
                | (Busy, Closed)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
