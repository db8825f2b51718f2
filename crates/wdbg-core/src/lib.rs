//! wdbg Core - Shared types for debugger-driven crash dump analysis
//!
//! This crate provides the domain types shared between the daemon (wdbgd)
//! and the wire protocol (wdbg-protocol):
//! - `key` - session keys and debugger targets (dump file or live attach)
//! - `state` - the session lifecycle state machine
//! - `command` - command results and session summaries
//! - `prompt` - the cdb prompt grammar used for completion detection
//! - `sanitize` - pure cleanup of raw debugger output
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod command;
pub mod error;
pub mod key;
pub mod prompt;
pub mod sanitize;
pub mod state;

// Re-exports for convenience
pub use command::{CommandResult, CommandStatus, SessionSummary};
pub use error::{DomainError, DomainResult};
pub use key::{SessionKey, Target, ATTACH_KEY_PREFIX};
pub use prompt::{is_prompt_line, strip_prompt_prefix};
pub use sanitize::{clean, clean_lines};
pub use state::SessionState;
