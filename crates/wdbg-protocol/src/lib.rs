//! wdbg Protocol - Wire protocol for the tool server
//!
//! This crate provides the request/response types exchanged between the
//! calling agent and the tool server, one JSON object per line.

pub mod message;
pub mod version;

pub use message::{ClientRequest, ErrorKind, ServerMessage, ToolCall, ToolOutput};
pub use version::{ProtocolVersion, VersionError};
