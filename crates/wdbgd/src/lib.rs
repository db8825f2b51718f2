//! wdbg Daemon - Debugger sessions and the tool server
//!
//! This crate provides the runtime behind the `windbg-mcp` binary:
//! - `runner` - one cdb child process, command I/O and completion detection
//! - `session` - a target plus its debugger, with the lifecycle state machine
//! - `registry` - session registry actor keyed by canonical session key
//! - `tools` - agent-facing tools built on the registry
//! - `server` - JSON-lines request/response loop over stdin/stdout
//! - `config` - TOML configuration
//! - `locate` - finding cdb.exe
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        windbg-mcp                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   ToolServer    │────▶│          Tools              │   │
//! │  │ (stdin/stdout)  │     │  (one task per request)     │   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │                                         │                   │
//! │                                         ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  RegistryActor  │◀────│      RegistryHandle         │   │
//! │  │ (key → slot)    │     │  (open / close / list)      │   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │                                         │                   │
//! │                                         ▼                   │
//! │                          ┌─────────────────────────────┐   │
//! │                          │  Session ─▶ DebuggerProcess │   │
//! │                          │        (cdb.exe child)      │   │
//! │                          └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod locate;
pub mod registry;
pub mod runner;
pub mod server;
pub mod session;
pub mod tools;
