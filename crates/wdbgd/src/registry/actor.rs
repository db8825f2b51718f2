//! Registry actor - owns the session table and processes commands.
//!
//! The actor is the single owner of the key → slot map. Every command is
//! handled to completion before the next one, so slot creation, removal and
//! the capacity check never race each other. Nothing here awaits process
//! I/O: opening and closing debuggers happens in the callers.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the caller went away)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use wdbg_core::{SessionKey, SessionSummary};

use super::commands::{RegistryCommand, RegistryError, RemovalReason};
use super::slot::SessionSlot;
use crate::session::Session;

// ============================================================================
// Resource Limits
// ============================================================================

/// Default maximum number of concurrent sessions.
pub const MAX_SESSIONS: usize = 16;

/// Default idle time before a Ready session is reaped.
pub const IDLE_THRESHOLD_SECS: u64 = 30 * 60;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor.
///
/// # Ownership
///
/// The actor owns `slots`. Slots are shared out as `Arc`s; a slot removed
/// from the map is detached so stale holders can tell.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    slots: HashMap<SessionKey, Arc<SessionSlot>>,
    max_sessions: usize,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, max_sessions: usize) -> Self {
        Self {
            receiver,
            slots: HashMap::new(),
            max_sessions,
        }
    }

    /// Runs the actor loop until `Shutdown` or until every handle is gone.
    pub async fn run(mut self) {
        info!(max_sessions = self.max_sessions, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            if !self.handle_command(cmd) {
                break;
            }
        }

        info!("Registry actor stopped (sessions: {})", self.slots.len());
    }

    /// Dispatches one command. Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: RegistryCommand) -> bool {
        match cmd {
            RegistryCommand::Acquire { key, respond_to } => {
                let _ = respond_to.send(self.handle_acquire(key));
            }
            RegistryCommand::Lookup { key, respond_to } => {
                let _ = respond_to.send(self.slots.get(&key).cloned());
            }
            RegistryCommand::Detach { key, respond_to } => {
                let _ = respond_to.send(self.remove(&key));
            }
            RegistryCommand::List { respond_to } => {
                let _ = respond_to.send(self.handle_list());
            }
            RegistryCommand::Reap {
                idle_threshold,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_reap(idle_threshold));
            }
            RegistryCommand::Shutdown { respond_to } => {
                let drained: Vec<Arc<SessionSlot>> = self
                    .slots
                    .drain()
                    .map(|(_, slot)| {
                        slot.detach();
                        slot
                    })
                    .collect();
                info!(sessions = drained.len(), "Registry shutting down");
                let _ = respond_to.send(drained);
                return false;
            }
        }
        true
    }

    fn handle_acquire(&mut self, key: SessionKey) -> Result<Arc<SessionSlot>, RegistryError> {
        if let Some(slot) = self.slots.get(&key) {
            return Ok(Arc::clone(slot));
        }

        if self.slots.len() >= self.max_sessions {
            // Empty slots left behind by failed opens don't count.
            let unused: Vec<SessionKey> = self
                .slots
                .iter()
                .filter(|(_, slot)| is_unused(slot))
                .map(|(key, _)| key.clone())
                .collect();
            for unused_key in unused {
                self.remove(&unused_key);
            }
            if self.slots.len() >= self.max_sessions {
                return Err(RegistryError::RegistryFull {
                    max: self.max_sessions,
                });
            }
        }

        debug!(%key, "Creating session slot");
        let slot = Arc::new(SessionSlot::new(key.clone()));
        self.slots.insert(key, Arc::clone(&slot));
        Ok(slot)
    }

    fn handle_list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.slots.values().filter_map(|slot| slot.summary()).collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    fn handle_reap(&mut self, idle_threshold: Duration) -> Vec<(Arc<Session>, RemovalReason)> {
        let now = Utc::now();
        let mut removed = Vec::new();
        let mut doomed = Vec::new();

        for (key, slot) in &self.slots {
            if is_unused(slot) {
                doomed.push((key.clone(), None));
                continue;
            }
            let Some(session) = slot.live() else {
                continue;
            };
            if session.is_dead() {
                doomed.push((key.clone(), Some((session, RemovalReason::ProcessExited))));
            } else if session.try_begin_reap(idle_threshold, now) {
                doomed.push((key.clone(), Some((session, RemovalReason::Idle))));
            }
        }

        for (key, entry) in doomed {
            if let Some(slot) = self.remove(&key) {
                slot.take();
            }
            if let Some((session, reason)) = entry {
                info!(%key, %reason, "Removing session");
                removed.push((session, reason));
            }
        }

        removed
    }

    fn remove(&mut self, key: &SessionKey) -> Option<Arc<SessionSlot>> {
        let slot = self.slots.remove(key)?;
        slot.detach();
        debug!(%key, "Session slot removed");
        Some(slot)
    }
}

/// An empty slot nobody is opening a session in.
fn is_unused(slot: &SessionSlot) -> bool {
    slot.is_empty() && slot.create_lock.try_lock().is_ok()
}
